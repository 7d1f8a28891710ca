//! Command library, test plan, and run parameter documents
//!
//! The YAML shapes here follow the bench tooling's files: a command
//! library keyed by number, a plan file mapping plan names to ordered
//! `step name -> command number` entries, and a run parameter file
//! carrying the selected plan plus the device identity strings.

use super::ConfigError;
use crate::core::condition::Condition;
use crate::core::orchestrator::{CommandEntry, CommandLookup, PlanLookup, RunIdentity, TestStep};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, Deserialize)]
struct RawLibraryFile {
    #[serde(rename = "Command_Line")]
    commands: BTreeMap<u64, RawCommand>,
}

#[derive(Debug, Deserialize)]
struct RawCommand {
    #[serde(rename = "Title")]
    title: String,
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Command_Sends")]
    command_sends: String,
    #[serde(rename = "Response_Expectation")]
    response_expectation: String,
    #[serde(rename = "Condition")]
    condition: RawCondition,
}

#[derive(Debug, Deserialize)]
struct RawCondition {
    #[serde(rename = "type")]
    kind: String,
    expected: Option<String>,
    low: Option<i64>,
    high: Option<i64>,
    // Present on deferred entries in the legacy files; the marker
    // mapping is fixed in the engine, so the value is not consumed.
    #[serde(default)]
    #[allow(dead_code)]
    status: Option<String>,
}

impl RawCondition {
    fn into_condition(self, command: &str) -> Result<Condition, ConfigError> {
        use crate::core::condition::DeferredKind;

        let missing = |field| ConfigError::MissingConditionField {
            command: command.to_string(),
            field,
        };

        match self.kind.as_str() {
            "equal" => Ok(Condition::Equal {
                expected: self.expected.ok_or_else(|| missing("expected"))?,
            }),
            "between" => {
                let low = self.low.ok_or_else(|| missing("low"))?;
                let high = self.high.ok_or_else(|| missing("high"))?;
                Condition::between(low, high).map_err(|source| ConfigError::InvalidCondition {
                    command: command.to_string(),
                    source,
                })
            }
            "valid timestamp" => Ok(Condition::Timestamp),
            "valid format_mac" => Ok(Condition::MacAddress),
            "valid format_rcode" => Ok(Condition::Rcode),
            "asynchrony" => Ok(Condition::Deferred(DeferredKind::AsyncCompletion)),
            "restore" => Ok(Condition::Deferred(DeferredKind::Restore)),
            "therapy start" => Ok(Condition::Deferred(DeferredKind::TherapyStart)),
            "therapy stop" => Ok(Condition::Deferred(DeferredKind::TherapyStop)),
            other => Err(ConfigError::UnknownConditionType {
                kind: other.to_string(),
                command: command.to_string(),
            }),
        }
    }
}

/// The command library: immutable entries looked up by their numeric
/// key (as a string, matching the plan file's references).
#[derive(Debug, Clone, Default)]
pub struct CommandLibrary {
    entries: HashMap<String, CommandEntry>,
}

impl CommandLibrary {
    /// Load the library from a YAML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_yaml(&read(path.as_ref())?)
    }

    /// Parse the library from a YAML document.
    pub fn from_yaml(document: &str) -> Result<Self, ConfigError> {
        let raw: RawLibraryFile = serde_yaml::from_str(document)?;
        let mut entries = HashMap::with_capacity(raw.commands.len());
        for (number, command) in raw.commands {
            let key = number.to_string();
            // Replies are classified by splitting at the first space, so
            // an expectation with whitespace (or nothing) can never match.
            if command.response_expectation.is_empty()
                || command.response_expectation.contains(char::is_whitespace)
            {
                return Err(ConfigError::UnmatchablePrefix {
                    command: key,
                    prefix: command.response_expectation,
                });
            }
            let condition = command.condition.into_condition(&key)?;
            entries.insert(
                key,
                CommandEntry {
                    id: command.id,
                    outgoing: command.command_sends,
                    expected_prefix: command.response_expectation,
                    title: command.title,
                    condition,
                },
            );
        }
        Ok(Self { entries })
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the library is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CommandLookup for CommandLibrary {
    fn get(&self, command_id: &str) -> Option<CommandEntry> {
        self.entries.get(command_id).cloned()
    }
}

#[derive(Debug, Deserialize)]
struct RawPlanFile {
    // Each step entry is a single-key `name: number` map; entries with
    // a null number are placeholders and are dropped.
    #[serde(rename = "test_cases")]
    plans: BTreeMap<String, Vec<BTreeMap<String, Option<u64>>>>,
}

/// Named, ordered test plans.
#[derive(Debug, Clone, Default)]
pub struct TestPlans {
    plans: HashMap<String, Vec<TestStep>>,
}

impl TestPlans {
    /// Load the plans from a YAML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_yaml(&read(path.as_ref())?)
    }

    /// Parse the plans from a YAML document.
    pub fn from_yaml(document: &str) -> Result<Self, ConfigError> {
        let raw: RawPlanFile = serde_yaml::from_str(document)?;
        let mut plans = HashMap::with_capacity(raw.plans.len());
        for (name, entries) in raw.plans {
            let mut steps = Vec::new();
            for entry in entries {
                for (step_name, number) in entry {
                    if let Some(number) = number {
                        steps.push(TestStep {
                            step_name,
                            command_id: number.to_string(),
                        });
                    }
                }
            }
            plans.insert(name, steps);
        }
        Ok(Self { plans })
    }

    /// Names of all defined plans.
    pub fn plan_names(&self) -> Vec<&str> {
        self.plans.keys().map(String::as_str).collect()
    }
}

impl PlanLookup for TestPlans {
    fn get(&self, plan_name: &str) -> Option<Vec<TestStep>> {
        self.plans.get(plan_name).cloned()
    }
}

#[derive(Debug, Deserialize)]
struct RawRunParameters {
    selected_test_plan: String,
    device_sn: String,
    fw_version: String,
    sw_version: String,
    wifi_version: String,
}

/// Operator-entered run parameters: the selected plan and the identity
/// strings the identity-lookup conditions validate against.
#[derive(Debug, Clone)]
pub struct RunParameters {
    /// Name of the plan to execute.
    pub selected_test_plan: String,
    /// Identity strings for this device.
    pub identity: RunIdentity,
}

impl RunParameters {
    /// Load and validate the parameters from a YAML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_yaml(&read(path.as_ref())?)
    }

    /// Parse and validate the parameters from a YAML document.
    ///
    /// All five fields are required and must be non-empty.
    pub fn from_yaml(document: &str) -> Result<Self, ConfigError> {
        let raw: RawRunParameters = serde_yaml::from_str(document)?;
        let require = |value: String, name: &'static str| {
            if value.trim().is_empty() {
                Err(ConfigError::MissingParameter(name))
            } else {
                Ok(value)
            }
        };
        Ok(Self {
            selected_test_plan: require(raw.selected_test_plan, "selected_test_plan")?,
            identity: RunIdentity {
                device_sn: require(raw.device_sn, "device_sn")?,
                fw_version: require(raw.fw_version, "fw_version")?,
                sw_version: require(raw.sw_version, "sw_version")?,
                wifi_version: require(raw.wifi_version, "wifi_version")?,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::condition::DeferredKind;

    const LIBRARY: &str = r#"
Command_Line:
  1:
    Title: "Get serial number"
    ID: "Get_SN_Number"
    Command_Sends: "get_sn"
    Response_Expectation: "[get_sn+ok]"
    Condition:
      type: "equal"
      expected: "PLACEHOLDER"
  2:
    Title: "Battery level"
    ID: "Get_Battery"
    Command_Sends: "get_batt"
    Response_Expectation: "[get_batt+ok]"
    Condition:
      type: "between"
      low: 20
      high: 100
  3:
    Title: "Factory restore"
    ID: "Do_Restore"
    Command_Sends: "restore_all"
    Response_Expectation: "[restore_all+ok]"
    Condition:
      type: "restore"
      status: "Reboot has been complete."
"#;

    const PLANS: &str = r#"
test_cases:
  Smoke:
    - Check_SN: 1
    - Check_Battery: 2
    - Placeholder: null
  Full:
    - Check_SN: 1
    - Check_Battery: 2
    - Restore: 3
"#;

    const PARAMS: &str = r#"
selected_test_plan: "Smoke"
device_sn: "SN001"
fw_version: "2.4.1"
sw_version: "1.9"
wifi_version: "0.7"
"#;

    #[test]
    fn library_parses_conditions() {
        let library = CommandLibrary::from_yaml(LIBRARY).unwrap();
        assert_eq!(library.len(), 3);

        let entry = library.get("1").unwrap();
        assert_eq!(entry.id, "Get_SN_Number");
        assert_eq!(entry.outgoing, "get_sn");
        assert_eq!(entry.expected_prefix, "[get_sn+ok]");

        let battery = library.get("2").unwrap();
        assert_eq!(battery.condition, Condition::Between { low: 20, high: 100 });

        let restore = library.get("3").unwrap();
        assert_eq!(
            restore.condition,
            Condition::Deferred(DeferredKind::Restore)
        );
        assert!(library.get("99").is_none());
    }

    #[test]
    fn unknown_condition_type_is_rejected() {
        let doc = r#"
Command_Line:
  7:
    Title: "Bad"
    ID: "Bad"
    Command_Sends: "bad"
    Response_Expectation: "[bad+ok]"
    Condition:
      type: "sometimes equal"
"#;
        let err = CommandLibrary::from_yaml(doc).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::UnknownConditionType { ref kind, ref command }
                if kind == "sometimes equal" && command == "7"
        ));
    }

    #[test]
    fn space_in_expected_prefix_is_rejected() {
        let doc = r#"
Command_Line:
  9:
    Title: "Therapy stop"
    ID: "Therapy_Stop"
    Command_Sends: "therapy off"
    Response_Expectation: "[therapy off+ok]"
    Condition:
      type: "therapy stop"
"#;
        assert!(matches!(
            CommandLibrary::from_yaml(doc).unwrap_err(),
            ConfigError::UnmatchablePrefix { ref command, ref prefix }
                if command == "9" && prefix == "[therapy off+ok]"
        ));
    }

    #[test]
    fn inverted_between_bounds_are_rejected() {
        let doc = r#"
Command_Line:
  8:
    Title: "Bad range"
    ID: "Bad_Range"
    Command_Sends: "bad"
    Response_Expectation: "[bad+ok]"
    Condition:
      type: "between"
      low: 50
      high: 10
"#;
        assert!(matches!(
            CommandLibrary::from_yaml(doc).unwrap_err(),
            ConfigError::InvalidCondition { .. }
        ));
    }

    #[test]
    fn plans_preserve_step_order_and_drop_nulls() {
        let plans = TestPlans::from_yaml(PLANS).unwrap();
        let smoke = plans.get("Smoke").unwrap();
        assert_eq!(smoke.len(), 2);
        assert_eq!(smoke[0].step_name, "Check_SN");
        assert_eq!(smoke[0].command_id, "1");
        assert_eq!(smoke[1].step_name, "Check_Battery");
        assert!(plans.get("Nope").is_none());
    }

    #[test]
    fn run_parameters_require_all_fields() {
        let params = RunParameters::from_yaml(PARAMS).unwrap();
        assert_eq!(params.selected_test_plan, "Smoke");
        assert_eq!(params.identity.device_sn, "SN001");

        let empty = PARAMS.replace("\"SN001\"", "\"\"");
        assert!(matches!(
            RunParameters::from_yaml(&empty).unwrap_err(),
            ConfigError::MissingParameter("device_sn")
        ));
    }

    #[test]
    fn files_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("commands.yml");
        std::fs::write(&path, LIBRARY).unwrap();
        let library = CommandLibrary::from_path(&path).unwrap();
        assert_eq!(library.len(), 3);

        assert!(matches!(
            CommandLibrary::from_path(dir.path().join("absent.yml")).unwrap_err(),
            ConfigError::Read { .. }
        ));
    }
}
