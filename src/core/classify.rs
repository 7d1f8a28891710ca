//! Reply classification
//!
//! Device replies are single text lines of the form `prefix value...`,
//! e.g. `[get_sn+ok] 1A2B3C`. The prefix is the leading space-delimited
//! token and carries the command's acknowledgement; everything after the
//! first space is the payload.

/// A classified reply line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Leading token of the reply, up to the first space.
    pub prefix: String,
    /// Remainder after the first space, if any.
    pub value: Option<String>,
}

impl Reply {
    /// Reassemble the original raw line.
    pub fn raw(&self) -> String {
        match &self.value {
            Some(value) => format!("{} {}", self.prefix, value),
            None => self.prefix.clone(),
        }
    }
}

/// Split a raw reply line into a prefix and an optional payload.
///
/// The split happens at the first space only; no trimming is applied
/// beyond that. An empty input yields an empty prefix and no payload.
pub fn classify(raw: &str) -> Reply {
    match raw.split_once(' ') {
        Some((prefix, value)) => Reply {
            prefix: prefix.to_string(),
            value: Some(value.to_string()),
        },
        None => Reply {
            prefix: raw.to_string(),
            value: None,
        },
    }
}
