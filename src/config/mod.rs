//! Configuration module
//!
//! Loads the three collaborator files the engine consumes: the command
//! library, the test plans, and the operator-entered run parameters.
//! All three are YAML, matching the documents the bench tooling
//! already produces.

mod plan;

pub use plan::{CommandLibrary, RunParameters, TestPlans};

use crate::core::condition::ConditionError;
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// Offending path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Document is not valid YAML or has the wrong shape.
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A condition block names a type the engine does not know.
    #[error("unknown condition type '{kind}' in command {command}")]
    UnknownConditionType {
        /// The unrecognized `type` string.
        kind: String,
        /// Library key of the offending command.
        command: String,
    },

    /// A condition block is missing a required field.
    #[error("condition for command {command} is missing field '{field}'")]
    MissingConditionField {
        /// Library key of the offending command.
        command: String,
        /// Name of the missing field.
        field: &'static str,
    },

    /// A condition was constructed with invalid bounds.
    #[error("condition for command {command} is invalid: {source}")]
    InvalidCondition {
        /// Library key of the offending command.
        command: String,
        /// Underlying construction error.
        #[source]
        source: ConditionError,
    },

    /// A reply prefix no classified reply could ever match.
    #[error(
        "response expectation '{prefix}' for command {command} must be a single non-empty token"
    )]
    UnmatchablePrefix {
        /// Library key of the offending command.
        command: String,
        /// The expectation as given.
        prefix: String,
    },

    /// A required run parameter is absent or empty.
    #[error("run parameter '{0}' is missing or empty")]
    MissingParameter(&'static str),

    /// The selected plan does not exist in the plan file.
    #[error("test plan '{0}' not found")]
    PlanNotFound(String),
}
