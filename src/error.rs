// src/error.rs

//! Error types shared by the compose library

use std::path::PathBuf;
use thiserror::Error;

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while producing a compose
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration failed validation; every message is reported
    #[error("configuration is invalid:\n  {}", .0.join("\n  "))]
    Config(Vec<String>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("invalid regular expression: {0}")]
    Regex(#[from] regex::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A required host tool is missing
    #[error("required tool not found: {tool} (install: {package})")]
    ToolNotFound { tool: String, package: String },

    /// An external command exited unsuccessfully
    #[error("command `{command}` failed with {status}; see {}", .log.display())]
    CommandFailed {
        command: String,
        status: String,
        log: PathBuf,
    },

    #[error("SCM error: {0}")]
    Scm(String),

    /// Attempt to rewrite a terminal compose status
    #[error("cannot change compose status from {from} to {to}")]
    StatusTransition { from: String, to: String },

    /// Format string references a key outside the substitution set
    #[error("format string '{format}' references unknown key '{key}'")]
    MissingFormatKey { format: String, key: String },

    #[error("phase {phase} failed: {message}")]
    Phase { phase: String, message: String },

    #[error("RPM header error: {0}")]
    Rpm(String),
}

impl Error {
    /// Build a phase error with a message
    pub fn phase(phase: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Phase {
            phase: phase.into(),
            message: message.into(),
        }
    }
}
