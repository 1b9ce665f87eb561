use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read env file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid env file: {0}")]
    EnvSyntax(String),

    #[error("Missing required setting `{0}`")]
    Missing(String),

    #[error("Invalid value `{value}` for `{key}`: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Could not determine the home directory for the default state path")]
    NoHomeDir,
}

impl SettingsError {
    pub fn invalid(key: &str, value: &str, reason: impl Into<String>) -> Self {
        SettingsError::Invalid {
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}
