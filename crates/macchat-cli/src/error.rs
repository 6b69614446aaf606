//! Error handling for the MacChat CLI

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("MacChat core error: {0}")]
    Core(#[from] macchat_core::MacchatError),

    #[error("Bluetooth error: {0}")]
    Ble(#[from] macchat_ble::BleError),

    #[error("Configuration error: {0}")]
    Config(#[from] macchat_core::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    #[error("Demo failed: {0}")]
    Demo(String),
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> Self {
        CliError::Demo(err.to_string())
    }
}
