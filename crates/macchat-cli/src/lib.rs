//! MacChat CLI library
//!
//! Command handlers, configuration loading and console rendering for the
//! `macchat` binary.

pub mod cli;
pub mod commands;
pub mod config;
pub mod console;
pub mod error;

pub use cli::{Cli, Commands};
pub use config::AppConfig;
pub use error::{CliError, Result};
