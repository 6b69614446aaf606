//! Command-line interface definitions and parsing

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Advertise the chat service and answer whoever connects
    Respond {
        /// Local name placed in the advertisement
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Scan for responders and chat with one of them
    Connect {
        /// Seconds between scan windows
        #[arg(short, long)]
        interval: Option<u64>,
    },
    /// Run both roles over the simulated radio and exchange one message each way
    Demo,
    /// Print an example configuration file
    Config,
}
