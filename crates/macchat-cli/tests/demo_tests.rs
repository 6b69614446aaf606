//! The hardware-free demo runs to completion

use macchat_cli::commands::CommandDispatcher;
use macchat_cli::{AppConfig, Cli, Commands};

#[tokio::test(start_paused = true)]
async fn test_demo_exchanges_messages() {
    let cli = Cli {
        command: Commands::Demo,
        verbose: false,
        config: None,
    };

    CommandDispatcher::execute(cli, AppConfig::default())
        .await
        .expect("demo completes");
}

#[tokio::test]
async fn test_config_command_prints_example() {
    let cli = Cli {
        command: Commands::Config,
        verbose: false,
        config: None,
    };

    assert!(CommandDispatcher::execute(cli, AppConfig::default())
        .await
        .is_ok());
}
