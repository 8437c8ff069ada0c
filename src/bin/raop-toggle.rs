//! raop-toggle binary entry point
//!
//! Dispatches to daemon mode or subcommands based on CLI arguments.

use clap::Parser;
use color_eyre::eyre::Result;
use crossterm::style::Stylize;
use raop_toggle::logging::{self, LogTarget};
use raop_toggle::style::RaopStyle;
use raop_toggle::{cli::Args, cli::Command, commands, config::Config, daemon};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    match args.command {
        // No subcommand - show status
        None => {
            logging::init_cli();
            let config = Config::load()?;
            commands::status(&config, false).await
        }

        // Daemon mode handles its own logging (file vs stderr)
        Some(Command::Daemon {
            foreground,
            detached,
        }) => {
            let config = Config::load()?;
            if foreground {
                daemon::run(config, LogTarget::Stderr).await
            } else if detached {
                daemon::run(config, LogTarget::File).await
            } else {
                let pid = daemon::spawn_detached().await?;
                println!(
                    "{} (pid {})",
                    "Daemon started".success(),
                    pid.to_string().technical()
                );
                if let Ok(dir) = logging::log_dir() {
                    println!(
                        "{} {}",
                        "Logs:".dim(),
                        dir.join(logging::LOG_FILE_NAME).display()
                    );
                }
                Ok(())
            }
        }

        // Hybrid command (works with or without daemon)
        Some(Command::Status { json }) => {
            logging::init_cli();
            let config = Config::load()?;
            commands::status(&config, json).await
        }

        // IPC-based commands (require daemon)
        Some(Command::Toggle) => commands::toggle().await,
        Some(Command::Recheck) => commands::recheck().await,
        Some(Command::Dedupe) => commands::dedupe().await,
        Some(Command::Reload) => commands::reload().await,
        Some(Command::Shutdown) => commands::shutdown().await,

        // Local commands (no daemon needed)
        Some(Command::Detect { json }) => {
            logging::init_cli();
            let config = Config::load()?;
            commands::detect(&config, json).await
        }

        Some(Command::Validate) => {
            logging::init_cli();
            let config = Config::load()?;
            config.print_summary();
            Ok(())
        }
    }
}
