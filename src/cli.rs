//! Command-line interface definitions
//!
//! Uses clap for argument parsing with derive macros.

use clap::{Parser, Subcommand};

/// raop-toggle - AirPlay (RAOP) toggle for PipeWire and PulseAudio
///
/// Loads and unloads the RAOP discovery module and keeps duplicate AirPlay
/// speakers out of the sink list.
#[derive(Parser)]
#[command(name = "raop-toggle")]
#[command(version)]
#[command(about = "AirPlay toggle - load/unload the RAOP discovery module of PipeWire or PulseAudio")]
#[command(after_help = "\
BEHAVIOR:
  - The daemon detects the audio server through `pactl info`
  - `toggle` loads or unloads module-raop-discover
  - Modules loaded or unloaded by other tools are picked up from `pactl subscribe`
  - On PulseAudio, duplicate AirPlay sinks for the same speaker are unloaded
    after a short quiet period (hide_duplicate_sinks)

DAEMON MANAGEMENT:
  raop-toggle daemon              Run the daemon in background (detached)
  raop-toggle daemon --foreground Run in foreground with logs to stderr
  raop-toggle status              Query daemon status (or just: raop-toggle)
  raop-toggle reload              Tell daemon to reload config
  raop-toggle shutdown            Gracefully stop the daemon

ACTIONS:
  raop-toggle toggle              Enable or disable AirPlay discovery
  raop-toggle recheck             Re-detect the audio server
  raop-toggle dedupe              Unload duplicate AirPlay sinks now

LOCAL COMMANDS:
  raop-toggle detect              Detect the audio server (no daemon needed)
  raop-toggle validate            Validate config file (no daemon needed)

IPC SOCKET:
  $XDG_RUNTIME_DIR/raop-toggle.sock (or /tmp/raop-toggle-$UID.sock)")]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Run the daemon (tracks the RAOP module and duplicate sinks)
    Daemon {
        /// Run in foreground with logs to stderr
        #[arg(short, long)]
        foreground: bool,

        /// Internal: already detached, log to file
        #[arg(long, hide = true, conflicts_with = "foreground")]
        detached: bool,
    },

    /// Query daemon status via IPC
    Status {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Enable or disable AirPlay discovery
    Toggle,

    /// Re-detect the audio server
    Recheck,

    /// Unload duplicate AirPlay sinks now
    Dedupe,

    /// Tell daemon to reload config file
    Reload,

    /// Gracefully shutdown the daemon
    Shutdown,

    /// Detect the audio server (local, no daemon needed)
    Detect {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Validate config file (local, no daemon needed)
    Validate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }

    #[test]
    fn test_no_subcommand_is_accepted() {
        let args = Args::try_parse_from(["raop-toggle"]).unwrap();
        assert!(args.command.is_none());
    }

    #[test]
    fn test_detached_conflicts_with_foreground() {
        let result = Args::try_parse_from(["raop-toggle", "daemon", "--foreground", "--detached"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_status_json_flag() {
        let args = Args::try_parse_from(["raop-toggle", "status", "--json"]).unwrap();
        assert!(matches!(args.command, Some(Command::Status { json: true })));
    }
}
