//! CLI commands
//!
//! Implements local commands (detect, validate), IPC-based commands that talk
//! to the daemon (toggle, recheck, dedupe, reload, shutdown) and the hybrid
//! status command that falls back to a local probe when no daemon runs.

use color_eyre::eyre::{self, Result};
use crossterm::style::Stylize;
use serde_json::json;

use crate::audio_server::{self, AudioServer};
use crate::command::ProcessRunner;
use crate::config::Config;
use crate::ipc::{self, Request, Response};
use crate::module::ModuleController;
use crate::pactl::{AudioCtl, Pactl};
use crate::style::RaopStyle;
use crate::toggle::ToggleStatus;

// ============================================================================
// Local Commands (no daemon needed)
// ============================================================================

/// Server and module state probed directly through `pactl`
#[derive(Debug, Clone, PartialEq, Eq)]
struct LocalProbe {
    server: AudioServer,
    /// `None` when the module listing could not be read
    enabled: Option<bool>,
}

async fn probe(config: &Config) -> LocalProbe {
    let ctl = AudioCtl::new(ProcessRunner, Pactl::new(config.settings.pactl.clone()));
    let server = audio_server::detect(&ctl).await;
    let enabled = if server.is_known() {
        ModuleController::new(server).query_current(&ctl).await.ok()
    } else {
        None
    };
    LocalProbe { server, enabled }
}

/// Detect the audio server without a daemon
///
/// # Errors
/// Returns an error if JSON serialization fails.
pub async fn detect(config: &Config, json_output: bool) -> Result<()> {
    let local = probe(config).await;

    if json_output {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "server": local.server,
                "enabled": local.enabled,
            }))?
        );
        return Ok(());
    }

    if local.server.is_known() {
        println!(
            "{} {}",
            "Audio server:".dim(),
            local.server.display_name().success()
        );
        println!("{} {}", "RAOP module:".dim(), module_label(local.enabled));
    } else {
        println!("{} {}", "Audio server:".dim(), "not found".error());
        println!(
            "  Is {} installed and the audio server running?",
            config.settings.pactl.as_str().technical()
        );
    }
    Ok(())
}

fn module_label(enabled: Option<bool>) -> String {
    match enabled {
        Some(true) => "enabled".success().to_string(),
        Some(false) => "disabled".warning().to_string(),
        None => "unknown".error().to_string(),
    }
}

/// Format uptime in human-readable form
fn format_uptime(secs: u64) -> String {
    const SECS_PER_MINUTE: u64 = 60;
    const SECS_PER_HOUR: u64 = 3600;

    if secs < SECS_PER_MINUTE {
        return format!("{secs}s");
    }
    if secs < SECS_PER_HOUR {
        return format!("{mins}m", mins = secs / SECS_PER_MINUTE);
    }
    let hours = secs / SECS_PER_HOUR;
    let mins = (secs % SECS_PER_HOUR) / SECS_PER_MINUTE;
    if mins > 0 {
        format!("{hours}h {mins}m")
    } else {
        format!("{hours}h")
    }
}

// ============================================================================
// IPC-based Commands (require daemon)
// ============================================================================

/// Query daemon status, or probe locally when no daemon runs
///
/// # Errors
/// Returns an error if IPC communication fails or JSON serialization fails.
pub async fn status(config: &Config, json_output: bool) -> Result<()> {
    let daemon_info = if ipc::is_daemon_running().await {
        match ipc::send_request(&Request::Status).await? {
            Response::Status {
                version,
                uptime_secs,
                status,
            } => Some((version, uptime_secs, status)),
            Response::Error { message } => eyre::bail!("Error: {message}"),
            _ => eyre::bail!("Unexpected response from daemon"),
        }
    } else {
        None
    };

    match daemon_info {
        Some((version, uptime_secs, status)) => {
            print_daemon_status(&version, uptime_secs, &status, json_output)
        }
        None => {
            let local = probe(config).await;
            print_local_status(&local, json_output)
        }
    }
}

fn print_daemon_status(
    version: &str,
    uptime_secs: u64,
    status: &ToggleStatus,
    json_output: bool,
) -> Result<()> {
    if json_output {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "daemon": {
                    "running": true,
                    "version": version,
                    "uptime_secs": uptime_secs,
                    "uptime_human": format_uptime(uptime_secs),
                },
                "toggle": status,
            }))?
        );
        return Ok(());
    }

    println!("{}", "AirPlay".header());
    println!("{}", "-".repeat(7));
    println!(
        "{} {}",
        "Audio server:".dim(),
        if status.server.is_known() {
            status.server.display_name().success().to_string()
        } else {
            "not found".error().to_string()
        }
    );
    let module = if status.module_available {
        module_label(Some(status.enabled))
    } else {
        "unavailable".error().to_string()
    };
    println!("{} {}", "RAOP module:".dim(), module);
    if let Some(handle) = &status.handle {
        println!("{} {}", "Module id:".dim(), handle.as_str().technical());
    }
    println!(
        "{} {}",
        "Hide duplicates:".dim(),
        if status.hide_duplicate_sinks { "on" } else { "off" }
    );
    println!();
    println!("{}", "Daemon".header());
    println!("{}", "-".repeat(6));
    println!(
        "{} {}",
        "Status:".dim(),
        format!("Running (uptime: {})", format_uptime(uptime_secs)).success()
    );
    println!("{} {}", "Version:".dim(), version);
    if !status.monitoring {
        println!(
            "{} {}",
            "Events:".dim(),
            "not monitored (try: raop-toggle recheck)".warning()
        );
    }
    Ok(())
}

fn print_local_status(local: &LocalProbe, json_output: bool) -> Result<()> {
    if json_output {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "daemon": { "running": false },
                "local": {
                    "server": local.server,
                    "enabled": local.enabled,
                },
            }))?
        );
        return Ok(());
    }

    println!("{}", "AirPlay".header());
    println!("{}", "-".repeat(7));
    if local.server.is_known() {
        println!(
            "{} {}",
            "Audio server:".dim(),
            local.server.display_name().success()
        );
        println!("{} {}", "RAOP module:".dim(), module_label(local.enabled));
    } else {
        println!("{} {}", "Audio server:".dim(), "not found".error());
    }
    println!();
    println!("{}", "Daemon".header());
    println!("{}", "-".repeat(6));
    println!("{} {}", "Status:".dim(), "Not running".error());
    println!("  Start with: {}", "raop-toggle daemon".technical());
    Ok(())
}

/// Send `request` to a running daemon, turning `Error` responses into errors
async fn daemon_request(request: Request) -> Result<Response> {
    if !ipc::is_daemon_running().await {
        eyre::bail!("Daemon is not running. Start it with: raop-toggle daemon");
    }
    match ipc::send_request(&request).await? {
        Response::Error { message } => eyre::bail!("Error: {message}"),
        response => Ok(response),
    }
}

/// Ask the daemon to load or unload the RAOP module
///
/// # Errors
/// Returns an error if no daemon is running or the toggle fails.
pub async fn toggle() -> Result<()> {
    match daemon_request(Request::Toggle).await? {
        Response::Toggled { enabled: true } => {
            println!("{} {}", "AirPlay:".dim(), "enabled".success());
            Ok(())
        }
        Response::Toggled { enabled: false } => {
            println!("{} {}", "AirPlay:".dim(), "disabled".warning());
            Ok(())
        }
        _ => eyre::bail!("Unexpected response from daemon"),
    }
}

/// Ask the daemon to re-detect the audio server
///
/// # Errors
/// Returns an error if no daemon is running or IPC communication fails.
pub async fn recheck() -> Result<()> {
    match daemon_request(Request::Recheck).await? {
        Response::Ok { message } => {
            println!("{}", message.success());
            Ok(())
        }
        _ => eyre::bail!("Unexpected response from daemon"),
    }
}

/// Ask the daemon to reduce duplicate RAOP sinks now
///
/// # Errors
/// Returns an error if no daemon is running or the sink listing fails.
pub async fn dedupe() -> Result<()> {
    match daemon_request(Request::Dedupe).await? {
        Response::Deduped { unloaded } if unloaded.is_empty() => {
            println!("{}", "No duplicate sinks found.".dim());
            Ok(())
        }
        Response::Deduped { unloaded } => {
            println!(
                "{} {}",
                "Unloaded duplicate sink modules:".success(),
                unloaded.join(", ").technical()
            );
            Ok(())
        }
        _ => eyre::bail!("Unexpected response from daemon"),
    }
}

/// Tell the daemon to re-read its config file
///
/// # Errors
/// Returns an error if no daemon is running or the config is invalid.
pub async fn reload() -> Result<()> {
    match daemon_request(Request::Reload).await? {
        Response::Ok { message } => {
            println!("{}", message.success());
            Ok(())
        }
        _ => eyre::bail!("Unexpected response from daemon"),
    }
}

/// Gracefully shutdown the daemon
///
/// # Errors
/// Returns an error if no daemon is running or IPC communication fails.
pub async fn shutdown() -> Result<()> {
    match daemon_request(Request::Shutdown).await? {
        Response::Ok { message } => {
            println!("{}", message.success());
            Ok(())
        }
        _ => eyre::bail!("Unexpected response from daemon"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0 => "0s"; "zero")]
    #[test_case(59 => "59s"; "under a minute")]
    #[test_case(60 => "1m"; "one minute")]
    #[test_case(3599 => "59m"; "under an hour")]
    #[test_case(3600 => "1h"; "one hour")]
    #[test_case(3660 => "1h 1m"; "hour and minute")]
    fn test_format_uptime(secs: u64) -> String {
        format_uptime(secs)
    }

    #[tokio::test]
    async fn test_probe_without_pactl_finds_nothing() {
        let mut config = Config::default();
        config.settings.pactl = "/nonexistent/pactl".to_string();

        let local = probe(&config).await;

        assert_eq!(
            local,
            LocalProbe {
                server: AudioServer::Unknown,
                enabled: None
            }
        );
    }
}
