//! Daemon mode
//!
//! Runs the main event loop: `pactl subscribe` events and the duplicate-sink
//! debounce through [`ToggleState`], IPC requests from the CLI, settings
//! changes and termination signals. Everything that touches the toggle state
//! runs on this one loop.

use color_eyre::eyre::{Context, Result};
use std::process::{Command as StdCommand, Stdio};
use std::time::{Duration, Instant};
use tokio::net::UnixStream;
use tokio::signal;
use tokio::signal::unix::{SignalKind, signal as unix_signal};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::command::{CommandRunner, ProcessRunner};
use crate::config::{Config, SettingsStore};
use crate::ipc::{self, IpcServer, Request, Response};
use crate::logging::{DaemonLogging, LogTarget};
use crate::module::ModuleHandle;
use crate::notification::DesktopNotifier;
use crate::toggle::ToggleState;

type Reply = oneshot::Sender<Response>;

const SHUTDOWN_DRAIN: Duration = Duration::from_secs(1);

/// Start the daemon as a detached background process
///
/// # Errors
/// Returns an error if a daemon is already running or the process cannot be spawned.
pub async fn spawn_detached() -> Result<u32> {
    if ipc::is_daemon_running().await {
        color_eyre::eyre::bail!("Daemon is already running");
    }

    let exe = std::env::current_exe().context("Failed to locate own executable")?;
    let child = {
        use std::os::unix::process::CommandExt;
        StdCommand::new(exe)
            .args(["daemon", "--detached"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0)
            .spawn()
            .context("Failed to spawn daemon process")?
    };
    Ok(child.id())
}

/// Run the daemon with the given configuration
///
/// # Errors
/// Returns an error if logging or the IPC socket cannot be set up.
pub async fn run(config: Config, target: LogTarget) -> Result<()> {
    let logging = DaemonLogging::init(&config.settings, target)?;

    info!("Starting raop-toggle daemon v{}", env!("CARGO_PKG_VERSION"));

    let settings = SettingsStore::new(config.settings);
    let notifier = DesktopNotifier::new(settings.clone());
    let mut toggle = ToggleState::new(ProcessRunner, settings.clone(), Box::new(notifier));

    let ipc_server = IpcServer::bind().await?;
    info!("IPC server listening on {:?}", ipc_server.socket_path());

    toggle.activate().await;

    let start_time = Instant::now();
    let (req_tx, mut req_rx) = mpsc::channel::<(Request, Reply)>(16);
    let mut connections = JoinSet::new();
    let mut settings_rx = settings.subscribe();
    let mut sigterm =
        unix_signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

    if let Err(e) = sd_notify::notify(false, &[sd_notify::NotifyState::Ready]) {
        debug!("sd_notify READY failed: {}", e);
    }

    info!("Monitoring audio server events...");

    loop {
        tokio::select! {
            wakeup = toggle.next_wakeup() => toggle.handle(wakeup).await,

            Some(stream) = ipc_server.accept() => {
                connections.spawn(serve_connection(stream, req_tx.clone()));
            }

            Some((request, reply)) = req_rx.recv() => {
                let shutdown = request == Request::Shutdown;
                let response = handle_request(&mut toggle, request, start_time).await;
                let _ = reply.send(response);
                if shutdown {
                    info!("Shutdown requested via IPC");
                    break;
                }
            }

            Some(joined) = connections.join_next() => {
                if let Err(e) = joined {
                    warn!("IPC connection task failed: {}", e);
                }
            }

            Ok(()) = settings_rx.changed() => {
                let current = settings_rx.borrow_and_update().clone();
                logging.apply(&current);
                toggle.reconfigure_pactl().await;
            }

            _ = signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }

            _ = sigterm.recv() => {
                info!("Terminated, shutting down");
                break;
            }
        }
    }

    if let Err(e) = sd_notify::notify(false, &[sd_notify::NotifyState::Stopping]) {
        debug!("sd_notify STOPPING failed: {}", e);
    }

    // Let in-flight replies (the shutdown acknowledgement included) reach their clients
    let drain = async { while connections.join_next().await.is_some() {} };
    if tokio::time::timeout(SHUTDOWN_DRAIN, drain).await.is_err() {
        connections.abort_all();
    }

    toggle.shutdown().await;
    info!("Daemon stopped");
    Ok(())
}

/// Read one request, hand it to the main loop and write back its response
async fn serve_connection(mut stream: UnixStream, requests: mpsc::Sender<(Request, Reply)>) {
    let request = match ipc::read_request(&mut stream).await {
        Ok(request) => request,
        Err(e) => {
            warn!("Bad IPC request: {:#}", e);
            return;
        }
    };
    debug!("IPC request: {:?}", request);

    let (reply_tx, reply_rx) = oneshot::channel();
    let response = if requests.send((request, reply_tx)).await.is_err() {
        Response::Error {
            message: "Daemon is shutting down".to_string(),
        }
    } else {
        reply_rx.await.unwrap_or_else(|_| Response::Error {
            message: "Daemon dropped the request".to_string(),
        })
    };

    if let Err(e) = ipc::write_response(&mut stream, &response).await {
        error!("IPC response error: {:#}", e);
    }
}

/// Execute one request against the toggle state
async fn handle_request<R: CommandRunner>(
    toggle: &mut ToggleState<R>,
    request: Request,
    start_time: Instant,
) -> Response {
    match request {
        Request::Status => Response::Status {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: start_time.elapsed().as_secs(),
            status: toggle.status(),
        },

        Request::Toggle => match toggle.request_toggle().await {
            Ok(enabled) => Response::Toggled { enabled },
            Err(e) => Response::Error {
                message: e.to_string(),
            },
        },

        Request::Recheck => {
            let server = toggle.recheck_server().await;
            Response::Ok {
                message: format!("Audio server: {server}"),
            }
        }

        Request::Dedupe => match toggle.reduce_duplicates().await {
            Ok(unloaded) => Response::Deduped {
                unloaded: unloaded.iter().map(ModuleHandle::to_string).collect(),
            },
            Err(e) => Response::Error {
                message: format!("Duplicate reduction failed: {e}"),
            },
        },

        Request::Reload => match Config::load() {
            Ok(config) => {
                toggle.settings().replace(config.settings);
                info!("Config reloaded");
                Response::Ok {
                    message: "Config reloaded".to_string(),
                }
            }
            Err(e) => {
                warn!("Config reload failed: {:#}", e);
                Response::Error {
                    message: format!("Config reload failed: {e:#}"),
                }
            }
        },

        Request::Shutdown => Response::Ok {
            message: "Daemon shutting down...".to_string(),
        },
    }
}
