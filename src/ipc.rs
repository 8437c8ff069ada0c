//! IPC infrastructure for daemon communication
//!
//! Unix socket IPC between the CLI and the daemon. Messages are JSON with a
//! 4-byte big-endian length prefix.

use color_eyre::eyre::{self, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, warn};

use crate::toggle::ToggleStatus;

// ============================================================================
// Message Types
// ============================================================================

/// Requests sent from CLI to daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    /// Query daemon status
    Status,
    /// Load or unload the RAOP module
    Toggle,
    /// Re-detect the audio server
    Recheck,
    /// Reduce duplicate RAOP sinks now
    Dedupe,
    /// Re-read the config file
    Reload,
    /// Gracefully shutdown the daemon
    Shutdown,
}

/// Responses sent from daemon to CLI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    Status {
        version: String,
        uptime_secs: u64,
        status: ToggleStatus,
    },
    /// New module state after a toggle
    Toggled { enabled: bool },
    /// Owner modules unloaded by duplicate reduction
    Deduped { unloaded: Vec<String> },
    /// Generic success response
    Ok { message: String },
    /// Error response
    Error { message: String },
}

// ============================================================================
// Socket Path Management
// ============================================================================

/// Get the IPC socket path
///
/// Prefers `$XDG_RUNTIME_DIR/raop-toggle.sock`, falls back to a per-user path
/// under `/tmp`.
#[must_use]
pub fn get_socket_path() -> PathBuf {
    match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(runtime_dir) if !runtime_dir.is_empty() => {
            PathBuf::from(runtime_dir).join("raop-toggle.sock")
        }
        _ => PathBuf::from(format!("/tmp/raop-toggle-{}.sock", users::get_current_uid())),
    }
}

/// Remove `socket_path` if nothing is listening on it
///
/// # Errors
/// Returns an error if a stale socket cannot be removed.
pub async fn cleanup_stale_socket(socket_path: &Path) -> Result<()> {
    if !socket_path.exists() {
        return Ok(());
    }

    match tokio::time::timeout(Duration::from_millis(100), UnixStream::connect(socket_path)).await
    {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(_)) | Err(_) => {
            debug!("Removing stale socket: {:?}", socket_path);
            std::fs::remove_file(socket_path)
                .with_context(|| format!("Failed to remove stale socket: {socket_path:?}"))
        }
    }
}

// ============================================================================
// Protocol Helpers
// ============================================================================

const MAX_MESSAGE_SIZE: usize = 1024 * 1024;
const READ_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Read a length-prefixed JSON message
async fn read_message<T, S>(stream: &mut S) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
    S: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    tokio::time::timeout(READ_TIMEOUT, stream.read_exact(&mut len_buf))
        .await
        .context("Timeout reading message length")?
        .context("Failed to read message length")?;

    let msg_len = u32::from_be_bytes(len_buf) as usize;
    if msg_len > MAX_MESSAGE_SIZE {
        eyre::bail!("Message too large: {msg_len} bytes (max: {MAX_MESSAGE_SIZE})");
    }

    let mut msg_buf = vec![0u8; msg_len];
    tokio::time::timeout(READ_TIMEOUT, stream.read_exact(&mut msg_buf))
        .await
        .context("Timeout reading message payload")?
        .context("Failed to read message payload")?;

    serde_json::from_slice(&msg_buf).context("Failed to deserialize message")
}

/// Write a length-prefixed JSON message
async fn write_message<T, S>(stream: &mut S, message: &T) -> Result<()>
where
    T: Serialize,
    S: AsyncWrite + Unpin,
{
    let json = serde_json::to_vec(message).context("Failed to serialize message")?;
    if json.len() > MAX_MESSAGE_SIZE {
        eyre::bail!("Message too large: {} bytes (max: {MAX_MESSAGE_SIZE})", json.len());
    }

    let len = (json.len() as u32).to_be_bytes();
    stream
        .write_all(&len)
        .await
        .context("Failed to write message length")?;
    stream
        .write_all(&json)
        .await
        .context("Failed to write message payload")?;
    stream.flush().await.context("Failed to flush stream")?;

    Ok(())
}

// ============================================================================
// IPC Client (for CLI commands)
// ============================================================================

/// Send a request to the daemon at the default socket and wait for the response
///
/// # Errors
/// Returns an error if the daemon cannot be reached or the exchange fails.
pub async fn send_request(request: &Request) -> Result<Response> {
    send_request_to(&get_socket_path(), request).await
}

/// Send a request to the daemon listening on `socket_path`
///
/// # Errors
/// Returns an error if the daemon cannot be reached or the exchange fails.
pub async fn send_request_to(socket_path: &Path, request: &Request) -> Result<Response> {
    let mut stream = tokio::time::timeout(CONNECT_TIMEOUT, UnixStream::connect(socket_path))
        .await
        .context("Timeout connecting to daemon")?
        .with_context(|| {
            format!("Failed to connect to daemon. Is the daemon running?\nSocket: {socket_path:?}")
        })?;

    debug!("Connected to daemon at {:?}", socket_path);

    write_message(&mut stream, request).await?;
    read_message(&mut stream).await
}

/// Whether a daemon answers on the default socket
pub async fn is_daemon_running() -> bool {
    let path = get_socket_path();
    path.exists()
        && matches!(
            tokio::time::timeout(Duration::from_millis(200), UnixStream::connect(&path)).await,
            Ok(Ok(_))
        )
}

// ============================================================================
// IPC Server (for daemon)
// ============================================================================

/// Listening socket owned by the daemon; removes the socket file on drop
#[derive(Debug)]
pub struct IpcServer {
    listener: UnixListener,
    socket_path: PathBuf,
}

impl IpcServer {
    /// Bind the default socket path
    ///
    /// # Errors
    /// Returns an error if the socket cannot be bound.
    pub async fn bind() -> Result<Self> {
        Self::bind_at(get_socket_path()).await
    }

    /// Bind `socket_path`, replacing a stale socket left by a dead daemon
    ///
    /// # Errors
    /// Returns an error if a live daemon already owns the socket or binding fails.
    pub async fn bind_at(socket_path: PathBuf) -> Result<Self> {
        cleanup_stale_socket(&socket_path).await?;

        let listener = UnixListener::bind(&socket_path)
            .with_context(|| format!("Failed to bind IPC socket: {socket_path:?}"))?;

        debug!("IPC server listening on {:?}", socket_path);

        Ok(Self {
            listener,
            socket_path,
        })
    }

    /// Accept the next incoming connection
    ///
    /// Returns `None` if accept fails (non-fatal).
    pub async fn accept(&self) -> Option<UnixStream> {
        match self.listener.accept().await {
            Ok((stream, _addr)) => Some(stream),
            Err(e) => {
                error!("Failed to accept IPC connection: {}", e);
                None
            }
        }
    }

    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            warn!("Failed to remove IPC socket on shutdown: {}", e);
        } else {
            debug!("Removed IPC socket: {:?}", self.socket_path);
        }
    }
}

/// Read a request from a client connection
///
/// # Errors
/// Returns an error on timeout, oversize or malformed messages.
pub async fn read_request<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Request> {
    read_message(stream).await
}

/// Write a response to a client connection
///
/// # Errors
/// Returns an error if the response cannot be written.
pub async fn write_response<S: AsyncWrite + Unpin>(stream: &mut S, response: &Response) -> Result<()> {
    write_message(stream, response).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_server::AudioServer;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_framing_carries_requests() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        write_message(&mut client, &Request::Toggle).await.unwrap();
        assert_eq!(read_request(&mut server).await.unwrap(), Request::Toggle);
    }

    #[tokio::test]
    async fn test_oversized_length_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client
            .write_all(&((MAX_MESSAGE_SIZE as u32) + 1).to_be_bytes())
            .await
            .unwrap();
        let err = read_request(&mut server).await.unwrap_err();
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn test_status_response_json_shape() {
        let response = Response::Status {
            version: "0.4.0".to_string(),
            uptime_secs: 3,
            status: ToggleStatus {
                server: AudioServer::PipeWire,
                enabled: true,
                module_available: true,
                handle: Some("536870913".to_string()),
                monitoring: true,
                hide_duplicate_sinks: true,
                indicator: None,
            },
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["type"], "Status");
        assert_eq!(json["status"]["server"], "pipewire");
        assert_eq!(json["status"]["enabled"], true);

        let back: Response = serde_json::from_value(json).unwrap();
        assert_eq!(back, response);
    }

    #[tokio::test]
    async fn test_request_round_trip_over_socket() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.sock");
        let server = IpcServer::bind_at(path.clone()).await.unwrap();

        let serve = async {
            let mut stream = server.accept().await.unwrap();
            let request = read_request(&mut stream).await.unwrap();
            assert_eq!(request, Request::Dedupe);
            write_response(&mut stream, &Response::Deduped { unloaded: vec!["11".into()] })
                .await
                .unwrap();
        };
        let (response, ()) = tokio::join!(send_request_to(&path, &Request::Dedupe), serve);

        assert_eq!(
            response.unwrap(),
            Response::Deduped {
                unloaded: vec!["11".to_string()]
            }
        );
        drop(server);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_stale_socket_is_replaced() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stale.sock");
        drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
        assert!(path.exists());

        let server = IpcServer::bind_at(path.clone()).await.unwrap();
        assert_eq!(server.socket_path(), path.as_path());
    }

    #[tokio::test]
    async fn test_missing_daemon_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = send_request_to(&dir.path().join("none.sock"), &Request::Status)
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("Is the daemon running?"));
    }
}
