//! Long-lived event subscription
//!
//! Runs `pactl subscribe` and hands each output line to a callback in order.
//! The reader task owns the child process; stopping the monitor cancels the
//! task, which kills the child.

use std::io;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Handle to a running subscription process
#[derive(Debug)]
pub struct EventMonitor {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl EventMonitor {
    /// Spawn `argv` and deliver every stdout line to `on_line`
    ///
    /// `on_line` runs on the reader task, once per line, before the next line
    /// is read. When the process closes its stdout the loop stops quietly; it
    /// is never restarted.
    ///
    /// # Errors
    /// Returns an error if `argv` is empty or the process cannot be spawned.
    pub fn start<F>(argv: &[String], mut on_line: F) -> io::Result<Self>
    where
        F: FnMut(String) + Send + 'static,
    {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command line"))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("subscription stdout not captured"))?;

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let label = argv.join(" ");
        debug!("Started event monitor: {}", label);

        let task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                tokio::select! {
                    () = token.cancelled() => {
                        debug!("Event monitor stopped: {}", label);
                        break;
                    }
                    result = lines.next_line() => match result {
                        Ok(Some(line)) => {
                            trace!("event: {}", line);
                            on_line(line);
                        }
                        Ok(None) => {
                            debug!("Event stream ended: {}", label);
                            break;
                        }
                        Err(e) => {
                            warn!("Event stream read error ({}): {}", label, e);
                            break;
                        }
                    }
                }
            }
            terminate(child).await;
        });

        Ok(Self {
            cancel,
            task: Some(task),
        })
    }

    /// Whether the reader loop is still running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop reading and kill the process; safe to call repeatedly
    pub fn stop(&mut self) {
        self.cancel.cancel();
        self.task = None;
    }

    /// Stop and wait until the process has been reaped
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for EventMonitor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Kill and reap the child; an already-exited process is fine
async fn terminate(mut child: Child) {
    if let Err(e) = child.start_kill() {
        trace!("Subscription process already gone: {}", e);
    }
    if let Err(e) = child.wait().await {
        trace!("Failed to reap subscription process: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn argv(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn test_lines_arrive_in_order_then_stream_ends() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let monitor = EventMonitor::start(&argv("printf 'a\\nb\\nc\\n'"), move |line| {
            let _ = tx.send(line);
        })
        .unwrap();

        let mut received = Vec::new();
        while let Some(line) = rx.recv().await {
            received.push(line);
        }
        assert_eq!(received, vec!["a", "b", "c"]);

        monitor.shutdown().await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_ends_delivery() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut monitor = EventMonitor::start(&argv("echo ready; exec sleep 30"), move |line| {
            let _ = tx.send(line);
        })
        .unwrap();

        assert_eq!(rx.recv().await.as_deref(), Some("ready"));
        assert!(monitor.is_running());

        monitor.stop();
        monitor.stop();
        assert!(!monitor.is_running());

        // The callback (and its sender) is dropped once the task winds down
        let closed = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await;
        assert_eq!(closed.unwrap(), None);
    }

    #[tokio::test]
    async fn test_shutdown_after_process_exit_is_not_an_error() {
        let monitor = EventMonitor::start(&argv("true"), |_| {}).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        monitor.shutdown().await;
    }

    #[test]
    fn test_empty_argv_is_rejected() {
        let err = EventMonitor::start(&[], |_| {}).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_missing_binary_fails_to_start() {
        let result = EventMonitor::start(&["/nonexistent/raop-toggle-subscribe".to_string()], |_| {});
        assert!(result.is_err());
    }
}
