//! Process integration tests
//!
//! Drive the real process runner, event monitor and toggle state against a
//! shell script standing in for `pactl`. The script keeps the RAOP module's
//! id in a file next to itself and only emits its subscription event once a
//! trigger file appears.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use raop_toggle::audio_server::AudioServer;
use raop_toggle::command::{CommandError, CommandRunner, ProcessRunner};
use raop_toggle::config::{Settings, SettingsStore};
use raop_toggle::monitor::EventMonitor;
use raop_toggle::notification::Notifier;
use raop_toggle::toggle::{ToggleState, Wakeup};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const FAKE_PACTL: &str = r#"#!/bin/sh
dir=$(dirname "$0")
case "$1" in
info)
    echo "Server String: /run/user/1000/pulse/native"
    echo "Server Name: pulseaudio"
    ;;
list)
    if [ "$2" = "modules" ]; then
        printf '0\tmodule-device-restore\t\t\n'
        if [ -f "$dir/raop" ]; then
            printf '%s\tmodule-raop-discover\t\t\n' "$(cat "$dir/raop")"
        fi
    fi
    ;;
load-module)
    echo 42 > "$dir/raop"
    echo 42
    ;;
unload-module)
    if [ ! -f "$dir/raop" ]; then
        echo "Failure: No such entity" >&2
        exit 1
    fi
    rm -f "$dir/raop"
    ;;
subscribe)
    while [ ! -f "$dir/emit" ]; do sleep 0.05; done
    echo "Event 'new' on module #77"
    exec sleep 30
    ;;
*)
    echo "unknown command: $1" >&2
    exit 2
    ;;
esac
"#;

struct FakeServer {
    dir: TempDir,
}

impl FakeServer {
    fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let script = dir.path().join("pactl");
        fs::write(&script, FAKE_PACTL).expect("Failed to write script");
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755))
            .expect("Failed to chmod script");
        Self { dir }
    }

    fn pactl(&self) -> PathBuf {
        self.dir.path().join("pactl")
    }

    fn marker(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn raop_loaded(&self) -> bool {
        self.marker("raop").exists()
    }

    fn argv(&self, args: &[&str]) -> Vec<String> {
        std::iter::once(path_string(&self.pactl()))
            .chain(args.iter().map(|a| (*a).to_string()))
            .collect()
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[derive(Clone, Default)]
struct CountingNotifier {
    count: Arc<Mutex<usize>>,
}

impl Notifier for CountingNotifier {
    fn notify(&self, _summary: &str, _body: &str) {
        *self.count.lock().unwrap() += 1;
    }
}

fn toggle_state(server: &FakeServer) -> (ToggleState<ProcessRunner>, CountingNotifier) {
    let settings = SettingsStore::new(Settings {
        pactl: path_string(&server.pactl()),
        notify: false,
        ..Settings::default()
    });
    let notifier = CountingNotifier::default();
    let state = ToggleState::new(ProcessRunner, settings, Box::new(notifier.clone()));
    (state, notifier)
}

#[tokio::test]
async fn test_runner_returns_stdout_lines() {
    let server = FakeServer::new();

    let lines = ProcessRunner
        .run(&server.argv(&["info"]), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(lines.len(), 2);
    assert_eq!(lines[1], "Server Name: pulseaudio");
}

#[tokio::test]
async fn test_runner_reports_failure_with_stderr() {
    let server = FakeServer::new();

    let err = ProcessRunner
        .run(
            &server.argv(&["unload-module", "module-raop-discover"]),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    match &err {
        CommandError::Failed { code, stderr, .. } => {
            assert_eq!(*code, Some(1));
            assert_eq!(stderr, "Failure: No such entity\n");
        }
        other => panic!("expected Failed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_runner_cancellation_stops_subscription() {
    let server = FakeServer::new();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();

    let argv = server.argv(&["subscribe"]);

    let run = ProcessRunner.run(&argv, &cancel);
    let (result, ()) = tokio::join!(run, async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    assert!(result.unwrap_err().is_cancelled());
}

#[tokio::test]
async fn test_monitor_delivers_subscription_lines() {
    let server = FakeServer::new();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    let monitor = EventMonitor::start(&server.argv(&["subscribe"]), move |line| {
        let _ = tx.send(line);
    })
    .unwrap();
    assert!(monitor.is_running());
    fs::write(server.marker("emit"), "").unwrap();

    let line = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no event line")
        .unwrap();
    assert_eq!(line, "Event 'new' on module #77");

    monitor.shutdown().await;
    // The callback (and its sender) is gone once the task has ended
    assert_eq!(rx.recv().await, None);
}

#[tokio::test]
async fn test_toggle_state_against_script() {
    let server = FakeServer::new();
    let (mut state, notifier) = toggle_state(&server);

    state.activate().await;

    let status = state.status();
    assert_eq!(status.server, AudioServer::PulseAudio);
    assert!(status.module_available);
    assert!(status.monitoring);
    assert!(!status.enabled);
    assert!(!server.raop_loaded(), "bootstrap must leave the module unloaded");

    assert!(state.request_toggle().await.unwrap());
    assert!(server.raop_loaded());
    assert_eq!(state.status().handle.as_deref(), Some("42"));

    assert!(!state.request_toggle().await.unwrap());
    assert!(!server.raop_loaded());
    assert_eq!(*notifier.count.lock().unwrap(), 0);

    state.deactivate();
}

#[tokio::test]
async fn test_external_load_is_picked_up() {
    let server = FakeServer::new();
    let (mut state, _) = toggle_state(&server);
    state.activate().await;
    assert!(!state.enabled());

    // Another tool loads the module; its event announces id 77
    fs::write(server.marker("raop"), "77\n").unwrap();
    fs::write(server.marker("emit"), "").unwrap();

    let wakeup = tokio::time::timeout(Duration::from_secs(5), state.next_wakeup())
        .await
        .expect("no wakeup");
    assert_eq!(wakeup, Wakeup::Line("Event 'new' on module #77".to_string()));
    state.handle(wakeup).await;

    assert!(state.enabled());
    assert_eq!(state.status().handle.as_deref(), Some("77"));

    state.deactivate();
}

#[tokio::test]
async fn test_shutdown_stops_subscription() {
    let server = FakeServer::new();
    let (mut state, _) = toggle_state(&server);
    state.activate().await;
    assert!(state.status().monitoring);

    tokio::time::timeout(Duration::from_secs(5), state.shutdown())
        .await
        .expect("shutdown did not finish");

    let status = state.status();
    assert!(!status.monitoring);
    assert_eq!(status.server, AudioServer::Unknown);
    assert!(!status.module_available);
}

#[tokio::test]
async fn test_missing_pactl_leaves_toggle_unavailable() {
    let dir = TempDir::new().unwrap();
    let settings = SettingsStore::new(Settings {
        pactl: path_string(&dir.path().join("missing")),
        ..Settings::default()
    });
    let notifier = CountingNotifier::default();
    let mut state = ToggleState::new(ProcessRunner, settings, Box::new(notifier.clone()));

    state.activate().await;

    assert_eq!(state.server(), AudioServer::Unknown);
    assert!(state.request_toggle().await.is_err());
    assert_eq!(*notifier.count.lock().unwrap(), 1);
}
