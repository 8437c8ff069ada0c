//! Toggle orchestration
//!
//! [`ToggleState`] owns every piece of mutable state: the detected server, the
//! module controller, the event monitor and the duplicate-sink debounce. It is
//! driven from a single task: [`ToggleState::next_wakeup`] waits for the next
//! thing to do and [`ToggleState::handle`] does it to completion, so no locks
//! are needed.

use std::future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::audio_server::{self, AudioServer};
use crate::command::{CommandError, CommandRunner};
use crate::config::SettingsStore;
use crate::module::{ModuleController, ModuleHandle, ToggleError};
use crate::monitor::EventMonitor;
use crate::notification::Notifier;
use crate::pactl::{AudioCtl, EventLine, Pactl, RAOP_SINK_MARKER};
use crate::sinks::DuplicateSinkReducer;

/// Quiet interval after the last new-sink event before duplicates are reduced
pub const DEBOUNCE_DELAY: Duration = Duration::from_millis(200);

/// Single rearmable deadline
#[derive(Debug)]
pub struct Debounce {
    delay: Duration,
    deadline: Option<Instant>,
}

impl Debounce {
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    /// Start or restart the quiet interval from now
    pub fn arm(&mut self) {
        self.deadline = Some(Instant::now() + self.delay);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Resolves at the deadline; never resolves while disarmed
    pub async fn fired(&self) {
        match self.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => future::pending().await,
        }
    }
}

/// What woke the toggle up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Wakeup {
    /// One line from `pactl subscribe`
    Line(String),
    /// The subscription process went away
    MonitorEnded,
    /// The duplicate-sink quiet interval elapsed
    Debounce,
}

/// Snapshot reported to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToggleStatus {
    pub server: AudioServer,
    pub enabled: bool,
    /// Whether the RAOP module could be loaded on this server
    pub module_available: bool,
    pub handle: Option<String>,
    pub monitoring: bool,
    pub hide_duplicate_sinks: bool,
    /// Icon name when the indicator should be shown
    pub indicator: Option<String>,
}

/// Owns the toggle's state and wires its collaborators together
pub struct ToggleState<R: CommandRunner> {
    ctl: AudioCtl<R>,
    settings: SettingsStore,
    notifier: Box<dyn Notifier>,
    server: AudioServer,
    controller: ModuleController,
    module_available: bool,
    reducer: DuplicateSinkReducer,
    debounce: Debounce,
    monitor: Option<EventMonitor>,
    events: Option<mpsc::UnboundedReceiver<String>>,
}

impl<R: CommandRunner> ToggleState<R> {
    pub fn new(runner: R, settings: SettingsStore, notifier: Box<dyn Notifier>) -> Self {
        let ctl = AudioCtl::new(runner, Pactl::new(settings.pactl()));
        Self {
            ctl,
            settings,
            notifier,
            server: AudioServer::Unknown,
            controller: ModuleController::new(AudioServer::Unknown),
            module_available: false,
            reducer: DuplicateSinkReducer::new(RAOP_SINK_MARKER),
            debounce: Debounce::new(DEBOUNCE_DELAY),
            monitor: None,
            events: None,
        }
    }

    #[must_use]
    pub fn server(&self) -> AudioServer {
        self.server
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.controller.is_enabled()
    }

    #[must_use]
    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    /// Detect the server and bring the state in line with it
    pub async fn activate(&mut self) {
        let server = audio_server::detect(&self.ctl).await;
        self.activate_for(server).await;
    }

    /// Activate for an already detected server
    ///
    /// Queries the module; when it is not loaded, runs the bootstrap cycle to
    /// learn its handle. Then starts following `pactl subscribe`. Failures are
    /// logged and leave the toggle unavailable rather than aborting.
    pub async fn activate_for(&mut self, server: AudioServer) {
        self.server = server;
        self.controller = ModuleController::new(server);
        self.module_available = false;

        if !server.is_known() {
            warn!("No supported audio server detected; toggle unavailable");
            return;
        }
        self.settings.set_audio_server(server);
        info!("Audio server: {}", server);

        match self.controller.query_current(&self.ctl).await {
            Ok(true) => self.module_available = true,
            Ok(false) => match self.controller.bootstrap(&self.ctl).await {
                Ok(()) => self.module_available = true,
                Err(e) => {
                    // A failed unload half still leaves a usable, loaded module
                    self.module_available =
                        self.enabled() || self.controller.known_handle().is_some();
                    warn!("RAOP module bootstrap failed: {}", e);
                }
            },
            Err(e) => warn!("Could not query modules: {}", e),
        }

        info!(
            "RAOP module {} ({})",
            if self.enabled() { "enabled" } else { "disabled" },
            if self.module_available { "available" } else { "unavailable" }
        );

        self.start_monitor();
    }

    fn start_monitor(&mut self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let argv = self.ctl.pactl().subscribe();
        match EventMonitor::start(&argv, move |line| {
            let _ = tx.send(line);
        }) {
            Ok(monitor) => {
                self.monitor = Some(monitor);
                self.events = Some(rx);
            }
            Err(e) => {
                warn!("Could not start `{}`: {}", argv.join(" "), e);
                self.monitor = None;
                self.events = None;
            }
        }
    }

    /// Wait for the next event line, monitor end or debounce deadline
    ///
    /// Cancel-safe: nothing is consumed unless the returned wakeup is.
    pub async fn next_wakeup(&mut self) -> Wakeup {
        let debounce = &self.debounce;
        let events = &mut self.events;
        tokio::select! {
            line = recv_event(events) => match line {
                Some(line) => Wakeup::Line(line),
                None => Wakeup::MonitorEnded,
            },
            () = debounce.fired() => Wakeup::Debounce,
        }
    }

    /// Process one wakeup to completion
    pub async fn handle(&mut self, wakeup: Wakeup) {
        match wakeup {
            Wakeup::Line(line) => self.on_event_line(&line).await,
            Wakeup::MonitorEnded => {
                error!("Event monitor ended; external module changes are no longer tracked");
                self.monitor = None;
                self.events = None;
            }
            Wakeup::Debounce => {
                self.debounce.cancel();
                if let Err(e) = self.reduce_duplicates().await {
                    warn!("Duplicate sink reduction failed: {}", e);
                }
            }
        }
    }

    async fn on_event_line(&mut self, line: &str) {
        let event = EventLine(line);
        let before = self.enabled();

        // PulseAudio ids change on every load, so resync before matching
        if self.server.spawns_duplicate_sinks()
            && event.mentions_module()
            && let Err(e) = self.controller.query_current(&self.ctl).await
        {
            warn!("Could not resync modules for '{}': {}", line, e);
        }

        if let Err(e) = self.controller.on_event_line(&self.ctl, line).await {
            warn!("Could not reconcile event '{}': {}", line, e);
        }

        let after = self.enabled();
        if after {
            self.module_available = true;
        }
        if before != after {
            info!("RAOP module {} by another client", if after { "enabled" } else { "disabled" });
        }

        if self.server.spawns_duplicate_sinks()
            && self.controller.is_enabled()
            && event.mentions_sink()
            && event.is_new()
        {
            trace!("New sink, (re)arming duplicate reduction");
            self.debounce.arm();
        }
    }

    /// Toggle the RAOP module on user request
    ///
    /// # Errors
    /// [`ToggleError::Unavailable`] (after notifying the user) when no server
    /// was detected or the module could never be loaded; otherwise whatever
    /// [`ModuleController::toggle`] returns.
    pub async fn request_toggle(&mut self) -> Result<bool, ToggleError> {
        if !self.server.is_known() || !self.module_available {
            self.notifier.notify_missing();
            return Err(ToggleError::Unavailable);
        }
        self.controller.toggle(&self.ctl).await
    }

    /// Run duplicate reduction now, gated by the `hide_duplicate_sinks` setting
    ///
    /// # Errors
    /// Returns the [`CommandError`] if the sink listing fails.
    pub async fn reduce_duplicates(&mut self) -> Result<Vec<ModuleHandle>, CommandError> {
        let enabled = self.settings.hide_duplicate_sinks();
        self.reducer.reduce(&self.ctl, enabled).await
    }

    /// Re-run detection and rebuild the state if the server changed
    ///
    /// Also restarts a monitor that ended. Returns the detected server.
    pub async fn recheck_server(&mut self) -> AudioServer {
        let detected = audio_server::detect(&self.ctl).await;
        if detected != self.server {
            info!("Audio server changed: {} -> {}", self.server, detected);
            self.deactivate();
            self.activate_for(detected).await;
        } else if detected.is_known() && self.monitor.is_none() {
            debug!("Restarting event monitor");
            self.start_monitor();
        }
        detected
    }

    /// Pick up a changed `pactl` program from the settings
    ///
    /// Returns whether anything changed; a change re-activates from scratch.
    pub async fn reconfigure_pactl(&mut self) -> bool {
        let program = self.settings.pactl();
        if program == self.ctl.pactl().program() {
            return false;
        }
        info!("pactl program changed to {}", program);
        self.deactivate();
        self.ctl.set_pactl(Pactl::new(program));
        self.activate().await;
        true
    }

    /// Deactivate after the subscription process has been reaped
    pub async fn shutdown(&mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.shutdown().await;
        }
        self.deactivate();
    }

    /// Stop monitoring and forget all state; the module itself is left alone
    pub fn deactivate(&mut self) {
        if let Some(mut monitor) = self.monitor.take() {
            monitor.stop();
        }
        self.events = None;
        self.ctl.cancel_all();
        self.debounce.cancel();
        self.server = AudioServer::Unknown;
        self.controller = ModuleController::new(AudioServer::Unknown);
        self.module_available = false;
        debug!("Toggle deactivated");
    }

    #[must_use]
    pub fn status(&self) -> ToggleStatus {
        let settings = self.settings.get();
        let enabled = self.enabled();
        ToggleStatus {
            server: self.server,
            enabled,
            module_available: self.module_available,
            handle: self.controller.handle().map(ToString::to_string),
            monitoring: self.monitor.as_ref().is_some_and(EventMonitor::is_running),
            hide_duplicate_sinks: settings.hide_duplicate_sinks,
            indicator: (enabled && settings.show_indicator)
                .then(|| settings.indicator_icon.icon_name().to_string()),
        }
    }

    /// Feed event lines directly, bypassing the subscription process
    #[cfg(test)]
    pub(crate) fn attach_events(&mut self) -> mpsc::UnboundedSender<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(rx);
        tx
    }

    #[cfg(test)]
    pub(crate) fn debounce(&self) -> &Debounce {
        &self.debounce
    }
}

async fn recv_event(events: &mut Option<mpsc::UnboundedReceiver<String>>) -> Option<String> {
    match events {
        Some(rx) => rx.recv().await,
        None => future::pending().await,
    }
}
