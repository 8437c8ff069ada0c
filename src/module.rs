//! RAOP discovery module state machine
//!
//! Tracks whether `module-raop-discover` is loaded and which handle the server
//! assigned to it. The controller is a plain owned struct; every transition is
//! an explicit method driven by the toggle orchestrator.

use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::audio_server::AudioServer;
use crate::command::{CommandError, CommandRunner};
use crate::pactl::{AudioCtl, EventLine, RAOP_MODULE};

/// Identifier the audio server assigned to a loaded module instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ModuleHandle(String);

impl ModuleHandle {
    /// Parse a handle from a bare id such as `23`
    ///
    /// Only all-digit text (after trimming) is accepted; `load-module` prints
    /// exactly that on success.
    #[must_use]
    pub fn parse_id(text: &str) -> Option<Self> {
        let text = text.trim();
        (!text.is_empty() && text.bytes().all(|b| b.is_ascii_digit())).then(|| Self(text.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ModuleHandle {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ModuleHandle {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Find the RAOP module in `pactl list modules short` output
///
/// The first line containing the module name wins and its leading token is
/// the handle. A module reloaded while the listing is produced could appear
/// twice; the later entry is ignored.
#[must_use]
pub fn find_raop_handle<S: AsRef<str>>(lines: &[S]) -> Option<ModuleHandle> {
    lines
        .iter()
        .map(AsRef::as_ref)
        .find(|line| line.contains(RAOP_MODULE))
        .and_then(|line| line.split_whitespace().next())
        .map(ModuleHandle::from)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleState {
    Unloaded,
    Loaded(ModuleHandle),
    /// A load or unload command is in flight
    Toggling,
}

/// Why a toggle request was not carried out
#[derive(Debug, Error)]
pub enum ToggleError {
    #[error("a toggle is already in progress")]
    Busy,

    #[error("no supported audio server or RAOP module found")]
    Unavailable,

    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Result of reconciling one event line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Unchanged,
    Changed { enabled: bool },
}

/// Owns the module handle and the load state
#[derive(Debug)]
pub struct ModuleController {
    server: AudioServer,
    state: ModuleState,
    /// Handle used to recognise event lines, kept across unloads on `PipeWire`
    known_handle: Option<ModuleHandle>,
}

impl ModuleController {
    #[must_use]
    pub fn new(server: AudioServer) -> Self {
        Self {
            server,
            state: ModuleState::Unloaded,
            known_handle: None,
        }
    }

    #[must_use]
    pub fn server(&self) -> AudioServer {
        self.server
    }

    #[must_use]
    pub fn state(&self) -> &ModuleState {
        &self.state
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        matches!(self.state, ModuleState::Loaded(_))
    }

    /// Handle of the loaded module, if loaded
    #[must_use]
    pub fn handle(&self) -> Option<&ModuleHandle> {
        match &self.state {
            ModuleState::Loaded(handle) => Some(handle),
            _ => None,
        }
    }

    /// Handle used for event matching; may outlive the loaded state
    #[must_use]
    pub fn known_handle(&self) -> Option<&ModuleHandle> {
        self.known_handle.as_ref()
    }

    fn set_loaded(&mut self, handle: ModuleHandle) {
        self.known_handle = Some(handle.clone());
        self.state = ModuleState::Loaded(handle);
    }

    fn set_unloaded(&mut self) {
        if !self.server.keeps_module_handle() {
            self.known_handle = None;
        }
        self.state = ModuleState::Unloaded;
    }

    /// Resynchronise with `pactl list modules short`
    ///
    /// A listing without the module is a normal `false`, not an error.
    ///
    /// # Errors
    /// Returns the [`CommandError`] if the listing itself fails; the state is
    /// left untouched in that case.
    pub async fn query_current<R: CommandRunner>(
        &mut self,
        ctl: &AudioCtl<R>,
    ) -> Result<bool, CommandError> {
        let lines = ctl.run(&ctl.pactl().list_modules()).await?;
        match find_raop_handle(&lines) {
            Some(handle) => {
                debug!("RAOP module loaded with handle {}", handle);
                self.set_loaded(handle);
                Ok(true)
            }
            None => {
                debug!("RAOP module not loaded");
                self.set_unloaded();
                Ok(false)
            }
        }
    }

    /// Load the module when unloaded, unload it when loaded
    ///
    /// Returns the new enabled state.
    ///
    /// # Errors
    /// [`ToggleError::Busy`] while another toggle is in flight. A failed
    /// command restores the prior state and is returned as
    /// [`ToggleError::Command`].
    pub async fn toggle<R: CommandRunner>(&mut self, ctl: &AudioCtl<R>) -> Result<bool, ToggleError> {
        let prior = match &self.state {
            ModuleState::Toggling => return Err(ToggleError::Busy),
            state => state.clone(),
        };
        self.state = ModuleState::Toggling;

        let result = match &prior {
            ModuleState::Loaded(_) => self.unload(ctl).await,
            _ => self.load(ctl).await,
        };

        match result {
            Ok(enabled) => {
                info!("RAOP module {}", if enabled { "loaded" } else { "unloaded" });
                Ok(enabled)
            }
            Err(e) => {
                warn!("RAOP toggle failed: {}", e);
                self.state = prior;
                Err(e.into())
            }
        }
    }

    async fn load<R: CommandRunner>(&mut self, ctl: &AudioCtl<R>) -> Result<bool, CommandError> {
        let output = ctl.run(&ctl.pactl().load_raop()).await?;

        let printed = output
            .iter()
            .find(|line| !line.trim().is_empty())
            .and_then(|line| ModuleHandle::parse_id(line));

        if let Some(handle) = printed.or_else(|| self.known_handle.clone()) {
            self.set_loaded(handle);
            return Ok(true);
        }

        debug!("load-module printed no id, querying module list");
        self.state = ModuleState::Unloaded;
        let found = self.query_current(ctl).await?;
        if !found {
            warn!("RAOP module not listed after a successful load");
        }
        Ok(found)
    }

    async fn unload<R: CommandRunner>(&mut self, ctl: &AudioCtl<R>) -> Result<bool, CommandError> {
        // By name: every instance of the discovery module goes away
        ctl.run(&ctl.pactl().unload_raop()).await?;
        self.set_unloaded();
        Ok(false)
    }

    /// Learn the handle with a load/unload cycle
    ///
    /// Used at startup when the module is not loaded, so later event lines
    /// can be matched against the handle. Ends `Unloaded`; `PulseAudio`
    /// forgets the learned handle because its next load gets a new one.
    ///
    /// # Errors
    /// Propagates the first failing toggle. A failure during the unload half
    /// leaves the module loaded and the state `Loaded`.
    pub async fn bootstrap<R: CommandRunner>(&mut self, ctl: &AudioCtl<R>) -> Result<(), ToggleError> {
        debug!("Bootstrapping RAOP module handle");
        if !self.is_enabled() {
            self.toggle(ctl).await?;
        }
        if self.is_enabled() {
            self.toggle(ctl).await?;
        }
        debug!(
            "Bootstrap done, known handle: {}",
            self.known_handle.as_ref().map_or("none", ModuleHandle::as_str)
        );
        Ok(())
    }

    /// Reconcile the state with one `pactl subscribe` line
    ///
    /// # Errors
    /// Returns the [`CommandError`] of a resynchronising query; the state is
    /// left as it was.
    pub async fn on_event_line<R: CommandRunner>(
        &mut self,
        ctl: &AudioCtl<R>,
        line: &str,
    ) -> Result<EventOutcome, CommandError> {
        let event = EventLine(line);
        // PulseAudio reports sink churn on every speaker; only module lines matter here
        if self.server == AudioServer::PulseAudio && !event.mentions_module() {
            return Ok(EventOutcome::Unchanged);
        }

        let before = self.is_enabled();
        let matches_known = self.known_handle.as_ref().is_some_and(|h| event.references(h));

        if matches_known && event.is_remove() {
            self.set_unloaded();
        } else {
            // Unloaded with a stale handle: another client may have loaded it under a new id
            let unknown_module = self.known_handle.is_none() || (!before && !matches_known);
            if unknown_module && event.is_new() && event.mentions_module() {
                self.query_current(ctl).await?;
            }
            let matched = self
                .known_handle
                .clone()
                .filter(|h| event.references(h) && event.is_new());
            if let Some(handle) = matched {
                self.set_loaded(handle);
            }
        }

        let after = self.is_enabled();
        if before == after {
            Ok(EventOutcome::Unchanged)
        } else {
            info!("RAOP module {} externally", if after { "loaded" } else { "unloaded" });
            Ok(EventOutcome::Changed { enabled: after })
        }
    }
}
