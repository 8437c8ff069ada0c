//! `pactl` command lines and output vocabulary
//!
//! Both supported servers speak the PulseAudio protocol (`PipeWire` through
//! `pipewire-pulse`), so a single tool covers them:
//! - `pactl info`: server identification
//! - `pactl list modules short`: loaded modules, one per line, id first
//! - `pactl load-module` / `pactl unload-module`: toggling the RAOP module
//! - `pactl list sinks`: sink records with their owner module
//! - `pactl subscribe`: live event stream (`Event 'new' on module #23`)

use tokio_util::sync::CancellationToken;

use crate::command::{CommandError, CommandRunner};
use crate::module::ModuleHandle;

/// Module that discovers AirPlay speakers and creates a sink per speaker
pub const RAOP_MODULE: &str = "module-raop-discover";

/// Substring identifying sinks created by the RAOP modules
pub const RAOP_SINK_MARKER: &str = "raop";

/// Builds `pactl` argument vectors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pactl {
    program: String,
}

impl Default for Pactl {
    fn default() -> Self {
        Self::new("pactl")
    }
}

impl Pactl {
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    fn argv(&self, args: &[&str]) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(args.iter().map(|a| (*a).to_string()))
            .collect()
    }

    #[must_use]
    pub fn info(&self) -> Vec<String> {
        self.argv(&["info"])
    }

    #[must_use]
    pub fn list_modules(&self) -> Vec<String> {
        self.argv(&["list", "modules", "short"])
    }

    #[must_use]
    pub fn load_raop(&self) -> Vec<String> {
        self.argv(&["load-module", RAOP_MODULE])
    }

    /// Unload every instance of the RAOP discovery module
    #[must_use]
    pub fn unload_raop(&self) -> Vec<String> {
        self.argv(&["unload-module", RAOP_MODULE])
    }

    /// Unload one module instance by handle
    #[must_use]
    pub fn unload_module(&self, handle: &ModuleHandle) -> Vec<String> {
        self.argv(&["unload-module", handle.as_str()])
    }

    #[must_use]
    pub fn list_sinks(&self) -> Vec<String> {
        self.argv(&["list", "sinks"])
    }

    #[must_use]
    pub fn subscribe(&self) -> Vec<String> {
        self.argv(&["subscribe"])
    }
}

/// Runs `pactl` through a [`CommandRunner`] under one cancellation root
///
/// Each call gets its own child token, so [`AudioCtl::cancel_all`] stops every
/// in-flight command while individual callers stay independent.
#[derive(Debug)]
pub struct AudioCtl<R> {
    runner: R,
    pactl: Pactl,
    cancel: CancellationToken,
}

impl<R: CommandRunner> AudioCtl<R> {
    pub fn new(runner: R, pactl: Pactl) -> Self {
        Self {
            runner,
            pactl,
            cancel: CancellationToken::new(),
        }
    }

    pub fn pactl(&self) -> &Pactl {
        &self.pactl
    }

    pub fn set_pactl(&mut self, pactl: Pactl) {
        self.pactl = pactl;
    }

    /// Run one command under a fresh child token
    ///
    /// # Errors
    /// Propagates the runner's [`CommandError`].
    pub async fn run(&self, argv: &[String]) -> Result<Vec<String>, CommandError> {
        let token = self.cancel.child_token();
        self.runner.run(argv, &token).await
    }

    /// Cancel every in-flight command and start a fresh cancellation root
    pub fn cancel_all(&mut self) {
        self.cancel.cancel();
        self.cancel = CancellationToken::new();
    }
}

/// One line of `pactl subscribe` output
#[derive(Debug, Clone, Copy)]
pub struct EventLine<'a>(pub &'a str);

impl EventLine<'_> {
    #[must_use]
    pub fn is_new(&self) -> bool {
        self.0.contains("new")
    }

    #[must_use]
    pub fn is_remove(&self) -> bool {
        self.0.contains("remove")
    }

    #[must_use]
    pub fn mentions_module(&self) -> bool {
        self.0.contains("module")
    }

    #[must_use]
    pub fn mentions_sink(&self) -> bool {
        self.0.contains("sink")
    }

    /// Whether the line names `handle` as a whole token
    ///
    /// `#23` matches handle `23`, `#123` and `#230` do not.
    #[must_use]
    pub fn references(&self, handle: &ModuleHandle) -> bool {
        let needle = handle.as_str();
        if needle.is_empty() {
            return false;
        }
        let line = self.0;
        line.match_indices(needle).any(|(start, _)| {
            let before = line[..start].chars().next_back();
            let after = line[start + needle.len()..].chars().next();
            !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
        })
    }
}
