//! Audio server detection
//!
//! `pactl info` reports the server in a line such as
//! `Server Name: PulseAudio (on PipeWire 1.0.5)` or `Server Name: pulseaudio`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::command::CommandRunner;
use crate::pactl::AudioCtl;

/// Audio server answering `pactl`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioServer {
    PipeWire,
    PulseAudio,
    #[default]
    Unknown,
}

impl AudioServer {
    /// Identify the server from `pactl info` output
    ///
    /// The first line naming either server decides. A line naming both (the
    /// `pipewire-pulse` banner does) counts as `PipeWire`.
    #[must_use]
    pub fn from_info_lines<S: AsRef<str>>(lines: &[S]) -> Self {
        for line in lines {
            let lower = line.as_ref().to_lowercase();
            if lower.contains("pipewire") {
                return Self::PipeWire;
            }
            if lower.contains("pulseaudio") {
                return Self::PulseAudio;
            }
        }
        Self::Unknown
    }

    #[must_use]
    pub fn is_known(self) -> bool {
        self != Self::Unknown
    }

    /// Whether a module keeps its id across unload/load cycles
    ///
    /// `pipewire-pulse` hands out the same id for the discovery module, so the
    /// handle learned once stays useful for matching events. PulseAudio assigns
    /// a fresh id on every load.
    #[must_use]
    pub fn keeps_module_handle(self) -> bool {
        self == Self::PipeWire
    }

    /// Whether the server is known to advertise the same speaker more than once
    #[must_use]
    pub fn spawns_duplicate_sinks(self) -> bool {
        self == Self::PulseAudio
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PipeWire => "pipewire",
            Self::PulseAudio => "pulseaudio",
            Self::Unknown => "unknown",
        }
    }

    /// Human-readable name
    #[must_use]
    pub fn display_name(self) -> &'static str {
        match self {
            Self::PipeWire => "PipeWire",
            Self::PulseAudio => "PulseAudio",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for AudioServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for AudioServer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pipewire" => Ok(Self::PipeWire),
            "pulseaudio" => Ok(Self::PulseAudio),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!(
                "Unknown audio server '{other}'. Must be: pipewire, pulseaudio, or unknown"
            )),
        }
    }
}

/// Detect the running audio server
///
/// Failures are not errors here: a missing `pactl` or an unreachable server
/// both mean the feature is unavailable, so they map to
/// [`AudioServer::Unknown`].
pub async fn detect<R: CommandRunner>(ctl: &AudioCtl<R>) -> AudioServer {
    match ctl.run(&ctl.pactl().info()).await {
        Ok(lines) => {
            let server = AudioServer::from_info_lines(&lines);
            debug!("Detected audio server: {}", server);
            server
        }
        Err(e) => {
            warn!("Audio server detection failed: {}", e);
            AudioServer::Unknown
        }
    }
}
