//! `raop-toggle` - AirPlay (RAOP) toggle for `PipeWire` and `PulseAudio`
//!
//! Loads and unloads the RAOP discovery module through `pactl`, follows
//! module changes made by other tools via `pactl subscribe`, and on
//! `PulseAudio` unloads duplicate AirPlay sinks for the same speaker.
//!
//! # Features
//! - Audio server detection (`PipeWire` or `PulseAudio`)
//! - Toggle with rollback on failure and a busy guard
//! - Module handle bootstrap and external-change reconciliation
//! - Debounced duplicate sink reduction (`PulseAudio`)
//! - Background daemon with IPC control and desktop notifications

pub mod audio_server;
pub mod cli;
pub mod command;
pub mod commands;
pub mod config;
pub mod daemon;
pub mod ipc;
pub mod logging;
pub mod module;
pub mod monitor;
pub mod notification;
pub mod pactl;
pub mod sinks;
pub mod style;
pub mod toggle;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types for convenience
pub use cli::Args;
pub use config::Config;
pub use toggle::ToggleState;
