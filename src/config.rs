//! Configuration management
//!
//! Loads and validates the TOML configuration file and holds the live
//! settings in a [`SettingsStore`] that the daemon can watch for changes.
//! Nothing here writes back to disk after the default file is created.

use color_eyre::eyre::{self, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use crate::audio_server::AudioServer;

// ============================================================================
// Public Configuration Types
// ============================================================================

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub settings: Settings,
}

/// User preferences
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Unload duplicate RAOP sink owners (`PulseAudio` only)
    pub hide_duplicate_sinks: bool,
    /// Force debug-level logging regardless of `log_level`
    pub debug: bool,
    pub log_level: String,
    /// Desktop notifications
    pub notify: bool,
    pub indicator_icon: IndicatorIcon,
    /// Whether status output should advertise the indicator
    pub show_indicator: bool,
    /// Program used for all audio server commands
    pub pactl: String,
    /// Last detected audio server; detection overwrites it in memory
    pub audio_server: Option<AudioServer>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            hide_duplicate_sinks: true,
            debug: false,
            log_level: default_log_level(),
            notify: true,
            indicator_icon: IndicatorIcon::default(),
            show_indicator: true,
            pactl: default_pactl(),
            audio_server: None,
        }
    }
}

impl Settings {
    /// Effective log level, with `debug` taking precedence
    #[must_use]
    pub fn effective_log_level(&self) -> &str {
        if self.debug { "debug" } else { &self.log_level }
    }
}

/// Icon shown by status bars and notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IndicatorIcon {
    #[default]
    MusicNoteOutline,
    MusicNote,
    WavesAndScreen,
    WirelessSpeaker,
    Speaker,
}

impl IndicatorIcon {
    /// Symbolic icon name
    #[must_use]
    pub fn icon_name(self) -> &'static str {
        match self {
            Self::MusicNoteOutline => "music-note-outline-symbolic",
            Self::MusicNote => "music-note-symbolic",
            Self::WavesAndScreen => "waves-and-screen-symbolic",
            Self::WirelessSpeaker => "speaker-wireless-symbolic",
            Self::Speaker => "speaker-symbolic",
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::MusicNoteOutline => "Music Note - Outline",
            Self::MusicNote => "Music Note - Solid",
            Self::WavesAndScreen => "Waves & Screen",
            Self::WirelessSpeaker => "Wireless Speaker",
            Self::Speaker => "Speaker",
        }
    }
}

// ============================================================================
// Config File Deserialization (TOML)
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    settings: SettingsFile,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SettingsFile {
    #[serde(default = "default_true")]
    hide_duplicate_sinks: bool,
    #[serde(default)]
    debug: bool,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default = "default_true")]
    notify: bool,
    #[serde(default)]
    indicator_icon: IndicatorIcon,
    #[serde(default = "default_true")]
    show_indicator: bool,
    #[serde(default = "default_pactl")]
    pactl: String,
    #[serde(default)]
    audio_server: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_pactl() -> String {
    "pactl".to_string()
}

impl Default for SettingsFile {
    fn default() -> Self {
        Self {
            hide_duplicate_sinks: true,
            debug: false,
            log_level: default_log_level(),
            notify: true,
            indicator_icon: IndicatorIcon::default(),
            show_indicator: true,
            pactl: default_pactl(),
            audio_server: None,
        }
    }
}

// ============================================================================
// Config Implementation
// ============================================================================

impl Config {
    /// Load configuration from the default XDG config path
    ///
    /// # Errors
    /// Returns an error if the file cannot be created, read, parsed, or fails
    /// validation.
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;

        if !config_path.exists() {
            info!("Creating default config at {:?}", config_path);
            Self::create_default_config(&config_path)?;
        }

        Self::load_from_path(&config_path)
    }

    /// Load configuration from an explicit path
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {path:?}"))?;
        Self::parse(&contents).with_context(|| format!("Invalid config: {path:?}"))
    }

    /// Parse configuration from TOML text
    ///
    /// # Errors
    /// Returns an error on malformed TOML, unknown keys, or invalid values.
    pub fn parse(contents: &str) -> Result<Self> {
        let config_file: ConfigFile = toml::from_str(contents).context("Failed to parse TOML")?;
        Self::from_config_file(config_file)
    }

    fn from_config_file(config_file: ConfigFile) -> Result<Self> {
        let file = config_file.settings;

        let audio_server = match file.audio_server.as_deref() {
            None | Some("") => None,
            Some(name) => Some(name.parse::<AudioServer>().map_err(|e| eyre::eyre!(e))?),
        };

        let settings = Settings {
            hide_duplicate_sinks: file.hide_duplicate_sinks,
            debug: file.debug,
            log_level: file.log_level,
            notify: file.notify,
            indicator_icon: file.indicator_icon,
            show_indicator: file.show_indicator,
            pactl: file.pactl,
            audio_server,
        };

        let config = Config { settings };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        match self.settings.log_level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            level => eyre::bail!(
                "Invalid log_level '{level}'. Must be: error, warn, info, debug, or trace"
            ),
        }

        if self.settings.pactl.trim().is_empty() {
            eyre::bail!("pactl must name a program");
        }

        Ok(())
    }

    /// Get the XDG config path
    ///
    /// # Errors
    /// Returns an error if the config directory cannot be determined or created.
    pub fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| eyre::eyre!("Could not determine config directory"))?
            .join("raop-toggle");
        fs::create_dir_all(&config_dir)
            .with_context(|| format!("Failed to create config dir: {config_dir:?}"))?;
        Ok(config_dir.join("config.toml"))
    }

    fn create_default_config(path: &Path) -> Result<()> {
        let default_config = r#"# raop-toggle configuration
#
# Toggles the RAOP (AirPlay) discovery module of PipeWire or PulseAudio.

[settings]
hide_duplicate_sinks = true           # PulseAudio: unload duplicate AirPlay speakers
debug = false                         # Force debug logging
log_level = "info"                    # error, warn, info, debug, trace
notify = true                         # Desktop notifications
indicator_icon = "music-note-outline" # music-note-outline, music-note, waves-and-screen, wireless-speaker, speaker
show_indicator = true                 # Report the indicator as visible in status output
pactl = "pactl"                       # Program used to talk to the audio server
# audio_server = "pipewire"           # Informational; detected at startup
"#;
        fs::write(path, default_config)
            .with_context(|| format!("Failed to write config: {path:?}"))?;

        eprintln!("Created default config at: {path:?}");
        eprintln!();
        eprintln!("Next steps:");
        eprintln!("  1. Run 'raop-toggle detect' to check your audio server");
        eprintln!("  2. Run 'raop-toggle validate' to check your config");
        eprintln!("  3. Run 'raop-toggle daemon' to start");
        eprintln!();

        Ok(())
    }

    /// Print a human-readable summary of the configuration
    pub fn print_summary(&self) {
        let s = &self.settings;
        println!("✓ Configuration valid\n");

        println!("Settings:");
        println!("  hide_duplicate_sinks: {}", s.hide_duplicate_sinks);
        println!("  debug: {}", s.debug);
        println!("  log_level: {}", s.log_level);
        println!("  notify: {}", s.notify);
        println!("  indicator_icon: {}", s.indicator_icon.label());
        println!("  show_indicator: {}", s.show_indicator);
        println!("  pactl: {}", s.pactl);
        println!(
            "  audio_server: {}",
            s.audio_server.map_or("(detected at startup)", AudioServer::as_str)
        );

        if let Ok(path) = Self::get_config_path() {
            println!("\nConfig: {path:?}");
        }
    }
}

// ============================================================================
// Live Settings
// ============================================================================

/// In-memory settings with change notification
///
/// Clones share the same value. Writes are never persisted.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    tx: Arc<watch::Sender<Settings>>,
}

impl SettingsStore {
    #[must_use]
    pub fn new(settings: Settings) -> Self {
        let (tx, _rx) = watch::channel(settings);
        Self { tx: Arc::new(tx) }
    }

    /// Snapshot of the current settings
    #[must_use]
    pub fn get(&self) -> Settings {
        self.tx.borrow().clone()
    }

    #[must_use]
    pub fn hide_duplicate_sinks(&self) -> bool {
        self.tx.borrow().hide_duplicate_sinks
    }

    #[must_use]
    pub fn pactl(&self) -> String {
        self.tx.borrow().pactl.clone()
    }

    #[must_use]
    pub fn audio_server(&self) -> Option<AudioServer> {
        self.tx.borrow().audio_server
    }

    /// Record the detected server; watchers are only woken on a change
    pub fn set_audio_server(&self, server: AudioServer) {
        self.tx.send_if_modified(|settings| {
            if settings.audio_server == Some(server) {
                false
            } else {
                settings.audio_server = Some(server);
                true
            }
        });
    }

    /// Replace all preferences, keeping the detected audio server
    pub fn replace(&self, mut settings: Settings) {
        self.tx.send_modify(|current| {
            if current.audio_server.is_some() {
                settings.audio_server = current.audio_server;
            }
            *current = settings;
        });
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Settings> {
        self.tx.subscribe()
    }
}
