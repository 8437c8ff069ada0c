//! Desktop notifications
//!
//! The toggle only ever tells the user one thing: that no supported audio
//! server or RAOP module was found.

use color_eyre::eyre::{Context, Result};
use notify_rust::Notification;
use tracing::warn;

use crate::config::SettingsStore;

pub const MISSING_TITLE: &str = "Supported Audio Server and/or Modules Not Found";
pub const MISSING_BODY: &str = "Please review and install the required dependencies outlined in the \
    'pipewire-airplay-toggle' extension's Installation Guide - \
    https://github.com/craw0967/pipewire-airplay-toggle/wiki/Installation-Guide";

const APP_NAME: &str = "AirPlay Toggle";

/// Send a desktop notification
///
/// # Errors
/// Returns an error if the notification cannot be sent (e.g., no notification daemon running).
pub fn send_notification(summary: &str, body: &str, icon: Option<&str>) -> Result<()> {
    let icon = icon.unwrap_or("audio-speakers");

    Notification::new()
        .summary(summary)
        .body(body)
        .appname(APP_NAME)
        .icon(icon)
        .timeout(5000)
        .show()
        .context("Failed to show notification")?;

    Ok(())
}

/// User-facing notification channel
pub trait Notifier {
    fn notify(&self, summary: &str, body: &str);

    /// Report that no supported audio server or RAOP module is available
    fn notify_missing(&self) {
        self.notify(MISSING_TITLE, MISSING_BODY);
    }
}

/// Sends notifications through the desktop notification daemon
///
/// Honors the `notify` setting and uses the configured indicator icon.
#[derive(Debug, Clone)]
pub struct DesktopNotifier {
    settings: SettingsStore,
}

impl DesktopNotifier {
    #[must_use]
    pub fn new(settings: SettingsStore) -> Self {
        Self { settings }
    }
}

impl Notifier for DesktopNotifier {
    fn notify(&self, summary: &str, body: &str) {
        let settings = self.settings.get();
        if !settings.notify {
            return;
        }
        if let Err(e) = send_notification(summary, body, Some(settings.indicator_icon.icon_name())) {
            warn!("Could not send notification: {:#}", e);
        }
    }
}
