//! Status-bar icon.
//!
//! The tray only emits `TrayAction`s over a channel; the daemon decides what
//! they mean. On platforms without a tray backend `spawn` returns `None` and
//! the CLI is the only control surface.

use std::sync::mpsc::Sender;

use crate::models::{ControllerStatus, SharedStatus};

#[cfg(target_os = "linux")]
mod linux;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrayAction {
    Start,
    Stop,
    /// Open the config file for editing.
    Settings,
    /// Re-read the config file and restart polling.
    Reload,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuEntry {
    pub label: String,
    /// `None` for informational lines.
    pub action: Option<TrayAction>,
    pub enabled: bool,
}

impl MenuEntry {
    fn action(label: &str, action: TrayAction, enabled: bool) -> Self {
        Self {
            label: label.to_string(),
            action: Some(action),
            enabled,
        }
    }
}

pub fn menu_entries(status: &ControllerStatus) -> Vec<MenuEntry> {
    vec![
        MenuEntry {
            label: status.summary(),
            action: None,
            enabled: false,
        },
        MenuEntry::action("Start", TrayAction::Start, !status.running),
        MenuEntry::action("Stop", TrayAction::Stop, status.running),
        MenuEntry::action("Settings…", TrayAction::Settings, true),
        MenuEntry::action("Reload settings", TrayAction::Reload, true),
        MenuEntry::action("Quit", TrayAction::Quit, true),
    ]
}

#[derive(Clone)]
pub struct TrayHandle {
    #[cfg(target_os = "linux")]
    inner: ksni::Handle<linux::PresenceTray>,
}

impl TrayHandle {
    /// Re-reads the status so the menu reflects it.
    pub fn refresh(&self) {
        #[cfg(target_os = "linux")]
        self.inner.update(|_| {});
    }

    pub fn shutdown(&self) {
        #[cfg(target_os = "linux")]
        self.inner.shutdown();
    }
}

#[cfg(target_os = "linux")]
pub fn spawn(actions: Sender<TrayAction>, status: SharedStatus) -> Option<TrayHandle> {
    let service = ksni::TrayService::new(linux::PresenceTray::new(actions, status));
    let inner = service.handle();
    service.spawn();
    tracing::info!("Tray icon started");
    Some(TrayHandle { inner })
}

#[cfg(not(target_os = "linux"))]
pub fn spawn(_actions: Sender<TrayAction>, _status: SharedStatus) -> Option<TrayHandle> {
    tracing::info!("No tray backend on this platform; use the kodicord CLI to control the daemon");
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled(entries: &[MenuEntry], action: TrayAction) -> bool {
        entries
            .iter()
            .find(|e| e.action == Some(action))
            .map(|e| e.enabled)
            .unwrap()
    }

    #[test]
    fn test_menu_when_stopped() {
        let entries = menu_entries(&ControllerStatus::default());
        assert_eq!(entries[0].label, "Stopped");
        assert!(!entries[0].enabled);
        assert!(enabled(&entries, TrayAction::Start));
        assert!(!enabled(&entries, TrayAction::Stop));
        assert!(enabled(&entries, TrayAction::Reload));
    }

    #[test]
    fn test_menu_when_running() {
        let status = ControllerStatus {
            running: true,
            now_playing: Some("Movie A".to_string()),
            playing: true,
            ..Default::default()
        };
        let entries = menu_entries(&status);
        assert_eq!(entries[0].label, "▶ Movie A");
        assert!(!enabled(&entries, TrayAction::Start));
        assert!(enabled(&entries, TrayAction::Stop));
        assert_eq!(entries.last().unwrap().action, Some(TrayAction::Quit));
    }
}
