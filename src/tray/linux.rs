use ksni::menu::StandardItem;
use std::sync::mpsc::Sender;

use super::{TrayAction, menu_entries};
use crate::models::{ControllerStatus, SharedStatus};

/// StatusNotifierItem implementation for freedesktop/KDE trays.
pub struct PresenceTray {
    actions: Sender<TrayAction>,
    status: SharedStatus,
}

impl PresenceTray {
    pub fn new(actions: Sender<TrayAction>, status: SharedStatus) -> Self {
        Self { actions, status }
    }

    fn send(&self, action: TrayAction) {
        if self.actions.send(action).is_err() {
            tracing::debug!("Tray action {action:?} dropped, daemon is gone");
        }
    }

    fn snapshot(&self) -> ControllerStatus {
        self.status
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl ksni::Tray for PresenceTray {
    fn id(&self) -> String {
        "kodicord".into()
    }

    fn title(&self) -> String {
        format!("kodicord: {}", self.snapshot().summary())
    }

    fn icon_name(&self) -> String {
        if self.snapshot().running {
            "media-playback-start".into()
        } else {
            "media-playback-stop".into()
        }
    }

    fn menu(&self) -> Vec<ksni::MenuItem<Self>> {
        menu_entries(&self.snapshot())
            .into_iter()
            .enumerate()
            .flat_map(|(i, entry)| {
                let item: ksni::MenuItem<Self> = StandardItem {
                    label: entry.label,
                    enabled: entry.enabled && entry.action.is_some(),
                    activate: match entry.action {
                        Some(action) => Box::new(move |tray: &mut Self| tray.send(action)),
                        None => Box::new(|_: &mut Self| {}),
                    },
                    ..Default::default()
                }
                .into();
                // Separate the status line from the actions.
                if i == 0 {
                    vec![item, ksni::MenuItem::Separator]
                } else {
                    vec![item]
                }
            })
            .collect()
    }
}
