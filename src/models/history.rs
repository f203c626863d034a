use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HistoryAction {
    Activate,
    Heartbeat,
    /// Administrator suspended a device.
    Deactivate,
    /// Administrator restored a device, or a license was extended.
    Renew,
    Cancel,
    Delete,
    Revoke,
    Suspend,
    Restore,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub license_id: String,
    pub action: HistoryAction,
    pub device_id: Option<String>,
    pub ip_address: Option<String>,
    pub details: serde_json::Value,
    pub created_at: i64,
}

/// Who asked for a device state change. Decides which history action is
/// recorded for suspend and restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Actor {
    User,
    Admin,
}

impl Actor {
    pub fn suspend_action(&self) -> HistoryAction {
        match self {
            Actor::User => HistoryAction::Suspend,
            Actor::Admin => HistoryAction::Deactivate,
        }
    }

    pub fn restore_action(&self) -> HistoryAction {
        match self {
            Actor::User => HistoryAction::Restore,
            Actor::Admin => HistoryAction::Renew,
        }
    }
}

/// Result of a state transition request. Repeating a transition is not an
/// error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Applied,
    AlreadyInState,
}
