use serde::{Deserialize, Serialize};

use super::license::License;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceActivation {
    pub license_id: String,
    pub device_id: String,
    pub device_name: Option<String>,
    pub ip_address: Option<String>,
    pub activated_at: i64,
    pub last_seen_at: i64,
    /// False while the device is suspended. A suspended device still holds
    /// its quota slot until it is restored, cancelled or deleted.
    pub is_active: bool,
}

/// Device row joined with the owning license, for status lookups.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatusView {
    #[serde(flatten)]
    pub device: DeviceActivation,
    pub activation_code: String,
    pub email: String,
    pub plan: super::license::Plan,
    pub license_status: super::license::LicenseStatus,
    pub valid_until: Option<i64>,
    pub device_limit: i64,
}

/// Input for `verify_and_activate`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VerifyRequest {
    pub code: String,
    pub email: String,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
}

impl VerifyRequest {
    pub fn new(code: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            email: email.into(),
            ..Self::default()
        }
    }

    pub fn device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = Some(name.into());
        self
    }

    pub fn ip(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }
}

/// Successful verification.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum VerifyOutcome {
    /// Credentials are valid; no device was given so the ledger was not touched.
    LicenseValid { license: License },
    /// A new device took a quota slot.
    Activated {
        license: License,
        device: DeviceActivation,
    },
    /// A known active device checked in again.
    Heartbeat {
        license: License,
        device: DeviceActivation,
    },
}

impl VerifyOutcome {
    pub fn license(&self) -> &License {
        match self {
            VerifyOutcome::LicenseValid { license }
            | VerifyOutcome::Activated { license, .. }
            | VerifyOutcome::Heartbeat { license, .. } => license,
        }
    }

    pub fn device(&self) -> Option<&DeviceActivation> {
        match self {
            VerifyOutcome::LicenseValid { .. } => None,
            VerifyOutcome::Activated { device, .. } | VerifyOutcome::Heartbeat { device, .. } => {
                Some(device)
            }
        }
    }
}
