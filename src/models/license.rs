use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::error::{AppError, Result, msg};

use super::device::DeviceActivation;
use super::history::HistoryEntry;

pub const SECONDS_PER_DAY: i64 = 86400;

/// Longest duration accepted for issuance overrides and extensions.
pub const MAX_DURATION_DAYS: i64 = 36500;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Plan {
    Monthly,
    Yearly,
    Lifetime,
}

impl Plan {
    /// Parse a caller-supplied plan name, ignoring case and surrounding space.
    pub fn normalize(raw: &str) -> Result<Self> {
        raw.trim()
            .to_ascii_lowercase()
            .parse()
            .map_err(|_| AppError::Validation(msg::UNKNOWN_PLAN.into()))
    }

    /// Validity granted when issuance does not override it.
    /// `None` means the license never expires.
    pub fn default_duration_days(&self) -> Option<i64> {
        match self {
            Plan::Monthly => Some(31),
            Plan::Yearly => Some(365),
            Plan::Lifetime => None,
        }
    }

    /// Expiry for a license of this plan issued at `issued_at`.
    ///
    /// An explicit override wins for subscription plans. Lifetime plans never
    /// get an expiry at issuance.
    pub fn resolve_valid_until(&self, issued_at: i64, override_days: Option<i64>) -> Option<i64> {
        match self {
            Plan::Lifetime => None,
            _ => override_days
                .or(self.default_duration_days())
                .map(|days| issued_at.saturating_add(days.saturating_mul(SECONDS_PER_DAY))),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LicenseStatus {
    Active,
    Suspended,
    Revoked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct License {
    pub license_id: String,
    /// Grouped `AAAAA-BBBBB-CXXXX` form.
    pub activation_code: String,
    pub email: String,
    pub plan: Plan,
    pub device_limit: i64,
    pub issued_at: i64,
    /// None = never expires (lifetime plan or administrative override)
    pub valid_until: Option<i64>,
    pub status: LicenseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_hint: Option<String>,
}

impl License {
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.valid_until.is_some_and(|until| now > until)
    }

    pub fn validity_at(&self, now: i64) -> Validity {
        match self.valid_until {
            None => Validity::Unlimited,
            Some(until) if until > now => Validity::Remaining {
                days: (until - now) / SECONDS_PER_DAY,
            },
            Some(_) => Validity::Expired,
        }
    }
}

/// Input for issuing a license. Plan is kept as raw text so unknown plans
/// are reported as validation errors.
#[derive(Debug, Clone, Deserialize)]
pub struct IssueLicense {
    pub plan: String,
    pub email: String,
    #[serde(default)]
    pub device_limit: Option<i64>,
    #[serde(default)]
    pub duration_days: Option<i64>,
    #[serde(default)]
    pub user_hint: Option<String>,
}

impl IssueLicense {
    pub fn new(plan: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            plan: plan.into(),
            email: email.into(),
            device_limit: None,
            duration_days: None,
            user_hint: None,
        }
    }

    pub fn device_limit(mut self, limit: i64) -> Self {
        self.device_limit = Some(limit);
        self
    }

    pub fn duration_days(mut self, days: i64) -> Self {
        self.duration_days = Some(days);
        self
    }

    pub fn user_hint(mut self, hint: impl Into<String>) -> Self {
        self.user_hint = Some(hint.into());
        self
    }

    /// Validate the request and return the normalized plan.
    pub fn validate(&self) -> Result<Plan> {
        validate_email_format(&self.email)?;
        let plan = Plan::normalize(&self.plan)?;
        if let Some(days) = self.duration_days
            && !(1..=MAX_DURATION_DAYS).contains(&days)
        {
            return Err(AppError::Validation(msg::INVALID_DURATION.into()));
        }
        Ok(plan)
    }
}

/// Row written by the registry once issuance has been validated.
#[derive(Debug, Clone)]
pub struct NewLicense {
    pub license_id: String,
    pub activation_code: String,
    pub email: String,
    pub plan: Plan,
    pub device_limit: i64,
    pub issued_at: i64,
    pub valid_until: Option<i64>,
    pub user_hint: Option<String>,
}

fn is_local_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '%' | '+' | '-')
}

fn is_domain_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-')
}

/// Basic email format validation.
///
/// Accepts `local@domain.tld` where the local part uses letters, digits and
/// `._%+-`, the domain uses letters, digits, dots and hyphens, and the final
/// label is at least two letters. Not RFC 5322.
pub fn validate_email_format(email: &str) -> Result<()> {
    let email = email.trim();

    if email.is_empty() {
        return Err(AppError::Validation(msg::EMAIL_EMPTY.into()));
    }

    let invalid = || AppError::Validation(msg::INVALID_EMAIL_FORMAT.into());

    let (local_part, domain_part) = email.split_once('@').ok_or_else(invalid)?;

    if local_part.is_empty() || !local_part.chars().all(is_local_char) {
        return Err(invalid());
    }

    if !domain_part.chars().all(is_domain_char) {
        return Err(invalid());
    }

    let (host, tld) = domain_part.rsplit_once('.').ok_or_else(invalid)?;
    if host.is_empty() || tld.len() < 2 || !tld.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(invalid());
    }

    Ok(())
}

/// Human-facing validity summary used in listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Validity {
    Unlimited,
    Remaining { days: i64 },
    Expired,
}

#[derive(Debug, Clone, Serialize)]
pub struct LicenseView {
    #[serde(flatten)]
    pub license: License,
    pub active_devices: i64,
    pub validity: Validity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationRecord {
    pub license_id: String,
    pub reason: String,
    pub revoked_by: Option<String>,
    pub revoked_at: i64,
}

/// Everything an administrator sees for one license.
#[derive(Debug, Clone, Serialize)]
pub struct LicenseDetails {
    #[serde(flatten)]
    pub view: LicenseView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revocation: Option<RevocationRecord>,
    pub devices: Vec<DeviceActivation>,
    pub history: Vec<HistoryEntry>,
}
