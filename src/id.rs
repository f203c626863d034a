//! Prefixed ID generation for licensing entities.
//!
//! Format: `lp_{entity}_{uuid_simple}` (32 hex chars, no hyphens)

use uuid::Uuid;

/// All known entity prefixes for validation.
const ALL_PREFIXES: &[&str] = &["lp_lic_", "lp_hist_"];

/// Validate that a string is a well-formed prefixed ID.
///
/// This is a cheap check to reject garbage before hitting the database.
pub fn is_valid_prefixed_id(s: &str) -> bool {
    let Some(prefix) = ALL_PREFIXES.iter().find(|p| s.starts_with(*p)) else {
        return false;
    };

    let hex_part = &s[prefix.len()..];

    hex_part.len() == 32 && hex_part.chars().all(|c| c.is_ascii_hexdigit())
}

/// Entity types that have prefixed IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityType {
    License,
    HistoryEntry,
}

impl EntityType {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::License => "lp_lic",
            Self::HistoryEntry => "lp_hist",
        }
    }

    pub fn gen_id(&self) -> String {
        format!("{}_{}", self.prefix(), Uuid::new_v4().as_simple())
    }

    /// True if `s` is a well-formed id of this entity type.
    pub fn matches(&self, s: &str) -> bool {
        s.strip_prefix(self.prefix())
            .and_then(|rest| rest.strip_prefix('_'))
            .is_some()
            && is_valid_prefixed_id(s)
    }
}
