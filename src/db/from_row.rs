//! Row mapping trait and helpers for reducing boilerplate in queries.
//!
//! Models implement `FromRow` to describe how they are built from a row
//! selected with the matching `*_COLS` constant.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::*;

/// Parse a string column into an enum type, converting parse errors to rusqlite errors.
///
/// A corrupt or hand-edited value surfaces as a column type error rather than
/// a panic.
fn parse_enum<T: std::str::FromStr>(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<T> {
    row.get::<_, String>(col)?.parse::<T>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
    })
}

/// Trait for constructing a type from a database row.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const LICENSE_COLS: &str = "license_id, activation_code, email, plan, device_limit, issued_at, valid_until, status, user_hint";

/// Same columns as `LICENSE_COLS`, qualified for joins against `l`.
pub const LICENSE_COLS_L: &str = "l.license_id, l.activation_code, l.email, l.plan, l.device_limit, l.issued_at, l.valid_until, l.status, l.user_hint";

pub const DEVICE_COLS: &str =
    "license_id, device_id, device_name, ip_address, activated_at, last_seen_at, is_active";

pub const DEVICE_COLS_D: &str = "d.license_id, d.device_id, d.device_name, d.ip_address, d.activated_at, d.last_seen_at, d.is_active";

pub const REVOCATION_COLS: &str = "license_id, reason, revoked_by, revoked_at";

pub const HISTORY_COLS: &str =
    "id, license_id, action, device_id, ip_address, details, created_at";

// ============ FromRow Implementations ============

impl FromRow for License {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(License {
            license_id: row.get(0)?,
            activation_code: row.get(1)?,
            email: row.get(2)?,
            plan: parse_enum(row, 3, "plan")?,
            device_limit: row.get(4)?,
            issued_at: row.get(5)?,
            valid_until: row.get(6)?,
            status: parse_enum(row, 7, "status")?,
            user_hint: row.get(8)?,
        })
    }
}

impl FromRow for DeviceActivation {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(DeviceActivation {
            license_id: row.get(0)?,
            device_id: row.get(1)?,
            device_name: row.get(2)?,
            ip_address: row.get(3)?,
            activated_at: row.get(4)?,
            last_seen_at: row.get(5)?,
            is_active: row.get::<_, i32>(6)? != 0,
        })
    }
}

/// Device columns followed by `activation_code, email, plan, status,
/// valid_until, device_limit` of the license.
impl FromRow for DeviceStatusView {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(DeviceStatusView {
            device: DeviceActivation::from_row(row)?,
            activation_code: row.get(7)?,
            email: row.get(8)?,
            plan: parse_enum(row, 9, "plan")?,
            license_status: parse_enum(row, 10, "status")?,
            valid_until: row.get(11)?,
            device_limit: row.get(12)?,
        })
    }
}

/// License columns followed by the active device count.
impl FromRow for LicenseView {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let license = License::from_row(row)?;
        let validity = license.validity_at(chrono::Utc::now().timestamp());
        Ok(LicenseView {
            license,
            active_devices: row.get(9)?,
            validity,
        })
    }
}

impl FromRow for RevocationRecord {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(RevocationRecord {
            license_id: row.get(0)?,
            reason: row.get(1)?,
            revoked_by: row.get(2)?,
            revoked_at: row.get(3)?,
        })
    }
}

impl FromRow for HistoryEntry {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let details: String = row.get(5)?;
        Ok(HistoryEntry {
            id: row.get(0)?,
            license_id: row.get(1)?,
            action: parse_enum(row, 2, "action")?,
            device_id: row.get(3)?,
            ip_address: row.get(4)?,
            details: serde_json::from_str(&details).unwrap_or(serde_json::Value::Null),
            created_at: row.get(6)?,
        })
    }
}

impl FromRow for DailyCount {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(DailyCount {
            day: row.get(0)?,
            count: row.get(1)?,
        })
    }
}
