use std::collections::BTreeMap;

use chrono::Utc;
use rusqlite::{Connection, ErrorCode, ffi, params};

use crate::error::Result;
use crate::id::EntityType;
use crate::models::*;

use super::from_row::{
    DEVICE_COLS, DEVICE_COLS_D, HISTORY_COLS, LICENSE_COLS, LICENSE_COLS_L, REVOCATION_COLS,
    query_all, query_one,
};

fn now() -> i64 {
    Utc::now().timestamp()
}

/// True if the error is a UNIQUE / PRIMARY KEY violation.
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == ErrorCode::ConstraintViolation
                && matches!(
                    e.extended_code,
                    ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                )
    )
}

// ============ Licenses ============

/// Insert a license row. Unique violations (activation code collisions) are
/// returned as the raw rusqlite error so the caller can retry with a new code.
pub fn insert_license(conn: &Connection, input: &NewLicense) -> rusqlite::Result<License> {
    conn.execute(
        "INSERT INTO licenses (license_id, activation_code, email, plan, device_limit, issued_at, valid_until, status, user_hint)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'active', ?8)",
        params![
            &input.license_id,
            &input.activation_code,
            &input.email,
            input.plan.as_ref(),
            input.device_limit,
            input.issued_at,
            input.valid_until,
            &input.user_hint,
        ],
    )?;

    Ok(License {
        license_id: input.license_id.clone(),
        activation_code: input.activation_code.clone(),
        email: input.email.clone(),
        plan: input.plan,
        device_limit: input.device_limit,
        issued_at: input.issued_at,
        valid_until: input.valid_until,
        status: LicenseStatus::Active,
        user_hint: input.user_hint.clone(),
    })
}

pub fn get_license_by_id(conn: &Connection, license_id: &str) -> Result<Option<License>> {
    query_one(
        conn,
        &format!("SELECT {} FROM licenses WHERE license_id = ?1", LICENSE_COLS),
        &[&license_id],
    )
}

/// Look up by the grouped `AAAAA-BBBBB-CXXXX` form.
pub fn get_license_by_code(conn: &Connection, activation_code: &str) -> Result<Option<License>> {
    query_one(
        conn,
        &format!("SELECT {} FROM licenses WHERE activation_code = ?1", LICENSE_COLS),
        &[&activation_code],
    )
}

pub fn set_license_status(conn: &Connection, license_id: &str, status: LicenseStatus) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE licenses SET status = ?1 WHERE license_id = ?2",
        params![status.as_ref(), license_id],
    )?;
    Ok(updated > 0)
}

/// Push `valid_until` out by `days`. A NULL expiry is measured from now.
/// Returns the new expiry, or None if the license does not exist.
pub fn extend_license_validity(conn: &Connection, license_id: &str, days: i64) -> Result<Option<i64>> {
    let mut stmt = conn.prepare(
        "UPDATE licenses SET valid_until = COALESCE(valid_until, ?1) + ?2
         WHERE license_id = ?3
         RETURNING valid_until",
    )?;
    let mut rows = stmt.query(params![now(), days.saturating_mul(SECONDS_PER_DAY), license_id])?;
    match rows.next()? {
        Some(row) => Ok(Some(row.get(0)?)),
        None => Ok(None),
    }
}

pub fn update_device_limit(conn: &Connection, license_id: &str, device_limit: i64) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE licenses SET device_limit = ?1 WHERE license_id = ?2",
        params![device_limit, license_id],
    )?;
    Ok(updated > 0)
}

/// Licenses with their active device count, newest first.
pub fn list_licenses(
    conn: &Connection,
    status: Option<LicenseStatus>,
    limit: i64,
    offset: i64,
) -> Result<Vec<LicenseView>> {
    let base = format!(
        "SELECT {}, COUNT(d.device_id)
         FROM licenses l
         LEFT JOIN device_activations d ON d.license_id = l.license_id AND d.is_active = 1",
        LICENSE_COLS_L
    );
    let tail = "GROUP BY l.license_id ORDER BY l.issued_at DESC, l.rowid DESC";

    match status {
        Some(status) => query_all(
            conn,
            &format!("{} WHERE l.status = ?1 {} LIMIT ?2 OFFSET ?3", base, tail),
            &[&status.as_ref(), &limit, &offset],
        ),
        None => query_all(
            conn,
            &format!("{} {} LIMIT ?1 OFFSET ?2", base, tail),
            &[&limit, &offset],
        ),
    }
}

pub fn count_licenses(conn: &Connection, status: Option<LicenseStatus>) -> Result<i64> {
    let count = match status {
        Some(status) => conn.query_row(
            "SELECT COUNT(*) FROM licenses WHERE status = ?1",
            params![status.as_ref()],
            |row| row.get(0),
        )?,
        None => conn.query_row("SELECT COUNT(*) FROM licenses", [], |row| row.get(0))?,
    };
    Ok(count)
}

/// Hard-delete a license. Devices, revocation and history go with it via
/// ON DELETE CASCADE.
pub fn delete_license(conn: &Connection, license_id: &str) -> Result<bool> {
    let deleted = conn.execute(
        "DELETE FROM licenses WHERE license_id = ?1",
        params![license_id],
    )?;
    Ok(deleted > 0)
}

/// Give subscription licenses that lost their expiry the plan default,
/// measured from issuance. Returns the number of rows fixed.
pub fn backfill_valid_until(conn: &Connection) -> Result<usize> {
    let mut fixed = 0;
    for plan in [Plan::Monthly, Plan::Yearly] {
        let Some(days) = plan.default_duration_days() else {
            continue;
        };
        fixed += conn.execute(
            "UPDATE licenses SET valid_until = issued_at + ?1
             WHERE plan = ?2 AND valid_until IS NULL",
            params![days * SECONDS_PER_DAY, plan.as_ref()],
        )?;
    }
    Ok(fixed)
}

// ============ Revocations ============

/// Insert or replace the revocation record for a license.
pub fn upsert_revocation(
    conn: &Connection,
    license_id: &str,
    reason: &str,
    revoked_by: Option<&str>,
) -> Result<RevocationRecord> {
    let revoked_at = now();
    conn.execute(
        "INSERT INTO revoked_licenses (license_id, reason, revoked_by, revoked_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(license_id) DO UPDATE SET
            reason = excluded.reason,
            revoked_by = excluded.revoked_by,
            revoked_at = excluded.revoked_at",
        params![license_id, reason, revoked_by, revoked_at],
    )?;
    Ok(RevocationRecord {
        license_id: license_id.to_string(),
        reason: reason.to_string(),
        revoked_by: revoked_by.map(String::from),
        revoked_at,
    })
}

pub fn delete_revocation(conn: &Connection, license_id: &str) -> Result<bool> {
    let deleted = conn.execute(
        "DELETE FROM revoked_licenses WHERE license_id = ?1",
        params![license_id],
    )?;
    Ok(deleted > 0)
}

pub fn get_revocation(conn: &Connection, license_id: &str) -> Result<Option<RevocationRecord>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM revoked_licenses WHERE license_id = ?1",
            REVOCATION_COLS
        ),
        &[&license_id],
    )
}

// ============ Devices ============

pub fn get_device(conn: &Connection, license_id: &str, device_id: &str) -> Result<Option<DeviceActivation>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM device_activations WHERE license_id = ?1 AND device_id = ?2",
            DEVICE_COLS
        ),
        &[&license_id, &device_id],
    )
}

/// Slots in use: every bound device, active or suspended.
pub fn count_occupied_slots(conn: &Connection, license_id: &str) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM device_activations WHERE license_id = ?1",
        params![license_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn count_active_devices(conn: &Connection, license_id: &str) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM device_activations WHERE license_id = ?1 AND is_active = 1",
        params![license_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn insert_device(
    conn: &Connection,
    license_id: &str,
    device_id: &str,
    device_name: Option<&str>,
    ip_address: Option<&str>,
) -> Result<DeviceActivation> {
    let now = now();
    conn.execute(
        "INSERT INTO device_activations (license_id, device_id, device_name, ip_address, activated_at, last_seen_at, is_active)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5, 1)",
        params![license_id, device_id, device_name, ip_address, now],
    )?;
    Ok(DeviceActivation {
        license_id: license_id.to_string(),
        device_id: device_id.to_string(),
        device_name: device_name.map(String::from),
        ip_address: ip_address.map(String::from),
        activated_at: now,
        last_seen_at: now,
        is_active: true,
    })
}

/// Record a check-in. A missing name or address keeps the stored value.
pub fn touch_device(
    conn: &Connection,
    device: &DeviceActivation,
    device_name: Option<&str>,
    ip_address: Option<&str>,
) -> Result<DeviceActivation> {
    let now = now();
    conn.execute(
        "UPDATE device_activations
         SET last_seen_at = ?1, device_name = COALESCE(?2, device_name), ip_address = COALESCE(?3, ip_address)
         WHERE license_id = ?4 AND device_id = ?5",
        params![now, device_name, ip_address, &device.license_id, &device.device_id],
    )?;
    Ok(DeviceActivation {
        device_name: device_name.map(String::from).or_else(|| device.device_name.clone()),
        ip_address: ip_address.map(String::from).or_else(|| device.ip_address.clone()),
        last_seen_at: now,
        ..device.clone()
    })
}

pub fn set_device_active(conn: &Connection, license_id: &str, device_id: &str, active: bool) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE device_activations SET is_active = ?1 WHERE license_id = ?2 AND device_id = ?3",
        params![active as i32, license_id, device_id],
    )?;
    Ok(updated > 0)
}

/// Remove a device only if it is currently active.
pub fn delete_active_device(conn: &Connection, license_id: &str, device_id: &str) -> Result<bool> {
    let deleted = conn.execute(
        "DELETE FROM device_activations WHERE license_id = ?1 AND device_id = ?2 AND is_active = 1",
        params![license_id, device_id],
    )?;
    Ok(deleted > 0)
}

pub fn delete_device(conn: &Connection, license_id: &str, device_id: &str) -> Result<bool> {
    let deleted = conn.execute(
        "DELETE FROM device_activations WHERE license_id = ?1 AND device_id = ?2",
        params![license_id, device_id],
    )?;
    Ok(deleted > 0)
}

/// All devices of a license, most recently seen first.
pub fn list_devices(conn: &Connection, license_id: &str) -> Result<Vec<DeviceActivation>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM device_activations WHERE license_id = ?1 ORDER BY last_seen_at DESC, rowid DESC",
            DEVICE_COLS
        ),
        &[&license_id],
    )
}

pub fn get_device_status(
    conn: &Connection,
    license_id: &str,
    device_id: &str,
) -> Result<Option<DeviceStatusView>> {
    query_one(
        conn,
        &format!(
            "SELECT {}, l.activation_code, l.email, l.plan, l.status, l.valid_until, l.device_limit
             FROM device_activations d
             JOIN licenses l ON l.license_id = d.license_id
             WHERE d.license_id = ?1 AND d.device_id = ?2",
            DEVICE_COLS_D
        ),
        &[&license_id, &device_id],
    )
}

// ============ Activation History ============

pub fn append_history(
    conn: &Connection,
    license_id: &str,
    action: HistoryAction,
    device_id: Option<&str>,
    ip_address: Option<&str>,
    details: &serde_json::Value,
) -> Result<HistoryEntry> {
    let id = EntityType::HistoryEntry.gen_id();
    let created_at = now();
    conn.execute(
        "INSERT INTO activation_history (id, license_id, action, device_id, ip_address, details, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            &id,
            license_id,
            action.as_ref(),
            device_id,
            ip_address,
            details.to_string(),
            created_at
        ],
    )?;
    Ok(HistoryEntry {
        id,
        license_id: license_id.to_string(),
        action,
        device_id: device_id.map(String::from),
        ip_address: ip_address.map(String::from),
        details: details.clone(),
        created_at,
    })
}

/// Newest first. Entries written in the same second keep insertion order.
pub fn list_history(conn: &Connection, license_id: &str, limit: i64) -> Result<Vec<HistoryEntry>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM activation_history WHERE license_id = ?1
             ORDER BY created_at DESC, rowid DESC LIMIT ?2",
            HISTORY_COLS
        ),
        &[&license_id, &limit],
    )
}

/// Daily `activate` counts since `since` (unix seconds), oldest day first.
pub fn recent_activation_counts(conn: &Connection, since: i64) -> Result<Vec<DailyCount>> {
    query_all(
        conn,
        "SELECT date(created_at, 'unixepoch') AS day, COUNT(*)
         FROM activation_history
         WHERE action = 'activate' AND created_at >= ?1
         GROUP BY day ORDER BY day ASC",
        &[&since],
    )
}

// ============ Statistics ============

pub fn get_statistics(conn: &Connection, recent_days: i64) -> Result<Statistics> {
    let total_licenses: i64 =
        conn.query_row("SELECT COUNT(*) FROM licenses", [], |row| row.get(0))?;
    let active_licenses: i64 = conn.query_row(
        "SELECT COUNT(*) FROM licenses WHERE status = 'active'",
        [],
        |row| row.get(0),
    )?;

    let mut stmt = conn.prepare(
        "SELECT plan, COUNT(*) FROM licenses WHERE status = 'active' GROUP BY plan",
    )?;
    let by_plan: BTreeMap<String, i64> = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
        .collect::<std::result::Result<_, _>>()?;

    let active_devices: i64 = conn.query_row(
        "SELECT COUNT(*) FROM device_activations WHERE is_active = 1",
        [],
        |row| row.get(0),
    )?;

    let since = now() - recent_days * SECONDS_PER_DAY;
    let recent_activations = recent_activation_counts(conn, since)?;

    Ok(Statistics {
        total_licenses,
        active_licenses,
        by_plan,
        active_devices,
        recent_activations,
    })
}
