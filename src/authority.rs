//! The license authority: issuance, verification and lifecycle operations.
//!
//! Every public operation runs on one pooled connection. Writes open a
//! `BEGIN IMMEDIATE` transaction, so the database write lock is held from the
//! first read to the commit and count-then-insert on the device ledger cannot
//! interleave with another activation. History entries are written in the
//! same transaction as the change they record; if the entry cannot be written
//! the whole operation rolls back.

use std::sync::Arc;

use chrono::Utc;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde_json::json;
use subtle::ConstantTimeEq;

use crate::code::{ActivationCode, CodeSource, SystemCodes};
use crate::config::Config;
use crate::db::{self, DbPool, queries};
use crate::error::{AppError, Result, VerifyFailure, msg};
use crate::id::EntityType;
use crate::models::*;
use crate::pagination::{Page, PageRequest};

/// Window covered by `Statistics::recent_activations`.
const RECENT_ACTIVATION_DAYS: i64 = 30;

pub struct LicenseAuthority {
    pool: DbPool,
    config: Config,
    codes: Arc<dyn CodeSource>,
}

/// Case-insensitive email comparison that does not short-circuit on the
/// first differing byte.
fn email_matches(stored: &str, presented: &str) -> bool {
    let stored = stored.trim().to_lowercase();
    let presented = presented.trim().to_lowercase();
    stored.as_bytes().ct_eq(presented.as_bytes()).into()
}

fn require_device_id(device_id: &str) -> Result<&str> {
    let device_id = device_id.trim();
    if device_id.is_empty() {
        return Err(AppError::Validation(msg::DEVICE_ID_EMPTY.into()));
    }
    Ok(device_id)
}

fn license_not_found() -> AppError {
    AppError::NotFound(msg::LICENSE_NOT_FOUND.into())
}

impl LicenseAuthority {
    /// Wrap an existing pool. The schema must already be initialized.
    pub fn new(pool: DbPool, config: Config) -> Self {
        Self {
            pool,
            config,
            codes: Arc::new(SystemCodes),
        }
    }

    /// Build the pool from `config` and initialize the schema.
    pub fn open(config: Config) -> Result<Self> {
        let pool = db::create_pool(&config)?;
        {
            let conn = pool.get()?;
            db::init_db(&conn)?;
        }
        Ok(Self::new(pool, config))
    }

    /// Replace the activation code generator.
    pub fn with_code_source(mut self, codes: Arc<dyn CodeSource>) -> Self {
        self.codes = codes;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Run `f` inside an IMMEDIATE transaction. Any error rolls back.
    fn with_tx<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.pool.get()?;
        f(&conn)
    }

    fn check_license_id(license_id: &str) -> Result<()> {
        if !EntityType::License.matches(license_id) {
            return Err(AppError::Validation(msg::INVALID_LICENSE_ID.into()));
        }
        Ok(())
    }

    fn check_device_limit(&self, device_limit: i64) -> Result<()> {
        if !(1..=self.config.max_devices_per_license).contains(&device_limit) {
            return Err(AppError::Validation(format!(
                "{} (1..={})",
                msg::INVALID_DEVICE_LIMIT,
                self.config.max_devices_per_license
            )));
        }
        Ok(())
    }

    // ============ Issuance ============

    /// Issue a new license. No history entry is written; the license row
    /// itself records issuance.
    pub fn issue(&self, input: IssueLicense) -> Result<License> {
        let plan = input.validate()?;
        let device_limit = input
            .device_limit
            .unwrap_or(self.config.default_device_limit);
        self.check_device_limit(device_limit)?;

        if plan == Plan::Lifetime && input.duration_days.is_some() {
            tracing::debug!("Ignoring duration override for lifetime license");
        }

        let issued_at = Utc::now().timestamp();
        let valid_until = plan.resolve_valid_until(issued_at, input.duration_days);
        let email = input.email.trim().to_string();
        let user_hint = input
            .user_hint
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty());

        let license = self.with_tx(|tx| {
            let mut retried = false;
            loop {
                let row = NewLicense {
                    license_id: EntityType::License.gen_id(),
                    activation_code: self.codes.next_code().display(),
                    email: email.clone(),
                    plan,
                    device_limit,
                    issued_at,
                    valid_until,
                    user_hint: user_hint.clone(),
                };
                match queries::insert_license(tx, &row) {
                    Ok(license) => return Ok(license),
                    Err(e) if !retried && queries::is_unique_violation(&e) => {
                        tracing::warn!("Activation code collision, regenerating once");
                        retried = true;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        })?;

        tracing::info!(
            license_id = %license.license_id,
            plan = %license.plan,
            device_limit = license.device_limit,
            "License issued"
        );
        Ok(license)
    }

    /// Issue one license per email using `template` for everything else.
    /// Each license is its own transaction; one bad email does not stop the
    /// rest.
    pub fn issue_batch(&self, template: &IssueLicense, emails: &[String]) -> BatchResult<License> {
        let mut result = BatchResult::default();
        for email in emails {
            let input = IssueLicense {
                email: email.clone(),
                ..template.clone()
            };
            match self.issue(input) {
                Ok(license) => result.push_ok(email.as_str(), license),
                Err(e) => result.push_err(email.as_str(), e.public_message()),
            }
        }
        tracing::info!(
            succeeded = result.succeeded,
            failed = result.failed,
            "Batch issuance finished"
        );
        result
    }

    // ============ Verification ============

    /// Check a code and email and, when a device is given, activate it or
    /// record a heartbeat.
    pub fn verify_and_activate(&self, request: &VerifyRequest) -> Result<VerifyOutcome> {
        let code = match ActivationCode::parse(&request.code) {
            Ok(code) => code,
            Err(e) => {
                tracing::warn!(error = %e, "Verification rejected: malformed activation code");
                return Err(VerifyFailure::CodeNotFound.into());
            }
        };
        let device_id = request
            .device_id
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty());
        let device_name = request.device_name.as_deref();
        let ip_address = request.ip_address.as_deref();

        // Without a device nothing is written, so no write lock is taken
        let Some(device_id) = device_id else {
            let license =
                self.with_conn(|conn| Self::check_credentials(conn, &code, &request.email))?;
            return Ok(VerifyOutcome::LicenseValid { license });
        };

        self.with_tx(|tx| {
            let license = Self::check_credentials(tx, &code, &request.email)?;

            if let Some(device) = queries::get_device(tx, &license.license_id, device_id)? {
                if !device.is_active {
                    tracing::warn!(
                        license_id = %license.license_id,
                        device_id,
                        "Verification rejected: device suspended"
                    );
                    return Err(VerifyFailure::DeviceSuspended.into());
                }

                let device = queries::touch_device(tx, &device, device_name, ip_address)?;
                queries::append_history(
                    tx,
                    &license.license_id,
                    HistoryAction::Heartbeat,
                    Some(device_id),
                    ip_address,
                    &json!({ "device_name": device.device_name }),
                )?;
                tracing::debug!(license_id = %license.license_id, device_id, "Heartbeat");
                return Ok(VerifyOutcome::Heartbeat { license, device });
            }

            let used = queries::count_occupied_slots(tx, &license.license_id)?;
            if used >= license.device_limit {
                tracing::warn!(
                    license_id = %license.license_id,
                    used,
                    limit = license.device_limit,
                    "Verification rejected: device limit reached"
                );
                return Err(VerifyFailure::QuotaExceeded {
                    used,
                    limit: license.device_limit,
                }
                .into());
            }

            let device =
                queries::insert_device(tx, &license.license_id, device_id, device_name, ip_address)?;
            queries::append_history(
                tx,
                &license.license_id,
                HistoryAction::Activate,
                Some(device_id),
                ip_address,
                &json!({
                    "device_name": device.device_name,
                    "slots_used": used + 1,
                    "device_limit": license.device_limit,
                }),
            )?;
            tracing::info!(
                license_id = %license.license_id,
                device_id,
                slots_used = used + 1,
                limit = license.device_limit,
                "Device activated"
            );
            Ok(VerifyOutcome::Activated { license, device })
        })
    }

    /// Check a code and email without touching the device ledger. Used to
    /// authorize self-service device management.
    pub fn authenticate(&self, code: &str, email: &str) -> Result<License> {
        let request = VerifyRequest::new(code, email);
        self.verify_and_activate(&request)
            .map(|outcome| outcome.license().clone())
    }

    /// Steps shared by every verification: lookup, status, identity, expiry.
    fn check_credentials(conn: &Connection, code: &ActivationCode, email: &str) -> Result<License> {
        let Some(license) = queries::get_license_by_code(conn, &code.display())? else {
            tracing::warn!("Verification rejected: unknown activation code");
            return Err(VerifyFailure::CodeNotFound.into());
        };

        if license.status != LicenseStatus::Active {
            tracing::warn!(
                license_id = %license.license_id,
                status = %license.status,
                "Verification rejected: license not active"
            );
            return Err(VerifyFailure::CodeNotFound.into());
        }

        if !email_matches(&license.email, email) {
            tracing::warn!(
                license_id = %license.license_id,
                "Verification rejected: email mismatch"
            );
            return Err(VerifyFailure::EmailMismatch.into());
        }

        if license.is_expired_at(Utc::now().timestamp()) {
            tracing::warn!(
                license_id = %license.license_id,
                valid_until = license.valid_until,
                "Verification rejected: license expired"
            );
            return Err(VerifyFailure::Expired.into());
        }

        Ok(license)
    }

    pub fn find_by_code(&self, code: &str) -> Result<License> {
        let code = ActivationCode::parse(code).map_err(|_| license_not_found())?;
        self.with_conn(|conn| queries::get_license_by_code(conn, &code.display()))?
            .ok_or_else(license_not_found)
    }

    // ============ License Lifecycle ============

    /// Revoke a license. Revoking again refreshes the reason and is reported
    /// as `AlreadyInState`.
    pub fn revoke(&self, license_id: &str, reason: &str, revoked_by: Option<&str>) -> Result<Transition> {
        Self::check_license_id(license_id)?;
        let transition = self.with_tx(|tx| {
            let license = queries::get_license_by_id(tx, license_id)?.ok_or_else(license_not_found)?;

            queries::upsert_revocation(tx, license_id, reason, revoked_by)?;
            queries::set_license_status(tx, license_id, LicenseStatus::Revoked)?;
            queries::append_history(
                tx,
                license_id,
                HistoryAction::Revoke,
                None,
                None,
                &json!({
                    "reason": reason,
                    "revoked_by": revoked_by,
                    "previous_status": license.status,
                }),
            )?;

            Ok(if license.status == LicenseStatus::Revoked {
                Transition::AlreadyInState
            } else {
                Transition::Applied
            })
        })?;

        tracing::info!(license_id, ?transition, "License revoked");
        Ok(transition)
    }

    pub fn revoke_batch(
        &self,
        license_ids: &[String],
        reason: &str,
        revoked_by: Option<&str>,
    ) -> BatchResult<Transition> {
        let mut result = BatchResult::default();
        for license_id in license_ids {
            match self.revoke(license_id, reason, revoked_by) {
                Ok(transition) => result.push_ok(license_id.as_str(), transition),
                Err(e) => result.push_err(license_id.as_str(), e.public_message()),
            }
        }
        result
    }

    /// Return a revoked or suspended license to active and drop its
    /// revocation record.
    pub fn restore_license(&self, license_id: &str) -> Result<Transition> {
        Self::check_license_id(license_id)?;
        let transition = self.with_tx(|tx| {
            let license = queries::get_license_by_id(tx, license_id)?.ok_or_else(license_not_found)?;

            queries::set_license_status(tx, license_id, LicenseStatus::Active)?;
            let had_revocation = queries::delete_revocation(tx, license_id)?;
            queries::append_history(
                tx,
                license_id,
                HistoryAction::Restore,
                None,
                None,
                &json!({ "previous_status": license.status }),
            )?;

            Ok(if license.status == LicenseStatus::Active && !had_revocation {
                Transition::AlreadyInState
            } else {
                Transition::Applied
            })
        })?;

        tracing::info!(license_id, ?transition, "License restored");
        Ok(transition)
    }

    /// Temporarily block a license. Revoked licenses must be restored first.
    pub fn suspend_license(&self, license_id: &str, reason: &str) -> Result<Transition> {
        Self::check_license_id(license_id)?;
        let transition = self.with_tx(|tx| {
            let license = queries::get_license_by_id(tx, license_id)?.ok_or_else(license_not_found)?;

            let transition = match license.status {
                LicenseStatus::Revoked => {
                    return Err(AppError::Conflict(msg::LICENSE_REVOKED.into()));
                }
                LicenseStatus::Suspended => Transition::AlreadyInState,
                LicenseStatus::Active => {
                    queries::set_license_status(tx, license_id, LicenseStatus::Suspended)?;
                    Transition::Applied
                }
            };
            queries::append_history(
                tx,
                license_id,
                HistoryAction::Suspend,
                None,
                None,
                &json!({ "reason": reason }),
            )?;
            Ok(transition)
        })?;

        tracing::info!(license_id, ?transition, "License suspended");
        Ok(transition)
    }

    /// Add `days` to the expiry. A license without expiry gets one `days`
    /// from now, which turns a lifetime license into a bounded one.
    pub fn extend_validity(&self, license_id: &str, days: i64) -> Result<License> {
        Self::check_license_id(license_id)?;
        if !(1..=MAX_DURATION_DAYS).contains(&days) {
            return Err(AppError::Validation(msg::INVALID_EXTENSION.into()));
        }

        self.with_tx(|tx| {
            let license = queries::get_license_by_id(tx, license_id)?.ok_or_else(license_not_found)?;
            if license.plan == Plan::Lifetime {
                tracing::warn!(
                    license_id,
                    days,
                    "Extending a lifetime license gives it a fixed expiry"
                );
            }

            let valid_until =
                queries::extend_license_validity(tx, license_id, days)?.ok_or_else(license_not_found)?;
            queries::append_history(
                tx,
                license_id,
                HistoryAction::Renew,
                None,
                None,
                &json!({
                    "days": days,
                    "previous_valid_until": license.valid_until,
                    "valid_until": valid_until,
                }),
            )?;

            tracing::info!(license_id, days, valid_until, "License validity extended");
            Ok(License {
                valid_until: Some(valid_until),
                ..license
            })
        })
    }

    /// Change the device quota. The new limit may not drop below the number
    /// of devices currently holding a slot.
    pub fn set_device_limit(&self, license_id: &str, device_limit: i64) -> Result<License> {
        Self::check_license_id(license_id)?;
        self.check_device_limit(device_limit)?;

        self.with_tx(|tx| {
            let license = queries::get_license_by_id(tx, license_id)?.ok_or_else(license_not_found)?;
            let used = queries::count_occupied_slots(tx, license_id)?;
            if device_limit < used {
                return Err(AppError::Conflict(format!(
                    "{} ({} bound)",
                    msg::DEVICE_LIMIT_BELOW_USAGE,
                    used
                )));
            }
            queries::update_device_limit(tx, license_id, device_limit)?;

            tracing::info!(
                license_id,
                from = license.device_limit,
                to = device_limit,
                "Device limit changed"
            );
            Ok(License {
                device_limit,
                ..license
            })
        })
    }

    /// Permanently delete a license with its devices, revocation and history.
    pub fn purge_license(&self, license_id: &str) -> Result<()> {
        Self::check_license_id(license_id)?;
        self.with_tx(|tx| {
            if !queries::delete_license(tx, license_id)? {
                return Err(license_not_found());
            }
            Ok(())
        })?;
        tracing::warn!(license_id, "License purged");
        Ok(())
    }

    /// Give subscription licenses without an expiry their plan default.
    pub fn backfill_valid_until(&self) -> Result<usize> {
        let fixed = self.with_tx(|tx| queries::backfill_valid_until(tx))?;
        if fixed > 0 {
            tracing::info!(fixed, "Backfilled missing expiry dates");
        }
        Ok(fixed)
    }

    // ============ Devices ============

    /// Release a device slot. Only active devices can be cancelled.
    pub fn cancel_device(&self, license_id: &str, device_id: &str, reason: Option<&str>) -> Result<()> {
        Self::check_license_id(license_id)?;
        let device_id = require_device_id(device_id)?;

        self.with_tx(|tx| {
            if !queries::delete_active_device(tx, license_id, device_id)? {
                return Err(AppError::NotFound(msg::DEVICE_NOT_FOUND_OR_INACTIVE.into()));
            }
            queries::append_history(
                tx,
                license_id,
                HistoryAction::Cancel,
                Some(device_id),
                None,
                &json!({ "reason": reason }),
            )?;
            Ok(())
        })?;

        tracing::info!(license_id, device_id, "Device cancelled");
        Ok(())
    }

    /// Block a device while keeping its slot. Repeating is `AlreadyInState`
    /// and still recorded.
    pub fn suspend_device(
        &self,
        license_id: &str,
        device_id: &str,
        reason: &str,
        actor: Actor,
    ) -> Result<Transition> {
        self.set_device_state(license_id, device_id, reason, actor, false)
    }

    /// Unblock a suspended device. Repeating is `AlreadyInState` and still
    /// recorded.
    pub fn restore_device(
        &self,
        license_id: &str,
        device_id: &str,
        reason: &str,
        actor: Actor,
    ) -> Result<Transition> {
        self.set_device_state(license_id, device_id, reason, actor, true)
    }

    fn set_device_state(
        &self,
        license_id: &str,
        device_id: &str,
        reason: &str,
        actor: Actor,
        active: bool,
    ) -> Result<Transition> {
        Self::check_license_id(license_id)?;
        let device_id = require_device_id(device_id)?;
        let action = if active {
            actor.restore_action()
        } else {
            actor.suspend_action()
        };

        let transition = self.with_tx(|tx| {
            let device = queries::get_device(tx, license_id, device_id)?
                .ok_or_else(|| AppError::NotFound(msg::DEVICE_NOT_FOUND.into()))?;

            let transition = if device.is_active == active {
                Transition::AlreadyInState
            } else {
                queries::set_device_active(tx, license_id, device_id, active)?;
                Transition::Applied
            };

            let details = if active {
                json!({ "reason": reason, "restored_by": actor, "transition": transition })
            } else {
                json!({ "reason": reason, "suspended_by": actor, "transition": transition })
            };
            queries::append_history(tx, license_id, action, Some(device_id), None, &details)?;
            Ok(transition)
        })?;

        tracing::info!(
            license_id,
            device_id,
            action = %action,
            ?transition,
            "Device state changed"
        );
        Ok(transition)
    }

    /// Remove a device in any state, freeing its slot.
    pub fn delete_device(
        &self,
        license_id: &str,
        device_id: &str,
        reason: &str,
        actor: Actor,
    ) -> Result<()> {
        Self::check_license_id(license_id)?;
        let device_id = require_device_id(device_id)?;

        self.with_tx(|tx| {
            if !queries::delete_device(tx, license_id, device_id)? {
                return Err(AppError::NotFound(msg::DEVICE_NOT_FOUND.into()));
            }
            queries::append_history(
                tx,
                license_id,
                HistoryAction::Delete,
                Some(device_id),
                None,
                &json!({ "reason": reason, "deleted_by": actor }),
            )?;
            Ok(())
        })?;

        tracing::info!(license_id, device_id, %actor, "Device deleted");
        Ok(())
    }

    pub fn device_status(&self, license_id: &str, device_id: &str) -> Result<Option<DeviceStatusView>> {
        Self::check_license_id(license_id)?;
        let device_id = require_device_id(device_id)?;
        self.with_conn(|conn| queries::get_device_status(conn, license_id, device_id))
    }

    /// Devices of a license, most recently seen first.
    pub fn list_devices(&self, license_id: &str) -> Result<Vec<DeviceActivation>> {
        Self::check_license_id(license_id)?;
        self.with_conn(|conn| {
            if queries::get_license_by_id(conn, license_id)?.is_none() {
                return Err(license_not_found());
            }
            queries::list_devices(conn, license_id)
        })
    }

    // ============ Reporting ============

    pub fn license_details(&self, license_id: &str) -> Result<LicenseDetails> {
        Self::check_license_id(license_id)?;
        let history_limit = self.config.history_page_limit;

        self.with_conn(|conn| {
            let license = queries::get_license_by_id(conn, license_id)?.ok_or_else(license_not_found)?;
            let active_devices = queries::count_active_devices(conn, license_id)?;
            let revocation = queries::get_revocation(conn, license_id)?;
            let devices = queries::list_devices(conn, license_id)?;
            let history = queries::list_history(conn, license_id, history_limit)?;
            let validity = license.validity_at(Utc::now().timestamp());

            Ok(LicenseDetails {
                view: LicenseView {
                    license,
                    active_devices,
                    validity,
                },
                revocation,
                devices,
                history,
            })
        })
    }

    /// The revocation record, if the license is revoked and `email` is the
    /// one it was issued to. Anything else reads as "not revoked".
    pub fn revocation_status(&self, license_id: &str, email: &str) -> Result<Option<RevocationRecord>> {
        Self::check_license_id(license_id)?;
        self.with_conn(|conn| {
            let Some(license) = queries::get_license_by_id(conn, license_id)? else {
                return Ok(None);
            };
            if !email_matches(&license.email, email) {
                return Ok(None);
            }
            queries::get_revocation(conn, license_id)
        })
    }

    pub fn list_licenses(&self, status: Option<LicenseStatus>, page: PageRequest) -> Result<Page<LicenseView>> {
        let (limit, offset) = (page.limit(), page.offset());
        self.with_conn(|conn| {
            let items = queries::list_licenses(conn, status, limit, offset)?;
            let total = queries::count_licenses(conn, status)?;
            Ok(Page {
                items,
                total,
                limit,
                offset,
            })
        })
    }

    pub fn statistics(&self) -> Result<Statistics> {
        self.with_conn(|conn| queries::get_statistics(conn, RECENT_ACTIVATION_DAYS))
    }

    pub fn history(&self, license_id: &str, limit: i64) -> Result<Vec<HistoryEntry>> {
        Self::check_license_id(license_id)?;
        self.with_conn(|conn| queries::list_history(conn, license_id, limit))
    }
}
