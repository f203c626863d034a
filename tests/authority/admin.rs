//! Administrative operation tests - validity, limits, purge, reporting

#[path = "../common/mod.rs"]
mod common;

use common::*;

#[test]
fn test_extend_validity() {
    let authority = setup_authority();
    let license = issue_test_license(&authority, "monthly", 3);

    let extended = authority.extend_validity(&license.license_id, 10).unwrap();
    assert_eq!(
        extended.valid_until,
        Some(license.valid_until.unwrap() + 10 * SECONDS_PER_DAY)
    );

    let history = authority.history(&license.license_id, 1).unwrap();
    assert_eq!(history[0].action, HistoryAction::Renew);
    assert_eq!(history[0].details["days"], 10);
}

#[test]
fn test_extend_lifetime_license_becomes_bounded() {
    let authority = setup_authority();
    let license = issue_test_license(&authority, "lifetime", 3);

    let start = chrono::Utc::now().timestamp();
    let extended = authority.extend_validity(&license.license_id, 30).unwrap();
    let end = chrono::Utc::now().timestamp();

    let until = extended.valid_until.expect("extension sets an expiry");
    assert!(until >= start + 30 * SECONDS_PER_DAY);
    assert!(until <= end + 30 * SECONDS_PER_DAY);
    assert_eq!(extended.plan, Plan::Lifetime);
}

#[test]
fn test_extend_validity_rejects_bad_input() {
    let authority = setup_authority();
    let license = issue_test_license(&authority, "monthly", 3);

    let err = authority.extend_validity(&license.license_id, 0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = authority
        .extend_validity(&license.license_id, i64::MAX / 1000)
        .unwrap_err();
    assert!(matches!(&err, AppError::Validation(m) if m == msg::INVALID_EXTENSION));

    let err = authority
        .extend_validity(&license.license_id, MAX_DURATION_DAYS + 1)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    // Rejected extensions leave the expiry alone
    let details = authority.license_details(&license.license_id).unwrap();
    assert_eq!(details.view.license.valid_until, license.valid_until);
    assert!(history_actions(&authority, &license.license_id).is_empty());

    let err = authority
        .extend_validity(&EntityType::License.gen_id(), 5)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn test_extend_revives_expired_license() {
    let authority = setup_authority();
    let license = issue_test_license(&authority, "monthly", 3);
    let now = chrono::Utc::now().timestamp();
    set_valid_until(&authority, &license.license_id, Some(now - SECONDS_PER_DAY));

    assert_verify_failure(
        verify_device(&authority, &license, "dev-a"),
        VerifyFailure::Expired,
    );
    authority.extend_validity(&license.license_id, 30).unwrap();
    verify_device(&authority, &license, "dev-a").unwrap();
}

#[test]
fn test_set_device_limit() {
    let authority = setup_authority();
    let license = issue_test_license(&authority, "monthly", 1);
    let id = license.license_id.as_str();

    verify_device(&authority, &license, "dev-a").unwrap();
    assert_verify_failure(
        verify_device(&authority, &license, "dev-b"),
        VerifyFailure::QuotaExceeded { used: 1, limit: 1 },
    );

    let updated = authority.set_device_limit(id, 3).unwrap();
    assert_eq!(updated.device_limit, 3);
    verify_device(&authority, &license, "dev-b").unwrap();

    let max = Config::default().max_devices_per_license;
    assert_eq!(
        authority.set_device_limit(id, max + 1).unwrap_err().kind(),
        ErrorKind::Validation
    );
    assert_eq!(
        authority.set_device_limit(id, 0).unwrap_err().kind(),
        ErrorKind::Validation
    );
}

#[test]
fn test_set_device_limit_cannot_drop_below_bound_devices() {
    let authority = setup_authority();
    let license = issue_test_license(&authority, "monthly", 3);
    let id = license.license_id.as_str();

    verify_device(&authority, &license, "dev-a").unwrap();
    verify_device(&authority, &license, "dev-b").unwrap();
    authority
        .suspend_device(id, "dev-b", "lost", Actor::User)
        .unwrap();

    let err = authority.set_device_limit(id, 1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    assert_eq!(authority.set_device_limit(id, 2).unwrap().device_limit, 2);
}

#[test]
fn test_purge_removes_everything() {
    let authority = setup_authority();
    let license = issue_test_license(&authority, "monthly", 3);
    let id = license.license_id.as_str();

    verify_device(&authority, &license, "dev-a").unwrap();
    authority.revoke(id, "fraud", None).unwrap();

    authority.purge_license(id).unwrap();

    {
        let conn = authority.pool().get().unwrap();
        assert_eq!(count_rows(&conn, "licenses", id), 0);
        assert_eq!(count_rows(&conn, "device_activations", id), 0);
        assert_eq!(count_rows(&conn, "revoked_licenses", id), 0);
        assert_eq!(count_rows(&conn, "activation_history", id), 0);
    }

    assert_eq!(
        authority.purge_license(id).unwrap_err().kind(),
        ErrorKind::NotFound
    );
    assert!(matches!(
        authority.find_by_code(&license.activation_code),
        Err(AppError::NotFound(_))
    ));
}

#[test]
fn test_license_details() {
    let authority = setup_authority();
    let license = authority
        .issue(
            IssueLicense::new("monthly", TEST_EMAIL)
                .device_limit(3)
                .user_hint("order 1042"),
        )
        .unwrap();
    let id = license.license_id.as_str();

    verify_device(&authority, &license, "dev-a").unwrap();
    verify_device(&authority, &license, "dev-b").unwrap();
    authority
        .suspend_device(id, "dev-b", "lost", Actor::Admin)
        .unwrap();

    let details = authority.license_details(id).unwrap();
    assert_eq!(details.view.license.user_hint.as_deref(), Some("order 1042"));
    assert_eq!(details.view.active_devices, 1);
    assert_eq!(details.devices.len(), 2);
    assert_eq!(details.history.len(), 3);
    assert_eq!(details.history[0].action, HistoryAction::Deactivate);
    assert!(details.revocation.is_none());
    assert!(matches!(
        details.view.validity,
        Validity::Remaining { days: 30 } | Validity::Remaining { days: 31 }
    ));

    let err = authority
        .license_details(&EntityType::License.gen_id())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn test_license_details_history_is_capped() {
    let pool = setup_test_pool();
    let config = Config {
        history_page_limit: 3,
        ..Config::default()
    };
    let authority = LicenseAuthority::new(pool, config);
    let license = issue_test_license(&authority, "monthly", 3);

    for _ in 0..5 {
        verify_device(&authority, &license, "dev-a").unwrap();
    }

    let details = authority.license_details(&license.license_id).unwrap();
    assert_eq!(details.history.len(), 3);
}

#[test]
fn test_list_licenses() {
    let authority = setup_authority();
    let monthly = issue_test_license(&authority, "monthly", 3);
    let lifetime = issue_test_license(&authority, "lifetime", 3);
    let revoked = issue_test_license(&authority, "yearly", 3);
    authority.revoke(&revoked.license_id, "refund", None).unwrap();
    verify_device(&authority, &monthly, "dev-a").unwrap();

    let all = authority.list_licenses(None, PageRequest::default()).unwrap();
    assert_eq!(all.total, 3);
    assert_eq!(all.items.len(), 3);

    let view = all
        .items
        .iter()
        .find(|v| v.license.license_id == monthly.license_id)
        .unwrap();
    assert_eq!(view.active_devices, 1);

    let view = all
        .items
        .iter()
        .find(|v| v.license.license_id == lifetime.license_id)
        .unwrap();
    assert_eq!(view.validity, Validity::Unlimited);

    let active = authority
        .list_licenses(Some(LicenseStatus::Active), PageRequest::default())
        .unwrap();
    assert_eq!(active.total, 2);
    assert!(
        active
            .items
            .iter()
            .all(|v| v.license.status == LicenseStatus::Active)
    );

    let page = authority
        .list_licenses(None, PageRequest::new(1, 1))
        .unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.total, 3);
    assert_eq!(page.limit, 1);
    assert_eq!(page.offset, 1);
}

#[test]
fn test_statistics() {
    let authority = setup_authority();
    let a = issue_test_license(&authority, "monthly", 3);
    let b = issue_test_license(&authority, "monthly", 3);
    let c = issue_test_license(&authority, "lifetime", 3);
    authority.revoke(&c.license_id, "refund", None).unwrap();

    verify_device(&authority, &a, "dev-1").unwrap();
    verify_device(&authority, &a, "dev-2").unwrap();
    verify_device(&authority, &b, "dev-1").unwrap();
    verify_device(&authority, &b, "dev-1").unwrap();
    authority
        .suspend_device(&a.license_id, "dev-2", "lost", Actor::User)
        .unwrap();

    let stats = authority.statistics().unwrap();
    assert_eq!(stats.total_licenses, 3);
    assert_eq!(stats.active_licenses, 2);
    assert_eq!(stats.by_plan.get("monthly"), Some(&2));
    assert_eq!(stats.by_plan.get("lifetime"), None);
    assert_eq!(stats.active_devices, 2);

    let recent: i64 = stats.recent_activations.iter().map(|d| d.count).sum();
    assert_eq!(recent, 3, "heartbeats are not activations");
}

#[test]
fn test_backfill_valid_until() {
    let authority = setup_authority();
    let monthly = issue_test_license(&authority, "monthly", 3);
    let lifetime = issue_test_license(&authority, "lifetime", 3);
    set_valid_until(&authority, &monthly.license_id, None);

    assert_eq!(authority.backfill_valid_until().unwrap(), 1);
    assert_eq!(authority.backfill_valid_until().unwrap(), 0);

    let fixed = authority.license_details(&monthly.license_id).unwrap();
    assert_eq!(fixed.view.license.valid_until, monthly.valid_until);
    let untouched = authority.license_details(&lifetime.license_id).unwrap();
    assert_eq!(untouched.view.license.valid_until, None);
}
