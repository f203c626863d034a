//! Revocation, license suspension and restore tests

#[path = "../common/mod.rs"]
mod common;

use common::*;

#[test]
fn test_revoke_twice_equals_revoke_once() {
    let authority = setup_authority();
    let license = issue_test_license(&authority, "yearly", 3);
    let id = license.license_id.as_str();

    assert_eq!(
        authority.revoke(id, "chargeback", Some("billing")).unwrap(),
        Transition::Applied
    );
    assert_eq!(
        authority.revoke(id, "fraud confirmed", Some("support")).unwrap(),
        Transition::AlreadyInState
    );

    let details = authority.license_details(id).unwrap();
    assert_eq!(details.view.license.status, LicenseStatus::Revoked);
    let record = details.revocation.expect("revocation record must exist");
    assert_eq!(record.reason, "fraud confirmed");
    assert_eq!(record.revoked_by.as_deref(), Some("support"));

    let conn = authority.pool().get().unwrap();
    assert_eq!(count_rows(&conn, "revoked_licenses", id), 1);
    drop(conn);

    assert_eq!(
        history_actions(&authority, id),
        vec![HistoryAction::Revoke, HistoryAction::Revoke]
    );
}

#[test]
fn test_revoke_records_reason_in_history() {
    let authority = setup_authority();
    let license = issue_test_license(&authority, "monthly", 3);

    authority
        .revoke(&license.license_id, "refund", None)
        .unwrap();

    let history = authority.history(&license.license_id, 10).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].device_id, None);
    assert_eq!(history[0].details["reason"], "refund");
    assert_eq!(history[0].details["previous_status"], "active");
}

#[test]
fn test_revoke_unknown_or_malformed_id() {
    let authority = setup_authority();

    let err = authority
        .revoke(&EntityType::License.gen_id(), "x", None)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = authority.revoke("LIC-123", "x", None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn test_restore_revoked_license() {
    let authority = setup_authority();
    let license = issue_test_license(&authority, "monthly", 3);
    let id = license.license_id.as_str();

    verify_device(&authority, &license, "dev-a").unwrap();
    authority.revoke(id, "mistake", None).unwrap();
    assert_verify_failure(
        verify_device(&authority, &license, "dev-a"),
        VerifyFailure::CodeNotFound,
    );

    assert_eq!(authority.restore_license(id).unwrap(), Transition::Applied);
    assert_eq!(
        authority.restore_license(id).unwrap(),
        Transition::AlreadyInState
    );

    let details = authority.license_details(id).unwrap();
    assert_eq!(details.view.license.status, LicenseStatus::Active);
    assert!(details.revocation.is_none());

    let history = authority.history(id, 1).unwrap();
    assert_eq!(history[0].action, HistoryAction::Restore);
    assert_eq!(history[0].device_id, None);

    // Devices survive a revoke/restore cycle
    assert!(matches!(
        verify_device(&authority, &license, "dev-a").unwrap(),
        VerifyOutcome::Heartbeat { .. }
    ));
}

#[test]
fn test_suspend_license_and_restore() {
    let authority = setup_authority();
    let license = issue_test_license(&authority, "monthly", 3);
    let id = license.license_id.as_str();

    assert_eq!(
        authority.suspend_license(id, "payment overdue").unwrap(),
        Transition::Applied
    );
    assert_eq!(
        authority.suspend_license(id, "still overdue").unwrap(),
        Transition::AlreadyInState
    );
    assert_eq!(authority.restore_license(id).unwrap(), Transition::Applied);

    assert_eq!(
        history_actions(&authority, id),
        vec![
            HistoryAction::Restore,
            HistoryAction::Suspend,
            HistoryAction::Suspend
        ]
    );
    authority.authenticate(&license.activation_code, TEST_EMAIL).unwrap();
}

#[test]
fn test_cannot_suspend_revoked_license() {
    let authority = setup_authority();
    let license = issue_test_license(&authority, "monthly", 3);
    authority.revoke(&license.license_id, "refund", None).unwrap();

    let err = authority
        .suspend_license(&license.license_id, "overdue")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let details = authority.license_details(&license.license_id).unwrap();
    assert_eq!(details.view.license.status, LicenseStatus::Revoked);
    assert!(details.revocation.is_some());
}

#[test]
fn test_revocation_status_requires_matching_email() {
    let authority = setup_authority();
    let license = issue_test_license(&authority, "monthly", 3);
    let id = license.license_id.as_str();

    assert!(authority.revocation_status(id, TEST_EMAIL).unwrap().is_none());

    authority.revoke(id, "chargeback", Some("billing")).unwrap();

    let record = authority
        .revocation_status(id, &TEST_EMAIL.to_uppercase())
        .unwrap()
        .expect("revoked license with matching email");
    assert_eq!(record.reason, "chargeback");

    assert!(
        authority
            .revocation_status(id, "other@example.com")
            .unwrap()
            .is_none()
    );
    assert!(
        authority
            .revocation_status(&EntityType::License.gen_id(), TEST_EMAIL)
            .unwrap()
            .is_none()
    );
}

#[test]
fn test_revoke_batch() {
    let authority = setup_authority();
    let a = issue_test_license(&authority, "monthly", 3);
    let b = issue_test_license(&authority, "monthly", 3);
    authority.revoke(&b.license_id, "earlier", None).unwrap();

    let ids = vec![
        a.license_id.clone(),
        b.license_id.clone(),
        EntityType::License.gen_id(),
    ];
    let result = authority.revoke_batch(&ids, "bulk cleanup", Some("admin"));

    assert_eq!(result.succeeded, 2);
    assert_eq!(result.failed, 1);
    assert_eq!(result.items[0].result, Some(Transition::Applied));
    assert_eq!(result.items[1].result, Some(Transition::AlreadyInState));
    assert_eq!(result.items[2].error.as_deref(), Some(msg::LICENSE_NOT_FOUND));
}
