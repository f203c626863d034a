//! Activation history query tests

#[path = "../common/mod.rs"]
mod common;

use common::*;
use rusqlite::params;
use serde_json::json;

#[test]
fn test_append_and_list_newest_first() {
    let conn = setup_test_db();
    let license = insert_test_license(&conn, Plan::Monthly, 5);
    let id = license.license_id.as_str();

    let actions = [
        HistoryAction::Activate,
        HistoryAction::Heartbeat,
        HistoryAction::Deactivate,
        HistoryAction::Renew,
    ];
    for action in actions {
        queries::append_history(&conn, id, action, Some("dev-a"), Some("10.0.0.1"), &json!({}))
            .unwrap();
    }

    let listed: Vec<HistoryAction> = queries::list_history(&conn, id, 10)
        .unwrap()
        .into_iter()
        .map(|e| e.action)
        .collect();
    assert_eq!(
        listed,
        vec![
            HistoryAction::Renew,
            HistoryAction::Deactivate,
            HistoryAction::Heartbeat,
            HistoryAction::Activate,
        ]
    );

    let limited = queries::list_history(&conn, id, 2).unwrap();
    assert_eq!(limited.len(), 2);
    assert_eq!(limited[0].action, HistoryAction::Renew);
}

#[test]
fn test_history_details_round_trip() {
    let conn = setup_test_db();
    let license = insert_test_license(&conn, Plan::Monthly, 5);
    let details = json!({ "reason": "lost laptop", "suspended_by": "user" });

    let written = queries::append_history(
        &conn,
        &license.license_id,
        HistoryAction::Suspend,
        Some("dev-a"),
        None,
        &details,
    )
    .unwrap();
    assert!(EntityType::HistoryEntry.matches(&written.id));

    let read = queries::list_history(&conn, &license.license_id, 1).unwrap();
    assert_eq!(read[0].id, written.id);
    assert_eq!(read[0].details, details);
    assert_eq!(read[0].device_id.as_deref(), Some("dev-a"));
    assert_eq!(read[0].ip_address, None);
}

#[test]
fn test_history_requires_existing_license() {
    let conn = setup_test_db();
    let result = queries::append_history(
        &conn,
        &EntityType::License.gen_id(),
        HistoryAction::Revoke,
        None,
        None,
        &json!({}),
    );
    assert!(matches!(result, Err(AppError::Database(_))));
}

#[test]
fn test_recent_activation_counts_group_by_day() {
    let conn = setup_test_db();
    let license = insert_test_license(&conn, Plan::Monthly, 5);
    let id = license.license_id.as_str();

    // 2023-11-14 twice, 2023-11-15 once, plus a heartbeat that must not count
    let rows = [
        ("activate", 1_700_000_000_i64),
        ("activate", 1_700_000_100),
        ("activate", 1_700_086_400),
        ("heartbeat", 1_700_086_500),
    ];
    for (i, (action, created_at)) in rows.iter().enumerate() {
        conn.execute(
            "INSERT INTO activation_history (id, license_id, action, details, created_at)
             VALUES (?1, ?2, ?3, '{}', ?4)",
            params![format!("lp_hist_{:032x}", i), id, action, created_at],
        )
        .unwrap();
    }

    let counts = queries::recent_activation_counts(&conn, 1_699_000_000).unwrap();
    assert_eq!(
        counts,
        vec![
            DailyCount {
                day: "2023-11-14".into(),
                count: 2
            },
            DailyCount {
                day: "2023-11-15".into(),
                count: 1
            },
        ]
    );

    let later = queries::recent_activation_counts(&conn, 1_700_050_000).unwrap();
    assert_eq!(later.len(), 1);
    assert_eq!(later[0].day, "2023-11-15");
}
