//! DAL integration tests. Require Postgres (`DATABASE_URL`).

use crate::fixtures::TestFixture;
use chrono::Utc;
use notif_models::models::api_keys::NewApiKey;
use notif_models::models::event_deliveries::{
    NewEventDelivery, EVENT_DELIVERY_ACKED, EVENT_DELIVERY_DELIVERED,
};
use notif_models::models::orgs::{NewOrg, UpdateOrg};
use notif_models::models::scheduled_events::{
    SCHEDULE_STATUS_CANCELLED, SCHEDULE_STATUS_COMPLETED, SCHEDULE_STATUS_PENDING,
};
use notif_models::models::webhooks::{NewWebhookDelivery, UpdateWebhook};
use uuid::Uuid;

#[test]
#[ignore = "requires Postgres"]
fn test_org_crud() {
    let fixture = TestFixture::new();

    let org = fixture.insert_test_org();
    assert_eq!(org.billing_tier, "free");

    let fetched = fixture.dal.orgs().get(&org.id).unwrap().unwrap();
    assert_eq!(fetched.id, org.id);
    assert_eq!(fetched.nats_public_key, org.nats_public_key);

    let updated = fixture
        .dal
        .orgs()
        .update(
            &org.id,
            &UpdateOrg {
                billing_tier: Some("pro".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(updated.billing_tier, "pro");

    assert_eq!(fixture.dal.orgs().delete(&org.id).unwrap(), 1);
    assert!(fixture.dal.orgs().get(&org.id).unwrap().is_none());
}

#[test]
#[ignore = "requires Postgres"]
fn test_org_id_collision() {
    let fixture = TestFixture::new();
    let org = fixture.insert_test_org();

    let duplicate = NewOrg::new(
        org.id.clone(),
        "Another".to_string(),
        "AXXXX".to_string(),
    )
    .unwrap();

    let result = fixture.dal.orgs().create(&duplicate);
    assert!(matches!(
        result,
        Err(diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _
        ))
    ));
}

#[test]
#[ignore = "requires Postgres"]
fn test_project_slug_unique_per_org() {
    let fixture = TestFixture::new();
    let org_a = fixture.insert_test_org();
    let org_b = fixture.insert_test_org();

    let project = fixture.insert_test_project(&org_a.id);

    // Same slug in another org is fine
    let cross = notif_models::models::projects::NewProject::new(
        org_b.id.clone(),
        project.slug.clone(),
    )
    .unwrap();
    assert!(fixture.dal.projects().create(&cross).is_ok());

    // Same slug in the same org collides
    let dup = notif_models::models::projects::NewProject::new(
        org_a.id.clone(),
        project.slug.clone(),
    )
    .unwrap();
    assert!(fixture.dal.projects().create(&dup).is_err());
}

#[test]
#[ignore = "requires Postgres"]
fn test_api_key_lookup_by_hash() {
    let fixture = TestFixture::new();
    let org = fixture.insert_test_org();
    let project = fixture.insert_test_project(&org.id);

    let new_key = NewApiKey::new(
        org.id.clone(),
        project.id,
        "notif_ABCDEFGH_xxxxxxxxxxxxxxxxxxxxxxxx",
        format!("hash-{}", Uuid::new_v4()),
        Some(25.0),
    )
    .unwrap();

    let key = fixture.dal.api_keys().create(&new_key).unwrap();
    assert_eq!(key.prefix, "notif_ABCDEF");

    let by_hash = fixture
        .dal
        .api_keys()
        .get_by_hash(&key.key_hash)
        .unwrap()
        .unwrap();
    assert_eq!(by_hash.id, key.id);
    assert_eq!(by_hash.rate_limit, Some(25.0));

    assert!(fixture
        .dal
        .api_keys()
        .get_by_hash("missing")
        .unwrap()
        .is_none());

    fixture.dal.api_keys().touch_last_used(key.id).unwrap();
    let touched = fixture.dal.api_keys().get(&org.id, key.id).unwrap().unwrap();
    assert!(touched.last_used_at.is_some());
}

#[test]
#[ignore = "requires Postgres"]
fn test_webhook_crud_and_scoping() {
    let fixture = TestFixture::new();
    let org_a = fixture.insert_test_org();
    let org_b = fixture.insert_test_org();
    let project = fixture.insert_test_project(&org_a.id);

    let webhook = fixture.insert_test_webhook(&org_a.id, project.id, vec!["payments.>"]);

    // Cross-tenant read misses
    assert!(fixture
        .dal
        .webhooks()
        .get(&org_b.id, webhook.id)
        .unwrap()
        .is_none());

    let updated = fixture
        .dal
        .webhooks()
        .update(
            &org_a.id,
            webhook.id,
            &UpdateWebhook {
                enabled: Some(false),
                ..Default::default()
            },
        )
        .unwrap();
    assert!(!updated.enabled);
    assert!(updated.updated_at >= webhook.updated_at);

    let enabled_only = fixture.dal.webhooks().list(&org_a.id, true).unwrap();
    assert!(enabled_only.iter().all(|hook| hook.id != webhook.id));
}

#[test]
#[ignore = "requires Postgres"]
fn test_webhook_delivery_rows() {
    let fixture = TestFixture::new();
    let org = fixture.insert_test_org();
    let project = fixture.insert_test_project(&org.id);
    let webhook = fixture.insert_test_webhook(&org.id, project.id, vec![">"]);

    let event_id = Uuid::new_v4();

    let first = fixture
        .dal
        .webhook_deliveries()
        .create(&NewWebhookDelivery::new(
            webhook.id,
            event_id,
            "payments.failed".to_string(),
            1,
        ))
        .unwrap();
    fixture
        .dal
        .webhook_deliveries()
        .mark_failed(first.id, Some(500), Some("boom"), "HTTP 500")
        .unwrap();

    let second = fixture
        .dal
        .webhook_deliveries()
        .create(&NewWebhookDelivery::new(
            webhook.id,
            event_id,
            "payments.failed".to_string(),
            2,
        ))
        .unwrap();
    fixture
        .dal
        .webhook_deliveries()
        .mark_success(second.id, 200, "ok")
        .unwrap();

    let for_event = fixture
        .dal
        .webhook_deliveries()
        .list_for_event(event_id)
        .unwrap();
    assert_eq!(for_event.len(), 2);
    assert_eq!(for_event[0].attempt, 1);
    assert_eq!(for_event[0].status, "failed");
    assert_eq!(for_event[1].attempt, 2);
    assert_eq!(for_event[1].status, "success");
    assert!(for_event[1].delivered_at.is_some());
}

#[test]
#[ignore = "requires Postgres"]
fn test_event_delivery_transitions() {
    let fixture = TestFixture::new();
    let event_id = Uuid::new_v4();

    let row = fixture
        .dal
        .event_deliveries()
        .create(&NewEventDelivery::websocket(
            event_id,
            "ws-acme-group".to_string(),
            "client-1".to_string(),
            1,
        ))
        .unwrap();
    assert_eq!(row.status, EVENT_DELIVERY_DELIVERED);

    fixture.dal.event_deliveries().mark_nacked(row.id, Some("client nack")).unwrap();
    let redelivered = fixture
        .dal
        .event_deliveries()
        .mark_redelivered(row.id, 2)
        .unwrap();
    assert_eq!(redelivered.status, EVENT_DELIVERY_DELIVERED);
    assert_eq!(redelivered.attempt, 2);

    let acked = fixture.dal.event_deliveries().mark_acked(row.id).unwrap();
    assert_eq!(acked.status, EVENT_DELIVERY_ACKED);
    assert!(acked.acked_at.is_some());
}

#[test]
#[ignore = "requires Postgres"]
fn test_schedule_claim_due() {
    let fixture = TestFixture::new();
    let org = fixture.insert_test_org();
    let project = fixture.insert_test_project(&org.id);

    let due = fixture.insert_test_schedule(&org.id, project.id, -5);
    let future = fixture.insert_test_schedule(&org.id, project.id, 3600);

    let conn = &mut fixture.dal.pool.get().unwrap();
    use diesel::Connection;
    let claimed: Vec<Uuid> = conn
        .transaction::<_, diesel::result::Error, _>(|conn| {
            let rows = fixture
                .dal
                .scheduled_events()
                .claim_due(conn, Utc::now(), 10)?;
            for row in &rows {
                fixture
                    .dal
                    .scheduled_events()
                    .mark_completed(conn, row.id, Utc::now())?;
            }
            Ok(rows.into_iter().map(|row| row.id).collect())
        })
        .unwrap();

    assert!(claimed.contains(&due.id));
    assert!(!claimed.contains(&future.id));

    let completed = fixture.dal.scheduled_events().get(&org.id, due.id).unwrap().unwrap();
    assert_eq!(completed.status, SCHEDULE_STATUS_COMPLETED);
    assert!(completed.executed_at.is_some());

    let untouched = fixture
        .dal
        .scheduled_events()
        .get(&org.id, future.id)
        .unwrap()
        .unwrap();
    assert_eq!(untouched.status, SCHEDULE_STATUS_PENDING);
}

#[test]
#[ignore = "requires Postgres"]
fn test_schedule_cancel_only_pending() {
    let fixture = TestFixture::new();
    let org = fixture.insert_test_org();
    let project = fixture.insert_test_project(&org.id);

    let schedule = fixture.insert_test_schedule(&org.id, project.id, 3600);
    assert_eq!(fixture.dal.scheduled_events().cancel(&org.id, schedule.id).unwrap(), 1);

    let cancelled = fixture
        .dal
        .scheduled_events()
        .get(&org.id, schedule.id)
        .unwrap()
        .unwrap();
    assert_eq!(cancelled.status, SCHEDULE_STATUS_CANCELLED);

    // A second cancel is a no-op
    assert_eq!(fixture.dal.scheduled_events().cancel(&org.id, schedule.id).unwrap(), 0);
}

#[test]
#[ignore = "requires Postgres"]
fn test_audit_log_batch() {
    let fixture = TestFixture::new();
    let org = fixture.insert_test_org();

    let entries: Vec<_> = (0..3)
        .map(|i| {
            notif_models::models::audit_logs::NewAuditLog::new(
                "system",
                None,
                "event.emit",
                "event",
                Some(format!("evt-{}", i)),
            )
            .unwrap()
            .with_org(&org.id)
        })
        .collect();

    assert_eq!(fixture.dal.audit_logs().create_batch(&entries).unwrap(), 3);

    let listed = fixture.dal.audit_logs().list_for_org(&org.id, 10, 0).unwrap();
    assert_eq!(listed.len(), 3);
}
