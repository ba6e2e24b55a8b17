//! End-to-end scenarios. Require Postgres and a JetStream-enabled NATS
//! server; webhook targets are served in-process on a loopback listener.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::post, Router};
use futures::StreamExt;
use notif_hub::bus::subject::{dlq_subject, event_subject};
use notif_hub::bus::ConsumerSpec;
use notif_hub::dlq::DlqManager;
use notif_hub::policy::{PolicyEnforcer, PolicyLoader, Principal};
use notif_hub::pool::{ClientPool, WEBHOOK_RETRY_STREAM};
use notif_hub::publisher::EventPublisher;
use notif_hub::webhook::{SsrfGuard, WebhookConfig, WebhookEngine};
use notif_models::models::events::{DlqMessage, Event, RetryJob};
use notif_models::models::webhooks::NewWebhook;
use notif_utils::config::{Bus as BusConfig, Ssrf as SsrfConfig};
use uuid::Uuid;

use crate::fixtures::TestFixture;

/// A loopback webhook target that records hits and returns a fixed status.
async fn spawn_target(status: u16) -> (SocketAddr, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_clone = hits.clone();

    let app = Router::new().route(
        "/hook",
        post(move || {
            let hits = hits_clone.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                axum::http::StatusCode::from_u16(status).unwrap()
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, hits)
}

fn bus_config() -> BusConfig {
    BusConfig {
        url: std::env::var("NOTIF__BUS__URL")
            .unwrap_or_else(|_| "nats://localhost:4222".to_string()),
        operator_seed: String::new(),
        system_account_seed: String::new(),
        connect_timeout_seconds: 5,
        request_timeout_seconds: 5,
        jwt_push_timeout_seconds: 5,
    }
}

fn loopback_guard() -> SsrfGuard {
    SsrfGuard::new(&SsrfConfig {
        allow_private: false,
        allow_loopback: true,
        allowlist: vec![],
    })
}

struct Stack {
    fixture: TestFixture,
    pool: Arc<ClientPool>,
    publisher: EventPublisher,
    engine: Arc<WebhookEngine>,
    org_id: String,
    project_id: Uuid,
}

/// Brings up DB + bus + webhook engine for one fresh org.
///
/// Runs against a development NATS server without operator mode; the
/// account-auth fields in CONNECT are ignored there.
async fn stack() -> Stack {
    let fixture = TestFixture::new();
    let org = fixture.insert_test_org();
    let project = fixture.insert_test_project(&org.id);

    let pool = Arc::new(ClientPool::connect_system(&bus_config()).await.unwrap());
    pool.add(&org.id, Arc::new(nkeys::KeyPair::new_account()))
        .await
        .unwrap();

    let loader = Arc::new(PolicyLoader::new("/nonexistent"));
    let policy = PolicyEnforcer::new(loader, false);
    let publisher = EventPublisher::new(pool.clone(), policy);

    let engine = WebhookEngine::new(
        fixture.dal.clone(),
        pool.clone(),
        loopback_guard(),
        WebhookConfig {
            timeout: Duration::from_secs(5),
            cache_ttl: Duration::from_secs(1),
            worker_pool_size: 4,
        },
    );
    engine.start_org(&org.id);

    Stack {
        fixture,
        pool,
        publisher,
        engine,
        org_id: org.id,
        project_id: project.id,
    }
}

/// Polls until `check` passes or the deadline expires.
async fn wait_for<F: Fn() -> bool>(check: F, deadline: Duration) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires Postgres and NATS"]
async fn test_publish_to_webhook_success() {
    let stack = stack().await;
    let (addr, hits) = spawn_target(200).await;

    let webhook = stack
        .fixture
        .dal
        .webhooks()
        .create(
            &NewWebhook::new(
                stack.org_id.clone(),
                stack.project_id,
                format!("http://{}/hook", addr),
                vec!["orders.*".to_string()],
                "ab".repeat(32),
            )
            .unwrap(),
        )
        .unwrap();

    let event = stack
        .publisher
        .publish(
            &stack.org_id,
            &stack.project_id.to_string(),
            "orders.created",
            serde_json::json!({"id": 1}),
            &Principal::api_key("test-key"),
        )
        .await
        .unwrap();

    // The engine should POST exactly once and record success
    let dal = stack.fixture.dal.clone();
    let delivered = wait_for(
        || {
            dal.webhook_deliveries()
                .list_for_event(event.id)
                .map(|rows| rows.iter().any(|row| row.status == "success"))
                .unwrap_or(false)
        },
        Duration::from_secs(10),
    )
    .await;

    assert!(delivered, "webhook delivery did not succeed in time");
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    let rows = dal.webhook_deliveries().list_for_event(event.id).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].webhook_id, webhook.id);
    assert_eq!(rows[0].attempt, 1);
    assert_eq!(rows[0].response_status, Some(200));

    stack.engine.stop_all();
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires Postgres and NATS"]
async fn test_failed_webhook_queues_retry_job() {
    let stack = stack().await;
    let (addr, hits) = spawn_target(500).await;

    let webhook = stack
        .fixture
        .dal
        .webhooks()
        .create(
            &NewWebhook::new(
                stack.org_id.clone(),
                stack.project_id,
                format!("http://{}/hook", addr),
                vec!["payments.>".to_string()],
                "ab".repeat(32),
            )
            .unwrap(),
        )
        .unwrap();

    // Read the retry stream before emitting so the job can't be missed
    let bus = stack.pool.get(&stack.org_id).await.unwrap();
    let spec = ConsumerSpec::new(vec![format!("webhook-retry.{}.>", stack.org_id)])
        .durable("test-retry-observer");
    let consumer = bus.consumer(WEBHOOK_RETRY_STREAM, &spec).await.unwrap();
    let mut retry_messages = consumer.messages().await.unwrap();

    let event = stack
        .publisher
        .publish(
            &stack.org_id,
            &stack.project_id.to_string(),
            "payments.failed",
            serde_json::json!({"amount": 10}),
            &Principal::api_key("test-key"),
        )
        .await
        .unwrap();

    let job_msg = tokio::time::timeout(Duration::from_secs(10), retry_messages.next())
        .await
        .expect("retry job expected")
        .unwrap()
        .unwrap();

    let job: RetryJob = job_msg.decode().unwrap();
    assert_eq!(job.event_id, event.id);
    assert_eq!(job.webhook_id, webhook.id);
    assert_eq!(job.attempt, 2);
    assert!(job.not_before > chrono::Utc::now());
    assert!(hits.load(Ordering::SeqCst) >= 1);

    // Attempt 1 is recorded as failed
    let rows = stack
        .fixture
        .dal
        .webhook_deliveries()
        .list_for_event(event.id)
        .unwrap();
    assert_eq!(rows[0].status, "failed");
    assert_eq!(rows[0].response_status, Some(500));

    stack.engine.stop_all();
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires Postgres and NATS"]
async fn test_dlq_list_replay_delete() {
    let stack = stack().await;
    stack.engine.stop_all(); // no webhook interference

    let bus = stack.pool.get(&stack.org_id).await.unwrap();
    let dlq = DlqManager::new(stack.pool.clone(), stack.publisher.clone());

    // Dead-letter an event by hand
    let event = Event::new(
        &stack.org_id,
        &stack.project_id.to_string(),
        "payments.failed",
        serde_json::json!({"amount": 10}),
    );
    let message = DlqMessage::from_event(&event, "webhook:test", 5, "HTTP 500");
    bus.publish(
        &dlq_subject(&stack.org_id, "webhook:test"),
        &serde_json::to_vec(&message).unwrap(),
    )
    .await
    .unwrap();

    let listed = dlq.list(&stack.org_id, 10, 0).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].message.id, event.id);
    assert_eq!(listed[0].message.attempts, 5);

    // Replay republises to the original subject and deletes the DLQ copy
    let seq = listed[0].sequence;
    let replayed = dlq.replay(&stack.org_id, seq).await.unwrap();
    assert_eq!(replayed.replays, 1);

    let after = dlq.list(&stack.org_id, 10, 0).await.unwrap();
    assert!(after.is_empty());

    // The replayed event is back on its original subject
    let subject = event_subject(
        &stack.org_id,
        &stack.project_id.to_string(),
        "payments.failed",
    );
    let from = chrono::Utc::now() - chrono::Duration::minutes(1);
    let stored = bus
        .query_range(notif_hub::pool::EVENTS_STREAM, &subject, from, None, 10)
        .await
        .unwrap();
    assert!(stored
        .iter()
        .filter_map(|m| m.decode::<Event>().ok())
        .any(|e| e.id == event.id));

    // Purge clears whatever is left
    bus.publish(
        &dlq_subject(&stack.org_id, "webhook:test"),
        &serde_json::to_vec(&message).unwrap(),
    )
    .await
    .unwrap();
    let purged = dlq.purge(&stack.org_id).await.unwrap();
    assert_eq!(purged, 1);
    assert!(dlq.list(&stack.org_id, 10, 0).await.unwrap().is_empty());
}
