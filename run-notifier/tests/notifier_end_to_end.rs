//! End-to-end delivery through the service container: configuration written
//! through the service, notifier elected over a real SQLite lease, webhook
//! received by a mock HTTP server. The multi-replica case shares one SQLite
//! file between two containers.

use std::time::{Duration, Instant};

use run_notifier::config::AppConfig;
use run_notifier::database::{DbPool, init_pool_with_size, run_migrations};
use run_notifier::domain::{RunEvent, RunStatus, Workspace};
use run_notifier::notification::{
    ConfigEvent, CreateConfigOptions, GenericPayload, PAYLOAD_VERSION, Trigger,
    UpdateConfigOptions,
};
use run_notifier::services::ServiceContainer;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn setup_test_db() -> DbPool {
    let pool = init_pool_with_size("sqlite::memory:", 1)
        .await
        .expect("Failed to create test pool");
    run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    pool
}

fn test_config() -> AppConfig {
    AppConfig {
        database_url: "sqlite::memory:".to_string(),
        db_pool_size: 1,
        hostname: "otf.example.com".to_string(),
        publish_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn wait_for_requests(server: &MockServer, count: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let received = server.received_requests().await.unwrap_or_default().len();
        if received >= count {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting for {count} requests, got {received}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_run_event_is_delivered_to_webhook() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(header("authorization", "Bearer s3cr3t"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let services = ServiceContainer::new(setup_test_db().await, &test_config());
    services
        .workspaces
        .save_workspace(&Workspace::new("ws-1", "dev", "acme"))
        .await
        .unwrap();

    let config = services
        .notification_configs
        .create(
            "ws-1",
            CreateConfigOptions {
                destination_type: "generic".to_string(),
                enabled: Some(true),
                name: Some("deploys".to_string()),
                token: Some("s3cr3t".to_string()),
                triggers: vec!["run:created".to_string(), "run:errored".to_string()],
                url: Some(format!("{}/hook", server.uri())),
            },
        )
        .await
        .unwrap();

    let notifier = services.start_notifier();
    wait_until("notifier to subscribe", || {
        services.run_events.subscriber_count() > 0
            && services.config_events.subscriber_count() > 0
    })
    .await;

    // Not subscribed; dropped without a request.
    services
        .run_events
        .publish(RunEvent::new("run-0", "ws-1", RunStatus::Planning));
    services.run_events.publish(
        RunEvent::new("run-1", "ws-1", RunStatus::Pending)
            .with_timestamp(RunStatus::Pending, chrono::Utc::now()),
    );
    wait_for_requests(&server, 1).await;

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let payload: GenericPayload = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(payload.payload_version, PAYLOAD_VERSION);
    assert_eq!(payload.notification_configuration_id, config.id);
    assert_eq!(payload.run_id, "run-1");
    assert_eq!(payload.workspace_name, "dev");
    assert_eq!(payload.organization_name, "acme");
    assert_eq!(
        payload.run_url,
        "https://otf.example.com/app/organizations/acme/workspaces/dev/runs/run-1"
    );
    assert_eq!(payload.notifications.len(), 1);
    assert_eq!(payload.notifications[0].trigger, Trigger::Created);
    assert_eq!(payload.notifications[0].run_status, RunStatus::Pending);

    // Disabling the configuration takes effect without a restart.
    services
        .notification_configs
        .update(
            &config.id,
            UpdateConfigOptions {
                enabled: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    services
        .run_events
        .publish(RunEvent::new("run-2", "ws-1", RunStatus::Errored));
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(server.received_requests().await.unwrap().len(), 1);

    services
        .shutdown_with_timeout(notifier, Duration::from_secs(5))
        .await
        .unwrap();
    assert!(services.is_shutting_down());
}

#[tokio::test]
async fn test_configuration_created_while_running_is_picked_up() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let services = ServiceContainer::new(setup_test_db().await, &test_config());
    services
        .workspaces
        .save_workspace(&Workspace::new("ws-1", "prod", "acme"))
        .await
        .unwrap();

    let notifier = services.start_notifier();
    wait_until("notifier to subscribe", || {
        services.config_events.subscriber_count() > 0
    })
    .await;

    let url = format!("{}/runs", server.uri());
    let mut expected = Vec::new();
    for name in ["first", "second"] {
        let config = services
            .notification_configs
            .create(
                "ws-1",
                CreateConfigOptions {
                    destination_type: "generic".to_string(),
                    enabled: Some(true),
                    name: Some(name.to_string()),
                    token: Some(format!("token-{name}")),
                    triggers: vec!["run:completed".to_string()],
                    url: Some(url.clone()),
                },
            )
            .await
            .unwrap();
        expected.push((config.id, format!("Bearer token-{name}")));
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    services
        .run_events
        .publish(RunEvent::new("run-9", "ws-1", RunStatus::Applied));
    wait_for_requests(&server, 2).await;

    // Both configurations share one client but authenticate separately.
    let mut received: Vec<(String, String)> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| {
            let id = serde_json::from_slice::<GenericPayload>(&r.body)
                .unwrap()
                .notification_configuration_id;
            let auth = r.headers.get("authorization").unwrap().to_str().unwrap();
            (id, auth.to_string())
        })
        .collect();
    received.sort();
    expected.sort();
    assert_eq!(received, expected, "each configuration delivers once");

    services
        .shutdown_with_timeout(notifier, Duration::from_secs(5))
        .await
        .unwrap();
}

async fn file_backed_pool(url: &str) -> DbPool {
    let pool = init_pool_with_size(url, 2)
        .await
        .expect("Failed to open shared database");
    run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    pool
}

#[tokio::test]
async fn test_configuration_written_on_another_replica_is_delivered() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/replica"))
        .and(header("authorization", "Bearer from-b"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}?mode=rwc", dir.path().join("notifier.db").display());
    let config = AppConfig {
        config_poll_interval: Duration::from_millis(50),
        ..test_config()
    };

    let replica_a = ServiceContainer::new(file_backed_pool(&url).await, &config);
    let replica_b = ServiceContainer::new(file_backed_pool(&url).await, &config);
    replica_a
        .workspaces
        .save_workspace(&Workspace::new("ws-1", "dev", "acme"))
        .await
        .unwrap();

    // A takes the lease first; B keeps running as a follower.
    let notifier_a = replica_a.start_notifier();
    wait_until("replica A to lead", || {
        replica_a.config_events.subscriber_count() > 0
    })
    .await;
    let notifier_b = replica_b.start_notifier();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(replica_b.config_events.subscriber_count(), 0);

    let mut received = replica_a.config_events.subscribe();
    let created = replica_b
        .notification_configs
        .create(
            "ws-1",
            CreateConfigOptions {
                destination_type: "generic".to_string(),
                enabled: Some(true),
                name: Some("from replica b".to_string()),
                token: Some("from-b".to_string()),
                triggers: vec!["run:errored".to_string()],
                url: Some(format!("{}/replica", server.uri())),
            },
        )
        .await
        .unwrap();

    // The leader picks the change up from the shared outbox.
    let relayed = tokio::time::timeout(Duration::from_secs(5), received.recv())
        .await
        .expect("change never relayed to the leader")
        .unwrap();
    assert_eq!(relayed.config().id, created.id);
    tokio::time::sleep(Duration::from_millis(100)).await;

    replica_a
        .run_events
        .publish(RunEvent::new("run-7", "ws-1", RunStatus::Errored));
    wait_for_requests(&server, 1).await;

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let payload: GenericPayload = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(payload.notification_configuration_id, created.id);
    assert_eq!(payload.run_id, "run-7");

    // Deleting on B stops deliveries from A.
    replica_b
        .notification_configs
        .delete(&created.id)
        .await
        .unwrap();
    let relayed = tokio::time::timeout(Duration::from_secs(5), received.recv())
        .await
        .expect("deletion never relayed to the leader")
        .unwrap();
    assert!(matches!(relayed, ConfigEvent::Deleted(_)));
    tokio::time::sleep(Duration::from_millis(100)).await;

    replica_a
        .run_events
        .publish(RunEvent::new("run-8", "ws-1", RunStatus::Errored));
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(server.received_requests().await.unwrap().len(), 1);

    replica_b
        .shutdown_with_timeout(notifier_b, Duration::from_secs(5))
        .await
        .unwrap();
    replica_a
        .shutdown_with_timeout(notifier_a, Duration::from_secs(5))
        .await
        .unwrap();
}
