//! Shadow traffic checker behaviour with scripted probes and an in-memory store.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use health_watch::health::{
    HealthResult, HealthStatus, NodeName, PodId, ShadowTimings, ShadowTrafficChecker,
    ShadowWatchRequest, StatusStanza,
};
use health_watch::probe::{HealthRequest, HealthResponse, Protocol};
use health_watch::resources::Unwired;
use health_watch::store::MemoryKv;

mod common;
use common::FakeHealthClient;

fn nodes(names: &[&str]) -> Vec<NodeName> {
    names.iter().map(|n| NodeName::from(*n)).collect()
}

fn checker(
    client: Arc<FakeHealthClient>,
    kv: MemoryKv,
    use_health_service: bool,
    use_only_health_service: bool,
) -> ShadowTrafficChecker {
    ShadowTrafficChecker::new(
        client,
        Arc::new(Unwired),
        Arc::new(kv),
        Arc::new(Unwired),
        use_health_service,
        use_only_health_service,
    )
}

fn probed(port: u16) -> StatusStanza {
    StatusStanza {
        port,
        path: None,
        http: true,
    }
}

#[tokio::test(start_paused = true)]
async fn test_always_healthy_reports_passing_without_probing() {
    let client = FakeHealthClient::new();
    let checker = checker(client.clone(), MemoryKv::new(), false, true);
    let cancel = CancellationToken::new();

    let start = Instant::now();
    let req = ShadowWatchRequest::new("web", nodes(&["n1", "n2"]), StatusStanza::default());
    let mut watch = checker.watch_service(req, cancel.clone());

    let snapshot = watch.results.recv().await.unwrap();
    assert!(start.elapsed() >= Duration::from_secs(2));
    assert_eq!(snapshot.len(), 2);
    for (node, res) in &snapshot {
        assert_eq!(node, &res.node);
        assert_eq!(res.status, HealthStatus::Passing);
        assert_eq!(res.service, "web");
    }

    // Still re-emitted on the fast heartbeat.
    let again = watch.results.recv().await.unwrap();
    assert_eq!(again, snapshot);

    assert_eq!(client.monitor_calls(), 0);
    assert_eq!(client.batch_calls(), 0);
    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_node_update_adds_passing_entries() {
    let client = FakeHealthClient::new();
    let checker = checker(client, MemoryKv::new(), false, true);
    let cancel = CancellationToken::new();
    let (update_tx, update_rx) = mpsc::channel(1);

    let req = ShadowWatchRequest::new("web", nodes(&["n1"]), StatusStanza::default())
        .with_node_updates(update_rx);
    let mut watch = checker.watch_service(req, cancel.clone());

    let first = watch.results.recv().await.unwrap();
    assert_eq!(first.len(), 1);

    update_tx.send(nodes(&["n3"])).await.unwrap();
    let latest = watch.results.recv().await.unwrap();
    assert_eq!(latest[&NodeName::from("n3")].status, HealthStatus::Passing);
    // Nodes are never removed.
    assert!(latest.contains_key(&NodeName::from("n1")));
    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_probe_push_updates_snapshot() {
    let client = FakeHealthClient::new();
    client.push("http://n1:8080/_status", HealthStatus::Critical);
    let checker = checker(client.clone(), MemoryKv::new(), false, true);
    let cancel = CancellationToken::new();

    let req = ShadowWatchRequest::new("web", nodes(&["n1"]), probed(8080));
    let mut watch = checker.watch_service(req, cancel.clone());

    let snapshot = watch.results.recv().await.unwrap();
    let res = &snapshot[&NodeName::from("n1")];
    assert_eq!(res.status, HealthStatus::Critical);
    assert_eq!(res.id, PodId::from("web"));
    assert_eq!(client.subscribed(), vec!["http://n1:8080/_status".to_string()]);

    // The heartbeat repeats the last known state.
    let start = Instant::now();
    let repeated = watch.results.recv().await.unwrap();
    assert!(start.elapsed() >= Duration::from_secs(4));
    assert_eq!(repeated, snapshot);
    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_unresolvable_response_is_reported() {
    let client = FakeHealthClient::new();
    client.push_raw(
        "http://n1:8080/_status",
        HealthResponse {
            request: HealthRequest {
                url: "::not a url::".to_string(),
                protocol: Protocol::Http,
            },
            health: HealthStatus::Passing,
        },
    );
    let checker = checker(client, MemoryKv::new(), false, true);
    let cancel = CancellationToken::new();

    let req = ShadowWatchRequest::new("web", nodes(&["n1"]), probed(8080));
    let mut watch = checker.watch_service(req, cancel.clone());

    let err = watch.errors.recv().await.unwrap();
    assert_eq!(err.kind(), "resolve");

    // The watch keeps running; the heartbeat carries an empty map.
    let snapshot = watch.results.recv().await.unwrap();
    assert!(snapshot.is_empty());
    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_failed_monitor_is_retried() {
    let client = FakeHealthClient::new();
    client.fail_monitors(true);
    let checker = checker(client.clone(), MemoryKv::new(), false, true);
    let cancel = CancellationToken::new();

    let req = ShadowWatchRequest::new("web", nodes(&["n1"]), probed(8080));
    let mut watch = checker.watch_service(req, cancel.clone());

    assert_eq!(watch.errors.recv().await.unwrap().kind(), "probe");
    assert_eq!(watch.errors.recv().await.unwrap().kind(), "probe");
    assert!(client.monitor_calls() >= 2);
    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_monitors_refresh_onto_new_targets() {
    let client = FakeHealthClient::new();
    let checker = checker(client.clone(), MemoryKv::new(), false, true).with_timings(ShadowTimings {
        monitor_refresh: Duration::from_secs(10),
        ..ShadowTimings::default()
    });
    let cancel = CancellationToken::new();
    let (update_tx, update_rx) = mpsc::channel(1);

    let req = ShadowWatchRequest::new("web", nodes(&["n1"]), probed(8080))
        .with_node_updates(update_rx);
    let _watch = checker.watch_service(req, cancel.clone());

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(client.subscribed(), vec!["http://n1:8080/_status".to_string()]);

    update_tx.send(nodes(&["n1", "n2"])).await.unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;

    let subscribed = client.subscribed();
    assert_eq!(subscribed.len(), 3);
    assert!(subscribed.contains(&"http://n2:8080/_status".to_string()));
    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_store_only_watch_never_probes() {
    let kv = MemoryKv::new();
    kv.put_health(&HealthResult::new(
        PodId::from("web"),
        NodeName::from("n1"),
        "web",
        HealthStatus::Warning,
    ))
    .unwrap();
    let client = FakeHealthClient::new();
    let checker = checker(client.clone(), kv, false, false);
    let cancel = CancellationToken::new();

    let req = ShadowWatchRequest::new("web", nodes(&["n1"]), probed(8080));
    let mut watch = checker.watch_service(req, cancel.clone());

    let snapshot = watch.results.recv().await.unwrap();
    assert_eq!(snapshot[&NodeName::from("n1")].status, HealthStatus::Warning);
    assert_eq!(client.monitor_calls(), 0);
    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_store_and_probe_share_one_output() {
    let kv = MemoryKv::new();
    kv.put_health(&HealthResult::new(
        PodId::from("web"),
        NodeName::from("n1"),
        "web",
        HealthStatus::Critical,
    ))
    .unwrap();
    let checker = checker(FakeHealthClient::new(), kv, false, false);
    let cancel = CancellationToken::new();

    let req = ShadowWatchRequest::new("web", nodes(&["n1"]), StatusStanza::default())
        .with_health_service(true);
    let mut watch = checker.watch_service(req, cancel.clone());

    let from_store = watch.results.recv().await.unwrap();
    assert_eq!(from_store[&NodeName::from("n1")].status, HealthStatus::Critical);

    let from_probe = watch.results.recv().await.unwrap();
    assert_eq!(from_probe[&NodeName::from("n1")].status, HealthStatus::Passing);
    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_cancel_closes_both_channels() {
    let client = FakeHealthClient::new();
    let checker = checker(client, MemoryKv::new(), true, false);
    let cancel = CancellationToken::new();

    let req = ShadowWatchRequest::new("web", nodes(&["n1"]), probed(8080));
    let mut watch = checker.watch_service(req, cancel.clone());
    tokio::time::sleep(Duration::from_secs(1)).await;

    cancel.cancel();
    cancel.cancel();
    watch.task.await.unwrap();

    while watch.results.recv().await.is_some() {}
    while watch.errors.recv().await.is_some() {}
}

#[tokio::test]
async fn test_point_lookup_reads_store_unless_probing() {
    let kv = MemoryKv::new();
    kv.put_health(&HealthResult::new(
        PodId::from("web"),
        NodeName::from("n1"),
        "web",
        HealthStatus::Warning,
    ))
    .unwrap();
    let client = FakeHealthClient::new();
    let checker = checker(client.clone(), kv, false, false);

    let snapshot = checker
        .service("web", &nodes(&["n1"]), false, &probed(8080))
        .await
        .unwrap();
    assert_eq!(snapshot[&NodeName::from("n1")].status, HealthStatus::Warning);
    assert_eq!(client.batch_calls(), 0);
}

#[tokio::test]
async fn test_point_lookup_always_healthy_skips_client() {
    let client = FakeHealthClient::new();
    let checker = checker(client.clone(), MemoryKv::new(), false, false);

    let snapshot = checker
        .service("web", &nodes(&["n1", "n2"]), true, &StatusStanza::default())
        .await
        .unwrap();
    assert_eq!(snapshot.len(), 2);
    assert!(snapshot.values().all(|res| res.status == HealthStatus::Passing));
    assert_eq!(client.batch_calls(), 0);
}

#[tokio::test]
async fn test_point_lookup_probes_each_node() {
    let client = FakeHealthClient::new();
    client.set_batch("http://n1:8080/_status", HealthStatus::Passing);
    client.set_batch("http://n2:8080/_status", HealthStatus::Critical);
    let checker = checker(client.clone(), MemoryKv::new(), true, false);

    let snapshot = checker
        .service("web", &nodes(&["n1", "n2"]), false, &probed(8080))
        .await
        .unwrap();
    assert_eq!(snapshot[&NodeName::from("n1")].status, HealthStatus::Passing);
    assert_eq!(snapshot[&NodeName::from("n2")].status, HealthStatus::Critical);
    assert_eq!(client.batch_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_zero_heartbeat_does_not_stop_the_watch() {
    let checker = checker(FakeHealthClient::new(), MemoryKv::new(), false, true).with_timings(
        ShadowTimings {
            heartbeat: Duration::ZERO,
            always_healthy_heartbeat: Duration::ZERO,
            monitor_refresh: Duration::ZERO,
            monitor_retry: Duration::ZERO,
        },
    );
    let cancel = CancellationToken::new();

    let req = ShadowWatchRequest::new("web", nodes(&["n1"]), StatusStanza::default());
    let mut watch = checker.watch_service(req, cancel.clone());

    let snapshot = watch.results.recv().await.unwrap();
    assert_eq!(snapshot[&NodeName::from("n1")].status, HealthStatus::Passing);

    cancel.cancel();
    watch.task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_mixed_case_nodes_keep_their_names() {
    let client = FakeHealthClient::new();
    client.push("http://Node-A.Example.com:8080/_status", HealthStatus::Warning);
    client.set_batch("http://Node-B:8080/_status", HealthStatus::Critical);
    let checker = checker(client, MemoryKv::new(), false, true);
    let cancel = CancellationToken::new();

    let req = ShadowWatchRequest::new("web", nodes(&["Node-A.Example.com"]), probed(8080));
    let mut watch = checker.watch_service(req, cancel.clone());
    let pushed = watch.results.recv().await.unwrap();
    assert_eq!(
        pushed[&NodeName::from("Node-A.Example.com")].status,
        HealthStatus::Warning
    );
    cancel.cancel();

    let looked_up = checker
        .service("web", &nodes(&["Node-B"]), true, &probed(8080))
        .await
        .unwrap();
    let res = &looked_up[&NodeName::from("Node-B")];
    assert_eq!(res.node, NodeName::from("Node-B"));
    assert_eq!(res.status, HealthStatus::Critical);
}
