use std::{sync::Arc, time::Duration};

use nsgate_config::{
    service::memory::Memory,
    watch::{WatchEvent, WatchHandle, WatchLayer},
    BackendTarget, BackoffConfig, BackendRef, ControllerScope, EventKind, HttpPath, ObjectKey, ObjectMeta, Resource, RouteDeclaration, RouteRule,
};
use tokio_util::sync::CancellationToken;

fn api_route(generation: i64) -> RouteDeclaration {
    RouteDeclaration::new(ObjectMeta::new("production", "api-ingress").with_generation(generation))
        .rule(RouteRule::host("api.example.com").path(HttpPath::prefix("/v1", BackendRef::new("api-service", 8080))))
}

fn scope() -> ControllerScope {
    ControllerScope {
        backoff: BackoffConfig {
            initial_ms: 100,
            ceiling_ms: 1000,
            multiplier: 2.0,
        },
        ..Default::default()
    }
}

async fn next(handle: &mut WatchHandle) -> WatchEvent {
    tokio::time::timeout(Duration::from_secs(30), handle.events.recv()).await.expect("watch event in time").expect("watch alive")
}

fn summary(event: &WatchEvent) -> String {
    match event {
        WatchEvent::Resource(event) => format!("{}:{}", event.kind, event.id()),
        WatchEvent::Disconnected(_) => "disconnected".to_string(),
        WatchEvent::Resynced => "resynced".to_string(),
    }
}

#[tokio::test]
async fn test_initial_list_then_live_events() {
    let memory = Memory::default();
    memory.apply_route(api_route(1));
    memory.apply_backend(BackendTarget::new(ObjectMeta::new("production", "api-service")).port(8080));
    let cancel = CancellationToken::new();
    let mut handle = WatchLayer::spawn(Arc::new(memory.clone()), Arc::new(scope()), cancel.clone());

    assert_eq!(summary(&next(&mut handle).await), "added:route/production/api-ingress");
    assert_eq!(summary(&next(&mut handle).await), "added:backend/production/api-service");
    assert_eq!(next(&mut handle).await, WatchEvent::Resynced);

    // identical object, e.g. a status-only write, is dropped
    memory.apply_route(api_route(1));
    memory.apply_route(api_route(2));
    let WatchEvent::Resource(modified) = next(&mut handle).await else {
        panic!("expect resource event")
    };
    assert_eq!(modified.kind, EventKind::Modified);
    assert_eq!(modified.object.generation(), 2);

    memory.delete_route(&ObjectKey::new("production", "api-ingress"));
    let WatchEvent::Resource(deleted) = next(&mut handle).await else {
        panic!("expect resource event")
    };
    assert_eq!(deleted.kind, EventKind::Deleted);
    // deletions carry the full last known object
    assert_eq!(deleted.object, Resource::Route(api_route(2)));

    cancel.cancel();
    handle.join.await.expect("watch task");
}

#[tokio::test]
async fn test_disconnect_resyncs_missed_changes() {
    let memory = Memory::default();
    memory.apply_route(api_route(1));
    let cancel = CancellationToken::new();
    let mut handle = WatchLayer::spawn(Arc::new(memory.clone()), Arc::new(scope()), cancel.clone());
    assert_eq!(summary(&next(&mut handle).await), "added:route/production/api-ingress");
    assert_eq!(next(&mut handle).await, WatchEvent::Resynced);

    // both changes happen while the watch is blind
    memory.apply_silently(Resource::Route(api_route(3)));
    memory.apply_silently(Resource::Backend(BackendTarget::new(ObjectMeta::new("production", "api-service")).port(8080)));
    memory.disconnect_watchers();

    assert_eq!(summary(&next(&mut handle).await), "disconnected");
    let mut drift = vec![summary(&next(&mut handle).await), summary(&next(&mut handle).await)];
    drift.sort();
    assert_eq!(drift, vec!["added:backend/production/api-service", "modified:route/production/api-ingress"]);
    assert_eq!(next(&mut handle).await, WatchEvent::Resynced);

    // the recreated listener is live
    memory.delete_backend(&ObjectKey::new("production", "api-service"));
    assert_eq!(summary(&next(&mut handle).await), "deleted:backend/production/api-service");
    cancel.cancel();
}

#[tokio::test]
async fn test_scope_filters_namespace_and_class() {
    let memory = Memory::default();
    memory.apply_route(RouteDeclaration::new(ObjectMeta::new("kube-system", "dashboard")));
    memory.apply_route(RouteDeclaration::new(ObjectMeta::new("production", "legacy")).class("nginx"));
    let scope = ControllerScope {
        namespaces: nsgate_config::NamespaceSelector::only(["production", "staging"]),
        ..scope()
    };
    let cancel = CancellationToken::new();
    let mut handle = WatchLayer::spawn(Arc::new(memory.clone()), Arc::new(scope), cancel.clone());
    assert_eq!(next(&mut handle).await, WatchEvent::Resynced);

    memory.apply_route(RouteDeclaration::new(ObjectMeta::new("kube-system", "other")));
    memory.apply_route(RouteDeclaration::new(ObjectMeta::new("production", "legacy").with_generation(2)).class("nsgate"));
    assert_eq!(summary(&next(&mut handle).await), "added:route/production/legacy");

    // moving to another class removes it from our view
    memory.apply_route(RouteDeclaration::new(ObjectMeta::new("production", "legacy").with_generation(3)).class("nginx"));
    assert_eq!(summary(&next(&mut handle).await), "deleted:route/production/legacy");
    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_relist_failures_degrade_health() {
    let memory = Memory::default();
    memory.apply_route(api_route(1));
    memory.fail_next_lists(4);
    let cancel = CancellationToken::new();
    let mut handle = WatchLayer::spawn(Arc::new(memory.clone()), Arc::new(scope()), cancel.clone());

    let mut degraded = false;
    for _ in 0..200 {
        if handle.health.is_degraded() {
            degraded = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(degraded);
    assert!(handle.health.consecutive_failures() >= 3);

    assert_eq!(summary(&next(&mut handle).await), "added:route/production/api-ingress");
    assert_eq!(next(&mut handle).await, WatchEvent::Resynced);
    assert!(!handle.health.is_degraded());
    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_periodic_resync() {
    let memory = Memory::default();
    memory.apply_route(api_route(1));
    let scope = ControllerScope {
        resync_interval_secs: 5,
        ..scope()
    };
    let cancel = CancellationToken::new();
    let mut handle = WatchLayer::spawn(Arc::new(memory.clone()), Arc::new(scope), cancel.clone());
    assert_eq!(summary(&next(&mut handle).await), "added:route/production/api-ingress");
    assert_eq!(next(&mut handle).await, WatchEvent::Resynced);

    memory.apply_silently(Resource::Route(api_route(2)));
    assert_eq!(summary(&next(&mut handle).await), "modified:route/production/api-ingress");
    assert_eq!(next(&mut handle).await, WatchEvent::Resynced);
    cancel.cancel();
}
