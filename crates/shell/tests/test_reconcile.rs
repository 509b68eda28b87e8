use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use nsgate_config::{
    service::memory::Memory,
    watch::{WatchHandle, WatchLayer},
    BackendRef, BackendTarget, BackoffConfig, Condition, ControllerScope, HttpPath, NamespaceSelector, ObjectKey, ObjectMeta, ReloadError, Resource, RouteDeclaration, RouteRule,
    RouteStatus,
};
use nsgate_kernel::{
    dataplane::{Programmer, ProxyEngine, RecordingEngine, RenderFormat, RenderedConfig},
    SnapshotCell,
};
use nsgate_shell::{ReconcileState, ReconcileStatus, Reconciler};
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;

struct Harness<E> {
    memory: Memory,
    engine: E,
    status: watch::Receiver<ReconcileStatus>,
    snapshot: Arc<SnapshotCell>,
    cancel: CancellationToken,
    watch: JoinHandle<()>,
    reconciler: JoinHandle<Reconciler<Memory, E>>,
}

fn scope() -> ControllerScope {
    ControllerScope {
        backoff: BackoffConfig {
            initial_ms: 100,
            ceiling_ms: 250,
            multiplier: 2.0,
        },
        ..Default::default()
    }
}

fn start<E>(memory: Memory, engine: E, scope: ControllerScope) -> Harness<E>
where
    E: ProxyEngine + Clone + 'static,
{
    let cancel = CancellationToken::new();
    let scope = Arc::new(scope);
    let WatchHandle { events, join, .. } = WatchLayer::spawn(Arc::new(memory.clone()), scope.clone(), cancel.child_token());
    let programmer = Programmer::new(engine.clone(), RenderFormat::Nginx, scope.cluster_domain.clone());
    let reconciler = Reconciler::new(Arc::new(memory.clone()), &scope, programmer);
    let status = reconciler.subscribe();
    let snapshot = reconciler.snapshot();
    let reconciler = tokio::spawn(reconciler.run(events, cancel.clone()));
    Harness {
        memory,
        engine,
        status,
        snapshot,
        cancel,
        watch: join,
        reconciler,
    }
}

impl<E> Harness<E> {
    async fn stop(self) -> Reconciler<Memory, E> {
        self.cancel.cancel();
        let _ = self.watch.await;
        self.reconciler.await.expect("reconcile task")
    }

    async fn status_of(&self, key: &ObjectKey, predicate: impl Fn(&RouteStatus) -> bool) -> RouteStatus {
        let memory = self.memory.clone();
        eventually(move || memory.route_status(key).filter(|status| predicate(status))).await
    }

    async fn wait_state(&mut self, predicate: impl Fn(&ReconcileStatus) -> bool) -> ReconcileStatus {
        tokio::time::timeout(Duration::from_secs(60), async {
            loop {
                {
                    let status = self.status.borrow_and_update();
                    if predicate(&status) {
                        return status.clone();
                    }
                }
                self.status.changed().await.expect("reconciler alive");
            }
        })
        .await
        .expect("reconcile status in time")
    }
}

async fn eventually<T>(probe: impl Fn() -> Option<T>) -> T {
    for _ in 0..1000 {
        if let Some(value) = probe() {
            return value;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time")
}

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(secs, 0).expect("valid timestamp")
}

fn backend(ns: &str, name: &str, port: u16) -> BackendTarget {
    BackendTarget::new(ObjectMeta::new(ns, name)).port(port)
}

fn api_ingress(generation: i64, path: &str) -> RouteDeclaration {
    RouteDeclaration::new(ObjectMeta::new("production", "api-ingress").with_generation(generation))
        .rule(RouteRule::host("api.example.com").path(HttpPath::prefix(path, BackendRef::new("api-service", 8080))))
}

fn accepted(status: &RouteStatus) -> bool {
    status.has(|c| c == &Condition::Accepted)
}

fn condition_names(status: &RouteStatus) -> Vec<String> {
    status.condition_names()
}

#[tokio::test]
async fn test_api_ingress_is_routed() {
    let memory = Memory::default();
    memory.apply_backend(backend("production", "api-service", 80));
    memory.apply_route(
        RouteDeclaration::new(ObjectMeta::new("production", "api-ingress")).rule(RouteRule::host("api.example.com").path(HttpPath::prefix("/", BackendRef::new("api-service", 80)))),
    );
    let harness = start(memory, RecordingEngine::new(), scope());

    let key = ObjectKey::new("production", "api-ingress");
    let status = harness.status_of(&key, accepted).await;
    assert_eq!(condition_names(&status), vec!["Accepted"]);
    let active = eventually(|| harness.engine.active()).await;
    let text = String::from_utf8(active.bytes).expect("utf8");
    assert!(text.contains("server_name api.example.com;"));
    assert!(text.contains("location \"/\" {"));

    let table = harness.snapshot.load();
    let entries: Vec<_> = table.entries().collect();
    assert_eq!(entries.len(), 1);
    let (host, entry) = entries[0];
    assert_eq!((host, entry.path.path.as_str()), ("api.example.com", "/"));
    assert_eq!(entry.backend.service, ObjectKey::new("production", "api-service"));
    assert_eq!(entry.backend.port, 80);
    assert_eq!(table.lookup("api.example.com", "/users").map(|e| &e.owner), Some(&key));
    harness.stop().await;
}

#[tokio::test]
async fn test_cross_namespace_reference_is_rejected() {
    let memory = Memory::default();
    memory.apply_backend(backend("production", "api-service", 8080));
    memory.apply_backend(backend("staging", "api-service", 8080));
    memory.apply_route(api_ingress(1, "/v1"));
    // production declaration reaching into staging
    memory.apply_route(
        RouteDeclaration::new(ObjectMeta::new("production", "staging-proxy"))
            .rule(RouteRule::host("api.example.com").path(HttpPath::prefix("/staging", BackendRef::new("api-service", 8080).in_namespace("staging")))),
    );
    let harness = start(memory, RecordingEngine::new(), scope());

    let rejected = harness.status_of(&ObjectKey::new("production", "staging-proxy"), |status| status.has(Condition::is_rejected)).await;
    assert_eq!(condition_names(&rejected), vec!["Rejected:CrossNamespaceReference"]);
    // the rest of the namespace is unaffected
    harness.status_of(&ObjectKey::new("production", "api-ingress"), accepted).await;
    eventually(|| harness.engine.active()).await;

    let table = harness.snapshot.load();
    assert_eq!(table.len(), 1);
    assert!(table.entries().all(|(_, entry)| entry.backend.service.namespace == "production"));
    assert!(table.lookup("api.example.com", "/staging").is_none());
    let text = String::from_utf8(harness.engine.active().expect("active").bytes).expect("utf8");
    assert!(!text.contains("staging"));
    harness.stop().await;
}

#[tokio::test]
async fn test_same_names_in_different_namespaces() {
    let memory = Memory::default();
    for (ns, host) in [("team-a", "a.example.com"), ("team-b", "b.example.com")] {
        memory.apply_backend(backend(ns, "web", 80));
        memory.apply_route(RouteDeclaration::new(ObjectMeta::new(ns, "web")).rule(RouteRule::host(host).path(HttpPath::prefix("/", BackendRef::new("web", 80)))));
    }
    let harness = start(memory, RecordingEngine::new(), scope());
    harness.status_of(&ObjectKey::new("team-a", "web"), accepted).await;
    harness.status_of(&ObjectKey::new("team-b", "web"), accepted).await;
    let table = eventually(|| Some(harness.snapshot.load()).filter(|table| table.len() == 2)).await;
    assert_eq!(table.lookup("a.example.com", "/").map(|e| e.backend.service.namespace.as_str()), Some("team-a"));
    assert_eq!(table.lookup("b.example.com", "/").map(|e| e.backend.service.namespace.as_str()), Some("team-b"));
    harness.stop().await;
}

#[tokio::test]
async fn test_shadowed_path_goes_to_earliest() {
    let memory = Memory::default();
    memory.apply_backend(backend("team-a", "web", 80));
    memory.apply_backend(backend("team-b", "web", 80));
    memory.apply_route(
        RouteDeclaration::new(ObjectMeta::new("team-b", "web").created_at(at(200))).rule(RouteRule::host("app.example.com").path(HttpPath::prefix("/", BackendRef::new("web", 80)))),
    );
    memory.apply_route(
        RouteDeclaration::new(ObjectMeta::new("team-a", "web").created_at(at(100))).rule(
            RouteRule::host("app.example.com")
                .path(HttpPath::prefix("/", BackendRef::new("web", 80)))
                .path(HttpPath::prefix("/api", BackendRef::new("web", 80))),
        ),
    );
    let harness = start(memory, RecordingEngine::new(), scope());

    let team_b = harness.status_of(&ObjectKey::new("team-b", "web"), |status| status.has(|c| matches!(c, Condition::Shadowed { .. }))).await;
    assert!(accepted(&team_b));
    assert!(team_b.has(|c| c == &Condition::Shadowed { paths: vec!["app.example.com/".into()] }));
    let team_a = harness.status_of(&ObjectKey::new("team-a", "web"), accepted).await;
    assert_eq!(condition_names(&team_a), vec!["Accepted"]);

    let table = harness.snapshot.load();
    assert_eq!(table.lookup("app.example.com", "/").map(|e| e.owner.namespace.as_str()), Some("team-a"));
    assert_eq!(table.lookup("app.example.com", "/api/v1").map(|e| e.path.path.as_str()), Some("/api"));
    harness.stop().await;
}

#[tokio::test]
async fn test_added_modified_deleted() {
    let memory = Memory::default();
    memory.apply_backend(backend("production", "api-service", 8080));
    let mut harness = start(memory.clone(), RecordingEngine::new(), scope());
    let key = ObjectKey::new("production", "api-ingress");
    // the empty initial table is applied too
    harness.wait_state(|status| status.state == ReconcileState::Idle && status.applied_digest.is_some()).await;

    memory.apply_route(api_ingress(1, "/v1"));
    harness.status_of(&key, |status| accepted(status) && status.conditions[0].observed_generation == 1).await;
    eventually(|| harness.snapshot.load().lookup("api.example.com", "/v1").map(|_| ())).await;

    memory.apply_route(api_ingress(2, "/v2"));
    harness.status_of(&key, |status| status.conditions[0].observed_generation == 2).await;
    let table = eventually(|| Some(harness.snapshot.load()).filter(|table| table.lookup("api.example.com", "/v2").is_some())).await;
    assert!(table.lookup("api.example.com", "/v1").is_none());

    memory.delete_route(&key);
    let table = eventually(|| Some(harness.snapshot.load()).filter(|table| table.is_empty())).await;
    assert!(table.hosts().is_empty());
    let active = eventually(|| harness.engine.active().filter(|config| !String::from_utf8_lossy(&config.bytes).contains("api.example.com"))).await;
    assert!(!active.digest.is_empty());
    let reconciler = harness.stop().await;
    assert!(reconciler.objects().route(&key).is_none());
}

#[tokio::test]
async fn test_unchanged_table_does_not_reload() {
    let memory = Memory::default();
    memory.apply_backend(backend("production", "api-service", 8080));
    memory.apply_route(api_ingress(1, "/v1"));
    let harness = start(memory.clone(), RecordingEngine::new(), scope());
    let key = ObjectKey::new("production", "api-ingress");
    harness.status_of(&key, accepted).await;
    eventually(|| harness.engine.active()).await;
    let attempts = harness.engine.attempts();
    let version = harness.snapshot.load().version();

    // new generation, same routing
    memory.apply_route(api_ingress(2, "/v1"));
    harness.status_of(&key, |status| status.conditions[0].observed_generation == 2).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.engine.attempts(), attempts);
    assert_eq!(harness.snapshot.load().version(), version);
    harness.stop().await;
}

#[tokio::test]
async fn test_backend_arrival_revalidates_declaration() {
    let memory = Memory::default();
    memory.apply_route(api_ingress(1, "/v1"));
    let harness = start(memory.clone(), RecordingEngine::new(), scope());
    let key = ObjectKey::new("production", "api-ingress");
    let rejected = harness.status_of(&key, |status| status.has(Condition::is_rejected)).await;
    assert_eq!(condition_names(&rejected), vec!["Rejected:StructuralValidation"]);

    memory.apply_backend(backend("production", "api-service", 8080));
    harness.status_of(&key, accepted).await;
    eventually(|| harness.snapshot.load().lookup("api.example.com", "/v1").map(|_| ())).await;
    harness.stop().await;
}

#[tokio::test]
async fn test_scope_limits_namespaces() {
    let memory = Memory::default();
    memory.apply_backend(backend("production", "api-service", 8080));
    memory.apply_route(api_ingress(1, "/v1"));
    memory.apply_backend(backend("sandbox", "api-service", 8080));
    memory.apply_route(
        RouteDeclaration::new(ObjectMeta::new("sandbox", "api-ingress")).rule(RouteRule::host("sandbox.example.com").path(HttpPath::prefix("/", BackendRef::new("api-service", 8080)))),
    );
    let scope = ControllerScope {
        namespaces: NamespaceSelector::only(["production"]),
        ..scope()
    };
    let harness = start(memory.clone(), RecordingEngine::new(), scope);
    harness.status_of(&ObjectKey::new("production", "api-ingress"), accepted).await;
    eventually(|| harness.engine.active()).await;
    assert!(harness.snapshot.load().host("sandbox.example.com").is_none());
    assert!(memory.route_status(&ObjectKey::new("sandbox", "api-ingress")).is_none());
    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_reload_failures_back_off_and_keep_last_good() {
    let memory = Memory::default();
    memory.apply_backend(backend("production", "api-service", 8080));
    memory.apply_route(api_ingress(1, "/v1"));
    let engine = RecordingEngine::new();
    let mut harness = start(memory.clone(), engine.clone(), scope());
    let key = ObjectKey::new("production", "api-ingress");
    let good = harness.wait_state(|status| status.state == ReconcileState::Idle && status.applied_digest.is_some()).await;
    let good_digest = good.applied_digest.expect("applied");

    engine.fail_next(3);
    memory.apply_route(api_ingress(2, "/v2"));
    let mut delays = Vec::new();
    while delays.len() < 3 {
        let status = harness.wait_state(|status| status.state == ReconcileState::Backoff && status.reload_failures as usize > delays.len()).await;
        delays.push(status.retry_in.expect("retry delay"));
        // the broken configuration never replaces the good one
        assert_eq!(status.applied_digest.as_deref(), Some(good_digest.as_str()));
        assert_eq!(engine.active().map(|config| config.digest), Some(good_digest.clone()));
    }
    assert_eq!(delays, vec![Duration::from_millis(100), Duration::from_millis(200), Duration::from_millis(250)]);
    let failed = harness.status_of(&key, |status| status.has(|c| matches!(c, Condition::ReloadFailed { .. }))).await;
    assert!(accepted(&failed));

    let recovered = harness.wait_state(|status| status.state == ReconcileState::Idle && status.reload_failures == 0).await;
    assert_ne!(recovered.applied_digest.as_deref(), Some(good_digest.as_str()));
    assert_eq!(engine.attempts(), 5);
    let cleared = harness.status_of(&key, |status| !status.has(|c| matches!(c, Condition::ReloadFailed { .. }))).await;
    assert_eq!(condition_names(&cleared), vec!["Accepted"]);
    harness.stop().await;
}

#[tokio::test]
async fn test_disconnect_resyncs_into_same_table() {
    let memory = Memory::default();
    memory.apply_backend(backend("production", "api-service", 8080));
    memory.apply_route(api_ingress(1, "/v1"));
    let mut harness = start(memory.clone(), RecordingEngine::new(), scope());
    harness.wait_state(|status| status.state == ReconcileState::Idle && status.applied_digest.is_some()).await;

    // missed while disconnected
    memory.apply_silently(Resource::Route(api_ingress(2, "/v2")));
    memory.disconnect_watchers();
    let table = eventually(|| Some(harness.snapshot.load()).filter(|table| table.lookup("api.example.com", "/v2").is_some())).await;
    assert!(table.lookup("api.example.com", "/v1").is_none());
    harness.wait_state(|status| status.state == ReconcileState::Idle).await;
    harness.stop().await;
}

/// Engine taking a while to reload.
#[derive(Debug, Clone)]
struct SlowEngine {
    inner: RecordingEngine,
    delay: Duration,
}

impl ProxyEngine for SlowEngine {
    async fn apply(&self, config: &RenderedConfig) -> Result<(), ReloadError> {
        tokio::time::sleep(self.delay).await;
        self.inner.apply(config).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_completes_inflight_apply() {
    let memory = Memory::default();
    memory.apply_backend(backend("production", "api-service", 8080));
    memory.apply_route(api_ingress(1, "/v1"));
    let recording = RecordingEngine::new();
    let engine = SlowEngine {
        inner: recording.clone(),
        delay: Duration::from_secs(5),
    };
    let mut harness = start(memory, engine, scope());
    harness.wait_state(|status| status.state == ReconcileState::Applying).await;
    let reconciler = harness.stop().await;
    assert_eq!(recording.applied().len(), 1);
    assert_eq!(reconciler.state(), ReconcileState::Idle);
    assert!(reconciler.programmer().last_applied_digest().is_some());
}
