use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use nsgate_kernel::{
    dataplane::{FileEngine, FileEngineConfig, ProgramOutcome, Programmer, ProxyConfig, RecordingEngine, RenderFormat},
    RouteTableBuilder, Validator,
};
use nsgate_model::*;

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(secs, 0).expect("valid timestamp")
}

fn backends(items: impl IntoIterator<Item = BackendTarget>) -> BTreeMap<ObjectKey, BackendTarget> {
    items.into_iter().map(|backend| (backend.key(), backend)).collect()
}

fn service(ns: &str, name: &str, port: u16) -> BackendTarget {
    BackendTarget::new(ObjectMeta::new(ns, name)).port(port)
}

#[test]
fn test_cross_namespace_declaration_never_reaches_table() {
    let backends = backends([service("production", "api-service", 8080), service("staging", "api-service", 8080)]);
    let legit = RouteDeclaration::new(ObjectMeta::new("production", "api-ingress"))
        .rule(RouteRule::host("api.example.com").path(HttpPath::prefix("/v1", BackendRef::new("api-service", 8080))));
    let sneaky = RouteDeclaration::new(ObjectMeta::new("production", "sneaky"))
        .rule(RouteRule::host("api.example.com").path(HttpPath::prefix("/v2", BackendRef::new("api-service", 8080).in_namespace("staging"))));

    let validator = Validator::new();
    let mut builder = RouteTableBuilder::new();
    builder.upsert(validator.validate(&legit, &backends).expect("legit declaration"));
    let error = validator.validate(&sneaky, &backends).expect_err("cross namespace reference");
    assert_eq!(Condition::rejected(&error).to_string(), "Rejected:CrossNamespaceReference");

    let table = builder.build();
    assert_eq!(table.len(), 1);
    assert!(table.entries().all(|(_, entry)| entry.backend.service.namespace == "production"));
    assert!(table.lookup("api.example.com", "/v2/users").is_none());
}

#[test]
fn test_same_names_in_different_namespaces() {
    let backends = backends([service("team-a", "web", 80), service("team-b", "web", 80)]);
    let validator = Validator::new();
    let mut builder = RouteTableBuilder::new();
    for (ns, host) in [("team-a", "a.example.com"), ("team-b", "b.example.com")] {
        let route = RouteDeclaration::new(ObjectMeta::new(ns, "web")).rule(RouteRule::host(host).path(HttpPath::prefix("/", BackendRef::new("web", 80))));
        builder.upsert(validator.validate(&route, &backends).expect("valid"));
    }
    let table = builder.build();
    assert_eq!(table.lookup("a.example.com", "/").map(|e| e.backend.service.namespace.as_str()), Some("team-a"));
    assert_eq!(table.lookup("b.example.com", "/").map(|e| e.backend.service.namespace.as_str()), Some("team-b"));
    assert_eq!(table.owners().len(), 2);
}

#[test]
fn test_longest_prefix_then_earliest() {
    let backends = backends([service("a", "short", 80), service("a", "long", 80), service("b", "late", 80)]);
    let validator = Validator::new();
    let mut builder = RouteTableBuilder::new();
    let first = RouteDeclaration::new(ObjectMeta::new("a", "first").created_at(at(10))).rule(
        RouteRule::host("shop.example.com")
            .path(HttpPath::prefix("/", BackendRef::new("short", 80)))
            .path(HttpPath::prefix("/cart", BackendRef::new("long", 80))),
    );
    let late = RouteDeclaration::new(ObjectMeta::new("b", "late").created_at(at(20))).rule(RouteRule::host("shop.example.com").path(HttpPath::prefix("/cart", BackendRef::new("late", 80))));
    builder.upsert(validator.validate(&late, &backends).expect("valid"));
    builder.upsert(validator.validate(&first, &backends).expect("valid"));
    let table = builder.build();

    assert_eq!(table.lookup("shop.example.com", "/cart/items").map(|e| e.backend.service.name.as_str()), Some("long"));
    assert_eq!(table.lookup("shop.example.com", "/cartoon").map(|e| e.backend.service.name.as_str()), Some("short"));
    assert_eq!(table.shadowed_paths(&ObjectKey::new("b", "late")), vec!["shop.example.com/cart".to_string()]);
}

#[test]
fn test_trailing_slash_declares_the_same_prefix() {
    let backends = backends([service("a", "first", 80), service("b", "second", 80)]);
    let validator = Validator::new();
    let mut builder = RouteTableBuilder::new();
    let first = RouteDeclaration::new(ObjectMeta::new("a", "first").created_at(at(10))).rule(RouteRule::host("api.example.com").path(HttpPath::prefix("/v1", BackendRef::new("first", 80))));
    let second = RouteDeclaration::new(ObjectMeta::new("b", "second").created_at(at(20))).rule(RouteRule::host("api.example.com").path(HttpPath::prefix("/v1/", BackendRef::new("second", 80))));
    builder.upsert(validator.validate(&second, &backends).expect("valid"));
    builder.upsert(validator.validate(&first, &backends).expect("valid"));
    let table = builder.build();

    assert_eq!(table.len(), 1);
    assert_eq!(table.lookup("api.example.com", "/v1/users").map(|e| e.backend.service.name.as_str()), Some("first"));
    assert_eq!(table.shadowed_paths(&ObjectKey::new("b", "second")), vec!["api.example.com/v1".to_string()]);
}

#[test]
fn test_upstream_names_stay_apart_across_namespaces() {
    let backends = backends([
        service("team-a", "web", 80).endpoint([10, 0, 0, 1].into()),
        service("team", "a-web", 80).endpoint([10, 9, 9, 9].into()),
    ]);
    let validator = Validator::new();
    let mut builder = RouteTableBuilder::new();
    for (ns, name, host) in [("team-a", "web", "a.example.com"), ("team", "a-web", "b.example.com")] {
        let route = RouteDeclaration::new(ObjectMeta::new(ns, name)).rule(RouteRule::host(host).path(HttpPath::prefix("/", BackendRef::new(name, 80))));
        builder.upsert(validator.validate(&route, &backends).expect("valid"));
    }
    let config = ProxyConfig::from_table(&builder.build(), constants::DEFAULT_CLUSTER_DOMAIN);

    assert_eq!(config.upstreams.len(), 2);
    let upstream_of = |host: &str| {
        let server = config.servers.iter().find(|s| s.host == host).expect("server");
        let name = &server.locations[0].upstream;
        config.upstreams.iter().find(|u| &u.name == name).expect("upstream").servers.clone()
    };
    assert_eq!(upstream_of("a.example.com"), vec!["10.0.0.1:80".to_string()]);
    assert_eq!(upstream_of("b.example.com"), vec!["10.9.9.9:80".to_string()]);
}

#[test]
fn test_exact_host_server_inherits_wildcard_paths() {
    let backends = backends([service("a", "site", 80), service("b", "api", 80)]);
    let validator = Validator::new();
    let mut builder = RouteTableBuilder::new();
    let site = RouteDeclaration::new(ObjectMeta::new("a", "site")).rule(RouteRule::host("*.example.com").path(HttpPath::prefix("/", BackendRef::new("site", 80))));
    let api = RouteDeclaration::new(ObjectMeta::new("b", "api")).rule(RouteRule::host("api.example.com").path(HttpPath::prefix("/v1", BackendRef::new("api", 80))));
    builder.upsert(validator.validate(&site, &backends).expect("valid"));
    builder.upsert(validator.validate(&api, &backends).expect("valid"));
    let table = builder.build();
    assert_eq!(table.lookup("api.example.com", "/about").map(|e| e.backend.service.name.as_str()), Some("site"));

    let config = ProxyConfig::from_table(&table, constants::DEFAULT_CLUSTER_DOMAIN);
    let server = config.servers.iter().find(|s| s.host == "api.example.com").expect("server");
    let paths: Vec<(&str, &str)> = server.locations.iter().map(|l| (l.path.as_str(), l.upstream.as_str())).collect();
    assert_eq!(paths, vec![("/v1", "b.api.80"), ("/", "a.site.80")]);
}

#[tokio::test]
async fn test_program_from_validated_declarations() {
    let backends = backends([service("production", "api-service", 8080)]);
    let route = RouteDeclaration::new(ObjectMeta::new("production", "api-ingress"))
        .rule(RouteRule::host("api.example.com").path(HttpPath::prefix("/v1", BackendRef::new("api-service", 8080))))
        .tls(TlsRef::new("api-tls"));
    let mut builder = RouteTableBuilder::new();
    builder.upsert(Validator::new().validate(&route, &backends).expect("valid"));
    let table = builder.build();

    let engine = RecordingEngine::new();
    let mut programmer = Programmer::new(engine.clone(), RenderFormat::Nginx, constants::DEFAULT_CLUSTER_DOMAIN);
    let ProgramOutcome::Applied { digest } = programmer.program(&table).await.expect("program") else {
        panic!("expect applied")
    };
    let active = engine.active().expect("active config");
    assert_eq!(active.digest, digest);
    let text = String::from_utf8(active.bytes).expect("utf8");
    assert!(text.contains("server_name api.example.com;"));
    assert!(text.contains("ssl_certificate \"/etc/nsgate/tls/production/api-tls.crt\";"));
    assert!(text.contains("server api-service.production.svc.cluster.local:8080;"));

    // an unchanged rebuild does not reach the engine
    let again = builder.build();
    assert_eq!(programmer.program(&again).await, Ok(ProgramOutcome::Unchanged));
    assert_eq!(engine.attempts(), 1);
}

#[tokio::test]
async fn test_file_engine_with_programmer() {
    let dir = std::env::temp_dir().join(format!("nsgate-pipeline-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    let path = dir.join("conf.d").join("nsgate.json");
    let engine = FileEngine::new(FileEngineConfig {
        config_path: path.clone(),
        ..Default::default()
    });
    let mut programmer = Programmer::new(engine, RenderFormat::Json, constants::DEFAULT_CLUSTER_DOMAIN);
    let mut builder = RouteTableBuilder::new();
    let backends = backends([service("a", "web", 80)]);
    let route = RouteDeclaration::new(ObjectMeta::new("a", "web")).rule(RouteRule::any_host().path(HttpPath::prefix("/", BackendRef::new("web", 80))));
    builder.upsert(Validator::new().validate(&route, &backends).expect("valid"));
    programmer.program(&builder.build()).await.expect("program");

    let written: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).expect("config written")).expect("json");
    assert_eq!(written["servers"][0]["host"], "*");
    assert_eq!(written["upstreams"][0]["name"], "a.web.80");
    let _ = std::fs::remove_dir_all(&dir);
}
