//! Conversion between Kubernetes objects and the nsgate model.
//!
//! Kubernetes references are always local, so a namespace tag is spelled inside
//! the name: `service.namespace` for a backend (service names cannot contain
//! dots) and `namespace/secret` for a TLS secret. The validator rejects them.
use k8s_openapi::{
    api::{
        core::v1::Service,
        networking::v1::{HTTPIngressPath, Ingress, IngressBackend, IngressTLS},
    },
    apimachinery::pkg::apis::meta::v1::ObjectMeta as K8sObjectMeta,
};
use kube::ResourceExt;
use nsgate_model::{
    constants, BackendRef, BackendTarget, HttpPath, ObjectMeta, PathType, PortRef, RouteDeclaration, RouteRule, ServicePort, TlsRef,
};

fn convert_meta(meta: &K8sObjectMeta, generation: Option<i64>) -> Option<ObjectMeta> {
    let namespace = meta.namespace.clone()?;
    let name = meta.name.clone()?;
    Some(ObjectMeta {
        uid: meta.uid.clone().unwrap_or_else(|| format!("{namespace}/{name}")),
        namespace,
        name,
        generation: generation.unwrap_or_default(),
        creation_timestamp: meta.creation_timestamp.as_ref().map(|t| t.0).unwrap_or_default(),
    })
}

pub trait IngressConv {
    /// `None` for an object without namespace or name.
    fn to_route_declaration(&self) -> Option<RouteDeclaration>;
}

impl IngressConv for Ingress {
    fn to_route_declaration(&self) -> Option<RouteDeclaration> {
        let meta = convert_meta(&self.metadata, self.metadata.generation)?;
        let spec = self.spec.clone().unwrap_or_default();
        let ingress_class = spec.ingress_class_name.clone().or_else(|| self.annotations().get(constants::ANNOTATION_INGRESS_CLASS).cloned());
        let rules = spec
            .rules
            .unwrap_or_default()
            .into_iter()
            .map(|rule| RouteRule {
                host: rule.host,
                paths: rule.http.map(|http| http.paths.into_iter().map(convert_path).collect()).unwrap_or_default(),
            })
            .collect();
        Some(RouteDeclaration {
            meta,
            ingress_class,
            rules,
            default_backend: spec.default_backend.map(convert_backend),
            tls: spec.tls.unwrap_or_default().into_iter().filter_map(convert_tls).collect(),
        })
    }
}

fn convert_path(path: HTTPIngressPath) -> HttpPath {
    let path_type = match path.path_type.as_str() {
        "Exact" => PathType::Exact,
        // ImplementationSpecific is treated as Prefix
        _ => PathType::Prefix,
    };
    HttpPath {
        path: path.path.unwrap_or_else(|| constants::DEFAULT_PATH.to_string()),
        path_type,
        backend: convert_backend(path.backend),
    }
}

fn convert_backend(backend: IngressBackend) -> BackendRef {
    let Some(service) = backend.service else {
        // resource backends are not supported, an empty name is rejected downstream
        return BackendRef::new("", 0);
    };
    let port = match service.port {
        Some(port) => match (port.number, port.name) {
            (Some(number), _) => u16::try_from(number).map(PortRef::Number).unwrap_or_else(|_| PortRef::Name(number.to_string())),
            (None, Some(name)) => PortRef::Name(name),
            (None, None) => PortRef::Name(String::new()),
        },
        None => PortRef::Name(String::new()),
    };
    match service.name.split_once('.') {
        Some((name, namespace)) => BackendRef::new(name, port).in_namespace(namespace),
        None => BackendRef::new(service.name, port),
    }
}

fn convert_tls(tls: IngressTLS) -> Option<TlsRef> {
    let secret_name = tls.secret_name?;
    let tls_ref = match secret_name.split_once('/') {
        Some((namespace, secret)) => TlsRef::new(secret).in_namespace(namespace),
        None => TlsRef::new(secret_name),
    };
    Some(TlsRef {
        hosts: tls.hosts.unwrap_or_default(),
        ..tls_ref
    })
}

pub trait ServiceConv {
    fn to_backend_target(&self) -> Option<BackendTarget>;
}

impl ServiceConv for Service {
    fn to_backend_target(&self) -> Option<BackendTarget> {
        // services carry no generation, the resource version is numeric in practice
        let generation = self.metadata.resource_version.as_deref().and_then(|v| v.parse::<i64>().ok());
        let meta = convert_meta(&self.metadata, generation)?;
        let spec = self.spec.clone().unwrap_or_default();
        let ports = spec
            .ports
            .unwrap_or_default()
            .into_iter()
            .filter_map(|p| {
                Some(ServicePort {
                    name: p.name,
                    port: u16::try_from(p.port).ok()?,
                })
            })
            .collect();
        let endpoints = spec.cluster_ips.or_else(|| spec.cluster_ip.map(|ip| vec![ip])).unwrap_or_default().into_iter().filter_map(|ip| ip.parse().ok()).collect();
        Some(BackendTarget { meta, ports, endpoints })
    }
}
