use k8s_openapi::NamespaceResourceScope;
use nsgate_model::{ControllerScope, NamespaceSelector};

pub mod convert;
pub mod listen;
pub mod retrieve;
pub mod update;

/// Kubernetes store: `networking.k8s.io/v1 Ingress` and `v1 Service`.
pub struct K8s {
    client: kube::Client,
}

impl K8s {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    pub async fn with_default_client() -> Result<Self, kube::Error> {
        Ok(Self {
            client: kube::Client::try_default().await?,
        })
    }

    pub fn get_namespace_api<T: kube::Resource<Scope = NamespaceResourceScope>>(&self, namespace: &str) -> kube::Api<T>
    where
        <T as kube::Resource>::DynamicType: Default,
    {
        kube::Api::namespaced(self.client.clone(), namespace)
    }

    /// One cluster-wide api when every namespace is watched, one api per allowed namespace otherwise.
    ///
    /// Each api is paired with the namespace it is limited to.
    pub fn get_scoped_apis<T: kube::Resource<Scope = NamespaceResourceScope>>(&self, scope: &ControllerScope) -> Vec<(Option<String>, kube::Api<T>)>
    where
        <T as kube::Resource>::DynamicType: Default,
    {
        match &scope.namespaces {
            NamespaceSelector::All => vec![(None, kube::Api::all(self.client.clone()))],
            NamespaceSelector::Only(namespaces) => namespaces.iter().map(|ns| (Some(ns.clone()), self.get_namespace_api(ns))).collect(),
        }
    }
}
