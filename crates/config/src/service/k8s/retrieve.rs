use k8s_openapi::api::{core::v1::Service, networking::v1::Ingress};
use kube::api::ListParams;
use nsgate_model::{BackendTarget, BoxError, ControllerScope, RouteDeclaration};

use super::{
    convert::{IngressConv as _, ServiceConv as _},
    K8s,
};
use crate::service::Retrieve;

impl Retrieve for K8s {
    async fn list_routes(&self, scope: &ControllerScope) -> Result<Vec<RouteDeclaration>, BoxError> {
        let mut routes = Vec::new();
        for (_, api) in self.get_scoped_apis::<Ingress>(scope) {
            let list = api.list(&ListParams::default()).await?;
            routes.extend(list.items.iter().filter_map(Ingress::to_route_declaration).filter(|route| scope.selects(&route.meta.namespace)));
        }
        Ok(routes)
    }

    async fn list_backends(&self, scope: &ControllerScope) -> Result<Vec<BackendTarget>, BoxError> {
        let mut backends = Vec::new();
        for (_, api) in self.get_scoped_apis::<Service>(scope) {
            let list = api.list(&ListParams::default()).await?;
            backends.extend(list.items.iter().filter_map(Service::to_backend_target).filter(|backend| scope.selects(&backend.meta.namespace)));
        }
        Ok(backends)
    }
}
