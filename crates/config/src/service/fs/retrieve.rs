use nsgate_model::{BackendTarget, BoxError, ControllerScope, Resource, ResourceKind, RouteDeclaration};

use super::Fs;
use crate::service::{config_format::ConfigFormat, Retrieve};

impl<F> Retrieve for Fs<F>
where
    F: ConfigFormat + Send + Sync,
{
    async fn list_routes(&self, scope: &ControllerScope) -> Result<Vec<RouteDeclaration>, BoxError> {
        Ok(self
            .list_kind(scope, ResourceKind::Route)
            .await?
            .into_iter()
            .filter_map(|resource| match resource {
                Resource::Route(route) => Some(route),
                Resource::Backend(_) => None,
            })
            .collect())
    }

    async fn list_backends(&self, scope: &ControllerScope) -> Result<Vec<BackendTarget>, BoxError> {
        Ok(self
            .list_kind(scope, ResourceKind::Backend)
            .await?
            .into_iter()
            .filter_map(|resource| match resource {
                Resource::Backend(backend) => Some(backend),
                Resource::Route(_) => None,
            })
            .collect())
    }
}
