use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Patch, PatchParams};
use nsgate_model::{constants, BoxResult, ObjectKey, RouteStatus};

use super::K8s;
use crate::service::UpdateStatus;

impl UpdateStatus for K8s {
    /// Conditions are stored as JSON in an annotation of the Ingress. Annotations
    /// do not bump the generation, so the write does not echo back as a change.
    async fn update_route_status(&self, key: &ObjectKey, status: &RouteStatus) -> BoxResult<()> {
        let api = self.get_namespace_api::<Ingress>(&key.namespace);
        let patch = serde_json::json!({
            "metadata": {
                "annotations": {
                    (constants::ANNOTATION_STATUS): serde_json::to_string(status)?,
                }
            }
        });
        api.patch(&key.name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
        Ok(())
    }
}
