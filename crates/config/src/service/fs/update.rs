use nsgate_model::{BoxError, ObjectKey, ResourceId, RouteStatus};

use super::Fs;
use crate::service::{config_format::ConfigFormat, UpdateStatus};

impl<F> UpdateStatus for Fs<F>
where
    F: ConfigFormat + Send + Sync,
{
    async fn update_route_status(&self, key: &ObjectKey, status: &RouteStatus) -> Result<(), BoxError> {
        if !tokio::fs::try_exists(self.resource_path(&ResourceId::route(key.clone()))).await? {
            return Err(format!("[NG.Config] route {key} not found, status not written").into());
        }
        let bytes = self.format.ser(status)?;
        self.write_atomic(&self.status_path(key), &bytes).await
    }
}
