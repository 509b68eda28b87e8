//! Data model shared by every nsgate crate.
//!
//! Everything here is namespace-scoped: an object is identified by [`ObjectKey`],
//! i.e. by its namespace *and* name, so two objects may share a name as long as
//! they live in different namespaces.
use std::fmt::Debug;

pub mod meta;
pub use meta::*;

pub mod route;
pub use route::*;

pub mod backend;
pub use backend::*;

pub mod resource;
pub use resource::*;

pub mod scope;
pub use scope::*;

pub mod status;
pub use status::*;

pub mod error;
pub use error::*;

pub mod constants;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
pub type BoxResult<T> = Result<T, BoxError>;

/// A full listing of the resources a store holds for a scope.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ResourceList {
    pub routes: Vec<RouteDeclaration>,
    pub backends: Vec<BackendTarget>,
}

impl ResourceList {
    pub fn into_resources(self) -> impl Iterator<Item = Resource> {
        self.routes.into_iter().map(Resource::Route).chain(self.backends.into_iter().map(Resource::Backend))
    }
    pub fn resources_of(self, kind: ResourceKind) -> Vec<Resource> {
        match kind {
            ResourceKind::Route => self.routes.into_iter().map(Resource::Route).collect(),
            ResourceKind::Backend => self.backends.into_iter().map(Resource::Backend).collect(),
        }
    }
}
