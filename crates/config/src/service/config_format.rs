use std::ffi::OsStr;

use crate::BoxError;

mod json;
mod toml;
pub use json::Json;
pub use toml::Toml;

/// Serialization format of files read or written by a store.
pub trait ConfigFormat {
    fn extension(&self) -> &OsStr;
    fn de<T: serde::de::DeserializeOwned>(&self, slice: &[u8]) -> Result<T, BoxError>;
    fn ser<T: serde::Serialize>(&self, t: &T) -> Result<Vec<u8>, BoxError>;
}
