#![warn(clippy::indexing_slicing, clippy::unwrap_used, clippy::dbg_macro, clippy::undocumented_unsafe_blocks)]
//! This crate is aim to observe the route declarations and backend targets of a cluster with various backends.

/// re-export nsgate_model
pub use nsgate_model as model;
/// Resource store backends and services traits
pub mod service;
/// Resource Watch Layer
pub mod watch;

pub mod backoff;

pub use model::*;
