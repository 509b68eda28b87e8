//! # nsgate kernel crate.
//!
//! Pure routing logic of the controller: namespace-scoped validation, the
//! route table built from accepted declarations, and programming of the
//! reverse proxy from a route table snapshot.

#![deny(clippy::unwrap_used, clippy::dbg_macro, clippy::unimplemented, clippy::todo, clippy::missing_safety_doc)]
#![warn(clippy::indexing_slicing, clippy::inline_always, clippy::fn_params_excessive_bools, missing_debug_implementations)]
/// reverse proxy configuration and reloads
pub mod dataplane;
/// wildcard aware hostname lookup
pub mod hostname;
/// route table snapshots and the incremental builder
pub mod table;
/// namespace-scoped validation
pub mod validate;

pub use dataplane::{ProgramOutcome, Programmer, ProxyEngine};
pub use nsgate_model::{BoxError, BoxResult};
pub use table::{RouteTable, RouteTableBuilder, SnapshotCell};
pub use validate::{BackendLookup, ValidatedRoute, Validator};
