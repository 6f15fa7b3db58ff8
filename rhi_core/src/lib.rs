//! Backend-agnostic resource state tracking, descriptor binding and command queue execution
//! tracking.
//!
//! The crate implements the policy layer of a rendering hardware interface: it decides which
//! barriers are required when resources change state or queue ownership, reserves descriptor
//! ranges for program bindings and replays their root parameters on every draw, and tracks the
//! completion of submitted command lists on a dedicated thread per queue. Native API calls are
//! delegated to a [`backend`] adapter.

#![deny(unsafe_op_in_unsafe_fn)]
#![deny(unused_crate_dependencies)]

pub mod backend;
pub mod command;
pub mod config;
pub mod context;
pub mod descriptor;
pub mod program;
pub mod query;
pub mod range_set;
pub mod resource;
pub mod subresource;

mod error;

pub use error::{Error, Result};
