//! Tracing helpers shared by the RHI crates.
//!
//! [`trace_span!`] creates scoped spans around hot paths. Spans are only emitted when the
//! `spans` feature is enabled, otherwise they compile down to a zero-sized value.
//!
//! [`init`] installs the console [`Logger`] as the global default subscriber.

pub mod logger;
pub mod span;

pub use logger::{init, Logger};
pub use span::{EnteredSpan, Span};
