#![forbid(unsafe_code)]

//! Structured logging, compiled away without the `tracing` feature.
//!
//! Internal call sites use these re-exports unconditionally; with the
//! feature disabled every invocation expands to nothing, so the crate
//! carries no logging dependency by default.

#[cfg(feature = "tracing")]
pub(crate) use tracing::{debug, trace, warn};

#[cfg(not(feature = "tracing"))]
macro_rules! trace {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
macro_rules! debug {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
macro_rules! noop_warn {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
pub(crate) use {debug, noop_warn as warn, trace};
