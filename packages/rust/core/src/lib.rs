//! Batch orchestration for the prerender pipeline.
//!
//! This crate ties the route registry, static server, browser driver and
//! snapshot writer together into one run (`run_prerender`).

pub mod pipeline;
pub mod routes;

pub use pipeline::{ProgressReporter, SilentProgress, run_prerender, write_report};
pub use routes::{ResolvedRoutes, resolve_routes};
