//! Shared types, error model, and configuration for the prerender pipeline.
//!
//! This crate is the foundation depended on by all other prerender crates.
//! It provides:
//! - [`PrerenderError`] — the unified error type
//! - Domain types ([`Route`], [`RenderResult`], [`OutputDocument`], [`PrerenderReport`])
//! - Configuration ([`AppConfig`], [`PrerenderConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BrowserConfig, BuildConfig, CONFIG_FILE_NAME, PrerenderConfig, RenderTimings,
    ServerConfig, TimingConfig, init_config, load_config, load_config_from,
};
pub use error::{PrerenderError, Result};
pub use types::{
    OutputDocument, PrerenderReport, RenderResult, RenderStage, Route, RouteOutcome, RouteReport,
};
