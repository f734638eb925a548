//! Error types for the prerender pipeline.
//!
//! Library crates use [`PrerenderError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

use crate::types::RenderStage;

/// Top-level error type for all prerender operations.
#[derive(Debug, thiserror::Error)]
pub enum PrerenderError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// A route string that cannot be used as a registry entry.
    #[error("invalid route {route:?}: {message}")]
    Route { route: String, message: String },

    /// The build's template document is missing or unusable.
    #[error("template error: {message}")]
    Template { message: String },

    /// Static file server could not be started.
    #[error("server error: {0}")]
    Server(String),

    /// Every candidate port was already taken.
    #[error("no free port in {first}..={last}")]
    PortExhausted { first: u16, last: u16 },

    /// Browser launch or protocol error.
    #[error("browser error: {0}")]
    Browser(String),

    /// A single route failed somewhere between navigation and write.
    #[error("{stage} failed for {route}: {message}")]
    Render {
        route: String,
        stage: RenderStage,
        message: String,
    },

    /// A bounded wait elapsed.
    #[error("timed out after {elapsed_ms}ms waiting for {what}")]
    Timeout { what: String, elapsed_ms: u64 },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PrerenderError>;

impl PrerenderError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a route validation error.
    pub fn route(route: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Route {
            route: route.into(),
            message: msg.into(),
        }
    }

    /// Create a template error from any displayable message.
    pub fn template(msg: impl Into<String>) -> Self {
        Self::Template {
            message: msg.into(),
        }
    }

    /// Create a per-route failure tagged with the stage it happened in.
    pub fn render(route: impl Into<String>, stage: RenderStage, msg: impl Into<String>) -> Self {
        Self::Render {
            route: route.into(),
            stage,
            message: msg.into(),
        }
    }

    /// Create a timeout error for a named wait.
    pub fn timeout(what: impl Into<String>, elapsed: std::time::Duration) -> Self {
        Self::Timeout {
            what: what.into(),
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// The pipeline stage this error belongs to, when it is route-scoped.
    pub fn stage(&self) -> Option<RenderStage> {
        match self {
            Self::Render { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
