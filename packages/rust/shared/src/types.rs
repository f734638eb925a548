//! Core domain types shared by the prerender crates.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PrerenderError, Result};

// ---------------------------------------------------------------------------
// Route
// ---------------------------------------------------------------------------

/// A normalized URL path the client application renders a distinct view for.
///
/// Always starts with `/`, never ends with `/` (except the root route), and
/// contains no query, fragment, dot segments, router placeholders, or stray
/// `%` characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Route(String);

impl Route {
    /// The root route, `/`.
    pub fn root() -> Self {
        Self("/".into())
    }

    /// Parse and normalize a route string.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if !trimmed.starts_with('/') {
            return Err(PrerenderError::route(raw, "must start with '/'"));
        }
        if trimmed.contains(['?', '#']) {
            return Err(PrerenderError::route(
                raw,
                "query strings and fragments are not part of a route",
            ));
        }

        let mut segments = Vec::new();
        for segment in trimmed.split('/').filter(|s| !s.is_empty()) {
            if segment == "." || segment == ".." {
                return Err(PrerenderError::route(raw, "dot segments are not allowed"));
            }
            if segment.starts_with(':') || segment.contains('*') {
                return Err(PrerenderError::route(
                    raw,
                    "dynamic router patterns cannot be prerendered",
                ));
            }
            if segment.contains('\\') {
                return Err(PrerenderError::route(raw, "backslashes are not allowed"));
            }
            if !has_valid_escapes(segment) {
                return Err(PrerenderError::route(
                    raw,
                    "'%' must start a percent-encoded byte such as %20",
                ));
            }
            segments.push(segment);
        }

        Ok(Self(format!("/{}", segments.join("/"))))
    }

    /// Whether this is the root route `/`.
    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Path segments without the leading slash (empty for the root route).
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Every `%` is followed by two hex digits.
fn has_valid_escapes(segment: &str) -> bool {
    let bytes = segment.as_bytes();
    bytes.iter().enumerate().all(|(i, &b)| {
        b != b'%'
            || bytes
                .get(i + 1..i + 3)
                .is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit))
    })
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Route {
    type Err = PrerenderError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Route {
    type Error = PrerenderError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Route> for String {
    fn from(route: Route) -> Self {
        route.0
    }
}

// ---------------------------------------------------------------------------
// RenderResult
// ---------------------------------------------------------------------------

/// What the browser observed for one route after client rendering settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderResult {
    /// Serialized inner HTML of the mount node.
    pub root_markup: String,
    /// Serialized head children contributed at runtime, already filtered.
    pub head_markup: String,
}

// ---------------------------------------------------------------------------
// RenderStage
// ---------------------------------------------------------------------------

/// The step of a route's render-and-write cycle where it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderStage {
    /// Navigation or network-idle wait.
    Navigate,
    /// Waiting for the mount node to appear.
    MountNode,
    /// Waiting for the mount node to receive content.
    Content,
    /// Reading markup back out of the page.
    Extract,
    /// Rewriting the template or writing the output file.
    Write,
}

impl std::fmt::Display for RenderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Navigate => "navigate",
            Self::MountNode => "mount node",
            Self::Content => "content",
            Self::Extract => "extract",
            Self::Write => "write",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// OutputDocument
// ---------------------------------------------------------------------------

/// A snapshot written to disk for one route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputDocument {
    /// Route the snapshot belongs to.
    pub route: Route,
    /// Absolute path of the written file.
    pub path: PathBuf,
    /// SHA-256 hex digest of the written bytes.
    pub sha256: String,
    /// Size of the written file in bytes.
    pub size_bytes: usize,
}

// ---------------------------------------------------------------------------
// Batch report
// ---------------------------------------------------------------------------

/// Outcome of one route's render-and-write cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RouteOutcome {
    /// The snapshot was written.
    Rendered { document: OutputDocument },
    /// The route was skipped; any previous snapshot is left untouched.
    Failed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stage: Option<RenderStage>,
        error: String,
    },
}

/// Per-route entry of a [`PrerenderReport`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteReport {
    pub route: Route,
    #[serde(flatten)]
    pub outcome: RouteOutcome,
    pub elapsed_ms: u64,
}

impl RouteReport {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, RouteOutcome::Rendered { .. })
    }
}

/// Summary of a whole prerender batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrerenderReport {
    /// Time-sortable identifier of this run.
    pub run_id: Uuid,
    /// When the batch started.
    pub started_at: DateTime<Utc>,
    /// Port the static server ended up bound to.
    pub port: u16,
    /// Total batch duration.
    pub elapsed_ms: u64,
    /// One entry per registry route, in registry order.
    pub routes: Vec<RouteReport>,
}

impl PrerenderReport {
    /// Routes whose snapshot was written.
    pub fn succeeded(&self) -> impl Iterator<Item = &RouteReport> {
        self.routes.iter().filter(|r| r.is_success())
    }

    /// Routes that were skipped.
    pub fn failed(&self) -> impl Iterator<Item = &RouteReport> {
        self.routes.iter().filter(|r| !r.is_success())
    }

    pub fn has_failures(&self) -> bool {
        self.failed().next().is_some()
    }
}
