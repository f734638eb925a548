//! Route derivation from the client router's own configuration source.
//!
//! Recognizes the path declarations client routers are written with:
//! - JSX props: `<Route path="/plumbing" element={...} />`, `path={"/blog"}`
//! - Route objects: `{ path: '/services/tv-mounting', element: ... }`
//!
//! Only absolute static paths can be prerendered. Dynamic (`:slug`), wildcard
//! (`*`) and relative (nested child) paths are reported as skipped.

use std::path::Path;
use std::sync::LazyLock;

use prerender_shared::{PrerenderError, Result, Route};
use regex::Regex;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Routes found in a router source file.
#[derive(Debug, Clone, Default)]
pub struct RouterRoutes {
    /// Static routes, in source order, deduplicated.
    pub routes: Vec<Route>,
    /// Declarations that could not become a registry entry.
    pub skipped: Vec<SkippedDeclaration>,
}

/// A path declaration that was seen but not turned into a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedDeclaration {
    /// The literal path as written in the source.
    pub raw: String,
    /// 1-based source line.
    pub line: usize,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Contains a `:param` segment.
    Dynamic,
    /// Contains a `*` catch-all.
    Wildcard,
    /// Does not start with `/` (nested child route).
    Relative,
    /// Rejected by route validation for another reason.
    Invalid,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            Self::Dynamic => "dynamic segment",
            Self::Wildcard => "wildcard",
            Self::Relative => "relative path",
            Self::Invalid => "invalid path",
        };
        f.write_str(reason)
    }
}

// ---------------------------------------------------------------------------
// Regex patterns (compiled once)
// ---------------------------------------------------------------------------

/// Matches `path="..."`, `path={'...'}`, `path: "..."` and backtick variants.
static PATH_DECL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\bpath\s*[=:]\s*\{?\s*(?:"([^"\n]*)"|'([^'\n]*)'|`([^`\n]*)`)"#)
        .expect("path declaration regex")
});

// ---------------------------------------------------------------------------
// Derivation
// ---------------------------------------------------------------------------

/// Extract static routes from router configuration source text.
pub fn derive_from_router_source(source: &str) -> RouterRoutes {
    let mut found = RouterRoutes::default();

    for (idx, line) in source.lines().enumerate() {
        for caps in PATH_DECL_RE.captures_iter(line) {
            let Some(raw) = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)) else {
                continue;
            };
            let raw = raw.as_str();

            match classify(raw) {
                Ok(route) => {
                    if !found.routes.contains(&route) {
                        found.routes.push(route);
                    }
                }
                Err(reason) => found.skipped.push(SkippedDeclaration {
                    raw: raw.to_string(),
                    line: idx + 1,
                    reason,
                }),
            }
        }
    }

    tracing::debug!(
        routes = found.routes.len(),
        skipped = found.skipped.len(),
        "derived routes from router source"
    );

    found
}

/// Read a router source file and derive its static routes.
pub fn derive_from_router_file(path: &Path) -> Result<RouterRoutes> {
    let source = std::fs::read_to_string(path).map_err(|e| PrerenderError::io(path, e))?;
    Ok(derive_from_router_source(&source))
}

fn classify(raw: &str) -> std::result::Result<Route, SkipReason> {
    if raw.contains('*') {
        return Err(SkipReason::Wildcard);
    }
    if raw.split('/').any(|segment| segment.starts_with(':')) {
        return Err(SkipReason::Dynamic);
    }
    if !raw.starts_with('/') {
        return Err(SkipReason::Relative);
    }
    Route::parse(raw).map_err(|_| SkipReason::Invalid)
}
