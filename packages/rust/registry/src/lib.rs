//! Route Registry: the ordered set of paths that get a static snapshot.
//!
//! This crate provides:
//! - [`RouteRegistry`] — validated, deduplicated, ordered route list
//! - [`router`] — derivation of routes from the client router's source, so
//!   the registry does not have to be kept in sync with the router by hand

pub mod router;

use prerender_shared::{Result, Route};
use tracing::{debug, warn};

pub use router::{
    RouterRoutes, SkipReason, SkippedDeclaration, derive_from_router_file,
    derive_from_router_source,
};

/// Ordered list of routes to prerender.
///
/// Order only determines processing order; routes do not depend on each
/// other. Duplicates are dropped, keeping the first occurrence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteRegistry {
    routes: Vec<Route>,
}

impl RouteRegistry {
    /// Build a registry from already-parsed routes.
    pub fn new(routes: impl IntoIterator<Item = Route>) -> Self {
        let mut registry = Self::default();
        for route in routes {
            registry.push(route);
        }
        registry
    }

    /// Parse every configured route string. Any invalid entry fails the
    /// whole registry: the list is operator input, not page content.
    pub fn from_strings<I, S>(raw: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let routes = raw
            .into_iter()
            .map(|s| Route::parse(s.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(routes))
    }

    /// Append a route unless it is already registered. Returns whether it was added.
    pub fn push(&mut self, route: Route) -> bool {
        if self.routes.contains(&route) {
            debug!(%route, "duplicate route ignored");
            return false;
        }
        self.routes.push(route);
        true
    }

    /// Append router-derived routes that are not registered yet, preserving
    /// their order after the configured ones. Returns how many were added.
    pub fn merge_derived(&mut self, derived: &RouterRoutes) -> usize {
        for skipped in &derived.skipped {
            debug!(
                raw = %skipped.raw,
                line = skipped.line,
                reason = %skipped.reason,
                "router declaration not prerenderable"
            );
        }
        derived
            .routes
            .iter()
            .filter(|route| self.push((*route).clone()))
            .count()
    }

    /// Router routes this registry does not cover.
    ///
    /// A non-empty result means those paths will be served the raw template
    /// to crawlers.
    pub fn missing_from(&self, router: &RouterRoutes) -> Vec<Route> {
        router
            .routes
            .iter()
            .filter(|route| !self.routes.contains(route))
            .cloned()
            .collect()
    }

    /// Log a warning for every router route the registry lacks.
    pub fn warn_missing(&self, router: &RouterRoutes) -> usize {
        let missing = self.missing_from(router);
        for route in &missing {
            warn!(%route, "router route missing from registry, it will not be prerendered");
        }
        missing.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Route> {
        self.routes.iter()
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl<'a> IntoIterator for &'a RouteRegistry {
    type Item = &'a Route;
    type IntoIter = std::slice::Iter<'a, Route>;

    fn into_iter(self) -> Self::IntoIter {
        self.routes.iter()
    }
}
