//! Route resolution: configured routes plus routes derived from the router.

use prerender_registry::{RouteRegistry, RouterRoutes, derive_from_router_file};
use prerender_shared::{PrerenderConfig, Result, Route};
use tracing::{info, instrument};

/// Configured routes and, when a router source is configured, what the router
/// declares.
#[derive(Debug, Clone)]
pub struct ResolvedRoutes {
    /// Routes from the config file and command line, in declared order.
    pub configured: RouteRegistry,
    /// Routes found in the router source.
    pub router: Option<RouterRoutes>,
}

impl ResolvedRoutes {
    /// Configured routes followed by router routes not configured yet.
    pub fn merged(&self) -> RouteRegistry {
        let mut registry = self.configured.clone();
        if let Some(router) = &self.router {
            let added = registry.merge_derived(router);
            if added > 0 {
                info!(added, "added routes declared by the router");
            }
        }
        registry
    }

    /// Router routes the configured list does not name.
    pub fn missing(&self) -> Vec<Route> {
        self.router
            .as_ref()
            .map(|router| self.configured.missing_from(router))
            .unwrap_or_default()
    }
}

/// Parse configured routes and scan the router source if one is set.
#[instrument(skip_all)]
pub fn resolve_routes(config: &PrerenderConfig) -> Result<ResolvedRoutes> {
    let configured = RouteRegistry::from_strings(&config.routes)?;
    let router = config
        .router_source
        .as_deref()
        .map(derive_from_router_file)
        .transpose()?;

    if let Some(router) = &router {
        info!(
            declared = router.routes.len(),
            skipped = router.skipped.len(),
            "scanned router source"
        );
    }

    Ok(ResolvedRoutes { configured, router })
}
