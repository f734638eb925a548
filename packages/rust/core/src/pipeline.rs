//! End-to-end prerender batch: routes → server → browser → snapshots.

use std::path::Path;
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use prerender_browser::{BrowserLauncher, BrowserSession, PageProbe, RouteRenderer};
use prerender_rewriter::{SnapshotWriter, TEMPLATE_STASH_NAME, Template};
use prerender_server::{ServerHandle, StaticServerOptions};
use prerender_shared::{
    PrerenderConfig, PrerenderError, PrerenderReport, Result, Route, RouteOutcome, RouteReport,
};

use crate::routes::resolve_routes;

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called before a route is rendered. `current` is 1-based.
    fn route_started(&self, route: &Route, current: usize, total: usize);
    /// Called once a route has a final outcome.
    fn route_finished(&self, report: &RouteReport);
    /// Called when the pipeline completes.
    fn done(&self, report: &PrerenderReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn route_started(&self, _route: &Route, _current: usize, _total: usize) {}
    fn route_finished(&self, _report: &RouteReport) {}
    fn done(&self, _report: &PrerenderReport) {}
}

/// Everything a lane needs to turn a route into a snapshot.
struct RouteJob<'a> {
    renderer: &'a RouteRenderer,
    writer: &'a SnapshotWriter,
    progress: &'a dyn ProgressReporter,
    total: usize,
}

/// Run the full prerender batch.
///
/// 1. Resolve the route registry
/// 2. Load the pristine template
/// 3. Start the static server on a free port
/// 4. Launch the browser
/// 5. Render and write every route; failures are recorded, not raised
/// 6. Close the browser, then the server
///
/// Only failures in steps 1–4 are returned as errors.
#[instrument(skip_all, fields(dist = %config.dist_dir.display()))]
pub async fn run_prerender<L: BrowserLauncher>(
    config: &PrerenderConfig,
    launcher: &L,
    progress: &dyn ProgressReporter,
) -> Result<PrerenderReport> {
    let start = Instant::now();
    let started_at = Utc::now();
    let run_id = Uuid::now_v7();
    config.validate()?;

    let dist_dir = std::path::absolute(&config.dist_dir)
        .map_err(|e| PrerenderError::io(&config.dist_dir, e))?;

    // --- Phase 1: Routes ---
    progress.phase("Resolving routes");
    let registry = resolve_routes(config)?.merged();
    if registry.is_empty() {
        return Err(PrerenderError::config(
            "no routes to prerender; set `routes` or `build.router_source`",
        ));
    }
    info!(%run_id, routes = registry.len(), "starting prerender");

    // --- Phase 2: Template ---
    progress.phase("Loading template");
    let stash_path = match &config.template_stash {
        Some(path) => std::path::absolute(path).map_err(|e| PrerenderError::io(path, e))?,
        None => dist_dir.join(TEMPLATE_STASH_NAME),
    };
    let template = Template::load(
        &dist_dir,
        &config.index_file,
        &stash_path,
        &config.mount_selector,
    )?;
    let pristine = template.html().to_owned();
    let writer = SnapshotWriter::new(template, &dist_dir, &config.index_file);

    // --- Phase 3: Server ---
    progress.phase("Starting static server");
    let mut options = StaticServerOptions::new(&dist_dir).with_index_override(pristine);
    options.index_file = config.index_file.clone();
    options.preferred_port = config.preferred_port;
    options.max_port_attempts = config.max_port_attempts;
    let server = ServerHandle::start(options).await?;
    let port = server.port();

    // --- Phase 4: Browser ---
    progress.phase("Launching browser");
    let session = match launcher.launch(&config.browser).await {
        Ok(session) => session,
        Err(e) => {
            server.shutdown().await;
            return Err(e);
        }
    };

    // --- Phase 5: Render ---
    progress.phase("Rendering routes");
    let renderer = RouteRenderer::new(
        server.base_url(),
        config.mount_selector.clone(),
        config.timings.clone(),
    );
    let job = RouteJob {
        renderer: &renderer,
        writer: &writer,
        progress,
        total: registry.len(),
    };

    let lanes = split_lanes(registry.routes(), config.browser.concurrency as usize);
    let lane_reports =
        join_all(lanes.into_iter().map(|lane| run_lane(&session, &job, lane))).await;
    let mut routes: Vec<(usize, RouteReport)> = lane_reports.into_iter().flatten().collect();
    routes.sort_by_key(|(index, _)| *index);

    // --- Phase 6: Release ---
    progress.phase("Shutting down");
    if let Err(e) = session.close().await {
        warn!(error = %e, "failed to close browser");
    }
    server.shutdown().await;

    let report = PrerenderReport {
        run_id,
        started_at,
        port,
        elapsed_ms: start.elapsed().as_millis() as u64,
        routes: routes.into_iter().map(|(_, report)| report).collect(),
    };

    progress.done(&report);

    info!(
        %run_id,
        port,
        rendered = report.succeeded().count(),
        failed = report.failed().count(),
        elapsed_ms = report.elapsed_ms,
        "prerender complete"
    );

    Ok(report)
}

/// Deal routes round-robin into at most `lanes` non-empty lanes, keeping each
/// route's registry index.
fn split_lanes(routes: &[Route], lanes: usize) -> Vec<Vec<(usize, &Route)>> {
    let count = lanes.clamp(1, routes.len().max(1));
    let mut split: Vec<Vec<(usize, &Route)>> = vec![Vec::new(); count];
    for (index, route) in routes.iter().enumerate() {
        split[index % count].push((index, route));
    }
    split
}

/// Process one lane sequentially on its own page.
async fn run_lane<S: BrowserSession>(
    session: &S,
    job: &RouteJob<'_>,
    lane: Vec<(usize, &Route)>,
) -> Vec<(usize, RouteReport)> {
    let page = match session.open_page().await {
        Ok(page) => page,
        Err(e) => {
            warn!(error = %e, routes = lane.len(), "could not open a page, skipping lane");
            return lane
                .into_iter()
                .map(|(index, route)| {
                    let report = RouteReport {
                        route: route.clone(),
                        outcome: RouteOutcome::Failed {
                            stage: None,
                            error: e.to_string(),
                        },
                        elapsed_ms: 0,
                    };
                    job.progress.route_finished(&report);
                    (index, report)
                })
                .collect();
        }
    };

    let mut reports = Vec::with_capacity(lane.len());
    for (index, route) in lane {
        job.progress.route_started(route, index + 1, job.total);
        let report = prerender_route(&page, job, route).await;
        job.progress.route_finished(&report);
        reports.push((index, report));
    }

    if let Err(e) = page.close().await {
        warn!(error = %e, "failed to close page");
    }
    reports
}

/// Render and write one route, turning any failure into a recorded outcome.
async fn prerender_route<P: PageProbe>(
    page: &P,
    job: &RouteJob<'_>,
    route: &Route,
) -> RouteReport {
    let start = Instant::now();
    let written = match job.renderer.render(page, route).await {
        Ok(result) => job.writer.write(route, &result),
        Err(e) => Err(e),
    };
    let elapsed_ms = start.elapsed().as_millis() as u64;

    let outcome = match written {
        Ok(document) => {
            info!(%route, path = %document.path.display(), elapsed_ms, "route prerendered");
            RouteOutcome::Rendered { document }
        }
        Err(e) => {
            warn!(%route, stage = ?e.stage(), error = %e, "route failed, continuing");
            RouteOutcome::Failed {
                stage: e.stage(),
                error: e.to_string(),
            }
        }
    };

    RouteReport {
        route: route.clone(),
        outcome,
        elapsed_ms,
    }
}

/// Write the batch report as pretty JSON.
pub fn write_report(path: &Path, report: &PrerenderReport) -> Result<()> {
    let json = serde_json::to_string_pretty(report)
        .map_err(|e| PrerenderError::io(path, std::io::Error::other(e)))?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| PrerenderError::io(parent, e))?;
    }
    std::fs::write(path, json).map_err(|e| PrerenderError::io(path, e))?;
    info!(path = %path.display(), "wrote report");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use prerender_browser::{HeadElement, NetworkActivity};
    use prerender_shared::{AppConfig, BrowserConfig, RenderStage};

    use super::*;

    const TEMPLATE: &str = r#"<!doctype html>
<html lang="en">
  <head>
    <meta charset="UTF-8" />
    <title>Handy</title>
    <script type="module" src="/assets/index.js"></script>
  </head>
  <body>
    <div id="root"></div>
  </body>
</html>
"#;

    /// How a fake page behaves for one route.
    #[derive(Clone)]
    enum Behavior {
        Render { markup: String, title: String },
        NeverMounts,
    }

    /// In-memory browser: pages look up their behavior by the last URL path.
    #[derive(Clone, Default)]
    struct FakeBrowser {
        behaviors: HashMap<String, Behavior>,
        visits: std::sync::Arc<Mutex<Vec<String>>>,
        pages_opened: std::sync::Arc<AtomicUsize>,
        closed: std::sync::Arc<AtomicUsize>,
    }

    impl FakeBrowser {
        fn render(mut self, route: &str, markup: &str, title: &str) -> Self {
            self.behaviors.insert(
                route.into(),
                Behavior::Render {
                    markup: markup.into(),
                    title: title.into(),
                },
            );
            self
        }

        fn stall(mut self, route: &str) -> Self {
            self.behaviors.insert(route.into(), Behavior::NeverMounts);
            self
        }
    }

    struct FakePage {
        browser: FakeBrowser,
        current: Mutex<Option<Behavior>>,
    }

    impl FakePage {
        fn behavior(&self) -> Option<Behavior> {
            self.current.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PageProbe for FakePage {
        async fn navigate(&self, url: &str) -> Result<()> {
            let path = url
                .split_once("://")
                .and_then(|(_, rest)| rest.find('/').map(|i| rest[i..].to_string()))
                .unwrap_or_else(|| "/".into());
            self.browser.visits.lock().unwrap().push(path.clone());
            *self.current.lock().unwrap() = self.browser.behaviors.get(&path).cloned();
            Ok(())
        }

        async fn network_activity(&self) -> Result<NetworkActivity> {
            Ok(NetworkActivity::default())
        }

        async fn mount_exists(&self, _selector: &str) -> Result<bool> {
            Ok(matches!(self.behavior(), Some(Behavior::Render { .. })))
        }

        async fn mount_markup(&self, _selector: &str) -> Result<String> {
            Ok(match self.behavior() {
                Some(Behavior::Render { markup, .. }) => markup,
                _ => String::new(),
            })
        }

        async fn head_children(&self) -> Result<Vec<HeadElement>> {
            let title = match self.behavior() {
                Some(Behavior::Render { title, .. }) => title,
                _ => String::new(),
            };
            Ok(vec![
                HeadElement {
                    tag: "title".into(),
                    src: None,
                    rel: None,
                    outer_html: format!("<title>{title}</title>"),
                },
                HeadElement {
                    tag: "script".into(),
                    src: Some("/assets/index.js".into()),
                    rel: None,
                    outer_html: r#"<script type="module" src="/assets/index.js"></script>"#.into(),
                },
            ])
        }

        async fn close(self) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl BrowserSession for FakeBrowser {
        type Page = FakePage;

        async fn open_page(&self) -> Result<FakePage> {
            self.pages_opened.fetch_add(1, Ordering::SeqCst);
            Ok(FakePage {
                browser: self.clone(),
                current: Mutex::new(None),
            })
        }

        async fn close(self) -> Result<()> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl BrowserLauncher for FakeBrowser {
        type Session = FakeBrowser;

        async fn launch(&self, _config: &BrowserConfig) -> Result<FakeBrowser> {
            Ok(self.clone())
        }
    }

    struct FailingLauncher;

    #[async_trait]
    impl BrowserLauncher for FailingLauncher {
        type Session = FakeBrowser;

        async fn launch(&self, _config: &BrowserConfig) -> Result<FakeBrowser> {
            Err(PrerenderError::Browser("no chromium found".into()))
        }
    }

    fn dist() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), TEMPLATE).unwrap();
        dir
    }

    fn config(dist: &Path, routes: &[&str]) -> PrerenderConfig {
        let mut config = PrerenderConfig::from(&AppConfig::default());
        config.dist_dir = dist.to_path_buf();
        config.routes = routes.iter().map(|r| r.to_string()).collect();
        config.preferred_port = 0;
        config.timings.network_idle = Duration::from_millis(20);
        config.timings.settle = Duration::from_millis(5);
        config.timings.post_settle = Duration::from_millis(5);
        config.timings.mount_timeout = Duration::from_millis(100);
        config.timings.content_timeout = Duration::from_millis(100);
        config.timings.poll_interval = Duration::from_millis(5);
        config
    }

    fn mount_text(path: &Path) -> String {
        let html = std::fs::read_to_string(path).unwrap();
        let doc = scraper::Html::parse_document(&html);
        let selector = scraper::Selector::parse("#root").unwrap();
        doc.select(&selector).next().unwrap().text().collect()
    }

    fn site() -> FakeBrowser {
        FakeBrowser::default()
            .render("/", "<h1>Home</h1>", "Handy | Home")
            .render("/plumbing", "<h1>Plumbing Services</h1>", "Plumbing")
    }

    #[tokio::test]
    async fn renders_home_and_plumbing() {
        let dir = dist();
        let browser = site();

        let config = config(dir.path(), &["/", "/plumbing"]);
        let report = run_prerender(&config, &browser, &SilentProgress).await.unwrap();

        assert!(!report.has_failures());
        assert_eq!(report.routes.len(), 2);
        assert_eq!(mount_text(&dir.path().join("index.html")), "Home");
        assert_eq!(
            mount_text(&dir.path().join("plumbing/index.html")),
            "Plumbing Services"
        );

        let plumbing = std::fs::read_to_string(dir.path().join("plumbing/index.html")).unwrap();
        assert!(plumbing.contains("<title>Plumbing</title></head>"));
        assert_eq!(plumbing.matches("/assets/index.js").count(), 1);

        assert_eq!(browser.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stalled_route_does_not_stop_the_batch() {
        let dir = dist();
        let browser = site().stall("/slow");

        let report = run_prerender(
            &config(dir.path(), &["/slow", "/plumbing"]),
            &browser,
            &SilentProgress,
        )
        .await
        .unwrap();

        assert!(report.has_failures());
        let slow = &report.routes[0];
        assert_eq!(slow.route.as_str(), "/slow");
        assert!(matches!(
            slow.outcome,
            RouteOutcome::Failed {
                stage: Some(RenderStage::MountNode),
                ..
            }
        ));
        assert!(!dir.path().join("slow").exists());
        assert!(report.routes[1].is_success());
        assert_eq!(*browser.visits.lock().unwrap(), ["/slow", "/plumbing"]);
        assert_eq!(browser.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_run_is_byte_identical() {
        let dir = dist();
        let browser = site();
        let config = config(dir.path(), &["/", "/plumbing"]);

        let first = run_prerender(&config, &browser, &SilentProgress).await.unwrap();
        let home = std::fs::read(dir.path().join("index.html")).unwrap();
        let plumbing = std::fs::read(dir.path().join("plumbing/index.html")).unwrap();

        let second = run_prerender(&config, &browser, &SilentProgress).await.unwrap();
        assert_eq!(std::fs::read(dir.path().join("index.html")).unwrap(), home);
        assert_eq!(std::fs::read(dir.path().join("plumbing/index.html")).unwrap(), plumbing);

        let digests = |r: &PrerenderReport| -> Vec<String> {
            r.routes
                .iter()
                .filter_map(|r| match &r.outcome {
                    RouteOutcome::Rendered { document } => Some(document.sha256.clone()),
                    RouteOutcome::Failed { .. } => None,
                })
                .collect()
        };
        assert_eq!(digests(&first), digests(&second));
    }

    #[tokio::test]
    async fn failed_route_keeps_previous_snapshot() {
        let dir = dist();
        let routes = ["/", "/plumbing"];

        let first = run_prerender(&config(dir.path(), &routes), &site(), &SilentProgress)
            .await
            .unwrap();
        assert!(!first.has_failures());
        let snapshot = std::fs::read(dir.path().join("plumbing/index.html")).unwrap();

        let stalled = site().stall("/plumbing");
        let second = run_prerender(&config(dir.path(), &routes), &stalled, &SilentProgress)
            .await
            .unwrap();

        assert_eq!(second.failed().count(), 1);
        assert!(matches!(
            second.routes[1].outcome,
            RouteOutcome::Failed {
                stage: Some(RenderStage::MountNode),
                ..
            }
        ));
        assert_eq!(
            std::fs::read(dir.path().join("plumbing/index.html")).unwrap(),
            snapshot
        );
    }

    #[tokio::test]
    async fn configured_stash_stays_out_of_build_dir() {
        let dir = dist();
        let cache = tempfile::tempdir().unwrap();
        let stash = cache.path().join("template.html");
        let mut config = config(dir.path(), &["/", "/plumbing"]);
        config.template_stash = Some(stash.clone());

        run_prerender(&config, &site(), &SilentProgress).await.unwrap();
        let home = std::fs::read(dir.path().join("index.html")).unwrap();
        run_prerender(&config, &site(), &SilentProgress).await.unwrap();

        assert_eq!(std::fs::read_to_string(&stash).unwrap(), TEMPLATE);
        assert!(!dir.path().join(TEMPLATE_STASH_NAME).exists());
        assert_eq!(std::fs::read(dir.path().join("index.html")).unwrap(), home);
    }

    #[tokio::test]
    async fn lanes_keep_registry_order() {
        let dir = dist();
        let browser = site()
            .render("/roofing", "<h1>Roofing</h1>", "Roofing")
            .render("/blog", "<h1>Blog</h1>", "Blog");
        let mut config = config(dir.path(), &["/", "/plumbing", "/roofing", "/blog"]);
        config.browser.concurrency = 2;

        let report = run_prerender(&config, &browser, &SilentProgress).await.unwrap();

        let order: Vec<_> = report.routes.iter().map(|r| r.route.as_str()).collect();
        assert_eq!(order, ["/", "/plumbing", "/roofing", "/blog"]);
        assert_eq!(report.succeeded().count(), 4);
        assert_eq!(browser.pages_opened.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn launch_failure_is_fatal() {
        let dir = dist();
        let err = run_prerender(&config(dir.path(), &["/"]), &FailingLauncher, &SilentProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, PrerenderError::Browser(_)));
        assert_eq!(mount_text(&dir.path().join("index.html")), "");
    }

    #[tokio::test]
    async fn unusable_template_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<html><body></body></html>").unwrap();
        let err = run_prerender(&config(dir.path(), &["/"]), &site(), &SilentProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, PrerenderError::Template { .. }));
    }

    #[tokio::test]
    async fn empty_registry_is_rejected() {
        let dir = dist();
        let err = run_prerender(&config(dir.path(), &[]), &site(), &SilentProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, PrerenderError::Config { .. }));
    }

    #[test]
    fn lanes_are_round_robin() {
        let routes: Vec<Route> = ["/", "/a", "/b", "/c", "/d"]
            .iter()
            .map(|r| Route::parse(r).unwrap())
            .collect();
        let lanes = split_lanes(&routes, 2);
        let indices: Vec<Vec<usize>> = lanes
            .iter()
            .map(|lane| lane.iter().map(|(i, _)| *i).collect())
            .collect();
        assert_eq!(indices, [vec![0, 2, 4], vec![1, 3]]);

        // Never more lanes than routes.
        assert_eq!(split_lanes(&routes[..1], 8).len(), 1);
    }

    #[test]
    fn report_file_is_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports/prerender.json");
        let report = PrerenderReport {
            run_id: Uuid::now_v7(),
            started_at: Utc::now(),
            port: 4173,
            elapsed_ms: 12,
            routes: vec![],
        };
        write_report(&path, &report).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["port"], 4173);
    }
}
