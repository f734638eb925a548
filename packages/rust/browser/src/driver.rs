//! Per-route render algorithm.
//!
//! For one route:
//! 1. navigate and wait for the network to go quiet (bounded)
//! 2. wait for the mount node to exist (bounded)
//! 3. settle delay for lazily mounted components
//! 4. wait for the mount node to have content (bounded)
//! 5. second, shorter settle delay for transitions
//! 6. extract mount-node markup and filtered head markup
//!
//! Every failure is tagged with the [`RenderStage`] it happened in. Nothing
//! here retries; the caller decides what a failure means for the batch.

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, instrument};

use prerender_shared::{PrerenderError, RenderResult, RenderStage, RenderTimings, Result, Route};

use crate::PageProbe;
use crate::head::head_markup;

/// Renders routes of one site against a [`PageProbe`].
#[derive(Debug, Clone)]
pub struct RouteRenderer {
    base_url: String,
    mount_selector: String,
    timings: RenderTimings,
}

impl RouteRenderer {
    /// `base_url` is the static server origin, e.g. `http://127.0.0.1:4173`.
    pub fn new(
        base_url: impl Into<String>,
        mount_selector: impl Into<String>,
        timings: RenderTimings,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            mount_selector: mount_selector.into(),
            timings,
        }
    }

    /// Absolute URL for a route on the local server.
    pub fn url_for(&self, route: &Route) -> String {
        format!("{}{}", self.base_url, route)
    }

    /// Run the full render algorithm for `route` on `page`.
    #[instrument(skip_all, fields(route = %route))]
    pub async fn render<P: PageProbe>(&self, page: &P, route: &Route) -> Result<RenderResult> {
        let url = self.url_for(route);
        let selector = self.mount_selector.as_str();

        self.navigate(page, &url)
            .await
            .map_err(at(route, RenderStage::Navigate))?;
        debug!(%url, "navigation settled");

        self.poll_until("mount node", self.timings.mount_timeout, || {
            page.mount_exists(selector)
        })
        .await
        .map_err(at(route, RenderStage::MountNode))?;

        sleep(self.timings.settle).await;

        self.poll_until("mount node content", self.timings.content_timeout, || async move {
            let markup = page.mount_markup(selector).await?;
            Ok::<bool, PrerenderError>(!markup.trim().is_empty())
        })
        .await
        .map_err(at(route, RenderStage::Content))?;

        sleep(self.timings.post_settle).await;

        let root_markup = page
            .mount_markup(selector)
            .await
            .map_err(at(route, RenderStage::Extract))?;
        if root_markup.trim().is_empty() {
            return Err(PrerenderError::render(
                route.as_str(),
                RenderStage::Content,
                "mount node emptied during settle delay",
            ));
        }

        let head = page
            .head_children()
            .await
            .map_err(at(route, RenderStage::Extract))?;

        debug!(
            root_bytes = root_markup.len(),
            head_children = head.len(),
            "extracted markup"
        );

        Ok(RenderResult {
            root_markup,
            head_markup: head_markup(&head),
        })
    }

    /// Navigate, then wait for network idle; the whole step shares one deadline.
    async fn navigate<P: PageProbe>(&self, page: &P, url: &str) -> Result<()> {
        let limit = self.timings.navigation_timeout;
        match timeout(limit, self.navigate_until_idle(page, url)).await {
            Ok(result) => result,
            Err(_) => Err(PrerenderError::timeout(format!("navigation to {url}"), limit)),
        }
    }

    async fn navigate_until_idle<P: PageProbe>(&self, page: &P, url: &str) -> Result<()> {
        page.navigate(url).await?;

        let mut last = page.network_activity().await?;
        let mut quiet_since = Instant::now();
        loop {
            sleep(self.timings.poll_interval).await;
            let now = page.network_activity().await?;
            if now.in_flight > 0 || now.completed != last.completed {
                quiet_since = Instant::now();
            }
            last = now;
            if now.in_flight == 0 && quiet_since.elapsed() >= self.timings.network_idle {
                return Ok(());
            }
        }
    }

    async fn poll_until<F, Fut>(&self, what: &str, limit: Duration, check: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        match timeout(limit, poll(self.timings.poll_interval, check)).await {
            Ok(result) => result,
            Err(_) => Err(PrerenderError::timeout(what, limit)),
        }
    }
}

async fn poll<F, Fut>(interval: Duration, mut check: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    loop {
        if check().await? {
            return Ok(());
        }
        sleep(interval).await;
    }
}

fn at(route: &Route, stage: RenderStage) -> impl Fn(PrerenderError) -> PrerenderError + '_ {
    move |e| PrerenderError::render(route.as_str(), stage, e.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::{HeadElement, NetworkActivity};

    /// Page whose readiness is scripted in poll counts.
    #[derive(Default)]
    struct ScriptedPage {
        fail_navigation: bool,
        busy_network: bool,
        /// Mount node appears on this poll (None: never).
        mount_after: Option<usize>,
        /// Content appears on this poll (None: never).
        content_after: Option<usize>,
        markup: String,
        head: Vec<HeadElement>,
        mount_polls: AtomicUsize,
        content_polls: AtomicUsize,
        completed: AtomicU64,
        visited: Mutex<Vec<String>>,
    }

    impl ScriptedPage {
        fn ready(markup: &str) -> Self {
            Self {
                mount_after: Some(2),
                content_after: Some(4),
                markup: markup.into(),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl PageProbe for ScriptedPage {
        async fn navigate(&self, url: &str) -> Result<()> {
            self.visited.lock().unwrap().push(url.to_string());
            if self.fail_navigation {
                return Err(PrerenderError::Browser("net::ERR_CONNECTION_REFUSED".into()));
            }
            Ok(())
        }

        async fn network_activity(&self) -> Result<NetworkActivity> {
            let completed = if self.busy_network {
                self.completed.fetch_add(1, Ordering::SeqCst) + 1
            } else {
                self.completed.load(Ordering::SeqCst)
            };
            Ok(NetworkActivity {
                in_flight: 0,
                completed,
            })
        }

        async fn mount_exists(&self, _selector: &str) -> Result<bool> {
            let n = self.mount_polls.fetch_add(1, Ordering::SeqCst);
            Ok(self.mount_after.is_some_and(|after| n >= after))
        }

        async fn mount_markup(&self, _selector: &str) -> Result<String> {
            let n = self.content_polls.fetch_add(1, Ordering::SeqCst);
            match self.content_after {
                Some(after) if n >= after => Ok(self.markup.clone()),
                _ => Ok(String::new()),
            }
        }

        async fn head_children(&self) -> Result<Vec<HeadElement>> {
            Ok(self.head.clone())
        }

        async fn close(self) -> Result<()> {
            Ok(())
        }
    }

    fn renderer() -> RouteRenderer {
        RouteRenderer::new("http://localhost:4173/", "#root", RenderTimings::default())
    }

    fn route(s: &str) -> Route {
        Route::parse(s).unwrap()
    }

    #[test]
    fn builds_local_urls() {
        let r = renderer();
        assert_eq!(r.url_for(&Route::root()), "http://localhost:4173/");
        assert_eq!(
            r.url_for(&route("/services/tv-mounting")),
            "http://localhost:4173/services/tv-mounting"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn renders_once_content_appears() {
        let mut page = ScriptedPage::ready("<h1>Plumbing Services</h1>");
        page.head = vec![
            HeadElement {
                tag: "title".into(),
                src: None,
                rel: None,
                outer_html: "<title>Plumbing</title>".into(),
            },
            HeadElement {
                tag: "script".into(),
                src: Some("/assets/index.js".into()),
                rel: None,
                outer_html: r#"<script src="/assets/index.js"></script>"#.into(),
            },
        ];

        let result = renderer().render(&page, &route("/plumbing")).await.unwrap();
        assert_eq!(result.root_markup, "<h1>Plumbing Services</h1>");
        assert_eq!(result.head_markup, "<title>Plumbing</title>");
        assert_eq!(
            *page.visited.lock().unwrap(),
            ["http://localhost:4173/plumbing"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn content_that_never_appears_is_a_content_failure() {
        let page = ScriptedPage {
            content_after: None,
            ..ScriptedPage::ready("")
        };
        let err = renderer().render(&page, &route("/slow")).await.unwrap_err();
        assert_eq!(err.stage(), Some(RenderStage::Content));
        assert!(err.to_string().contains("/slow"));
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_mount_node_is_a_mount_failure() {
        let page = ScriptedPage {
            mount_after: None,
            ..ScriptedPage::ready("<p>x</p>")
        };
        let err = renderer().render(&page, &route("/")).await.unwrap_err();
        assert_eq!(err.stage(), Some(RenderStage::MountNode));
    }

    #[tokio::test(start_paused = true)]
    async fn never_idle_network_times_out_navigation() {
        let page = ScriptedPage {
            busy_network: true,
            ..ScriptedPage::ready("<p>x</p>")
        };
        let err = renderer().render(&page, &route("/chatty")).await.unwrap_err();
        assert_eq!(err.stage(), Some(RenderStage::Navigate));
        assert!(err.to_string().contains("navigation to http://localhost:4173/chatty"));
    }

    #[tokio::test(start_paused = true)]
    async fn navigation_error_is_a_navigate_failure() {
        let page = ScriptedPage {
            fail_navigation: true,
            ..ScriptedPage::ready("<p>x</p>")
        };
        let err = renderer().render(&page, &route("/")).await.unwrap_err();
        assert_eq!(err.stage(), Some(RenderStage::Navigate));
        assert!(err.to_string().contains("ERR_CONNECTION_REFUSED"));
    }

    #[tokio::test(start_paused = true)]
    async fn whitespace_only_mount_is_not_content() {
        let page = ScriptedPage::ready("  \n ");
        let err = renderer().render(&page, &route("/blank")).await.unwrap_err();
        assert_eq!(err.stage(), Some(RenderStage::Content));
    }
}
