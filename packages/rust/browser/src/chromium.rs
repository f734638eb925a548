//! Chromium over the DevTools protocol.
//!
//! One browser process per batch; each page tracks its own network requests
//! from protocol events so the renderer can detect network idle.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::{
    EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent, RequestId,
};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use prerender_shared::{BrowserConfig, PrerenderError, Result};

use crate::head::HeadElement;
use crate::script;
use crate::{BrowserLauncher, BrowserSession, NetworkActivity, PageProbe};

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// A headless Chromium process and its protocol event loop.
pub struct ChromiumSession {
    browser: Browser,
    events: JoinHandle<()>,
}

impl ChromiumSession {
    /// Launch a headless browser with the given options.
    #[instrument(skip_all)]
    pub async fn launch(config: &BrowserConfig) -> Result<Self> {
        let launch_config = launch_config(config)?;
        let (browser, mut handler) = Browser::launch(launch_config)
            .await
            .map_err(|e| PrerenderError::Browser(format!("launch failed: {e}")))?;

        let events = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "devtools event error");
                }
            }
        });

        info!(
            executable = config.executable.as_deref().unwrap_or("auto"),
            "headless browser launched"
        );

        Ok(Self { browser, events })
    }
}

/// Launches [`ChromiumSession`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChromiumLauncher;

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    type Session = ChromiumSession;

    async fn launch(&self, config: &BrowserConfig) -> Result<ChromiumSession> {
        ChromiumSession::launch(config).await
    }
}

fn launch_config(config: &BrowserConfig) -> Result<chromiumoxide::BrowserConfig> {
    let mut builder = chromiumoxide::BrowserConfig::builder()
        .window_size(config.viewport_width, config.viewport_height)
        .viewport(Viewport {
            width: config.viewport_width,
            height: config.viewport_height,
            ..Viewport::default()
        });

    if let Some(executable) = &config.executable {
        builder = builder.chrome_executable(executable);
    }
    if config.no_sandbox {
        builder = builder.no_sandbox();
    }
    if !config.extra_args.is_empty() {
        builder = builder.args(config.extra_args.iter());
    }

    builder
        .build()
        .map_err(|e| PrerenderError::Browser(format!("invalid browser options: {e}")))
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    type Page = ChromiumPage;

    async fn open_page(&self) -> Result<ChromiumPage> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| PrerenderError::Browser(format!("new page: {e}")))?;
        ChromiumPage::attach(page).await
    }

    async fn close(mut self) -> Result<()> {
        let closed = self
            .browser
            .close()
            .await
            .map(|_| ())
            .map_err(|e| PrerenderError::Browser(format!("close: {e}")));

        if let Err(e) = self.browser.wait().await {
            warn!(error = %e, "waiting for browser exit failed");
        }
        self.events.abort();

        debug!("headless browser closed");
        closed
    }
}

// ---------------------------------------------------------------------------
// Page
// ---------------------------------------------------------------------------

/// In-flight request ids and a completion counter fed by protocol events.
#[derive(Default)]
struct NetworkTracker {
    in_flight: Mutex<HashSet<RequestId>>,
    completed: AtomicU64,
}

impl NetworkTracker {
    fn started(&self, id: RequestId) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id);
    }

    fn settled(&self, id: &RequestId) {
        let removed = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        if removed {
            self.completed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn snapshot(&self) -> NetworkActivity {
        NetworkActivity {
            in_flight: self
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
            completed: self.completed.load(Ordering::Relaxed),
        }
    }
}

/// One Chromium tab.
pub struct ChromiumPage {
    page: Page,
    network: Arc<NetworkTracker>,
    listeners: Vec<JoinHandle<()>>,
}

impl ChromiumPage {
    async fn attach(page: Page) -> Result<Self> {
        let network = Arc::new(NetworkTracker::default());

        let mut sent = page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .map_err(protocol_error)?;
        let mut finished = page
            .event_listener::<EventLoadingFinished>()
            .await
            .map_err(protocol_error)?;
        let mut failed = page
            .event_listener::<EventLoadingFailed>()
            .await
            .map_err(protocol_error)?;

        let listeners = vec![
            tokio::spawn({
                let network = Arc::clone(&network);
                async move {
                    while let Some(event) = sent.next().await {
                        network.started(event.request_id.clone());
                    }
                }
            }),
            tokio::spawn({
                let network = Arc::clone(&network);
                async move {
                    while let Some(event) = finished.next().await {
                        network.settled(&event.request_id);
                    }
                }
            }),
            tokio::spawn({
                let network = Arc::clone(&network);
                async move {
                    while let Some(event) = failed.next().await {
                        network.settled(&event.request_id);
                    }
                }
            }),
        ];

        Ok(Self {
            page,
            network,
            listeners,
        })
    }

    async fn evaluate<T: DeserializeOwned>(&self, expression: &str) -> Result<T> {
        let params = EvaluateParams::builder()
            .expression(expression)
            .return_by_value(true)
            .build()
            .map_err(PrerenderError::Browser)?;

        self.page
            .evaluate_expression(params)
            .await
            .map_err(protocol_error)?
            .into_value::<T>()
            .map_err(|e| PrerenderError::Browser(format!("unexpected evaluation result: {e}")))
    }
}

#[async_trait]
impl PageProbe for ChromiumPage {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.page
            .goto(url)
            .await
            .map(|_| ())
            .map_err(|e| PrerenderError::Browser(format!("goto {url}: {e}")))
    }

    async fn network_activity(&self) -> Result<NetworkActivity> {
        Ok(self.network.snapshot())
    }

    async fn mount_exists(&self, selector: &str) -> Result<bool> {
        self.evaluate(&script::mount_exists(selector)).await
    }

    async fn mount_markup(&self, selector: &str) -> Result<String> {
        self.evaluate(&script::mount_inner_html(selector)).await
    }

    async fn head_children(&self) -> Result<Vec<HeadElement>> {
        self.evaluate(script::HEAD_CHILDREN).await
    }

    async fn close(mut self) -> Result<()> {
        for listener in self.listeners.drain(..) {
            listener.abort();
        }
        self.page.clone().close().await.map_err(protocol_error)
    }
}

impl Drop for ChromiumPage {
    fn drop(&mut self) {
        for listener in &self.listeners {
            listener.abort();
        }
    }
}

fn protocol_error(e: chromiumoxide::error::CdpError) -> PrerenderError {
    PrerenderError::Browser(e.to_string())
}
