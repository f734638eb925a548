//! Headless browser driver: turns a route into rendered markup.
//!
//! This crate provides:
//! - [`PageProbe`] / [`BrowserSession`] — the seam between the render
//!   algorithm and a concrete browser
//! - [`RouteRenderer`] — navigate, wait for the client render to settle,
//!   extract mount-node and head markup
//! - [`chromium`] — the Chromium implementation over the DevTools protocol
//! - [`head`] — filtering of bundler-injected head tags

pub mod chromium;
pub mod driver;
pub mod head;
pub mod script;

use async_trait::async_trait;
use prerender_shared::{BrowserConfig, Result};

pub use chromium::{ChromiumLauncher, ChromiumPage, ChromiumSession};
pub use driver::RouteRenderer;
pub use head::{HeadElement, head_markup};

/// Network counters observed by a page since it was opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkActivity {
    /// Requests issued but not yet finished or failed.
    pub in_flight: usize,
    /// Requests that finished or failed.
    pub completed: u64,
}

/// Primitive operations on one browser page.
///
/// Implementations report what the page currently looks like; all waiting,
/// polling and timeouts live in [`RouteRenderer`].
#[async_trait]
pub trait PageProbe: Send + Sync + Sized {
    /// Start loading `url` and return once the document has loaded.
    async fn navigate(&self, url: &str) -> Result<()>;

    /// Current request counters.
    async fn network_activity(&self) -> Result<NetworkActivity>;

    /// Whether an element matches `selector`.
    async fn mount_exists(&self, selector: &str) -> Result<bool>;

    /// Inner HTML of the element matching `selector` (`""` when absent).
    async fn mount_markup(&self, selector: &str) -> Result<String>;

    /// Every child of `document.head`, in document order.
    async fn head_children(&self) -> Result<Vec<HeadElement>>;

    /// Close the page.
    async fn close(self) -> Result<()>;
}

/// A running browser that can open pages.
#[async_trait]
pub trait BrowserSession: Send + Sync + Sized {
    type Page: PageProbe;

    /// Open a fresh page context.
    async fn open_page(&self) -> Result<Self::Page>;

    /// Terminate the browser process.
    async fn close(self) -> Result<()>;
}

/// Starts a [`BrowserSession`] from launch options.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    type Session: BrowserSession;

    async fn launch(&self, config: &BrowserConfig) -> Result<Self::Session>;
}
