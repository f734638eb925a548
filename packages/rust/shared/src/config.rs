//! Configuration for the prerender pipeline.
//!
//! Project config lives at `./prerender.toml` (or wherever `--config` points).
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PrerenderError, Result};
use crate::types::Route;

/// Default configuration file name, looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "prerender.toml";

// ---------------------------------------------------------------------------
// Config structs (matching prerender.toml schema)
// ---------------------------------------------------------------------------

/// Top-level project config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Routes to snapshot, in processing order.
    #[serde(default)]
    pub routes: Vec<String>,

    /// Build output layout.
    #[serde(default)]
    pub build: BuildConfig,

    /// Static file server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Headless browser settings.
    #[serde(default)]
    pub browser: BrowserConfig,

    /// Per-route waits and timeouts.
    #[serde(default)]
    pub timing: TimingConfig,
}

/// `[build]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Directory holding the built bundle; snapshots are written into it.
    #[serde(default = "default_dist_dir")]
    pub dist_dir: String,

    /// Root document file name inside `dist_dir`.
    #[serde(default = "default_index_file")]
    pub index_file: String,

    /// CSS selector of the element the application mounts into.
    #[serde(default = "default_mount_selector")]
    pub mount_selector: String,

    /// Router configuration source to derive routes from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub router_source: Option<String>,

    /// Where the pristine template copy is kept between runs. Defaults to
    /// `.prerender-template.html` inside `dist_dir`, which ships with the build.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_stash: Option<String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            dist_dir: default_dist_dir(),
            index_file: default_index_file(),
            mount_selector: default_mount_selector(),
            router_source: None,
            template_stash: None,
        }
    }
}

fn default_dist_dir() -> String {
    "dist".into()
}
fn default_index_file() -> String {
    "index.html".into()
}
fn default_mount_selector() -> String {
    "#root".into()
}

/// `[server]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// First port to try binding.
    #[serde(default = "default_preferred_port")]
    pub preferred_port: u16,

    /// How many consecutive ports to try before giving up.
    #[serde(default = "default_max_port_attempts")]
    pub max_port_attempts: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            preferred_port: default_preferred_port(),
            max_port_attempts: default_max_port_attempts(),
        }
    }
}

fn default_preferred_port() -> u16 {
    4173
}
fn default_max_port_attempts() -> u16 {
    100
}

/// `[browser]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Chromium executable; autodetected when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable: Option<String>,

    /// Pass `--no-sandbox` (needed in most CI containers).
    #[serde(default)]
    pub no_sandbox: bool,

    #[serde(default = "default_viewport_width")]
    pub viewport_width: u32,

    #[serde(default = "default_viewport_height")]
    pub viewport_height: u32,

    /// Extra command-line switches for the browser process.
    #[serde(default)]
    pub extra_args: Vec<String>,

    /// Number of page contexts rendering in parallel.
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            executable: None,
            no_sandbox: false,
            viewport_width: default_viewport_width(),
            viewport_height: default_viewport_height(),
            extra_args: Vec::new(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_viewport_width() -> u32 {
    1280
}
fn default_viewport_height() -> u32 {
    800
}
fn default_concurrency() -> u32 {
    1
}

/// `[timing]` section. All values in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_navigation_timeout")]
    pub navigation_timeout_ms: u64,

    /// Quiet window with no new resource loads that counts as network idle.
    #[serde(default = "default_network_idle")]
    pub network_idle_ms: u64,

    #[serde(default = "default_mount_timeout")]
    pub mount_timeout_ms: u64,

    /// Delay after the mount node appears, for lazy components.
    #[serde(default = "default_settle")]
    pub settle_ms: u64,

    #[serde(default = "default_content_timeout")]
    pub content_timeout_ms: u64,

    /// Delay after content appears, for animations and transitions.
    #[serde(default = "default_post_settle")]
    pub post_settle_ms: u64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            navigation_timeout_ms: default_navigation_timeout(),
            network_idle_ms: default_network_idle(),
            mount_timeout_ms: default_mount_timeout(),
            settle_ms: default_settle(),
            content_timeout_ms: default_content_timeout(),
            post_settle_ms: default_post_settle(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

fn default_navigation_timeout() -> u64 {
    30_000
}
fn default_network_idle() -> u64 {
    500
}
fn default_mount_timeout() -> u64 {
    10_000
}
fn default_settle() -> u64 {
    1_500
}
fn default_content_timeout() -> u64 {
    10_000
}
fn default_post_settle() -> u64 {
    500
}
fn default_poll_interval() -> u64 {
    100
}

// ---------------------------------------------------------------------------
// Runtime config (merged from config file + CLI flags)
// ---------------------------------------------------------------------------

/// Resolved waits used by the browser driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderTimings {
    pub navigation_timeout: Duration,
    pub network_idle: Duration,
    pub mount_timeout: Duration,
    pub settle: Duration,
    pub content_timeout: Duration,
    pub post_settle: Duration,
    pub poll_interval: Duration,
}

impl Default for RenderTimings {
    fn default() -> Self {
        Self::from(&TimingConfig::default())
    }
}

impl From<&TimingConfig> for RenderTimings {
    fn from(t: &TimingConfig) -> Self {
        Self {
            navigation_timeout: Duration::from_millis(t.navigation_timeout_ms),
            network_idle: Duration::from_millis(t.network_idle_ms),
            mount_timeout: Duration::from_millis(t.mount_timeout_ms),
            settle: Duration::from_millis(t.settle_ms),
            content_timeout: Duration::from_millis(t.content_timeout_ms),
            post_settle: Duration::from_millis(t.post_settle_ms),
            poll_interval: Duration::from_millis(t.poll_interval_ms),
        }
    }
}

/// Runtime pipeline configuration — merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct PrerenderConfig {
    /// Built bundle directory (input and output).
    pub dist_dir: PathBuf,
    /// Root document file name inside `dist_dir`.
    pub index_file: String,
    /// Mount node selector.
    pub mount_selector: String,
    /// Routes to snapshot, unvalidated until the registry is built.
    pub routes: Vec<String>,
    /// Optional router source for route derivation.
    pub router_source: Option<PathBuf>,
    /// Pristine template copy; `None` keeps it inside `dist_dir`.
    pub template_stash: Option<PathBuf>,
    /// First port the static server tries.
    pub preferred_port: u16,
    /// Consecutive ports tried before giving up.
    pub max_port_attempts: u16,
    /// Browser launch options.
    pub browser: BrowserConfig,
    /// Per-route waits.
    pub timings: RenderTimings,
}

impl From<&AppConfig> for PrerenderConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            dist_dir: PathBuf::from(&config.build.dist_dir),
            index_file: config.build.index_file.clone(),
            mount_selector: config.build.mount_selector.clone(),
            routes: config.routes.clone(),
            router_source: config.build.router_source.as_ref().map(PathBuf::from),
            template_stash: config.build.template_stash.as_ref().map(PathBuf::from),
            preferred_port: config.server.preferred_port,
            max_port_attempts: config.server.max_port_attempts,
            browser: config.browser.clone(),
            timings: RenderTimings::from(&config.timing),
        }
    }
}

impl PrerenderConfig {
    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.browser.concurrency == 0 {
            return Err(PrerenderError::config("browser.concurrency must be at least 1"));
        }
        if self.timings.poll_interval.is_zero() {
            return Err(PrerenderError::config("timing.poll_interval_ms must be non-zero"));
        }
        if self.mount_selector.trim().is_empty() {
            return Err(PrerenderError::config("build.mount_selector must not be empty"));
        }
        if self.max_port_attempts == 0 {
            return Err(PrerenderError::config("server.max_port_attempts must be at least 1"));
        }
        if self.index_file.contains(['/', '\\']) {
            return Err(PrerenderError::config(
                "build.index_file must be a file name, not a path",
            ));
        }
        Ok(())
    }

    /// Path of the root document inside the build directory.
    pub fn index_path(&self) -> PathBuf {
        self.dist_dir.join(&self.index_file)
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Load the config from `path`, or from `./prerender.toml` when `path` is
/// `None`. Returns defaults if no file exists at the implicit location.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(explicit) => load_config_from(explicit),
        None => {
            let implicit = Path::new(CONFIG_FILE_NAME);
            if !implicit.exists() {
                tracing::debug!(path = ?implicit, "config file not found, using defaults");
                return Ok(AppConfig::default());
            }
            load_config_from(implicit)
        }
    }
}

/// Load the config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| PrerenderError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| PrerenderError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Write a default config file at `path`, refusing to overwrite an existing one.
pub fn init_config(path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return Err(PrerenderError::config(format!(
            "{} already exists",
            path.display()
        )));
    }

    let config = AppConfig {
        routes: vec![Route::root().to_string()],
        ..AppConfig::default()
    };
    let content =
        toml::to_string_pretty(&config).map_err(|e| PrerenderError::config(e.to_string()))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| PrerenderError::io(parent, e))?;
    }
    std::fs::write(path, content).map_err(|e| PrerenderError::io(path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path.to_path_buf())
}
