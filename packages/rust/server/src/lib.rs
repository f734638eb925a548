//! Static file server for a built single-page application.
//!
//! Serves the build directory on `127.0.0.1` so a headless browser can load
//! it as if it were the production site. Client routes (extensionless paths)
//! and missing files fall back to the root document.
//!
//! The port is chosen by trying a preferred port and walking upward until a
//! bind succeeds.

pub mod resolve;

use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::{Path as UrlPath, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use prerender_shared::{PrerenderError, Result};

pub use resolve::{Resolution, content_type_for, map_request_path, resolve};

/// How long [`ServerHandle::shutdown`] waits for open connections to drain.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Settings for one static server instance.
#[derive(Debug, Clone)]
pub struct StaticServerOptions {
    /// Directory to serve.
    pub root_dir: PathBuf,
    /// Root document file name (e.g. `index.html`).
    pub index_file: String,
    /// First port to try.
    pub preferred_port: u16,
    /// Number of consecutive ports to try.
    pub max_port_attempts: u16,
    /// In-memory root document.
    ///
    /// When set, every response that would be the root document uses these
    /// bytes instead of reading disk, and so does any request landing on a
    /// file named `index_file` (previously written snapshots). The pipeline
    /// uses this to keep booting routes from the pristine template.
    pub index_override: Option<Bytes>,
}

impl StaticServerOptions {
    /// Options for serving `root_dir` with defaults for everything else.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            index_file: "index.html".into(),
            preferred_port: 4173,
            max_port_attempts: 100,
            index_override: None,
        }
    }

    /// Serve `document` wherever the root document would be served.
    pub fn with_index_override(mut self, document: impl Into<Bytes>) -> Self {
        self.index_override = Some(document.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Port selection
// ---------------------------------------------------------------------------

/// Bind `127.0.0.1:<port>`, moving to the next port while the address is in use.
///
/// Any bind error other than "address in use" is returned immediately.
pub async fn bind_with_fallback(preferred: u16, max_attempts: u16) -> Result<TcpListener> {
    let attempts = max_attempts.max(1);
    let last = preferred.saturating_add(attempts - 1);

    let mut port = preferred;
    loop {
        match TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await {
            Ok(listener) => {
                if port != preferred {
                    debug!(preferred, port, "preferred port busy, bound next free port");
                }
                return Ok(listener);
            }
            Err(e) if e.kind() == ErrorKind::AddrInUse && port < last => {
                debug!(port, "port in use, trying next");
                port += 1;
            }
            Err(e) if e.kind() == ErrorKind::AddrInUse => {
                return Err(PrerenderError::PortExhausted {
                    first: preferred,
                    last,
                });
            }
            Err(e) => {
                return Err(PrerenderError::Server(format!("bind 127.0.0.1:{port}: {e}")));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

struct ServeState {
    root_dir: PathBuf,
    index_file: String,
    index_override: Option<Bytes>,
}

/// A running static server. Dropping the handle signals shutdown; call
/// [`ServerHandle::shutdown`] to also wait for the socket to close.
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<std::io::Result<()>>>,
}

impl ServerHandle {
    /// Bind a port and start serving in the background.
    #[instrument(skip_all, fields(root = %options.root_dir.display()))]
    pub async fn start(options: StaticServerOptions) -> Result<Self> {
        let listener = bind_with_fallback(options.preferred_port, options.max_port_attempts).await?;
        let addr = listener
            .local_addr()
            .map_err(|e| PrerenderError::Server(format!("local address: {e}")))?;

        let state = Arc::new(ServeState {
            root_dir: options.root_dir,
            index_file: options.index_file,
            index_override: options.index_override,
        });
        let app = router(state);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        info!(port = addr.port(), "static server listening");

        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    /// Port the server is bound to.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base URL without a trailing slash, e.g. `http://127.0.0.1:4173`.
    ///
    /// Always the bound IPv4 address, never `localhost`: that name may resolve
    /// to `::1`, which this server does not hold.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Stop accepting connections and wait for the listening socket to close.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let Some(mut task) = self.task.take() else {
            return;
        };

        match tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await {
            Ok(Ok(Ok(()))) => debug!(port = self.addr.port(), "static server stopped"),
            Ok(Ok(Err(e))) => warn!(error = %e, "static server exited with error"),
            Ok(Err(e)) => warn!(error = %e, "static server task failed"),
            Err(_) => {
                warn!("static server did not drain in time, aborting");
                task.abort();
            }
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn router(state: Arc<ServeState>) -> Router {
    Router::new()
        .route("/", get(serve_root))
        .route("/{*path}", get(serve_path))
        .with_state(state)
}

async fn serve_root(State(state): State<Arc<ServeState>>) -> Response {
    respond(&state, "/").await
}

async fn serve_path(
    State(state): State<Arc<ServeState>>,
    UrlPath(path): UrlPath<String>,
) -> Response {
    respond(&state, &path).await
}

async fn respond(state: &ServeState, request_path: &str) -> Response {
    let resolution = resolve(&state.root_dir, &state.index_file, request_path).await;
    debug!(path = request_path, ?resolution, "resolved request");

    if let Resolution::File(path) = resolution {
        let is_snapshot = path.file_name().and_then(|n| n.to_str()) == Some(state.index_file.as_str());
        if !(is_snapshot && state.index_override.is_some()) {
            match tokio::fs::read(&path).await {
                Ok(bytes) => return file_response(content_type_for(&path), Bytes::from(bytes)),
                Err(e) => debug!(path = %path.display(), error = %e, "falling back to root document"),
            }
        }
    }

    root_document(state).await
}

async fn root_document(state: &ServeState) -> Response {
    if let Some(bytes) = &state.index_override {
        return file_response("text/html; charset=utf-8", bytes.clone());
    }

    let index = state.root_dir.join(&state.index_file);
    match tokio::fs::read(&index).await {
        Ok(bytes) => file_response(content_type_for(&index), Bytes::from(bytes)),
        Err(e) => {
            warn!(path = %index.display(), error = %e, "root document unavailable");
            (StatusCode::NOT_FOUND, "Not Found").into_response()
        }
    }
}

fn file_response(content_type: &'static str, bytes: Bytes) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, "no-store")
        .body(Body::from(bytes))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    const INDEX: &str = r#"<!doctype html><html><head><title>Shell</title></head><body><div id="root"></div></body></html>"#;

    fn build_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        std::fs::create_dir_all(root.join("assets")).unwrap();
        std::fs::write(root.join("index.html"), INDEX).unwrap();
        std::fs::write(root.join("assets/app.js"), "console.log('app')").unwrap();
        std::fs::write(root.join("assets/app.css"), "body{}").unwrap();
        dir
    }

    async fn start(dir: &tempfile::TempDir) -> ServerHandle {
        let mut options = StaticServerOptions::new(dir.path());
        options.preferred_port = 0;
        ServerHandle::start(options).await.expect("server start")
    }

    #[tokio::test]
    async fn serves_assets_with_content_type() {
        let dir = build_dir();
        let server = start(&dir).await;

        let resp = reqwest::get(format!("{}/assets/app.js", server.base_url()))
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(
            resp.headers()[reqwest::header::CONTENT_TYPE],
            "text/javascript; charset=utf-8"
        );
        assert_eq!(resp.text().await.unwrap(), "console.log('app')");

        let resp = reqwest::get(format!("{}/assets/app.css", server.base_url()))
            .await
            .unwrap();
        assert_eq!(resp.headers()[reqwest::header::CONTENT_TYPE], "text/css; charset=utf-8");

        server.shutdown().await;
    }

    #[tokio::test]
    async fn client_route_falls_back_to_root_document() {
        let dir = build_dir();
        let server = start(&dir).await;

        let resp = reqwest::get(format!("{}/services/tv-mounting", server.base_url()))
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(
            resp.headers()[reqwest::header::CONTENT_TYPE],
            "text/html; charset=utf-8"
        );
        assert_eq!(resp.text().await.unwrap(), INDEX);

        server.shutdown().await;
    }

    #[tokio::test]
    async fn missing_asset_falls_back_to_root_document() {
        let dir = build_dir();
        let server = start(&dir).await;

        let resp = reqwest::get(format!("{}/assets/missing.css", server.base_url()))
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.text().await.unwrap(), INDEX);

        server.shutdown().await;
    }

    #[tokio::test]
    async fn missing_root_document_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let server = start(&dir).await;

        let resp = reqwest::get(format!("{}/plumbing", server.base_url()))
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);

        server.shutdown().await;
    }

    #[tokio::test]
    async fn index_override_shadows_snapshots() {
        let dir = build_dir();
        std::fs::create_dir_all(dir.path().join("plumbing")).unwrap();
        std::fs::write(dir.path().join("plumbing/index.html"), "old snapshot").unwrap();

        let mut options =
            StaticServerOptions::new(dir.path()).with_index_override("<html>pristine</html>");
        options.preferred_port = 0;
        let server = ServerHandle::start(options).await.unwrap();

        for path in ["/", "/index.html", "/plumbing", "/plumbing/index.html"] {
            let body = reqwest::get(format!("{}{path}", server.base_url()))
                .await
                .unwrap()
                .text()
                .await
                .unwrap();
            assert_eq!(body, "<html>pristine</html>", "path {path}");
        }

        // Non-document assets are still read from disk.
        let body = reqwest::get(format!("{}/assets/app.js", server.base_url()))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "console.log('app')");

        server.shutdown().await;
    }

    #[tokio::test]
    async fn busy_preferred_port_moves_to_next() {
        let blocker = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let busy = blocker.local_addr().unwrap().port();

        let listener = bind_with_fallback(busy, 50).await.expect("fallback bind");
        let bound = listener.local_addr().unwrap().port();
        assert!(bound > busy, "bound {bound}, busy {busy}");
    }

    #[tokio::test]
    async fn single_attempt_on_busy_port_is_exhaustion() {
        let blocker = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let busy = blocker.local_addr().unwrap().port();

        let err = bind_with_fallback(busy, 1).await.unwrap_err();
        assert!(matches!(err, PrerenderError::PortExhausted { first, last } if first == busy && last == busy));
    }

    #[tokio::test]
    async fn base_url_targets_bound_address() {
        let dir = build_dir();
        let server = start(&dir).await;

        assert_eq!(server.base_url(), format!("http://127.0.0.1:{}", server.port()));
        assert!(!server.base_url().contains("localhost"));

        server.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_releases_port() {
        let dir = build_dir();
        let server = start(&dir).await;
        let port = server.port();
        server.shutdown().await;

        let rebound = TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await;
        assert!(rebound.is_ok());
    }
}
