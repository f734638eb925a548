//! Request path → file resolution with single-page-application fallback.
//!
//! Resolution order:
//! 1. Map the request path onto the root directory (`/` is the root document).
//! 2. A directory resolves to its index file.
//! 3. A path without an extension is a client route → root document.
//! 4. Anything that cannot be read falls back to the root document
//!    (handled by the caller when the read fails).

use std::path::{Component, Path, PathBuf};

/// Where a request should be answered from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Serve the root document.
    Index,
    /// Serve this file, falling back to the root document if it cannot be read.
    File(PathBuf),
}

/// Map a decoded request path to a file under `root`.
///
/// Returns `None` when the request targets the root document directly or
/// tries to leave `root` (`..`, absolute components).
pub fn map_request_path(root: &Path, request_path: &str) -> Option<PathBuf> {
    let relative = request_path.trim_start_matches('/');
    if relative.is_empty() {
        return None;
    }

    let mut mapped = root.to_path_buf();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => mapped.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    if mapped == root { None } else { Some(mapped) }
}

/// Resolve a request path against `root`, consulting the filesystem only to
/// detect directories.
pub async fn resolve(root: &Path, index_file: &str, request_path: &str) -> Resolution {
    let Some(mut path) = map_request_path(root, request_path) else {
        return Resolution::Index;
    };

    if tokio::fs::metadata(&path)
        .await
        .map(|meta| meta.is_dir())
        .unwrap_or(false)
    {
        path.push(index_file);
    }

    if path.extension().is_none() {
        return Resolution::Index;
    }

    Resolution::File(path)
}

/// Content-Type for a served file, from its extension.
///
/// Only the artifact types a bundle is made of are distinguished; anything
/// else is served as plain text.
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match ext.as_deref() {
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("js" | "mjs") => "text/javascript; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("json") => "application/json",
        _ => "text/plain; charset=utf-8",
    }
}
