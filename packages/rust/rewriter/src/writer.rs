//! Per-route snapshot output.

use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use prerender_shared::{OutputDocument, PrerenderError, RenderResult, RenderStage, Result, Route};

use crate::template::Template;

/// Snapshot file for `route`.
///
/// The root route maps to the index document itself; every other route maps
/// to `<dist>/<segments>/index.html`.
pub fn output_path(dist_dir: &Path, index_file: &str, route: &Route) -> PathBuf {
    if route.is_root() {
        return dist_dir.join(index_file);
    }
    let mut path = dist_dir.to_path_buf();
    path.extend(route.segments());
    path.join("index.html")
}

/// Writes rendered routes into the output directory.
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    template: Template,
    dist_dir: PathBuf,
    index_file: String,
}

impl SnapshotWriter {
    pub fn new(
        template: Template,
        dist_dir: impl Into<PathBuf>,
        index_file: impl Into<String>,
    ) -> Self {
        Self {
            template,
            dist_dir: dist_dir.into(),
            index_file: index_file.into(),
        }
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    /// Render `result` into the template and write the route's snapshot.
    ///
    /// An empty `root_markup` is a [`RenderStage::Content`] failure and writes
    /// nothing. Every other failure is tagged [`RenderStage::Write`].
    #[instrument(skip_all, fields(route = %route))]
    pub fn write(&self, route: &Route, result: &RenderResult) -> Result<OutputDocument> {
        if result.root_markup.trim().is_empty() {
            return Err(PrerenderError::render(
                route.as_str(),
                RenderStage::Content,
                "refusing to write a snapshot with an empty mount node",
            ));
        }

        let write_failed = |e: PrerenderError| {
            PrerenderError::render(route.as_str(), RenderStage::Write, e.to_string())
        };

        let html = self.template.render(result).map_err(write_failed)?;
        let path = output_path(&self.dist_dir, &self.index_file, route);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| write_failed(PrerenderError::io(parent, e)))?;
        }
        write_atomic(&path, html.as_bytes())
            .map_err(|e| write_failed(PrerenderError::io(&path, e)))?;

        let sha256 = format!("{:x}", Sha256::digest(html.as_bytes()));
        debug!(path = %path.display(), size = html.len(), "wrote snapshot");

        Ok(OutputDocument {
            route: route.clone(),
            path,
            sha256,
            size_bytes: html.len(),
        })
    }
}

/// Write `bytes` to a sibling temp file, then rename it over `path`.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = path.with_file_name(format!(".{name}.tmp"));

    let written = std::fs::File::create(&temp).and_then(|mut file| {
        file.write_all(bytes)?;
        file.sync_all()
    });
    if let Err(e) = written.and_then(|()| std::fs::rename(&temp, path)) {
        let _ = std::fs::remove_file(&temp);
        return Err(e);
    }
    Ok(())
}
