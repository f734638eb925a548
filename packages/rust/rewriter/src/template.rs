//! The build's root HTML document.
//!
//! A template must contain a literal `<head>` element and exactly one element
//! matching the mount selector. Rendering never mutates the stored markup, so
//! one [`Template`] serves the whole batch.
//!
//! The root route's snapshot overwrites the index document, which would make
//! a second run start from already-rendered markup. The first time an index
//! with an empty mount node is seen it is copied to a stash file (by default
//! [`TEMPLATE_STASH_NAME`] inside the build directory); later runs that find a
//! rendered index read the stash instead.

use std::cell::Cell;
use std::fmt;
use std::path::Path;
use std::rc::Rc;

use lol_html::html_content::ContentType;
use lol_html::{RewriteStrSettings, Selector, element, rewrite_str};
use tracing::{debug, info, instrument, warn};

use prerender_shared::{PrerenderError, RenderResult, Result};

use crate::writer::write_atomic;

/// Default file name of the pristine template copy inside the output directory.
pub const TEMPLATE_STASH_NAME: &str = ".prerender-template.html";

/// Where the template markup came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateSource {
    /// The index document, still un-prerendered.
    Index,
    /// The stashed copy from an earlier run.
    Stash,
    /// An already-prerendered index with no stash to fall back on.
    PrerenderedIndex,
}

impl fmt::Display for TemplateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Index => "index",
            Self::Stash => "stash",
            Self::PrerenderedIndex => "prerendered index",
        })
    }
}

/// Validated template markup plus the mount selector it was validated with.
#[derive(Debug, Clone)]
pub struct Template {
    html: String,
    mount_selector: String,
    source: TemplateSource,
}

impl Template {
    /// Validate `html` as a template for `mount_selector`.
    pub fn parse(html: impl Into<String>, mount_selector: &str) -> Result<Self> {
        let html = html.into();
        mount_selector.parse::<Selector>().map_err(|e| {
            PrerenderError::template(format!("invalid mount selector `{mount_selector}`: {e}"))
        })?;

        let (mounts, heads) = count_elements(&html, mount_selector)?;
        if mounts != 1 {
            return Err(PrerenderError::template(format!(
                "expected exactly one `{mount_selector}` element, found {mounts}"
            )));
        }
        if heads != 1 || !html.to_ascii_lowercase().contains("</head>") {
            return Err(PrerenderError::template(
                "template needs exactly one <head> element with a closing tag",
            ));
        }

        Ok(Self {
            html,
            mount_selector: mount_selector.to_string(),
            source: TemplateSource::Index,
        })
    }

    /// Load the template for `dist_dir`, consulting and refreshing the stash
    /// at `stash_path`.
    #[instrument(skip_all, fields(dist = %dist_dir.display()))]
    pub fn load(
        dist_dir: &Path,
        index_file: &str,
        stash_path: &Path,
        mount_selector: &str,
    ) -> Result<Self> {
        let index_path = dist_dir.join(index_file);

        let index_html = std::fs::read_to_string(&index_path)
            .map_err(|e| PrerenderError::io(&index_path, e))?;
        let index = Self::parse(index_html, mount_selector)?;

        let template = if !index.is_prerendered()? {
            if let Some(parent) = stash_path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| PrerenderError::io(parent, e))?;
            }
            write_atomic(stash_path, index.html.as_bytes())
                .map_err(|e| PrerenderError::io(stash_path, e))?;
            debug!(stash = %stash_path.display(), "stashed pristine template");
            index
        } else if stash_path.is_file() {
            let stash_html = std::fs::read_to_string(stash_path)
                .map_err(|e| PrerenderError::io(stash_path, e))?;
            Self {
                source: TemplateSource::Stash,
                ..Self::parse(stash_html, mount_selector)?
            }
        } else {
            warn!(
                index = %index_path.display(),
                "index is already prerendered and no pristine copy exists; using it as-is"
            );
            Self {
                source: TemplateSource::PrerenderedIndex,
                ..index
            }
        };

        info!(source = %template.source, bytes = template.html.len(), "template loaded");
        Ok(template)
    }

    /// Raw template markup.
    pub fn html(&self) -> &str {
        &self.html
    }

    pub fn mount_selector(&self) -> &str {
        &self.mount_selector
    }

    pub fn source(&self) -> TemplateSource {
        self.source
    }

    /// Whether the mount node already holds non-whitespace content.
    pub fn is_prerendered(&self) -> Result<bool> {
        let selector = scraper::Selector::parse(&self.mount_selector).map_err(|e| {
            PrerenderError::template(format!(
                "invalid mount selector `{}`: {e}",
                self.mount_selector
            ))
        })?;
        let document = scraper::Html::parse_document(&self.html);
        Ok(document
            .select(&selector)
            .next()
            .is_some_and(|el| !el.inner_html().trim().is_empty()))
    }

    /// Splice `result` into a copy of the template.
    ///
    /// The mount node's children are replaced by `root_markup`; `head_markup`
    /// is appended as the last children of `<head>`.
    pub fn render(&self, result: &RenderResult) -> Result<String> {
        rewrite_str(
            &self.html,
            RewriteStrSettings {
                element_content_handlers: vec![
                    element!(self.mount_selector, |el| {
                        el.set_inner_content(&result.root_markup, ContentType::Html);
                        Ok(())
                    }),
                    element!("head", |el| {
                        el.append(&result.head_markup, ContentType::Html);
                        Ok(())
                    }),
                ],
                ..RewriteStrSettings::default()
            },
        )
        .map_err(|e| PrerenderError::template(e.to_string()))
    }
}

/// Count elements matching `mount_selector` and `head` in one pass.
fn count_elements(html: &str, mount_selector: &str) -> Result<(usize, usize)> {
    let mounts = Rc::new(Cell::new(0usize));
    let heads = Rc::new(Cell::new(0usize));

    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![
                element!(mount_selector, {
                    let mounts = Rc::clone(&mounts);
                    move |_| {
                        mounts.set(mounts.get() + 1);
                        Ok(())
                    }
                }),
                element!("head", {
                    let heads = Rc::clone(&heads);
                    move |_| {
                        heads.set(heads.get() + 1);
                        Ok(())
                    }
                }),
            ],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(|e| PrerenderError::template(format!("unparseable template: {e}")))?;

    Ok((mounts.get(), heads.get()))
}
