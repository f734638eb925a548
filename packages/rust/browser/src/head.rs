//! Head metadata extraction.
//!
//! Every `<head>` child present after rendering is kept verbatim, except the
//! two kinds of tags the bundler injects: external scripts and module
//! preload hints. Copying those into a snapshot would load the bundle twice.

use serde::Deserialize;

/// One child element of `document.head`, as reported by the page.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HeadElement {
    /// Lowercase tag name.
    pub tag: String,
    /// Value of the `src` attribute, if present.
    #[serde(default)]
    pub src: Option<String>,
    /// Value of the `rel` attribute, if present.
    #[serde(default)]
    pub rel: Option<String>,
    /// Serialized element, exactly as the browser produced it.
    pub outer_html: String,
}

impl HeadElement {
    /// Whether this element is a bundler artifact that must not be copied.
    pub fn is_bundler_artifact(&self) -> bool {
        match self.tag.to_ascii_lowercase().as_str() {
            "script" => self.src.is_some(),
            "link" => self.rel.as_deref().is_some_and(|rel| {
                rel.split_ascii_whitespace()
                    .any(|token| token.eq_ignore_ascii_case("modulepreload"))
            }),
            _ => false,
        }
    }
}

/// Serialize the head children worth keeping, in document order.
pub fn head_markup(children: &[HeadElement]) -> String {
    children
        .iter()
        .filter(|el| !el.is_bundler_artifact())
        .map(|el| el.outer_html.as_str())
        .collect()
}
