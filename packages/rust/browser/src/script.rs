//! JavaScript expressions evaluated inside the page.
//!
//! Each builder returns a self-contained expression whose value is
//! JSON-serializable. Selectors are embedded as JSON string literals.

/// Embed `value` as a JavaScript string literal.
fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_owned()).to_string()
}

/// `true` once an element matches `selector`.
pub fn mount_exists(selector: &str) -> String {
    format!("document.querySelector({}) !== null", js_string(selector))
}

/// Inner HTML of the first element matching `selector`, or `""` when absent.
pub fn mount_inner_html(selector: &str) -> String {
    format!(
        "(document.querySelector({}) || {{ innerHTML: \"\" }}).innerHTML",
        js_string(selector)
    )
}

/// Array of `{ tag, src, rel, outer_html }` for every child of `document.head`.
pub const HEAD_CHILDREN: &str = r#"Array.from(document.head ? document.head.children : []).map(function (el) { return {
  tag: el.tagName.toLowerCase(),
  src: el.hasAttribute("src") ? el.getAttribute("src") : null,
  rel: el.hasAttribute("rel") ? el.getAttribute("rel") : null,
  outer_html: el.outerHTML,
}; })"#;
