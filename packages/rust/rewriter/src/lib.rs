//! HTML rewriter and snapshot writer.
//!
//! This crate provides:
//! - [`Template`] — the build's root document, validated and kept pristine
//! - [`SnapshotWriter`] — splices a [`RenderResult`] into the template and
//!   writes the per-route document atomically
//!
//! [`RenderResult`]: prerender_shared::RenderResult

pub mod template;
pub mod writer;

pub use template::{TEMPLATE_STASH_NAME, Template, TemplateSource};
pub use writer::{SnapshotWriter, output_path};
