//! EPUB package handling: archive, package document, navigation, relinking.

pub mod archive;
pub mod manifest;
pub mod nav;
mod ncx;
pub mod opf;
pub mod relink;

pub use archive::{WorkDir, extract, locate_root_document, repack};
pub use nav::{NavSource, TocEntry, find_nav_source, generate_ncx, load_toc, parse_nav, parse_ncx};
pub use opf::{ManifestItem, PackageDocument};

/// Result of a recoverable package step (NCX generation, version downgrade).
///
/// These steps never abort the pipeline; a failed outcome is logged and
/// reported instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub ok: bool,
    pub message: String,
}

impl Outcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = if self.ok { "ok" } else { "failed" };
        write!(f, "{status}: {}", self.message)
    }
}
