//! Table-of-contents parsing (NAV and NCX) and NCX generation.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use uuid::Uuid;

use super::Outcome;
use super::manifest::{NCX_FILENAME, update_toc_reference};
use super::ncx::build_ncx;
use super::opf::PackageDocument;
use crate::dom::{Document, Flavor, NodeId};
use crate::error::{Error, Result};
use crate::util::{NCX_MEDIA_TYPE, read_text, resolve_href, split_fragment};

/// An entry in the table of contents.
#[derive(Debug, Clone, PartialEq)]
pub struct TocEntry {
    pub title: String,
    /// Link as written in the navigation document.
    pub href: String,
    /// Absolute path of the target document, fragment removed.
    pub path: PathBuf,
    pub fragment: Option<String>,
    /// Nesting level, starting at 1.
    pub depth: usize,
    pub children: Vec<TocEntry>,
}

impl TocEntry {
    pub fn new(title: impl Into<String>, href: impl Into<String>, base_dir: &Path, depth: usize) -> Self {
        let href = href.into();
        let fragment = split_fragment(&href).1.map(str::to_string);
        Self {
            title: title.into(),
            path: resolve_href(base_dir, &href),
            href,
            fragment,
            depth,
            children: Vec::new(),
        }
    }
}

/// Flatten a nested TOC in document order (parents before children).
pub fn flatten(entries: &[TocEntry]) -> Vec<&TocEntry> {
    let mut out = Vec::new();
    for entry in entries {
        out.push(entry);
        out.extend(flatten(&entry.children));
    }
    out
}

/// Where the table of contents comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavSource {
    /// EPUB 3 navigation document.
    Nav(PathBuf),
    /// EPUB 2 NCX.
    Ncx(PathBuf),
}

impl NavSource {
    pub fn path(&self) -> &Path {
        match self {
            NavSource::Nav(p) | NavSource::Ncx(p) => p,
        }
    }
}

/// Find the navigation document: the `nav` item first, then the NCX.
pub fn find_nav_source(opf: &PackageDocument) -> Option<NavSource> {
    let items = opf.items();

    if let Some(item) = items.iter().find(|item| item.has_property("nav")) {
        let path = opf.resolve(&item.href);
        if path.is_file() {
            return Some(NavSource::Nav(path));
        }
        warn!("navigation document {} does not exist", item.href);
    }

    if let Some(item) = items.iter().find(|item| item.media_type == NCX_MEDIA_TYPE) {
        let path = opf.resolve(&item.href);
        if path.is_file() {
            return Some(NavSource::Ncx(path));
        }
        warn!("NCX {} does not exist", item.href);
    }

    None
}

/// Read the table of contents from whichever source the package has.
///
/// A package without navigation yields an empty list.
pub fn load_toc(opf: &PackageDocument) -> Result<Vec<TocEntry>> {
    match find_nav_source(opf) {
        Some(source) => read_toc(&source),
        None => Ok(Vec::new()),
    }
}

fn read_toc(source: &NavSource) -> Result<Vec<TocEntry>> {
    let path = source.path();
    let base_dir = path.parent().unwrap_or(Path::new(""));
    let text = read_text(path)?;
    let entries = match source {
        NavSource::Nav(_) => {
            let doc = Document::parse_content(&text, &path.display().to_string());
            parse_nav(&doc, base_dir)
        }
        NavSource::Ncx(_) => {
            let doc = Document::parse_xml(&text, Flavor::Xml).map_err(|e| Error::parse(path, e))?;
            parse_ncx(&doc, base_dir)
        }
    };
    debug!("{}: {} top-level TOC entries", path.display(), entries.len());
    Ok(entries)
}

// ----------------------------------------------------------------------------
// NAV
// ----------------------------------------------------------------------------

/// Parse the `toc` nav of an EPUB 3 navigation document.
pub fn parse_nav(doc: &Document, base_dir: &Path) -> Vec<TocEntry> {
    let mut entries = Vec::new();
    let Some(nav) = find_toc_nav(doc) else {
        return entries;
    };
    let root_list = doc
        .descendants(nav)
        .into_iter()
        .find(|&id| is_list(doc, id));
    if let Some(list) = root_list {
        walk_list(doc, list, base_dir, 1, &mut entries);
    }
    entries
}

fn find_toc_nav(doc: &Document) -> Option<NodeId> {
    let navs = doc.find_all(doc.root(), "nav");
    let by_type = navs.iter().copied().find(|&id| {
        doc.attr(id, "epub:type")
            .is_some_and(|t| t.split_ascii_whitespace().any(|token| token == "toc"))
    });
    by_type
        .or_else(|| {
            navs.iter()
                .copied()
                .find(|&id| doc.attr(id, "role") == Some("doc-toc"))
        })
        .or_else(|| navs.iter().copied().find(|&id| doc.attr(id, "id") == Some("toc")))
}

fn is_list(doc: &Document, id: NodeId) -> bool {
    doc.is_named(id, "ol") || doc.is_named(id, "ul")
}

fn walk_list(doc: &Document, list: NodeId, base_dir: &Path, depth: usize, out: &mut Vec<TocEntry>) {
    for li in doc.children(list).filter(|&id| doc.is_named(id, "li")) {
        let mut link = None;
        let mut nested = Vec::new();
        scan_item(doc, li, &mut link, &mut nested);

        match link {
            Some(a) => {
                let href = doc.attr(a, "href").unwrap_or_default();
                let mut entry = TocEntry::new(collapse_whitespace(&doc.text_content(a)), href, base_dir, depth);
                for sublist in nested {
                    walk_list(doc, sublist, base_dir, depth + 1, &mut entry.children);
                }
                out.push(entry);
            }
            // A heading-only item: its sublists belong to the current level
            None => {
                for sublist in nested {
                    walk_list(doc, sublist, base_dir, depth, out);
                }
            }
        }
    }
}

/// Find the item's own link and its nested lists without entering those lists.
fn scan_item(doc: &Document, id: NodeId, link: &mut Option<NodeId>, nested: &mut Vec<NodeId>) {
    for child in doc.children(id) {
        if is_list(doc, child) {
            nested.push(child);
        } else if link.is_none() && doc.is_named(child, "a") && doc.attr(child, "href").is_some() {
            *link = Some(child);
        } else {
            scan_item(doc, child, link, nested);
        }
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ----------------------------------------------------------------------------
// NCX
// ----------------------------------------------------------------------------

/// Parse the `navMap` of an NCX into nested entries.
pub fn parse_ncx(doc: &Document, base_dir: &Path) -> Vec<TocEntry> {
    let mut entries = Vec::new();
    if let Some(nav_map) = doc.find_first(doc.root(), "navMap") {
        walk_nav_points(doc, nav_map, base_dir, 1, &mut entries);
    }
    entries
}

fn walk_nav_points(doc: &Document, parent: NodeId, base_dir: &Path, depth: usize, out: &mut Vec<TocEntry>) {
    for point in doc.children(parent).filter(|&id| doc.is_named(id, "navPoint")) {
        let title = doc
            .child_named(point, "navLabel")
            .and_then(|label| doc.find_first(label, "text"))
            .map(|text| collapse_whitespace(&doc.text_content(text)))
            .unwrap_or_default();
        let src = doc
            .child_named(point, "content")
            .and_then(|content| doc.attr(content, "src"));

        match src {
            Some(src) => {
                let mut entry = TocEntry::new(title, src, base_dir, depth);
                walk_nav_points(doc, point, base_dir, depth + 1, &mut entry.children);
                out.push(entry);
            }
            None => walk_nav_points(doc, point, base_dir, depth, out),
        }
    }
}

// ----------------------------------------------------------------------------
// Generation
// ----------------------------------------------------------------------------

/// Write `toc.ncx` next to the package document from its navigation source.
///
/// An existing `toc.ncx` is left alone. Never fails past this boundary;
/// problems come back as a failed [`Outcome`].
pub fn generate_ncx(opf: &mut PackageDocument) -> Outcome {
    let ncx_path = opf.dir().join(NCX_FILENAME);
    if ncx_path.exists() {
        info!("{NCX_FILENAME} already exists, skipping generation");
        return Outcome::success("skipped");
    }

    match write_ncx(opf, &ncx_path) {
        Ok(count) => {
            info!("generated {NCX_FILENAME} with {count} entries");
            Outcome::success(format!("generated {NCX_FILENAME} with {count} entries"))
        }
        Err(err) => {
            warn!("NCX generation failed: {err}");
            Outcome::failure(format!("NCX generation failed: {err}"))
        }
    }
}

fn write_ncx(opf: &mut PackageDocument, ncx_path: &Path) -> Result<usize> {
    let source = find_nav_source(opf)
        .ok_or_else(|| Error::Conversion("no navigation document found".into()))?;
    let entries = read_toc(&source)?;

    let uid = opf
        .identifier()
        .unwrap_or_else(|| format!("urn:uuid:{}", Uuid::new_v4()));
    let title = opf.title().unwrap_or_else(|| "Unknown Title".to_string());

    let content = build_ncx(&uid, &title, &entries, opf.dir());
    fs::write(ncx_path, content)?;
    update_toc_reference(opf);

    Ok(flatten(&entries).len())
}
