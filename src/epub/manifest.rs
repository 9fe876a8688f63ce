//! In-place edits of the package document and content-document heads.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use uuid::Uuid;

use super::Outcome;
use super::opf::PackageDocument;
use crate::dom::{Attribute, Document, NodeId};
use crate::error::Result;
use crate::util::{NCX_MEDIA_TYPE, media_type_for_path};

/// Manifest id given to an installed stylesheet.
pub const STYLESHEET_ID: &str = "sesame-css";
/// File name of a generated NCX, relative to the package document.
pub const NCX_FILENAME: &str = "toc.ncx";
const NCX_ID: &str = "ncx";
const BOOK_ID: &str = "BookId";
const OPF_NAMESPACE: &str = "http://www.idpf.org/2007/opf";

/// Drop `page-progression-direction` from the spine. Returns whether it was present.
pub fn remove_reading_direction(opf: &mut PackageDocument) -> bool {
    let spine = opf.spine_element();
    opf.document_mut()
        .remove_attr(spine, "page-progression-direction")
        .is_some()
}

/// Remove every `text/css` manifest item and return the files they pointed at.
///
/// The files themselves are left on disk.
pub fn prune_stylesheet_references(opf: &mut PackageDocument) -> Vec<PathBuf> {
    let mut removed = Vec::new();
    for item in opf.items() {
        if item.media_type == "text/css" {
            removed.push(opf.resolve(&item.href));
            opf.document_mut().detach(item.node);
        }
    }
    removed
}

/// Add a stylesheet item pointing at `href` (relative to the OPF). Returns its id.
pub fn register_stylesheet(opf: &mut PackageDocument, href: &str) -> String {
    let id = opf.unique_id(STYLESHEET_ID);
    opf.add_item(&id, href, "text/css");
    id
}

/// Replace every `<style>` and stylesheet `<link>` in the head with one link to `href`.
pub fn relink_stylesheet(doc: &mut Document, href: &str) {
    let head = match doc.head() {
        Some(head) => head,
        None => {
            let Some(html) = doc.document_element() else {
                return;
            };
            let head = doc.create_element("head", vec![]);
            match doc.children(html).next() {
                Some(first) => doc.insert_before(first, head),
                None => doc.append(html, head),
            }
            head
        }
    };

    for child in doc.child_vec(head) {
        let is_style = doc.is_named(child, "style");
        let is_stylesheet = doc.is_named(child, "link")
            && doc
                .attr(child, "rel")
                .is_some_and(|rel| rel.to_ascii_lowercase().contains("stylesheet"));
        if is_style || is_stylesheet {
            doc.detach(child);
        }
    }

    let link = doc.create_element(
        "link",
        vec![
            Attribute::new("href", href),
            Attribute::new("rel", "stylesheet"),
            Attribute::new("type", "text/css"),
        ],
    );
    doc.append(head, link);
}

/// Point the manifest and spine at a single `toc.ncx` item. Returns the item id.
pub fn update_toc_reference(opf: &mut PackageDocument) -> String {
    for item in opf.items() {
        if item.media_type == NCX_MEDIA_TYPE {
            opf.document_mut().detach(item.node);
        }
    }
    let id = opf.unique_id(NCX_ID);
    opf.add_item(&id, NCX_FILENAME, NCX_MEDIA_TYPE);
    let spine = opf.spine_element();
    opf.document_mut().set_attr(spine, "toc", id.as_str());
    id
}

/// Rewrite the package as EPUB 2.0.
///
/// Never fails past this boundary; problems come back as a failed [`Outcome`].
pub fn downgrade_to_version2(opf: &mut PackageDocument) -> Outcome {
    if opf.version().is_some_and(|v| v.starts_with('2')) {
        return Outcome::success("skipped: package is already EPUB 2");
    }
    match downgrade(opf) {
        Ok(()) => {
            info!("downgraded package to EPUB 2.0");
            Outcome::success("converted to EPUB 2.0")
        }
        Err(err) => {
            warn!("EPUB 2 conversion failed: {err}");
            Outcome::failure(format!("EPUB 2 conversion failed: {err}"))
        }
    }
}

fn downgrade(opf: &mut PackageDocument) -> Result<()> {
    let package = opf.package_element();
    let old_unique = opf.document().attr(package, "unique-identifier").map(str::to_string);

    {
        let doc = opf.document_mut();
        // namespace declarations and language hints survive the rewrite
        let kept: Vec<Attribute> = doc
            .attrs(package)
            .iter()
            .filter(|a| a.name.starts_with("xmlns:") || a.name == "xml:lang" || a.name == "dir")
            .cloned()
            .collect();
        if let Some(node) = doc.get_mut(package)
            && let crate::dom::NodeData::Element { attrs, .. } = &mut node.data
        {
            attrs.clear();
            attrs.push(Attribute::new("version", "2.0"));
            attrs.push(Attribute::new("unique-identifier", BOOK_ID));
            attrs.push(Attribute::new("xmlns", OPF_NAMESPACE));
            attrs.extend(kept);
        }

        for node in doc.descendants(doc.root()) {
            doc.remove_attr(node, "prefix");
        }
    }

    ensure_book_id(opf, old_unique.as_deref());

    let nav_items: Vec<_> = opf
        .items()
        .into_iter()
        .filter(|item| item.has_property("nav"))
        .collect();
    for item in nav_items {
        let path = opf.resolve(&item.href);
        match fs::remove_file(&path) {
            Ok(()) => debug!("deleted navigation document {}", path.display()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!("navigation document {} already missing", path.display())
            }
            Err(err) => return Err(err.into()),
        }
        opf.document_mut().detach(item.node);
        opf.remove_itemref(&item.id);
    }

    add_cover_meta(opf);
    Ok(())
}

/// Make sure a `dc:identifier` carries `id="BookId"`.
fn ensure_book_id(opf: &mut PackageDocument, old_unique: Option<&str>) {
    let Some(metadata) = opf.metadata_element() else {
        return;
    };
    let doc = opf.document_mut();
    let identifiers = doc.find_all(metadata, "identifier");
    if identifiers.iter().any(|&id| doc.attr(id, "id") == Some(BOOK_ID)) {
        return;
    }

    let target = identifiers
        .iter()
        .copied()
        .find(|&id| old_unique.is_some() && doc.attr(id, "id") == old_unique)
        .or(identifiers.first().copied());

    match target {
        Some(id) => doc.set_attr(id, "id", BOOK_ID),
        None => {
            let identifier = doc.create_element("dc:identifier", vec![Attribute::new("id", BOOK_ID)]);
            doc.append_text(identifier, &format!("urn:uuid:{}", Uuid::new_v4()));
            doc.append(metadata, identifier);
        }
    }
}

/// Add `<meta name="cover">` when the package has a cover image but no such entry.
fn add_cover_meta(opf: &mut PackageDocument) {
    let Some(metadata) = opf.metadata_element() else {
        return;
    };
    let has_cover_meta = opf
        .document()
        .find_all(metadata, "meta")
        .into_iter()
        .any(|id| opf.document().attr(id, "name") == Some("cover"));
    if has_cover_meta {
        return;
    }

    let items = opf.items();
    let cover = items
        .iter()
        .find(|item| item.has_property("cover-image"))
        .or_else(|| {
            items.iter().find(|item| {
                item.media_type.starts_with("image/") && item.id.to_lowercase().contains("cover")
            })
        });
    let Some(cover) = cover else {
        return;
    };

    let doc = opf.document_mut();
    let meta = doc.create_element(
        "meta",
        vec![
            Attribute::new("name", "cover"),
            Attribute::new("content", cover.id.as_str()),
        ],
    );
    doc.append(metadata, meta);
}

/// Rewrite `media-type` values that disagree with the file extension.
pub fn correct_media_types(opf: &mut PackageDocument) -> usize {
    let mut corrected = 0;
    for item in opf.items() {
        let Some(expected) = media_type_for_path(&item.href) else {
            continue;
        };
        // text/html is not a valid OPF core type for .html files; keep xhtml declared as-is
        if expected == "text/html" && item.media_type == "application/xhtml+xml" {
            continue;
        }
        if item.media_type != expected {
            debug!("{}: media-type {} -> {}", item.href, item.media_type, expected);
            opf.document_mut().set_attr(item.node, "media-type", expected);
            corrected += 1;
        }
    }
    corrected
}

/// Point the manifest item for `from` at `to`, updating its media type.
pub fn rename_item(opf: &mut PackageDocument, from: &Path, to: &Path) -> bool {
    let Some(item) = opf.item_by_path(from) else {
        return false;
    };
    let href = opf.href_for(to);
    let node: NodeId = item.node;
    let doc = opf.document_mut();
    doc.set_attr(node, "href", href.as_str());
    if let Some(media_type) = media_type_for_path(&href) {
        doc.set_attr(node, "media-type", media_type);
    }
    true
}
