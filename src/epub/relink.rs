//! Rewrite references to files that were merged away or renamed.
//!
//! `moves` maps an old absolute path to the path that now holds its content.
//! Fragments are preserved, so `ch1b.xhtml#note` becomes `ch1.xhtml#note`
//! once `ch1b` has been absorbed into `ch1`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use super::opf::PackageDocument;
use crate::dom::{Document, Flavor, NodeId};
use crate::error::{Error, Result};
use crate::transform::css::rewrite_css_urls;
use crate::util::{
    NCX_MEDIA_TYPE, is_content_media_type, is_external_href, read_text, relative_href,
    resolve_href, split_fragment,
};

/// Attributes that can carry a link to another package file.
const LINK_ATTRS: &[&str] = &["href", "src", "xlink:href"];

/// Rewrite every reference to a moved file across the package.
///
/// Content documents, the NCX, stylesheets and the OPF guide are updated.
/// Files are rewritten on disk; the OPF is only changed in memory.
/// Returns the number of references changed.
pub fn relink_references(
    opf: &mut PackageDocument,
    moves: &HashMap<PathBuf, PathBuf>,
) -> Result<usize> {
    if moves.is_empty() {
        return Ok(0);
    }
    let mut total = 0;

    for item in opf.items() {
        let path = opf.resolve(&item.href);
        if !path.is_file() {
            continue;
        }
        let dir = path.parent().unwrap_or(Path::new("")).to_path_buf();

        let changed = if is_content_media_type(&item.media_type) {
            let text = read_text(&path)?;
            let mut doc = Document::parse_content(&text, &item.href);
            let root = doc.root();
            let changed = relink_subtree(&mut doc, root, &dir, moves);
            if changed > 0 {
                fs::write(&path, doc.serialize())?;
            }
            changed
        } else if item.media_type == NCX_MEDIA_TYPE {
            let text = read_text(&path)?;
            let mut doc =
                Document::parse_xml(&text, Flavor::Xml).map_err(|e| Error::parse(&path, e))?;
            let root = doc.root();
            let changed = relink_subtree(&mut doc, root, &dir, moves);
            if changed > 0 {
                fs::write(&path, doc.serialize())?;
            }
            changed
        } else if item.media_type == "text/css" {
            let text = read_text(&path)?;
            let (rewritten, changed) = relink_css(&text, &dir, moves);
            if changed > 0 {
                fs::write(&path, rewritten)?;
            }
            changed
        } else {
            0
        };

        if changed > 0 {
            debug!("{}: relinked {changed} references", item.href);
        }
        total += changed;
    }

    let opf_dir = opf.dir().to_path_buf();
    let package = opf.package_element();
    let doc = opf.document_mut();
    if let Some(guide) = doc.child_named(package, "guide") {
        total += relink_subtree(doc, guide, &opf_dir, moves);
    }

    Ok(total)
}

/// Rewrite link attributes under `id` whose target is in `moves`.
pub fn relink_subtree(
    doc: &mut Document,
    id: NodeId,
    base_dir: &Path,
    moves: &HashMap<PathBuf, PathBuf>,
) -> usize {
    let mut changed = 0;
    for node in doc.descendants(id) {
        for name in LINK_ATTRS {
            let Some(value) = doc.attr(node, name) else {
                continue;
            };
            if is_local_reference(value).is_none() {
                continue;
            }
            let (_, fragment) = split_fragment(value);
            let target = resolve_href(base_dir, value);
            if let Some(new_target) = moves.get(&target) {
                let href = with_fragment(relative_href(base_dir, new_target), fragment);
                doc.set_attr(node, name, href);
                changed += 1;
            }
        }
    }
    changed
}

/// Re-express relative links under `id` so they resolve the same from `to_dir`
/// as they did from `from_dir`. Used when nodes move between documents.
pub fn rebase_subtree(doc: &mut Document, id: NodeId, from_dir: &Path, to_dir: &Path) -> usize {
    if from_dir == to_dir {
        return 0;
    }
    let mut changed = 0;
    for node in std::iter::once(id).chain(doc.descendants(id)) {
        for name in LINK_ATTRS {
            let Some(value) = doc.attr(node, name) else {
                continue;
            };
            if is_local_reference(value).is_none() {
                continue;
            }
            let (_, fragment) = split_fragment(value);
            let target = resolve_href(from_dir, value);
            let href = with_fragment(relative_href(to_dir, &target), fragment);
            doc.set_attr(node, name, href);
            changed += 1;
        }
    }
    changed
}

/// The path part of an href that points at another file in the package.
fn is_local_reference(href: &str) -> Option<&str> {
    let (path, _) = split_fragment(href);
    if path.is_empty() || is_external_href(href) || href.starts_with('/') {
        return None;
    }
    Some(path)
}

fn with_fragment(mut href: String, fragment: Option<&str>) -> String {
    if let Some(fragment) = fragment {
        href.push('#');
        href.push_str(fragment);
    }
    href
}

/// Rewrite `url(...)` references in a stylesheet.
pub fn relink_css(css: &str, base_dir: &Path, moves: &HashMap<PathBuf, PathBuf>) -> (String, usize) {
    rewrite_css_urls(css, |url| {
        is_local_reference(url)?;
        let (_, fragment) = split_fragment(url);
        moves
            .get(&resolve_href(base_dir, url))
            .map(|new_target| with_fragment(relative_href(base_dir, new_target), fragment))
    })
}
