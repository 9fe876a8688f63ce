//! Chapter merging along table-of-contents boundaries.
//!
//! Every TOC entry whose target is in the spine starts a range; the range
//! runs up to the next entry's spine position. All documents of a range are
//! folded into its first document (the anchor) and then removed from the
//! package. Spine documents before the first boundary are left alone.

use std::collections::HashMap;
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::dom::{Document, NodeId};
use crate::epub::nav::{TocEntry, flatten};
use crate::epub::opf::PackageDocument;
use crate::epub::relink::{rebase_subtree, relink_references};
use crate::error::Result;
use crate::util::{read_text, split_fragment};

/// What a merge run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Ranges that absorbed at least one document.
    pub ranges_merged: usize,
    /// `(absorbed, anchor)` pairs in spine order.
    pub absorbed: Vec<(PathBuf, PathBuf)>,
    /// TOC entries whose target was not in the spine.
    pub entries_skipped: usize,
    pub references_updated: usize,
}

/// A document in reading order.
#[derive(Debug, Clone)]
struct SpineDocument {
    id: String,
    path: PathBuf,
}

/// Split `0..len` at `starts`.
///
/// Starts are sorted and de-duplicated first; positions at or past `len` are
/// ignored. The returned ranges are disjoint and together cover
/// `min(starts)..len`.
pub fn merge_ranges(len: usize, starts: &[usize]) -> Vec<Range<usize>> {
    let mut starts: Vec<usize> = starts.iter().copied().filter(|&s| s < len).collect();
    starts.sort_unstable();
    starts.dedup();

    starts
        .iter()
        .enumerate()
        .map(|(i, &start)| start..starts.get(i + 1).copied().unwrap_or(len))
        .collect()
}

/// Whether a TOC entry is on the exclusion list.
///
/// An excluded href may be written as in the navigation document (with or
/// without fragment) or relative to the package document.
fn is_excluded(entry: &TocEntry, opf: &PackageDocument, excluded: &[String]) -> bool {
    let (bare, _) = split_fragment(&entry.href);
    let package_href = opf.href_for(&entry.path);
    excluded.iter().map(|e| e.trim()).any(|e| {
        !e.is_empty() && (e == entry.href || e == bare || e == package_href)
    })
}

fn spine_documents(opf: &PackageDocument) -> Vec<SpineDocument> {
    let nav: Vec<String> = opf
        .items()
        .into_iter()
        .filter(|item| item.has_property("nav"))
        .map(|item| item.id)
        .collect();

    opf.spine_paths()
        .into_iter()
        .filter(|(id, _)| !nav.contains(id))
        .map(|(id, path)| SpineDocument { id, path })
        .collect()
}

/// Merge spine documents that belong to the same TOC entry.
///
/// Absorbed files are deleted and dropped from the manifest and spine,
/// references to them are pointed at their anchor, and the package document
/// is saved.
pub fn merge(
    work_dir: &Path,
    opf: &mut PackageDocument,
    toc: &[TocEntry],
    excluded: &[String],
) -> Result<MergeReport> {
    let mut report = MergeReport::default();
    let entries = flatten(toc);
    if entries.is_empty() {
        warn!("no table of contents entries, skipping merge");
        return Ok(report);
    }

    let spine = spine_documents(opf);
    let mut starts = Vec::new();
    for entry in entries {
        if is_excluded(entry, opf, excluded) {
            debug!("excluded TOC entry {}", entry.href);
            continue;
        }
        match spine.iter().position(|doc| doc.path == entry.path) {
            Some(position) => starts.push(position),
            None => {
                warn!("TOC entry {:?} ({}) is not in the spine", entry.title, entry.href);
                report.entries_skipped += 1;
            }
        }
    }

    for range in merge_ranges(spine.len(), &starts) {
        if range.len() < 2 {
            continue;
        }
        let absorbed = merge_range(work_dir, opf, &spine[range])?;
        if !absorbed.is_empty() {
            report.ranges_merged += 1;
            report.absorbed.extend(absorbed);
        }
    }

    if !report.absorbed.is_empty() {
        let moves: HashMap<PathBuf, PathBuf> = report.absorbed.iter().cloned().collect();
        report.references_updated = relink_references(opf, &moves)?;
        opf.save()?;
    }
    info!(
        "merged {} documents into {} chapters",
        report.absorbed.len(),
        report.ranges_merged
    );
    Ok(report)
}

/// Fold every document after the first into the first. Returns the absorbed pairs.
fn merge_range(
    work_dir: &Path,
    opf: &mut PackageDocument,
    docs: &[SpineDocument],
) -> Result<Vec<(PathBuf, PathBuf)>> {
    let Some((anchor, rest)) = docs.split_first() else {
        return Ok(Vec::new());
    };
    let label = display_path(work_dir, &anchor.path);

    let text = read_text(&anchor.path)?;
    let mut doc = Document::parse_content(&text, &label);
    let Some(body) = doc.body() else {
        warn!("{label} has no body, leaving its range unmerged");
        return Ok(Vec::new());
    };
    let anchor_dir = anchor.path.parent().unwrap_or(Path::new("")).to_path_buf();

    let mut absorbed = Vec::new();
    for sub in rest {
        if sub.path == anchor.path {
            continue;
        }
        let sub_label = display_path(work_dir, &sub.path);
        let sub_text = read_text(&sub.path)?;
        let sub_doc = Document::parse_content(&sub_text, &sub_label);
        let Some(sub_body) = sub_doc.body() else {
            warn!("{sub_label} has no body, stopping merge into {label}");
            break;
        };
        let sub_dir = sub.path.parent().unwrap_or(Path::new(""));

        append_separator(&mut doc, body);
        for child in sub_doc.children(sub_body) {
            if sub_doc.is_named(child, "script") {
                continue;
            }
            let copy = doc.import_subtree(&sub_doc, child);
            rebase_subtree(&mut doc, copy, sub_dir, &anchor_dir);
            doc.append(body, copy);
        }

        fs::remove_file(&sub.path)?;
        opf.remove_item(&sub.id);
        opf.remove_itemref(&sub.id);
        debug!("merged {sub_label} into {label}");
        absorbed.push((sub.path.clone(), anchor.path.clone()));
    }

    if !absorbed.is_empty() {
        fs::write(&anchor.path, doc.serialize())?;
    }
    Ok(absorbed)
}

/// A blank paragraph, a rule, another blank paragraph.
fn append_separator(doc: &mut Document, body: NodeId) {
    let before = blank_paragraph(doc);
    doc.append(body, before);
    let rule = doc.create_element("hr", vec![]);
    doc.append(body, rule);
    let after = blank_paragraph(doc);
    doc.append(body, after);
}

fn blank_paragraph(doc: &mut Document) -> NodeId {
    let p = doc.create_element("p", vec![]);
    let br = doc.create_element("br", vec![]);
    doc.append(p, br);
    p
}

fn display_path(work_dir: &Path, path: &Path) -> String {
    path.strip_prefix(work_dir)
        .unwrap_or(path)
        .display()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_merge_ranges() {
        assert_eq!(merge_ranges(5, &[0, 2]), vec![0..2, 2..5]);
        assert_eq!(merge_ranges(5, &[3, 1, 3]), vec![1..3, 3..5]);
        assert_eq!(merge_ranges(3, &[]), Vec::<Range<usize>>::new());
        assert_eq!(merge_ranges(3, &[2, 7]), vec![2..3]);
    }

    proptest! {
        #[test]
        fn ranges_partition_spine(len in 1usize..40, starts in proptest::collection::vec(0usize..40, 0..12)) {
            let ranges = merge_ranges(len, &starts);
            let valid: Vec<usize> = starts.iter().copied().filter(|&s| s < len).collect();
            let Some(&first) = valid.iter().min() else {
                prop_assert!(ranges.is_empty());
                return Ok(());
            };

            let mut claimed = vec![0u32; len];
            for range in &ranges {
                prop_assert!(valid.contains(&range.start));
                prop_assert!(!range.is_empty());
                for i in range.clone() {
                    claimed[i] += 1;
                }
            }
            for (i, count) in claimed.iter().enumerate() {
                let expected = if i >= first { 1 } else { 0 };
                prop_assert_eq!(*count, expected);
            }
        }
    }
}
