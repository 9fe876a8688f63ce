//! Blank-line run trimming.
//!
//! A blank node is a `br`, a `p` holding nothing but whitespace and line
//! breaks, or a `div` holding nothing but blank nodes. Consecutive blank
//! siblings form a run; whitespace text and comments between them do not
//! break it. Runs are only looked for among the children of block
//! containers, and a `br` that ends a line of inline content is not blank.

use std::fs;
use std::path::Path;

use log::debug;
use walkdir::WalkDir;

use crate::dom::{Document, NodeData, NodeId};
use crate::error::{Error, Result};
use crate::util::{is_content_file, read_text};

/// Whether a node renders as an empty line.
pub fn is_blank(doc: &Document, id: NodeId) -> bool {
    let Some(node) = doc.get(id) else {
        return false;
    };
    match &node.data {
        NodeData::Element { .. } => {
            if doc.is_named(id, "br") {
                true
            } else if doc.is_named(id, "p") {
                doc.children(id).all(|child| match doc.get(child).map(|n| &n.data) {
                    Some(NodeData::Text(text)) => is_whitespace(text),
                    Some(NodeData::Comment(_)) => true,
                    Some(NodeData::Element { .. }) => doc.is_named(child, "br"),
                    _ => false,
                })
            } else if doc.is_named(id, "div") {
                let mut has_blank = false;
                let only_blanks = doc.children(id).all(|child| match doc.get(child).map(|n| &n.data) {
                    Some(NodeData::Text(text)) => is_whitespace(text),
                    Some(NodeData::Comment(_)) => true,
                    Some(NodeData::Element { .. }) => {
                        has_blank = true;
                        is_blank(doc, child)
                    }
                    _ => false,
                });
                only_blanks && has_blank
            } else {
                false
            }
        }
        _ => false,
    }
}

fn is_whitespace(text: &str) -> bool {
    text.chars().all(char::is_whitespace)
}

/// Nodes that neither count as blank nor interrupt a run.
fn is_transparent(doc: &Document, id: NodeId) -> bool {
    match doc.get(id).map(|n| &n.data) {
        Some(NodeData::Text(text)) => is_whitespace(text),
        Some(NodeData::Comment(_)) => true,
        _ => false,
    }
}

/// Elements whose children are looked at for blank runs.
const CONTAINER_ELEMENTS: &[&str] = &[
    "html", "body", "div", "section", "article", "aside", "main", "header", "footer", "blockquote",
    "figure",
];

/// Elements that start a new line on their own.
const BLOCK_ELEMENTS: &[&str] = &[
    "html", "body", "div", "section", "article", "aside", "main", "header", "footer", "blockquote",
    "figure", "nav", "p", "h1", "h2", "h3", "h4", "h5", "h6", "ul", "ol", "li", "dl", "table",
    "pre", "hr",
];

fn is_one_of(doc: &Document, id: NodeId, names: &[&str]) -> bool {
    names.iter().any(|name| doc.is_named(id, name))
}

/// Every run of blank siblings under `root`, in document order.
pub fn blank_runs(doc: &Document, root: NodeId) -> Vec<Vec<NodeId>> {
    let mut runs = Vec::new();
    collect_runs(doc, root, &mut runs);
    runs
}

fn collect_runs(doc: &Document, parent: NodeId, runs: &mut Vec<Vec<NodeId>>) {
    let mut current = Vec::new();
    // an inline line is open, so the next `br` only terminates it
    let mut line_open = false;

    for child in doc.children(parent) {
        if is_blank(doc, child) {
            if line_open && current.is_empty() && doc.is_named(child, "br") {
                line_open = false;
                continue;
            }
            line_open = false;
            current.push(child);
        } else if is_transparent(doc, child) {
            continue;
        } else {
            if !current.is_empty() {
                runs.push(std::mem::take(&mut current));
            }
            line_open = !is_one_of(doc, child, BLOCK_ELEMENTS);
            if is_one_of(doc, child, CONTAINER_ELEMENTS) {
                collect_runs(doc, child, runs);
            }
        }
    }
    if !current.is_empty() {
        runs.push(current);
    }
}

/// Trim blank runs in one document.
///
/// First `remove` nodes are deleted from the start of every run; then the
/// runs are recomputed and each is capped at `limit` nodes. Returns the
/// number of nodes deleted.
pub fn normalize_document(doc: &mut Document, remove: Option<usize>, limit: Option<usize>) -> usize {
    let scope = doc.body().unwrap_or(doc.root());
    let mut deleted = 0;

    if let Some(remove) = remove {
        for run in blank_runs(doc, scope) {
            for &node in run.iter().take(remove) {
                doc.detach(node);
                deleted += 1;
            }
        }
    }

    if let Some(limit) = limit {
        for run in blank_runs(doc, scope) {
            for &node in run.iter().skip(limit) {
                doc.detach(node);
                deleted += 1;
            }
        }
    }

    deleted
}

/// Trim blank runs in every content document under `work_dir`.
///
/// Does nothing when both counts are unset. Returns the number of nodes deleted.
pub fn normalize(work_dir: &Path, remove: Option<usize>, limit: Option<usize>) -> Result<usize> {
    if remove.is_none() && limit.is_none() {
        return Ok(0);
    }

    let mut total = 0;
    for entry in WalkDir::new(work_dir).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::Io(e.into()))?;
        let path = entry.path();
        if !entry.file_type().is_file() || !is_content_file(path) {
            continue;
        }

        let text = read_text(path)?;
        let mut doc = Document::parse_content(&text, &path.display().to_string());
        let deleted = normalize_document(&mut doc, remove, limit);
        if deleted > 0 {
            debug!("{}: removed {deleted} blank nodes", path.display());
            fs::write(path, doc.serialize())?;
        }
        total += deleted;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Flavor;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn parse(body: &str) -> Document {
        Document::parse_xml(&format!("<html><body>{body}</body></html>"), Flavor::Xhtml).unwrap()
    }

    fn body_markup(doc: &Document) -> String {
        doc.inner_markup(doc.body().unwrap())
    }

    #[test]
    fn test_blank_predicate() {
        let doc = parse(
            "<br/><p> </p><p><br/></p><p>\u{3000}<br/>\n</p><div><p/><br/></div><p>x</p><div></div><p><img/></p>",
        );
        let body = doc.body().unwrap();
        let blanks: Vec<bool> = doc.children(body).map(|c| is_blank(&doc, c)).collect();
        assert_eq!(blanks, vec![true, true, true, true, true, false, false, false]);
    }

    #[test]
    fn test_runs_skip_whitespace_text() {
        let doc = parse("<p>a</p>\n<br/>\n<p></p>\n<p>b</p><div><br/><br/></div>");
        let runs = blank_runs(&doc, doc.body().unwrap());
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].len(), 2);
        assert_eq!(runs[1].len(), 1);
    }

    #[test]
    fn test_nested_runs_found() {
        let doc = parse("<div class=\"c\"><p>a</p><br/><br/><p>b</p></div>");
        let runs = blank_runs(&doc, doc.body().unwrap());
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].len(), 2);
    }

    #[test]
    fn test_line_breaks_inside_text_kept() {
        for (remove, limit) in [(Some(1), None), (None, Some(0)), (Some(2), Some(0))] {
            let mut doc = parse("<p>line one<br/>line two</p><div>verse<br/>\n<em>more</em><br/>end</div>");
            assert_eq!(normalize_document(&mut doc, remove, limit), 0);
            assert_eq!(
                body_markup(&doc),
                "<p>line one<br/>line two</p><div>verse<br/>\n<em>more</em><br/>end</div>"
            );
        }
    }

    #[test]
    fn test_blank_line_after_text_counted() {
        let mut doc = parse("<div>a<br/><br/><br/>b</div>");
        let runs = blank_runs(&doc, doc.body().unwrap());
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].len(), 2);
        assert_eq!(normalize_document(&mut doc, Some(1), None), 1);
        assert_eq!(body_markup(&doc), "<div>a<br/><br/>b</div>");
    }

    #[test]
    fn test_remove_then_limit() {
        let mut doc = parse("<p>a</p><br/><br/><br/><br/><p>b</p><br/><p>c</p>");
        let deleted = normalize_document(&mut doc, Some(1), Some(2));
        assert_eq!(deleted, 3);
        assert_eq!(body_markup(&doc), "<p>a</p><br/><br/><p>b</p><p>c</p>");
    }

    #[test]
    fn test_limit_zero_removes_all() {
        let mut doc = parse("<p>a</p><p> </p><p>b</p>");
        normalize_document(&mut doc, None, Some(0));
        assert_eq!(body_markup(&doc), "<p>a</p><p>b</p>");
    }

    #[test]
    fn test_normalize_noop_without_counts() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.xhtml");
        fs::write(&file, "<html><body><br/><br/></body></html>").unwrap();
        assert_eq!(normalize(dir.path(), None, None).unwrap(), 0);
        assert_eq!(normalize(dir.path(), None, Some(1)).unwrap(), 1);
        assert_eq!(
            fs::read_to_string(&file).unwrap(),
            "<html><body><br/></body></html>"
        );
    }

    fn body_item() -> impl Strategy<Value = &'static str> {
        prop_oneof![
            Just("<br/>"),
            Just("<p></p>"),
            Just("<p><br/></p>"),
            Just("<p> </p>"),
            Just("\n"),
            Just("<p>text</p>"),
            Just("<div><br/></div>"),
            Just("<div><p>x</p><br/><br/></div>"),
        ]
    }

    proptest! {
        #[test]
        fn limit_caps_every_run(items in proptest::collection::vec(body_item(), 0..30), limit in 0usize..4, remove in proptest::option::of(0usize..3)) {
            let mut doc = parse(&items.concat());
            normalize_document(&mut doc, remove, Some(limit));
            let body = doc.body().unwrap();
            for run in blank_runs(&doc, body) {
                prop_assert!(run.len() <= limit);
            }
        }
    }
}
