//! Ruby annotation rewrites.
//!
//! [`normalize_ruby`] collapses fragmented annotations into a single `rt`;
//! [`expand_marked_spans`] turns emphasis-dot spans into per-character ruby.

use crate::dom::{Document, NodeData, NodeId};

/// Annotation used for emphasis dots.
pub const SESAME_DOT: &str = "・";

/// Elements whose text belongs to the annotation rather than the base.
const ANNOTATION_ELEMENTS: &[&str] = &["rt", "rp", "rtc"];

/// Replace every `ruby` with a bare one holding base text plus exactly one
/// `rt`. Attributes on the old element are dropped.
///
/// Images inside a ruby are moved in front of it, in order. Returns the
/// number of ruby elements rewritten.
pub fn normalize_ruby(doc: &mut Document) -> usize {
    let rubies = doc.find_all(doc.root(), "ruby");
    let mut rewritten = 0;

    for ruby in rubies {
        // an outer ruby already absorbed this one
        if !doc.is_attached(ruby) {
            continue;
        }

        for img in doc.find_all(ruby, "img") {
            doc.insert_before(ruby, img);
        }

        let annotation: String = doc
            .find_all(ruby, "rt")
            .into_iter()
            .map(|rt| doc.text_content(rt).trim().to_string())
            .collect::<String>()
            .replace(['\n', '\r'], "");

        let mut base = String::new();
        collect_base_text(doc, ruby, &mut base);
        let base = base.replace(['\n', '\r'], "");

        let rebuilt = doc.create_element("ruby", vec![]);
        if !base.is_empty() {
            doc.append_text(rebuilt, &base);
        }
        let rt = doc.create_element("rt", vec![]);
        if !annotation.is_empty() {
            doc.append_text(rt, &annotation);
        }
        doc.append(rebuilt, rt);
        doc.replace_with(ruby, rebuilt);
        rewritten += 1;
    }

    rewritten
}

/// Text of `id` excluding anything inside `rt`, `rp` or `rtc`.
fn collect_base_text(doc: &Document, id: NodeId, out: &mut String) {
    for child in doc.children(id) {
        match doc.get(child).map(|n| &n.data) {
            Some(NodeData::Text(text)) | Some(NodeData::CData(text)) => out.push_str(text),
            Some(NodeData::EntityRef(name)) => {
                out.push('&');
                out.push_str(name);
                out.push(';');
            }
            Some(NodeData::Element { .. }) => {
                let is_annotation = ANNOTATION_ELEMENTS
                    .iter()
                    .any(|tag| doc.is_named(child, tag));
                if !is_annotation {
                    collect_base_text(doc, child, out);
                }
            }
            _ => {}
        }
    }
}

/// Replace each `span` carrying one of the `|`-separated classes with a
/// ruby that puts a sesame dot over every character.
///
/// Returns the number of spans replaced.
pub fn expand_marked_spans(doc: &mut Document, class_names: &str) -> usize {
    let mut replaced = 0;

    for class in class_names.split('|').map(str::trim).filter(|c| !c.is_empty()) {
        let spans: Vec<NodeId> = doc
            .find_all(doc.root(), "span")
            .into_iter()
            .filter(|&span| doc.has_class(span, class))
            .collect();

        for span in spans {
            if !doc.is_attached(span) {
                continue;
            }
            let text = doc.text_content(span);
            let ruby = doc.create_element("ruby", vec![]);
            for ch in text.chars() {
                let base = doc.create_text(ch.to_string());
                doc.append(ruby, base);
                let rt = doc.create_element("rt", vec![]);
                doc.append_text(rt, SESAME_DOT);
                doc.append(ruby, rt);
            }
            doc.replace_with(span, ruby);
            replaced += 1;
        }
    }

    replaced
}
