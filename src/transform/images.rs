//! Image presentation cleanup.
//!
//! Stand-alone images end up in a single wrapper `div` carrying
//! [`WRAPPER_CLASS`], and SVG-wrapped cover images become plain `img`s.

use crate::dom::{Attribute, Document, NodeData, NodeId};

/// Class put on the `div` that holds a stand-alone image.
pub const WRAPPER_CLASS: &str = "illus duokan-image-single";

/// Rewrite image markup. Images carrying `ignore_class` are left alone.
///
/// Returns the number of wrappers produced.
pub fn normalize_image_presentation(doc: &mut Document, ignore_class: &str) -> usize {
    let mut changed = 0;

    for img in doc.find_all(doc.root(), "img") {
        if !ignore_class.is_empty() && doc.has_class(img, ignore_class) {
            continue;
        }
        let Some(parent) = doc.parent(img) else {
            continue;
        };
        if !(doc.is_named(parent, "div") || doc.is_named(parent, "p")) {
            continue;
        }
        if !is_sole_content(doc, parent, img) {
            continue;
        }

        doc.remove_attr(img, "style");
        if doc.attr(img, "alt").is_none() {
            doc.set_attr(img, "alt", "");
        }
        let wrapper = wrapper_div(doc);
        doc.replace_with(parent, wrapper);
        doc.append(wrapper, img);
        changed += 1;
    }

    for svg in doc.find_all(doc.root(), "svg") {
        if !doc.is_attached(svg) {
            continue;
        }
        let Some(source) = svg_image_source(doc, svg) else {
            continue;
        };
        let target = switch_ancestor(doc, svg).unwrap_or(svg);

        let wrapper = wrapper_div(doc);
        let img = doc.create_element(
            "img",
            vec![
                Attribute::new("src", source),
                Attribute::new("alt", ""),
                Attribute::new("class", "fit"),
            ],
        );
        doc.append(wrapper, img);
        doc.replace_with(target, wrapper);
        changed += 1;
    }

    changed
}

fn wrapper_div(doc: &mut Document) -> NodeId {
    doc.create_element("div", vec![Attribute::new("class", WRAPPER_CLASS)])
}

/// Whether every sibling of `img` inside `parent` is a line break or whitespace.
fn is_sole_content(doc: &Document, parent: NodeId, img: NodeId) -> bool {
    doc.children(parent).all(|child| {
        if child == img {
            return true;
        }
        match doc.get(child).map(|n| &n.data) {
            Some(NodeData::Text(text)) => text.chars().all(char::is_whitespace),
            Some(NodeData::Comment(_)) => true,
            Some(NodeData::Element { .. }) => doc.is_named(child, "br"),
            _ => false,
        }
    })
}

/// The reference of the first `image` inside an `svg`.
fn svg_image_source(doc: &Document, svg: NodeId) -> Option<String> {
    let image = doc.find_first(svg, "image")?;
    doc.attr(image, "xlink:href")
        .or_else(|| doc.attr(image, "href"))
        .filter(|href| !href.is_empty())
        .map(str::to_string)
}

/// The nearest enclosing `switch` (as in `epub:switch`), if any.
fn switch_ancestor(doc: &Document, id: NodeId) -> Option<NodeId> {
    let mut current = doc.parent(id);
    while let Some(node) = current {
        if doc.is_named(node, "switch") {
            return Some(node);
        }
        if doc.is_named(node, "body") {
            return None;
        }
        current = doc.parent(node);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Flavor;

    fn parse(body: &str) -> Document {
        Document::parse_xml(
            &format!(
                r#"<html xmlns:xlink="http://www.w3.org/1999/xlink" xmlns:epub="http://www.idpf.org/2007/ops"><body>{body}</body></html>"#
            ),
            Flavor::Xhtml,
        )
        .unwrap()
    }

    fn body_markup(doc: &Document) -> String {
        doc.inner_markup(doc.body().unwrap())
    }

    #[test]
    fn test_wraps_standalone_image() {
        let mut doc = parse(r#"<p class="x"> <img src="a.jpg" style="width: 100%"/><br/></p>"#);
        assert_eq!(normalize_image_presentation(&mut doc, "gaiji"), 1);
        assert_eq!(
            body_markup(&doc),
            r#"<div class="illus duokan-image-single"><img src="a.jpg" alt=""/></div>"#
        );
    }

    #[test]
    fn test_inline_image_untouched() {
        let src = r#"<p>text <img src="a.jpg"/></p><p><img class="gaiji" src="g.png"/></p>"#;
        let mut doc = parse(src);
        assert_eq!(normalize_image_presentation(&mut doc, "gaiji"), 0);
        assert_eq!(body_markup(&doc), src);
    }

    #[test]
    fn test_svg_replaced() {
        let mut doc = parse(
            r#"<div><svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 600 800"><image width="600" height="800" xlink:href="../Images/cover.jpg"/></svg></div>"#,
        );
        assert_eq!(normalize_image_presentation(&mut doc, "gaiji"), 1);
        assert_eq!(
            body_markup(&doc),
            r#"<div><div class="illus duokan-image-single"><img src="../Images/cover.jpg" alt="" class="fit"/></div></div>"#
        );
    }

    #[test]
    fn test_switch_wrapped_svg_replaced_whole() {
        let mut doc = parse(
            r#"<epub:switch><epub:case required-namespace="http://www.w3.org/2000/svg"><svg><image xlink:href="a.png"/></svg></epub:case><epub:default><img src="a.png"/></epub:default></epub:switch>"#,
        );
        normalize_image_presentation(&mut doc, "gaiji");
        assert_eq!(
            body_markup(&doc),
            r#"<div class="illus duokan-image-single"><img src="a.png" alt="" class="fit"/></div>"#
        );
    }
}
