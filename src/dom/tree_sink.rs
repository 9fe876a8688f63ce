//! html5ever TreeSink implementation for [`Document`].
//!
//! Used for content documents that are not well-formed XML. html5ever hands
//! out namespaced `QualName`s; the arena stores plain qualified strings, so
//! the sink keeps the original names in a side table for `elem_name`.

use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::HashMap;

use html5ever::driver::ParseOpts;
use html5ever::parse_document;
use html5ever::tendril::{StrTendril, TendrilSink};
use html5ever::tree_builder::{ElementFlags, NodeOrText, QuirksMode, TreeSink};
use html5ever::{Attribute as Html5Attribute, QualName};

use super::{Attribute, Document, Flavor, NodeData, NodeId};

const XHTML_NS: &str = "http://www.w3.org/1999/xhtml";

impl Document {
    /// Parse HTML leniently, the way a browser would.
    ///
    /// A leading XML declaration is carried over as-is and the `html`
    /// element gets the XHTML namespace if it lacks one.
    pub fn parse_html(text: &str) -> Document {
        let text = text.trim_start_matches('\u{feff}');
        let (declaration, body) = split_declaration(text);

        let sink = DocumentSink::new();
        let mut doc = parse_document(sink, ParseOpts::default())
            .from_utf8()
            .one(body.as_bytes())
            .into_document();

        if let Some(declaration) = declaration {
            let root = doc.root();
            let pi = doc.create_node(NodeData::ProcessingInstruction(declaration.to_string()));
            match doc.children(root).next() {
                Some(first) => doc.insert_before(first, pi),
                None => doc.append(root, pi),
            }
        }
        if let Some(html) = doc.document_element()
            && doc.attr(html, "xmlns").is_none()
        {
            doc.set_attr(html, "xmlns", XHTML_NS);
        }
        doc
    }
}

/// Separate a leading `<?xml ...?>` from the rest of the markup.
fn split_declaration(text: &str) -> (Option<&str>, &str) {
    let trimmed = text.trim_start();
    if let Some(rest) = trimmed.strip_prefix("<?")
        && rest.starts_with("xml")
        && let Some(end) = rest.find("?>")
    {
        return (Some(&rest[..end]), &rest[end + 2..]);
    }
    (None, text)
}

fn qualified(name: &QualName) -> String {
    match &name.prefix {
        Some(prefix) => format!("{}:{}", prefix, name.local),
        None => name.local.to_string(),
    }
}

fn convert_attrs(attrs: Vec<Html5Attribute>) -> Vec<Attribute> {
    attrs
        .into_iter()
        .map(|a| Attribute::new(qualified(&a.name), a.value.to_string()))
        .collect()
}

/// Handle used by TreeSink to reference nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHandle(pub NodeId);

/// TreeSink that builds a [`Document`].
///
/// Uses interior mutability (RefCell) because html5ever's TreeSink trait
/// requires methods to take `&self` but we need to mutate the DOM.
struct DocumentSink {
    doc: RefCell<Document>,
    names: RefCell<HashMap<NodeId, Box<QualName>>>,
    quirks_mode: RefCell<QuirksMode>,
}

impl DocumentSink {
    fn new() -> Self {
        Self {
            doc: RefCell::new(Document::new(Flavor::Xhtml)),
            names: RefCell::new(HashMap::new()),
            quirks_mode: RefCell::new(QuirksMode::NoQuirks),
        }
    }

    fn into_document(self) -> Document {
        self.doc.into_inner()
    }
}

impl TreeSink for DocumentSink {
    type Handle = NodeHandle;
    type Output = Self;
    type ElemName<'a>
        = &'a QualName
    where
        Self: 'a;

    fn finish(self) -> Self::Output {
        self
    }

    fn parse_error(&self, _msg: Cow<'static, str>) {}

    fn get_document(&self) -> Self::Handle {
        NodeHandle(self.doc.borrow().root())
    }

    fn elem_name<'a>(&'a self, target: &'a Self::Handle) -> Self::ElemName<'a> {
        static EMPTY: QualName = QualName {
            prefix: None,
            ns: html5ever::ns!(),
            local: html5ever::local_name!(""),
        };

        let names = self.names.borrow();
        match names.get(&target.0) {
            // SAFETY: entries are boxed and never removed or replaced while the
            // sink is alive, so the QualName outlives the RefCell borrow.
            Some(name) => unsafe { std::mem::transmute::<&QualName, &'a QualName>(name.as_ref()) },
            None => &EMPTY,
        }
    }

    fn create_element(
        &self,
        name: QualName,
        attrs: Vec<Html5Attribute>,
        _flags: ElementFlags,
    ) -> Self::Handle {
        let id = self
            .doc
            .borrow_mut()
            .create_element(qualified(&name), convert_attrs(attrs));
        self.names.borrow_mut().insert(id, Box::new(name));
        NodeHandle(id)
    }

    fn create_comment(&self, text: StrTendril) -> Self::Handle {
        NodeHandle(self.doc.borrow_mut().create_comment(text.to_string()))
    }

    fn create_pi(&self, target: StrTendril, data: StrTendril) -> Self::Handle {
        let content = format!("{target} {data}");
        NodeHandle(
            self.doc
                .borrow_mut()
                .create_node(NodeData::ProcessingInstruction(content)),
        )
    }

    fn append(&self, parent: &Self::Handle, child: NodeOrText<Self::Handle>) {
        let mut doc = self.doc.borrow_mut();
        match child {
            NodeOrText::AppendNode(node) => doc.append(parent.0, node.0),
            NodeOrText::AppendText(text) => doc.append_text(parent.0, &text),
        }
    }

    fn append_based_on_parent_node(
        &self,
        element: &Self::Handle,
        prev_element: &Self::Handle,
        child: NodeOrText<Self::Handle>,
    ) {
        let parent = self.doc.borrow().parent(element.0);
        match parent {
            Some(_) => self.append_before_sibling(element, child),
            None => self.append(prev_element, child),
        }
    }

    fn append_doctype_to_document(
        &self,
        name: StrTendril,
        public_id: StrTendril,
        system_id: StrTendril,
    ) {
        let mut content = name.to_string();
        if !public_id.is_empty() {
            content.push_str(&format!(" PUBLIC \"{public_id}\""));
            if !system_id.is_empty() {
                content.push_str(&format!(" \"{system_id}\""));
            }
        } else if !system_id.is_empty() {
            content.push_str(&format!(" SYSTEM \"{system_id}\""));
        }

        let mut doc = self.doc.borrow_mut();
        let root = doc.root();
        let doctype = doc.create_node(NodeData::Doctype(content));
        doc.append(root, doctype);
    }

    fn get_template_contents(&self, target: &Self::Handle) -> Self::Handle {
        *target
    }

    fn same_node(&self, x: &Self::Handle, y: &Self::Handle) -> bool {
        x.0 == y.0
    }

    fn set_quirks_mode(&self, mode: QuirksMode) {
        *self.quirks_mode.borrow_mut() = mode;
    }

    fn append_before_sibling(&self, sibling: &Self::Handle, new_node: NodeOrText<Self::Handle>) {
        let mut doc = self.doc.borrow_mut();
        match new_node {
            NodeOrText::AppendNode(node) => doc.insert_before(sibling.0, node.0),
            NodeOrText::AppendText(text) => {
                let text_node = doc.create_text(text.to_string());
                doc.insert_before(sibling.0, text_node);
            }
        }
    }

    fn add_attrs_if_missing(&self, target: &Self::Handle, attrs: Vec<Html5Attribute>) {
        let mut doc = self.doc.borrow_mut();
        for attr in convert_attrs(attrs) {
            if doc.attr(target.0, &attr.name).is_none() {
                doc.set_attr(target.0, &attr.name, attr.value);
            }
        }
    }

    fn remove_from_parent(&self, target: &Self::Handle) {
        self.doc.borrow_mut().detach(target.0);
    }

    fn reparent_children(&self, node: &Self::Handle, new_parent: &Self::Handle) {
        let mut doc = self.doc.borrow_mut();
        for child in doc.child_vec(node.0) {
            doc.append(new_parent.0, child);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_parse() {
        let doc = Document::parse_html("<html><body><p>Hello</p></body></html>");
        let p = doc.find_first(doc.root(), "p").expect("should find p");
        assert_eq!(doc.text_content(p), "Hello");
        let html = doc.document_element().unwrap();
        assert_eq!(doc.attr(html, "xmlns"), Some(XHTML_NS));
    }

    #[test]
    fn test_declaration_carried_over() {
        let doc = Document::parse_html(
            "<?xml version=\"1.0\" encoding=\"Shift_JIS\"?><html><body><p>a<br></p></body></html>",
        );
        let first = doc.children(doc.root()).next().unwrap();
        assert!(matches!(
            &doc.get(first).unwrap().data,
            NodeData::ProcessingInstruction(s) if s.starts_with("xml")
        ));
    }

    #[test]
    fn test_svg_attribute_names_keep_prefix() {
        let doc = Document::parse_html(
            r#"<html><body><svg><image xlink:href="../Images/a.jpg"/></svg></body></html>"#,
        );
        let image = doc.find_first(doc.root(), "image").unwrap();
        assert_eq!(doc.attr(image, "xlink:href"), Some("../Images/a.jpg"));
    }

    #[test]
    fn test_split_declaration() {
        assert_eq!(
            split_declaration("<?xml version=\"1.0\"?><a/>"),
            (Some("xml version=\"1.0\""), "<a/>")
        );
        assert_eq!(split_declaration("<a/>"), (None, "<a/>"));
    }
}
