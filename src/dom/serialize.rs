//! Write a [`Document`] back to markup.
//!
//! Output is always UTF-8; an XML declaration that names another encoding is
//! rewritten to say `utf-8`.

use super::{Document, Flavor, NodeData, NodeId};

/// HTML elements that never have content and are written as `<br/>`.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

impl Document {
    /// Serialize the whole document.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for child in self.children(self.root) {
            self.write_node(child, &mut out);
        }
        out
    }

    /// Serialize one node and its subtree.
    pub fn serialize_node(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_node(id, &mut out);
        out
    }

    /// Serialize the children of a node without the node itself.
    pub fn inner_markup(&self, id: NodeId) -> String {
        let mut out = String::new();
        for child in self.children(id) {
            self.write_node(child, &mut out);
        }
        out
    }

    fn write_node(&self, id: NodeId, out: &mut String) {
        let Some(node) = self.get(id) else {
            return;
        };
        match &node.data {
            NodeData::Document => {
                for child in self.children(id) {
                    self.write_node(child, out);
                }
            }
            NodeData::Element { name, attrs } => {
                out.push('<');
                out.push_str(name);
                for attr in attrs {
                    out.push(' ');
                    out.push_str(&attr.name);
                    out.push_str("=\"");
                    escape_into(&attr.value, true, out);
                    out.push('"');
                }

                if node.first_child.is_none() && self.self_closes(name) {
                    out.push_str("/>");
                    return;
                }
                out.push('>');
                for child in self.children(id) {
                    self.write_node(child, out);
                }
                out.push_str("</");
                out.push_str(name);
                out.push('>');
            }
            NodeData::Text(text) => escape_into(text, false, out),
            NodeData::EntityRef(name) => {
                out.push('&');
                out.push_str(name);
                out.push(';');
            }
            NodeData::Comment(text) => {
                out.push_str("<!--");
                out.push_str(text);
                out.push_str("-->");
            }
            NodeData::CData(text) => {
                out.push_str("<![CDATA[");
                out.push_str(text);
                out.push_str("]]>");
            }
            NodeData::Doctype(content) => {
                out.push_str("<!DOCTYPE ");
                out.push_str(content);
                out.push('>');
            }
            NodeData::ProcessingInstruction(content) => {
                out.push_str("<?");
                if is_declaration(content) {
                    out.push_str(&utf8_declaration(content));
                } else {
                    out.push_str(content);
                }
                out.push_str("?>");
            }
        }
    }

    fn self_closes(&self, name: &str) -> bool {
        match self.flavor {
            Flavor::Xml => true,
            Flavor::Xhtml => VOID_ELEMENTS.contains(&name.to_ascii_lowercase().as_str()),
        }
    }
}

fn is_declaration(content: &str) -> bool {
    content == "xml" || content.starts_with("xml ")
}

/// Rewrite the encoding pseudo-attribute of a declaration to `utf-8`.
fn utf8_declaration(content: &str) -> String {
    let Some(pos) = content.find("encoding") else {
        return content.to_string();
    };
    let after = &content[pos + "encoding".len()..];
    let Some(eq) = after.find('=') else {
        return content.to_string();
    };
    let value = after[eq + 1..].trim_start();
    let Some(quote) = value.chars().next().filter(|c| *c == '"' || *c == '\'') else {
        return content.to_string();
    };
    let Some(close) = value[1..].find(quote) else {
        return content.to_string();
    };
    let tail = &value[close + 2..];
    format!("{}encoding=\"utf-8\"{}", &content[..pos], tail)
}

fn escape_into(text: &str, attribute: bool, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
}

/// Escape text for inclusion in generated XML.
pub fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    escape_into(s, true, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xhtml_void_elements() {
        let doc = Document::parse_xml(
            "<html><body><p>a<br/></p><div></div><img src=\"x.png\"/></body></html>",
            Flavor::Xhtml,
        )
        .unwrap();
        assert_eq!(
            doc.serialize(),
            "<html><body><p>a<br/></p><div></div><img src=\"x.png\"/></body></html>"
        );
    }

    #[test]
    fn test_xml_flavor_self_closes() {
        let doc =
            Document::parse_xml("<spine><itemref idref=\"a\"></itemref></spine>", Flavor::Xml)
                .unwrap();
        assert_eq!(doc.serialize(), "<spine><itemref idref=\"a\"/></spine>");
    }

    #[test]
    fn test_declaration_rewritten_to_utf8() {
        let doc = Document::parse_xml(
            "<?xml version=\"1.0\" encoding='Shift_JIS' standalone=\"no\"?>\n<a>x</a>",
            Flavor::Xml,
        )
        .unwrap();
        assert_eq!(
            doc.serialize(),
            "<?xml version=\"1.0\" encoding=\"utf-8\" standalone=\"no\"?>\n<a>x</a>"
        );
    }

    #[test]
    fn test_roundtrip_preserves_prolog_and_escapes() {
        let src = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<!DOCTYPE html>\n<html xmlns=\"http://www.w3.org/1999/xhtml\"><!-- note --><body><p title=\"&quot;q&quot;\">a &amp; b &lt; c</p></body></html>";
        let doc = Document::parse_xml(src, Flavor::Xhtml).unwrap();
        assert_eq!(doc.serialize(), src);
    }

    #[test]
    fn test_escape_xml() {
        assert_eq!(escape_xml("a<b>&\"c\""), "a&lt;b&gt;&amp;&quot;c&quot;");
    }
}
