//! Strict XML front-end built on quick-xml.

use log::warn;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use thiserror::Error;

use super::{Attribute, Document, Flavor, NodeData, NodeId};

/// Why a document could not be read as well-formed XML.
#[derive(Error, Debug)]
pub enum MarkupError {
    #[error(transparent)]
    Xml(#[from] quick_xml::Error),

    #[error("element <{0}> is never closed")]
    Unclosed(String),

    #[error("document has no root element")]
    Empty,
}

impl From<quick_xml::events::attributes::AttrError> for MarkupError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        MarkupError::Xml(err.into())
    }
}

impl Document {
    /// Parse well-formed XML. Whitespace, comments, CDATA and the prolog are kept.
    pub fn parse_xml(text: &str, flavor: Flavor) -> Result<Document, MarkupError> {
        let text = text.trim_start_matches('\u{feff}');
        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(false);

        let mut doc = Document::new(flavor);
        let mut stack: Vec<NodeId> = Vec::new();
        let mut saw_root = false;

        loop {
            let parent = stack.last().copied().unwrap_or(doc.root);
            match reader.read_event()? {
                Event::Start(e) => {
                    let id = element_from(&mut doc, &e)?;
                    doc.append(parent, id);
                    stack.push(id);
                    saw_root = true;
                }
                Event::Empty(e) => {
                    let id = element_from(&mut doc, &e)?;
                    doc.append(parent, id);
                    saw_root = true;
                }
                Event::End(_) => {
                    stack.pop();
                }
                Event::Text(e) => {
                    doc.append_text(parent, &String::from_utf8_lossy(e.as_ref()));
                }
                Event::GeneralRef(e) => {
                    let entity = String::from_utf8_lossy(e.as_ref()).into_owned();
                    match resolve_entity(&entity) {
                        Some(resolved) => doc.append_text(parent, &resolved),
                        None => {
                            let id = doc.create_node(NodeData::EntityRef(entity));
                            doc.append(parent, id);
                        }
                    }
                }
                Event::CData(e) => {
                    let id = doc.create_node(NodeData::CData(lossy(&e)));
                    doc.append(parent, id);
                }
                Event::Comment(e) => {
                    let id = doc.create_node(NodeData::Comment(lossy(&e)));
                    doc.append(parent, id);
                }
                Event::DocType(e) => {
                    let id = doc.create_node(NodeData::Doctype(lossy(&e).trim().to_string()));
                    doc.append(parent, id);
                }
                Event::Decl(e) => {
                    let id = doc.create_node(NodeData::ProcessingInstruction(lossy(&e)));
                    doc.append(parent, id);
                }
                Event::PI(e) => {
                    let id = doc.create_node(NodeData::ProcessingInstruction(lossy(&e)));
                    doc.append(parent, id);
                }
                Event::Eof => break,
            }
        }

        if let Some(&open) = stack.last() {
            let name = doc.name(open).unwrap_or_default().to_string();
            return Err(MarkupError::Unclosed(name));
        }
        if !saw_root {
            return Err(MarkupError::Empty);
        }
        Ok(doc)
    }

    /// Parse a content document, falling back to the HTML parser when it is
    /// not well-formed XML.
    pub fn parse_content(text: &str, label: &str) -> Document {
        match Document::parse_xml(text, Flavor::Xhtml) {
            Ok(doc) => doc,
            Err(err) => {
                warn!("{label}: not well-formed XML ({err}), reparsing as HTML");
                Document::parse_html(text)
            }
        }
    }
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn element_from(doc: &mut Document, e: &BytesStart<'_>) -> Result<NodeId, MarkupError> {
    let name = lossy(e.name().as_ref());
    let mut attrs = Vec::new();
    for attr in e.attributes() {
        let attr = attr?;
        let key = lossy(attr.key.as_ref());
        let raw = String::from_utf8_lossy(&attr.value);
        attrs.push(Attribute::new(key, unescape(&raw)));
    }
    Ok(doc.create_element(name, attrs))
}

/// Expand entity references inside an attribute value. Unknown entities stay verbatim.
pub(crate) fn unescape(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp + 1..];
        match tail.find(';') {
            Some(semi) if semi > 0 && semi <= 32 => {
                let entity = &tail[..semi];
                match resolve_entity(entity) {
                    Some(resolved) => out.push_str(&resolved),
                    None => {
                        out.push('&');
                        out.push_str(entity);
                        out.push(';');
                    }
                }
                rest = &tail[semi + 1..];
            }
            _ => {
                out.push('&');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Resolve XML entity references, character references and the HTML
/// entities commonly found in hand-made XHTML.
fn resolve_entity(entity: &str) -> Option<String> {
    let named = match entity {
        "apos" => '\'',
        "quot" => '"',
        "lt" => '<',
        "gt" => '>',
        "amp" => '&',
        "nbsp" => '\u{a0}',
        "ensp" => '\u{2002}',
        "emsp" => '\u{2003}',
        "thinsp" => '\u{2009}',
        "zwnj" => '\u{200c}',
        "zwj" => '\u{200d}',
        "shy" => '\u{ad}',
        "copy" => '©',
        "reg" => '®',
        "trade" => '™',
        "hellip" => '…',
        "mdash" => '—',
        "ndash" => '–',
        "lsquo" => '‘',
        "rsquo" => '’',
        "ldquo" => '“',
        "rdquo" => '”',
        "laquo" => '«',
        "raquo" => '»',
        "middot" => '·',
        "bull" => '•',
        "times" => '×',
        _ => {
            if let Some(hex) = entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
            {
                return u32::from_str_radix(hex, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .map(String::from);
            }
            if let Some(dec) = entity.strip_prefix('#') {
                return dec
                    .parse::<u32>()
                    .ok()
                    .and_then(char::from_u32)
                    .map(String::from);
            }
            return None;
        }
    };
    Some(named.to_string())
}
