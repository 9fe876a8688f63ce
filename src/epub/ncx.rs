//! NCX document writer.

use std::path::Path;

use super::nav::{TocEntry, flatten};
use crate::dom::escape_xml;
use crate::util::relative_href;

/// Build an NCX for `entries`, with `content/@src` relative to `opf_dir`.
pub(crate) fn build_ncx(uid: &str, title: &str, entries: &[TocEntry], opf_dir: &Path) -> String {
    let depth = flatten(entries)
        .iter()
        .map(|entry| entry.depth)
        .max()
        .unwrap_or(1);

    let mut ncx = String::new();
    ncx.push_str(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE ncx PUBLIC "-//NISO//DTD ncx 2005-1//EN" "http://www.daisy.org/z3986/2005/ncx-2005-1.dtd">
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head>
"#,
    );
    ncx.push_str(&format!(
        "    <meta name=\"dtb:uid\" content=\"{}\"/>\n",
        escape_xml(uid)
    ));
    ncx.push_str(&format!(
        "    <meta name=\"dtb:depth\" content=\"{depth}\"/>\n"
    ));
    ncx.push_str(
        r#"    <meta name="dtb:totalPageCount" content="0"/>
    <meta name="dtb:maxPageNumber" content="0"/>
  </head>
  <docTitle>
    <text>"#,
    );
    ncx.push_str(&escape_xml(title));
    ncx.push_str("</text>\n  </docTitle>\n  <navMap>\n");

    let mut play_order = 1;
    for entry in entries {
        write_nav_point(&mut ncx, entry, opf_dir, &mut play_order, 2);
    }

    ncx.push_str("  </navMap>\n</ncx>\n");
    ncx
}

fn write_nav_point(
    ncx: &mut String,
    entry: &TocEntry,
    opf_dir: &Path,
    play_order: &mut usize,
    indent: usize,
) {
    let indent_str = "  ".repeat(indent);

    let mut src = relative_href(opf_dir, &entry.path);
    if let Some(fragment) = &entry.fragment {
        src.push('#');
        src.push_str(fragment);
    }

    ncx.push_str(&format!(
        "{indent_str}<navPoint id=\"navPoint-{play_order}\" playOrder=\"{play_order}\">\n"
    ));
    ncx.push_str(&format!(
        "{indent_str}  <navLabel><text>{}</text></navLabel>\n",
        escape_xml(&entry.title)
    ));
    ncx.push_str(&format!(
        "{indent_str}  <content src=\"{}\"/>\n",
        escape_xml(&src)
    ));

    *play_order += 1;

    for child in &entry.children {
        write_nav_point(ncx, child, opf_dir, play_order, indent + 1);
    }

    ncx.push_str(&format!("{indent_str}</navPoint>\n"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{Document, Flavor};
    use crate::epub::nav::parse_ncx;

    #[test]
    fn test_build_ncx_orders_and_depth() {
        let base = Path::new("/w/OEBPS/Text");
        let mut first = TocEntry::new("One & only", "ch1.xhtml", base, 1);
        first.children.push(TocEntry::new("Sub", "ch1.xhtml#s", base, 2));
        let second = TocEntry::new("Two", "ch2.xhtml", base, 1);

        let ncx = build_ncx("urn:uuid:x", "本", &[first, second], Path::new("/w/OEBPS"));
        assert!(ncx.contains(r#"<meta name="dtb:depth" content="2"/>"#));
        assert!(ncx.contains(r#"<navPoint id="navPoint-3" playOrder="3">"#));
        assert!(ncx.contains(r#"<content src="Text/ch1.xhtml#s"/>"#));
        assert!(ncx.contains("One &amp; only"));

        let doc = Document::parse_xml(&ncx, Flavor::Xml).unwrap();
        let parsed = parse_ncx(&doc, Path::new("/w/OEBPS"));
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].children[0].title, "Sub");
        assert_eq!(parsed[1].path, Path::new("/w/OEBPS/Text/ch2.xhtml"));
    }
}
