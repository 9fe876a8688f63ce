//! Helpers for building small EPUB fixtures on the fly.

#![allow(dead_code)]

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use zip::ZipArchive;
use zip::write::{SimpleFileOptions, ZipWriter};

pub const CONTAINER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

/// An XHTML document with the given title and body markup.
pub fn xhtml(title: &str, body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<head><title>{title}</title><link href="../Styles/style.css" rel="stylesheet" type="text/css"/></head>
<body>{body}</body>
</html>"#
    )
}

/// An EPUB 3 navigation document listing `(title, href)` pairs.
pub fn nav(entries: &[(&str, &str)]) -> String {
    let items: String = entries
        .iter()
        .map(|(title, href)| format!(r#"<li><a href="{href}">{title}</a></li>"#))
        .collect();
    xhtml(
        "Contents",
        &format!(r#"<nav epub:type="toc" id="toc"><h1>Contents</h1><ol>{items}</ol></nav>"#),
    )
}

/// A package document with the given manifest items `(id, href, media-type, properties)`
/// and spine idrefs.
pub fn opf(version: &str, extra_package_attrs: &str, items: &[(&str, &str, &str, &str)], spine: &[&str]) -> String {
    let manifest: String = items
        .iter()
        .map(|(id, href, media_type, properties)| {
            if properties.is_empty() {
                format!(r#"    <item id="{id}" href="{href}" media-type="{media_type}"/>"#)
            } else {
                format!(
                    r#"    <item id="{id}" href="{href}" media-type="{media_type}" properties="{properties}"/>"#
                )
            }
        })
        .collect::<Vec<_>>()
        .join("\n");
    let itemrefs: String = spine
        .iter()
        .map(|idref| format!(r#"    <itemref idref="{idref}"/>"#))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="{version}" unique-identifier="pub-id"{extra_package_attrs}>
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="pub-id">urn:uuid:0d2f7c1e-0000-4000-8000-000000000001</dc:identifier>
    <dc:title>テスト</dc:title>
    <dc:language>ja</dc:language>
  </metadata>
  <manifest>
{manifest}
  </manifest>
  <spine page-progression-direction="rtl">
{itemrefs}
  </spine>
</package>"#
    )
}

/// The three-chapter book used by most tests: `ch1`, `ch1b` and `ch2`, with
/// a TOC that lists only `ch1` and `ch2`.
pub fn three_chapter_book() -> Vec<(String, String)> {
    vec![
        (
            "OEBPS/content.opf".into(),
            opf(
                "3.0",
                r#" prefix="rendition: http://www.idpf.org/vocab/rendition/#""#,
                &[
                    ("nav", "nav.xhtml", "application/xhtml+xml", "nav"),
                    ("css", "Styles/style.css", "text/css", ""),
                    ("cover", "Images/cover.jpg", "image/jpeg", "cover-image"),
                    ("ch1", "Text/ch1.xhtml", "application/xhtml+xml", ""),
                    ("ch1b", "Text/ch1b.xhtml", "application/xhtml+xml", ""),
                    ("ch2", "Text/ch2.xhtml", "application/xhtml+xml", ""),
                ],
                &["nav", "ch1", "ch1b", "ch2"],
            ),
        ),
        (
            "OEBPS/nav.xhtml".into(),
            nav(&[("One", "Text/ch1.xhtml"), ("Two", "Text/ch2.xhtml")]),
        ),
        ("OEBPS/Styles/style.css".into(), "p { margin: 0; }\n".into()),
        ("OEBPS/Images/cover.jpg".into(), "not really a jpeg".into()),
        (
            "OEBPS/Text/ch1.xhtml".into(),
            xhtml("One", r#"<h1>One</h1><p>first part</p>"#),
        ),
        (
            "OEBPS/Text/ch1b.xhtml".into(),
            xhtml(
                "One b",
                r#"<p id="later">second part <img src="../Images/cover.jpg" alt=""/></p><script>var x = 1;</script>"#,
            ),
        ),
        (
            "OEBPS/Text/ch2.xhtml".into(),
            xhtml("Two", r#"<h1>Two</h1><p><a href="ch1b.xhtml#later">back</a></p>"#),
        ),
    ]
}

/// Write files into a directory, creating parents.
pub fn write_tree(root: &Path, files: &[(String, String)]) {
    for (name, content) in files {
        let path = root.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }
}

/// Zip files into an EPUB at `path`, with `mimetype` and the container added.
pub fn write_epub(path: &Path, files: &[(String, String)]) {
    let file = File::create(path).unwrap();
    let mut zip = ZipWriter::new(file);
    let stored =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    let deflated =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    zip.start_file("mimetype", stored).unwrap();
    zip.write_all(b"application/epub+zip").unwrap();
    zip.start_file("META-INF/container.xml", deflated).unwrap();
    zip.write_all(CONTAINER.as_bytes()).unwrap();
    for (name, content) in files {
        zip.start_file(name.as_str(), deflated).unwrap();
        zip.write_all(content.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
}

/// Entry names and compression methods of an archive, in archive order.
pub fn entries(path: &Path) -> Vec<(String, zip::CompressionMethod)> {
    let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
    (0..archive.len())
        .map(|i| {
            let entry = archive.by_index(i).unwrap();
            (entry.name().to_string(), entry.compression())
        })
        .collect()
}

pub fn entry_names(path: &Path) -> Vec<String> {
    entries(path).into_iter().map(|(name, _)| name).collect()
}

/// Read one archive entry as text, if present.
pub fn read_entry(path: &Path, name: &str) -> Option<String> {
    let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
    let mut entry = archive.by_name(name).ok()?;
    let mut text = String::new();
    entry.read_to_string(&mut text).unwrap();
    Some(text)
}
