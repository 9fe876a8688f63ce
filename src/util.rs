//! Text decoding, href resolution and media-type helpers.

use std::borrow::Cow;
use std::path::{Component, Path, PathBuf};

use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};

/// Characters that must be escaped when a filesystem path is written back as an href.
const HREF_ESCAPE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?');

/// Decode bytes to a string, handling various encodings.
///
/// This function:
/// 1. First tries UTF-8 (BOM sniffing via encoding_rs, so UTF-16 with a BOM works too)
/// 2. If malformed, tries the hint encoding (from `<?xml encoding="..."?>`)
/// 3. Falls back to Windows-1252
///
/// Uses `Cow<str>` to avoid allocation when the input is valid UTF-8.
pub fn decode_text<'a>(bytes: &'a [u8], hint_encoding: Option<&str>) -> Cow<'a, str> {
    let (result, _encoding, malformed) = encoding_rs::UTF_8.decode(bytes);

    if !malformed {
        return result;
    }

    if let Some(name) = hint_encoding
        && let Some(encoding) = encoding_rs::Encoding::for_label(name.as_bytes())
    {
        let (result, _, _) = encoding.decode(bytes);
        return result;
    }

    let (result, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
    result
}

/// Read the `encoding="..."` pseudo-attribute of a leading XML declaration.
pub fn xml_encoding_hint(bytes: &[u8]) -> Option<String> {
    let head = &bytes[..bytes.len().min(200)];
    let head = String::from_utf8_lossy(head);
    let decl_end = head.find("?>")?;
    let decl = &head[..decl_end];
    if !decl.trim_start_matches('\u{feff}').starts_with("<?xml") {
        return None;
    }
    let start = decl.find("encoding")? + "encoding".len();
    let rest = decl[start..].trim_start().strip_prefix('=')?.trim_start();
    let quote = rest.chars().next()?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    let value = &rest[1..];
    let end = value.find(quote)?;
    Some(value[..end].to_string())
}

/// Read a text file from disk, decoding it with [`decode_text`].
pub fn read_text(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    let hint = xml_encoding_hint(&bytes);
    Ok(decode_text(&bytes, hint.as_deref()).into_owned())
}

/// Split an href into its path part and optional fragment (without `#`).
pub fn split_fragment(href: &str) -> (&str, Option<&str>) {
    match href.split_once('#') {
        Some((path, fragment)) => (path, Some(fragment)),
        None => (href, None),
    }
}

/// Whether an href points outside the package (URL, mail link, data URI).
pub fn is_external_href(href: &str) -> bool {
    href.contains("://") || href.starts_with("data:") || href.starts_with("mailto:")
}

/// Resolve a document-relative href against a directory.
///
/// The fragment is dropped, percent escapes are decoded and `.`/`..`
/// components are folded lexically so the result can be compared with
/// other resolved paths.
pub fn resolve_href(base_dir: &Path, href: &str) -> PathBuf {
    let (path, _) = split_fragment(href);
    let decoded = percent_decode_str(path).decode_utf8_lossy();
    normalize_path(&base_dir.join(decoded.as_ref()))
}

/// Fold `.` and `..` components without touching the filesystem.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Compute the href that reaches `target` from a document living in `from_dir`.
///
/// Both paths must be absolute and normalized. Separators are always `/`.
pub fn relative_href(from_dir: &Path, target: &Path) -> String {
    let from: Vec<_> = from_dir.components().collect();
    let to: Vec<_> = target.components().collect();

    let common = from
        .iter()
        .zip(to.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<String> = Vec::new();
    for _ in common..from.len() {
        parts.push("..".to_string());
    }
    for component in &to[common..] {
        let raw = component.as_os_str().to_string_lossy();
        parts.push(utf8_percent_encode(&raw, HREF_ESCAPE).to_string());
    }
    parts.join("/")
}

/// Guess a media type from a file extension.
pub fn media_type_for_path(path: &str) -> Option<&'static str> {
    let ext = path.rsplit_once('.')?.1.to_ascii_lowercase();
    let media_type = match ext.as_str() {
        "xhtml" | "xht" => "application/xhtml+xml",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "ncx" => NCX_MEDIA_TYPE,
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "js" => "application/javascript",
        _ => return None,
    };
    Some(media_type)
}

pub const NCX_MEDIA_TYPE: &str = "application/x-dtbncx+xml";

/// Whether a media type denotes an HTML/XHTML content document.
pub fn is_content_media_type(media_type: &str) -> bool {
    matches!(media_type, "application/xhtml+xml" | "text/html")
}

/// Whether a media type denotes a raster image the encoder can handle.
pub fn is_raster_image(media_type: &str) -> bool {
    matches!(
        media_type,
        "image/jpeg" | "image/png" | "image/gif" | "image/webp" | "image/bmp"
    )
}

/// Whether a file name looks like an HTML/XHTML document.
pub fn is_content_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| matches!(e.to_ascii_lowercase().as_str(), "xhtml" | "html" | "htm"))
}
