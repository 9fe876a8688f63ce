//! Package extraction and repacking.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, warn};
use tempfile::{NamedTempFile, TempDir};
use walkdir::WalkDir;
use zip::ZipArchive;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::dom::{Document, Flavor};
use crate::error::{Error, Result};
use crate::util::{normalize_path, read_text};

const CONTAINER_PATH: &str = "META-INF/container.xml";
const MIMETYPE: &[u8] = b"application/epub+zip";

/// A package extracted into a temporary directory.
///
/// The directory is removed when the value is dropped.
#[derive(Debug)]
pub struct WorkDir {
    dir: TempDir,
}

impl WorkDir {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Unpack every entry of an EPUB into a fresh temporary directory.
pub fn extract<P: AsRef<Path>>(archive_path: P) -> Result<WorkDir> {
    let archive_path = archive_path.as_ref();
    let file = File::open(archive_path).map_err(|e| {
        Error::ArchiveMessage(format!("cannot open {}: {e}", archive_path.display()))
    })?;
    let dir = TempDir::with_prefix("sesame-")?;
    extract_into(file, dir.path())?;
    debug!("extracted {} to {}", archive_path.display(), dir.path().display());
    Ok(WorkDir { dir })
}

/// Unpack an archive from any reader into `dest`.
pub fn extract_into<R: io::Read + io::Seek>(reader: R, dest: &Path) -> Result<()> {
    let mut archive = ZipArchive::new(reader)?;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let Some(relative) = entry.enclosed_name() else {
            warn!("skipping archive entry with unsafe path: {}", entry.name());
            continue;
        };
        let target = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        io::copy(&mut entry, &mut out)?;
    }

    if dest.join("META-INF/encryption.xml").exists() {
        warn!("package declares encrypted resources; they will be copied untouched");
    }
    Ok(())
}

/// Find the package document named by `META-INF/container.xml`.
pub fn locate_root_document(work_dir: &Path) -> Result<PathBuf> {
    let container_path = work_dir.join(CONTAINER_PATH);
    if !container_path.is_file() {
        return Err(Error::PackageStructure(format!("missing {CONTAINER_PATH}")));
    }

    let text = read_text(&container_path)?;
    let doc = Document::parse_xml(&text, Flavor::Xml).map_err(|e| Error::parse(&container_path, e))?;

    let full_path = doc
        .find_all(doc.root(), "rootfile")
        .into_iter()
        .find_map(|id| doc.attr(id, "full-path").map(str::to_string))
        .filter(|p| !p.is_empty())
        .ok_or_else(|| Error::PackageStructure("no rootfile declared in container.xml".into()))?;

    let opf_path = normalize_path(&work_dir.join(&full_path));
    if !opf_path.is_file() {
        return Err(Error::PackageStructure(format!(
            "root document {full_path} does not exist"
        )));
    }
    Ok(opf_path)
}

/// Zip the working directory into `output`.
///
/// `mimetype` goes first and uncompressed, everything else is deflated in
/// sorted path order. The archive is written to a temporary file beside
/// `output` and moved into place only once complete.
pub fn repack<P: AsRef<Path>>(work_dir: &Path, output: P) -> Result<()> {
    let output = output.as_ref();
    let parent = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut tmp = NamedTempFile::new_in(&parent)?;

    {
        let mut zip = ZipWriter::new(BufWriter::new(tmp.as_file_mut()));
        write_entries(&mut zip, work_dir)?;
        zip.finish()?.flush()?;
    }

    tmp.persist(output).map_err(|e| Error::Io(e.error))?;
    debug!("wrote {}", output.display());
    Ok(())
}

fn write_entries<W: Write + io::Seek>(zip: &mut ZipWriter<W>, work_dir: &Path) -> Result<()> {
    let options_stored =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    let options_deflate =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    let mimetype_path = work_dir.join("mimetype");
    let mimetype = if mimetype_path.is_file() {
        fs::read(&mimetype_path)?
    } else {
        MIMETYPE.to_vec()
    };
    zip.start_file("mimetype", options_stored)?;
    zip.write_all(&mimetype)?;

    for entry in WalkDir::new(work_dir).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(work_dir) else {
            continue;
        };
        let name = archive_name(relative);
        if name == "mimetype" {
            continue;
        }
        zip.start_file(name.as_str(), options_deflate)?;
        let mut file = File::open(entry.path())?;
        io::copy(&mut file, zip)?;
    }
    Ok(())
}

/// Archive entry name for a path relative to the work dir: always `/`-separated.
fn archive_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn write_tree(root: &Path) {
        fs::create_dir_all(root.join("META-INF")).unwrap();
        fs::create_dir_all(root.join("OEBPS/Text")).unwrap();
        fs::write(root.join("mimetype"), MIMETYPE).unwrap();
        fs::write(
            root.join(CONTAINER_PATH),
            r#"<?xml version="1.0"?><container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container"><rootfiles><rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/></rootfiles></container>"#,
        )
        .unwrap();
        fs::write(root.join("OEBPS/content.opf"), "<package/>").unwrap();
        fs::write(root.join("OEBPS/Text/ch1.xhtml"), "<html/>").unwrap();
    }

    #[test]
    fn test_locate_root_document() {
        let dir = TempDir::new().unwrap();
        write_tree(dir.path());
        let opf = locate_root_document(dir.path()).unwrap();
        assert_eq!(opf, dir.path().join("OEBPS/content.opf"));
    }

    #[test]
    fn test_missing_container_is_structure_error() {
        let dir = TempDir::new().unwrap();
        let err = locate_root_document(dir.path()).unwrap_err();
        assert!(matches!(err, Error::PackageStructure(_)));
    }

    #[test]
    fn test_missing_rootfile_is_structure_error() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("META-INF")).unwrap();
        fs::write(
            dir.path().join(CONTAINER_PATH),
            "<container><rootfiles/></container>",
        )
        .unwrap();
        let err = locate_root_document(dir.path()).unwrap_err();
        assert!(matches!(err, Error::PackageStructure(_)));
    }

    #[test]
    fn test_repack_then_extract() {
        let src = TempDir::new().unwrap();
        write_tree(src.path());
        let out_dir = TempDir::new().unwrap();
        let out = out_dir.path().join("book.epub");
        repack(src.path(), &out).unwrap();

        let mut archive = ZipArchive::new(File::open(&out).unwrap()).unwrap();
        {
            let mut first = archive.by_index(0).unwrap();
            assert_eq!(first.name(), "mimetype");
            assert_eq!(first.compression(), zip::CompressionMethod::Stored);
            let mut content = String::new();
            first.read_to_string(&mut content).unwrap();
            assert_eq!(content, "application/epub+zip");
        }
        assert!(archive.by_name("OEBPS/Text/ch1.xhtml").is_ok());
        assert_eq!(archive.len(), 4);

        let work = extract(&out).unwrap();
        assert!(work.path().join("OEBPS/content.opf").is_file());
    }

    #[test]
    fn test_extract_invalid_zip() {
        let dir = TempDir::new().unwrap();
        let bogus = dir.path().join("bogus.epub");
        fs::write(&bogus, b"not a zip").unwrap();
        assert!(matches!(extract(&bogus), Err(Error::Archive(_))));
    }
}
