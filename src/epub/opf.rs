//! The OPF package document.
//!
//! [`PackageDocument`] keeps the parsed OPF tree and exposes the manifest,
//! spine and metadata views the rest of the crate works with. Edits go
//! straight into the tree so that unknown markup survives a round trip.

use std::fs;
use std::path::{Path, PathBuf};

use crate::dom::{Attribute, Document, Flavor, NodeId};
use crate::error::{Error, Result};
use crate::util::{read_text, relative_href, resolve_href};

/// One `<item>` of the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestItem {
    pub node: NodeId,
    pub id: String,
    pub href: String,
    pub media_type: String,
    pub properties: Option<String>,
}

impl ManifestItem {
    /// Whether the space-separated `properties` attribute contains `name`.
    pub fn has_property(&self, name: &str) -> bool {
        self.properties
            .as_deref()
            .is_some_and(|p| p.split_ascii_whitespace().any(|t| t == name))
    }
}

/// One `<itemref>` of the spine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpineRef {
    pub node: NodeId,
    pub idref: String,
}

/// A parsed package document together with its location in the work dir.
#[derive(Debug, Clone)]
pub struct PackageDocument {
    doc: Document,
    path: PathBuf,
    dir: PathBuf,
    package: NodeId,
    manifest: NodeId,
    spine: NodeId,
}

impl PackageDocument {
    /// Read and parse the OPF at `path`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = read_text(path)?;
        Self::parse(&text, path)
    }

    /// Parse OPF text that lives (or will live) at `path`.
    pub fn parse(text: &str, path: &Path) -> Result<Self> {
        let doc = Document::parse_xml(text, Flavor::Xml).map_err(|e| Error::parse(path, e))?;

        let package = doc
            .document_element()
            .filter(|&id| doc.is_named(id, "package"))
            .ok_or_else(|| Error::PackageStructure("root element is not <package>".into()))?;
        let manifest = doc
            .child_named(package, "manifest")
            .ok_or_else(|| Error::PackageStructure("package has no manifest".into()))?;
        let spine = doc
            .child_named(package, "spine")
            .ok_or_else(|| Error::PackageStructure("package has no spine".into()))?;

        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(Self {
            doc,
            path: path.to_path_buf(),
            dir,
            package,
            manifest,
            spine,
        })
    }

    /// Write the package document back to its path.
    pub fn save(&self) -> Result<()> {
        fs::write(&self.path, self.doc.serialize())?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory every manifest href is relative to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.doc
    }

    pub fn package_element(&self) -> NodeId {
        self.package
    }

    pub fn manifest_element(&self) -> NodeId {
        self.manifest
    }

    pub fn spine_element(&self) -> NodeId {
        self.spine
    }

    pub fn metadata_element(&self) -> Option<NodeId> {
        self.doc.child_named(self.package, "metadata")
    }

    /// The `version` attribute of the package element.
    pub fn version(&self) -> Option<&str> {
        self.doc.attr(self.package, "version")
    }

    // ------------------------------------------------------------------------
    // Manifest
    // ------------------------------------------------------------------------

    /// All manifest items in document order.
    pub fn items(&self) -> Vec<ManifestItem> {
        self.doc
            .children(self.manifest)
            .filter(|&id| self.doc.is_named(id, "item"))
            .map(|id| self.item_at(id))
            .collect()
    }

    fn item_at(&self, node: NodeId) -> ManifestItem {
        let get = |name| self.doc.attr(node, name).unwrap_or_default().to_string();
        ManifestItem {
            node,
            id: get("id"),
            href: get("href"),
            media_type: get("media-type"),
            properties: self.doc.attr(node, "properties").map(str::to_string),
        }
    }

    pub fn item(&self, id: &str) -> Option<ManifestItem> {
        self.items().into_iter().find(|item| item.id == id)
    }

    /// The manifest item whose href resolves to `path`.
    pub fn item_by_path(&self, path: &Path) -> Option<ManifestItem> {
        self.items()
            .into_iter()
            .find(|item| self.resolve(&item.href) == path)
    }

    /// Append a new `<item>` to the manifest.
    pub fn add_item(&mut self, id: &str, href: &str, media_type: &str) -> NodeId {
        let item = self.doc.create_element(
            "item",
            vec![
                Attribute::new("id", id),
                Attribute::new("href", href),
                Attribute::new("media-type", media_type),
            ],
        );
        let manifest = self.manifest;
        self.doc.append(manifest, item);
        item
    }

    /// Remove the manifest item with the given id. Returns whether one existed.
    pub fn remove_item(&mut self, id: &str) -> bool {
        match self.item(id) {
            Some(item) => {
                self.doc.detach(item.node);
                true
            }
            None => false,
        }
    }

    /// An id based on `base` that no manifest item uses yet.
    pub fn unique_id(&self, base: &str) -> String {
        let items = self.items();
        let taken = |candidate: &str| items.iter().any(|item| item.id == candidate);
        if !taken(base) {
            return base.to_string();
        }
        (1..)
            .map(|n| format!("{base}-{n}"))
            .find(|candidate| !taken(candidate))
            .unwrap_or_else(|| base.to_string())
    }

    // ------------------------------------------------------------------------
    // Spine
    // ------------------------------------------------------------------------

    pub fn spine(&self) -> Vec<SpineRef> {
        self.doc
            .children(self.spine)
            .filter(|&id| self.doc.is_named(id, "itemref"))
            .map(|node| SpineRef {
                node,
                idref: self.doc.attr(node, "idref").unwrap_or_default().to_string(),
            })
            .collect()
    }

    /// Absolute paths of the spine documents in reading order.
    ///
    /// Itemrefs that point at no manifest item are left out.
    pub fn spine_paths(&self) -> Vec<(String, PathBuf)> {
        let items = self.items();
        self.spine()
            .into_iter()
            .filter_map(|itemref| {
                items
                    .iter()
                    .find(|item| item.id == itemref.idref)
                    .map(|item| (item.id.clone(), self.resolve(&item.href)))
            })
            .collect()
    }

    /// Remove every itemref pointing at `idref`.
    pub fn remove_itemref(&mut self, idref: &str) -> usize {
        let matching: Vec<NodeId> = self
            .spine()
            .into_iter()
            .filter(|r| r.idref == idref)
            .map(|r| r.node)
            .collect();
        for node in &matching {
            self.doc.detach(*node);
        }
        matching.len()
    }

    // ------------------------------------------------------------------------
    // Metadata
    // ------------------------------------------------------------------------

    /// Text of the first metadata element with the given local name.
    pub fn metadata_text(&self, local_name: &str) -> Option<String> {
        let metadata = self.metadata_element()?;
        self.doc
            .find_first(metadata, local_name)
            .map(|id| self.doc.text_content(id).trim().to_string())
            .filter(|s| !s.is_empty())
    }

    pub fn title(&self) -> Option<String> {
        self.metadata_text("title")
    }

    /// The package's unique identifier.
    ///
    /// Prefers the `dc:identifier` named by `unique-identifier`, then the first one.
    pub fn identifier(&self) -> Option<String> {
        let metadata = self.metadata_element()?;
        let identifiers = self.doc.find_all(metadata, "identifier");
        let unique = self.doc.attr(self.package, "unique-identifier");
        identifiers
            .iter()
            .find(|&&id| unique.is_some() && self.doc.attr(id, "id") == unique)
            .or(identifiers.first())
            .map(|&id| self.doc.text_content(id).trim().to_string())
            .filter(|s| !s.is_empty())
    }

    // ------------------------------------------------------------------------
    // Paths
    // ------------------------------------------------------------------------

    /// Resolve a manifest href to an absolute path.
    pub fn resolve(&self, href: &str) -> PathBuf {
        resolve_href(&self.dir, href)
    }

    /// The manifest href for an absolute path.
    pub fn href_for(&self, path: &Path) -> String {
        relative_href(&self.dir, path)
    }

    /// Problems that break the manifest/spine invariants: dangling itemrefs
    /// and items whose file is missing.
    pub fn integrity_problems(&self) -> Vec<String> {
        let items = self.items();
        let mut problems = Vec::new();
        for itemref in self.spine() {
            if !items.iter().any(|item| item.id == itemref.idref) {
                problems.push(format!("itemref {} has no manifest item", itemref.idref));
            }
        }
        for item in &items {
            if !self.resolve(&item.href).is_file() {
                problems.push(format!("item {} points at missing {}", item.id, item.href));
            }
        }
        problems
    }
}
