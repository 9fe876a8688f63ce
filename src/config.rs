//! Pipeline settings.
//!
//! Settings are read once from a TOML file and passed into the pipeline;
//! nothing mutates them afterwards. Every key is optional.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Which stages run and with what parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub normalize_ruby: bool,
    pub apply_rules: bool,
    pub normalize_images: bool,
    pub expand_marked_spans: bool,
    /// `|`-separated classes whose spans become sesame-dot ruby.
    pub marker_classes: String,
    /// Images with this class are never rewrapped.
    pub image_ignore_class: String,

    pub remove_reading_direction: bool,
    pub generate_ncx: bool,
    pub downgrade_to_epub2: bool,

    pub merge_chapters: bool,
    /// TOC hrefs that never start a merge range.
    pub merge_excluded_hrefs: Vec<String>,

    pub blank_remove_count: Option<usize>,
    pub blank_limit_count: Option<usize>,

    /// Stylesheet that replaces every stylesheet in the package.
    pub stylesheet: Option<PathBuf>,
    /// Rule file; the stock rules are used when unset.
    pub rules_file: Option<PathBuf>,

    pub image_conversion: Option<ImageConversion>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            normalize_ruby: true,
            apply_rules: true,
            normalize_images: true,
            expand_marked_spans: true,
            marker_classes: "em-sesame".to_string(),
            image_ignore_class: "gaiji".to_string(),
            remove_reading_direction: false,
            generate_ncx: false,
            downgrade_to_epub2: false,
            merge_chapters: false,
            merge_excluded_hrefs: vec![],
            blank_remove_count: None,
            blank_limit_count: None,
            stylesheet: None,
            rules_file: None,
            image_conversion: None,
        }
    }
}

/// External image encoder invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageConversion {
    /// Encoder executable.
    pub encoder: PathBuf,
    /// Argument string, e.g. `-f webp -q 85 --max-height 2400 -t 4`.
    #[serde(default)]
    pub params: String,
}

impl Settings {
    /// Read settings from a TOML file.
    ///
    /// Relative paths are resolved against the file's directory.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        let mut settings = Self::from_toml(&text)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;

        if let Some(base) = path.parent() {
            settings.resolve_paths(base);
        }
        Ok(settings)
    }

    /// Parse settings from TOML text.
    pub fn from_toml(text: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    fn resolve_paths(&mut self, base: &Path) {
        for path in [self.stylesheet.as_mut(), self.rules_file.as_mut()].into_iter().flatten() {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
        // A bare encoder name is looked up on PATH unless it sits next to the file.
        if let Some(conversion) = self.image_conversion.as_mut()
            && conversion.encoder.is_relative()
            && base.join(&conversion.encoder).exists()
        {
            conversion.encoder = base.join(&conversion.encoder);
        }
    }

    /// The marker classes as a list.
    pub fn marker_class_list(&self) -> Vec<&str> {
        self.marker_classes
            .split('|')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .collect()
    }
}
