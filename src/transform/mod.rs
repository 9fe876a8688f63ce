//! Content-document transforms.
//!
//! - Ruby: annotation merging, emphasis-dot expansion
//! - Images: wrapper normalization, SVG unwrapping
//! - Rules: user pattern/replacement pairs over serialized text
//! - Blank: blank-line run trimming (runs after merging)
//! - CSS: stylesheet scanning shared by relinking and the class inventory
//!
//! [`ContentRewriter`] chains the first three per document in a fixed order:
//! ruby, rules, images, marked spans.

pub mod blank;
pub mod css;
pub mod images;
pub mod rules;
pub mod ruby;

use std::fs;
use std::path::Path;

use log::debug;

use crate::config::Settings;
use crate::dom::Document;
use crate::error::{Error, Result};
use crate::util::read_text;
use rules::CompiledRules;

/// What one document rewrite did.
#[derive(Debug, Default)]
pub struct DocumentRewrite {
    pub text: String,
    pub changed: bool,
    pub rubies: usize,
    pub images: usize,
    pub spans: usize,
    pub rule_errors: Vec<Error>,
}

/// Per-document rewriter configured from [`Settings`].
#[derive(Debug)]
pub struct ContentRewriter {
    normalize_ruby: bool,
    apply_rules: bool,
    normalize_images: bool,
    expand_marked_spans: bool,
    marker_classes: String,
    image_ignore_class: String,
    rules: CompiledRules,
}

impl ContentRewriter {
    pub fn new(settings: &Settings, rules: CompiledRules) -> Self {
        Self {
            normalize_ruby: settings.normalize_ruby,
            apply_rules: settings.apply_rules,
            normalize_images: settings.normalize_images,
            expand_marked_spans: settings.expand_marked_spans,
            marker_classes: settings.marker_classes.clone(),
            image_ignore_class: settings.image_ignore_class.clone(),
            rules,
        }
    }

    /// Whether any stage is enabled.
    pub fn is_active(&self) -> bool {
        self.normalize_ruby
            || (self.apply_rules && !self.rules.is_empty())
            || self.normalize_images
            || self.expand_marked_spans
    }

    /// Rewrite one document's markup. `label` names it in log messages.
    pub fn rewrite(&self, source: &str, label: &str) -> DocumentRewrite {
        let mut report = DocumentRewrite::default();
        let mut text = source.to_string();

        if self.normalize_ruby {
            let mut doc = Document::parse_content(&text, label);
            report.rubies = ruby::normalize_ruby(&mut doc);
            text = doc.serialize();
        }

        if self.apply_rules && !self.rules.is_empty() {
            let (rewritten, errors) = self.rules.apply(&text);
            text = rewritten;
            report.rule_errors = errors;
        }

        if self.normalize_images || self.expand_marked_spans {
            let mut doc = Document::parse_content(&text, label);
            if self.normalize_images {
                report.images =
                    images::normalize_image_presentation(&mut doc, &self.image_ignore_class);
            }
            if self.expand_marked_spans {
                report.spans = ruby::expand_marked_spans(&mut doc, &self.marker_classes);
            }
            text = doc.serialize();
        }

        report.changed = text != source;
        report.text = text;
        report
    }

    /// Rewrite a document on disk, writing it back only if it changed.
    pub fn rewrite_file(&self, path: &Path) -> Result<DocumentRewrite> {
        let source = read_text(path)?;
        let report = self.rewrite(&source, &path.display().to_string());
        if report.changed {
            fs::write(path, &report.text)?;
        }
        debug!(
            "{}: {} ruby, {} images, {} spans",
            path.display(),
            report.rubies,
            report.images,
            report.spans
        );
        Ok(report)
    }
}
