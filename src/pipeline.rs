//! End-to-end processing of one package, and of a batch of packages.
//!
//! Stages run in a fixed order over an extracted working directory; the
//! output archive is only written once every stage has succeeded.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};

use crate::config::Settings;
use crate::dom::Document;
use crate::epub::archive::{extract, locate_root_document, repack};
use crate::epub::manifest::{
    correct_media_types, downgrade_to_version2, prune_stylesheet_references, register_stylesheet,
    relink_stylesheet, remove_reading_direction,
};
use crate::epub::nav::{generate_ncx, load_toc};
use crate::epub::opf::PackageDocument;
use crate::epub::Outcome;
use crate::error::{Error, Result};
use crate::images::{ExternalEncoder, ImageConverter, PackageConversion, convert_package_images};
use crate::merge::merge;
use crate::transform::ContentRewriter;
use crate::transform::blank;
use crate::transform::rules::{CompiledRules, RuleSet};
use crate::util::{is_content_media_type, read_text, relative_href};

/// Directory, relative to the package document, that receives an installed stylesheet.
const STYLES_DIR: &str = "Styles";

/// What processing one package did.
#[derive(Debug, Default)]
pub struct ProcessReport {
    pub media_types_corrected: usize,
    pub reading_direction_removed: bool,
    /// Set when NCX generation was requested.
    pub ncx: Option<Outcome>,
    /// Set when the EPUB 2 downgrade was requested.
    pub downgrade: Option<Outcome>,
    pub documents_rewritten: usize,
    /// Rules that failed to compile or to match. Never fatal.
    pub rule_errors: Vec<Error>,
    pub stylesheets_replaced: usize,
    pub images: Option<PackageConversion>,
    pub documents_absorbed: usize,
    pub blank_nodes_removed: usize,
}

/// The transformation pipeline, configured once and reusable across packages.
pub struct Pipeline {
    settings: Settings,
    rules: RuleSet,
    converter: Option<Box<dyn ImageConverter>>,
}

impl Pipeline {
    pub fn new(settings: Settings, rules: RuleSet) -> Self {
        Self {
            settings,
            rules,
            converter: None,
        }
    }

    /// Build a pipeline whose rules come from `settings.rules_file`, or the
    /// stock rules when none is configured.
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let rules = match &settings.rules_file {
            Some(path) => RuleSet::load(path)?,
            None => RuleSet::defaults(),
        };
        Ok(Self::new(settings, rules))
    }

    /// Use `converter` instead of spawning the configured encoder.
    pub fn with_converter(mut self, converter: Box<dyn ImageConverter>) -> Self {
        self.converter = Some(converter);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Transform `input` and write the result to `output`.
    ///
    /// Any error aborts before `output` is touched.
    pub fn process(&self, input: &Path, output: &Path) -> Result<ProcessReport> {
        let settings = &self.settings;
        let mut report = ProcessReport::default();

        info!("processing {}", input.display());
        let work = extract(input)?;
        let root = work.path();
        let opf_path = locate_root_document(root)?;
        let mut opf = PackageDocument::load(&opf_path)?;

        report.media_types_corrected = correct_media_types(&mut opf);

        if settings.remove_reading_direction {
            report.reading_direction_removed = remove_reading_direction(&mut opf);
        }

        if settings.generate_ncx {
            let outcome = generate_ncx(&mut opf);
            if !outcome.ok {
                warn!("{outcome}");
            }
            report.ncx = Some(outcome);
        }

        if settings.downgrade_to_epub2 {
            let outcome = downgrade_to_version2(&mut opf);
            if !outcome.ok {
                warn!("{outcome}");
            }
            report.downgrade = Some(outcome);
        }
        opf.save()?;

        self.rewrite_documents(&opf, &mut report)?;

        if let Some(stylesheet) = &settings.stylesheet {
            report.stylesheets_replaced = install_stylesheet(&mut opf, stylesheet)?;
            opf.save()?;
        }

        if let Some(conversion) = &settings.image_conversion {
            let encoder;
            let converter: &dyn ImageConverter = match &self.converter {
                Some(converter) => converter.as_ref(),
                None => {
                    encoder = ExternalEncoder::new(&conversion.encoder);
                    &encoder
                }
            };
            report.images = Some(convert_package_images(&mut opf, converter, &conversion.params)?);
            opf.save()?;
        }

        if settings.merge_chapters {
            let toc = load_toc(&opf)?;
            let merged = merge(root, &mut opf, &toc, &settings.merge_excluded_hrefs)?;
            report.documents_absorbed = merged.absorbed.len();
        }

        report.blank_nodes_removed =
            blank::normalize(root, settings.blank_remove_count, settings.blank_limit_count)?;
        if report.blank_nodes_removed > 0 {
            info!("removed {} blank nodes", report.blank_nodes_removed);
        }

        repack(root, output)?;
        info!("wrote {}", output.display());
        Ok(report)
    }

    fn rewrite_documents(&self, opf: &PackageDocument, report: &mut ProcessReport) -> Result<()> {
        let (compiled, compile_errors) = if self.settings.apply_rules {
            CompiledRules::compile(&self.rules.rules)
        } else {
            (CompiledRules::default(), Vec::new())
        };
        report.rule_errors.extend(compile_errors);

        let rewriter = ContentRewriter::new(&self.settings, compiled);
        if !rewriter.is_active() {
            return Ok(());
        }

        for item in opf.items() {
            if !is_content_media_type(&item.media_type) {
                continue;
            }
            let path = opf.resolve(&item.href);
            if !path.is_file() {
                continue;
            }
            let rewrite = rewriter.rewrite_file(&path)?;
            if rewrite.changed {
                report.documents_rewritten += 1;
            }
            report.rule_errors.extend(rewrite.rule_errors);
        }
        info!("rewrote {} content documents", report.documents_rewritten);
        Ok(())
    }

    /// Process several packages one after the other.
    ///
    /// A failed package is logged and does not stop the batch.
    pub fn process_batch(&self, jobs: &[(PathBuf, PathBuf)]) -> Vec<Result<ProcessReport>> {
        jobs.iter()
            .map(|(input, output)| {
                let result = self.process(input, output);
                if let Err(err) = &result {
                    error!("{}: {err}", input.display());
                }
                result
            })
            .collect()
    }
}

/// Replace every stylesheet with `stylesheet`, copied to `Styles/` next to
/// the package document. Returns the number of stylesheets removed.
fn install_stylesheet(opf: &mut PackageDocument, stylesheet: &Path) -> Result<usize> {
    let name = stylesheet.file_name().ok_or_else(|| {
        Error::Config(format!("stylesheet {} has no file name", stylesheet.display()))
    })?;

    let pruned = prune_stylesheet_references(opf);
    for path in &pruned {
        match fs::remove_file(path) {
            Ok(()) => debug!("deleted {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }

    let styles_dir = opf.dir().join(STYLES_DIR);
    fs::create_dir_all(&styles_dir)?;
    let target = styles_dir.join(name);
    fs::copy(stylesheet, &target).map_err(|e| {
        Error::Config(format!("cannot copy stylesheet {}: {e}", stylesheet.display()))
    })?;
    let href = opf.href_for(&target);
    register_stylesheet(opf, &href);

    for item in opf.items() {
        if !is_content_media_type(&item.media_type) {
            continue;
        }
        let path = opf.resolve(&item.href);
        if !path.is_file() {
            continue;
        }
        let dir = path.parent().unwrap_or(Path::new(""));
        let text = read_text(&path)?;
        let mut doc = Document::parse_content(&text, &item.href);
        relink_stylesheet(&mut doc, &relative_href(dir, &target));
        fs::write(&path, doc.serialize())?;
    }

    info!("installed stylesheet {href}, replacing {}", pruned.len());
    Ok(pruned.len())
}
