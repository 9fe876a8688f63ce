//! External image encoder adapter.
//!
//! The encoder is a batch program that converts images in place (writing
//! `name.<ext>` next to `name.jpg` and removing the original) and prints a
//! `succeeded N/M` summary. The pipeline only relies on [`ImageConverter`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::{debug, info, warn};

use crate::epub::manifest::rename_item;
use crate::epub::opf::PackageDocument;
use crate::epub::relink::relink_references;
use crate::error::{Error, Result};
use crate::util::is_raster_image;

/// Counts reported by one conversion batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConversionReport {
    pub succeeded: usize,
    pub total: usize,
}

/// Converts a batch of image files in place.
pub trait ImageConverter {
    fn convert(&self, paths: &[PathBuf], params: &str) -> Result<ConversionReport>;
}

/// Runs an encoder executable as a child process.
#[derive(Debug, Clone)]
pub struct ExternalEncoder {
    program: PathBuf,
}

impl ExternalEncoder {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl ImageConverter for ExternalEncoder {
    fn convert(&self, paths: &[PathBuf], params: &str) -> Result<ConversionReport> {
        if paths.is_empty() {
            return Ok(ConversionReport::default());
        }

        let output = Command::new(&self.program)
            .args(params.split_whitespace())
            .args(paths)
            .output()
            .map_err(|e| {
                Error::ExternalTool(format!("cannot run {}: {e}", self.program.display()))
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::ExternalTool(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            )));
        }

        match parse_success_count(&stdout) {
            Some((succeeded, total)) => Ok(ConversionReport { succeeded, total }),
            None => {
                let renamed = target_extension(params)
                    .map(|ext| detect_renames(paths, ext).len())
                    .unwrap_or(0);
                debug!("encoder printed no summary; {renamed} files renamed");
                Ok(ConversionReport {
                    succeeded: renamed,
                    total: paths.len(),
                })
            }
        }
    }
}

/// Find `succeeded N/M` in encoder output.
fn parse_success_count(stdout: &str) -> Option<(usize, usize)> {
    stdout.lines().rev().find_map(|line| {
        let start = line.find("succeeded")? + "succeeded".len();
        let rest = line[start..].trim_start_matches(|c: char| c == ':' || c.is_whitespace());
        let (done, total) = rest.split_once('/')?;
        let total: String = total.trim_start().chars().take_while(char::is_ascii_digit).collect();
        Some((done.trim().parse().ok()?, total.parse().ok()?))
    })
}

/// The output extension selected by the `-f` flag.
pub fn target_extension(params: &str) -> Option<&'static str> {
    let mut args = params.split_whitespace();
    while let Some(arg) = args.next() {
        if arg == "-f" {
            return match args.next()?.to_ascii_lowercase().as_str() {
                "webp" => Some("webp"),
                "png" => Some("png"),
                "jpg" | "jpeg" => Some("jpg"),
                _ => None,
            };
        }
    }
    None
}

/// Inputs that were replaced by a sibling with extension `ext`.
pub fn detect_renames(paths: &[PathBuf], ext: &str) -> HashMap<PathBuf, PathBuf> {
    paths
        .iter()
        .filter(|path| !path.exists())
        .filter_map(|path| {
            let converted = path.with_extension(ext);
            (converted != **path && converted.is_file()).then(|| (path.clone(), converted))
        })
        .collect()
}

/// Result of converting a package's images.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageConversion {
    pub report: ConversionReport,
    pub renamed: usize,
    pub references_updated: usize,
}

/// Convert every raster image in the manifest and fix up the package.
///
/// Images already in the target format are left out. Renamed files get their
/// manifest href and media type updated and every reference relinked. The
/// OPF is changed in memory only.
pub fn convert_package_images(
    opf: &mut PackageDocument,
    converter: &dyn ImageConverter,
    params: &str,
) -> Result<PackageConversion> {
    let Some(ext) = target_extension(params) else {
        return Err(Error::ExternalTool(format!(
            "no output format (-f webp|png|jpg) in `{params}`"
        )));
    };

    let inputs: Vec<PathBuf> = opf
        .items()
        .into_iter()
        .filter(|item| is_raster_image(&item.media_type))
        .map(|item| opf.resolve(&item.href))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_none_or(|e| !e.eq_ignore_ascii_case(ext))
        })
        .collect();

    if inputs.is_empty() {
        debug!("no images to convert");
        return Ok(PackageConversion::default());
    }

    let report = converter.convert(&inputs, params)?;
    if report.succeeded < report.total {
        warn!("image conversion: {}/{} succeeded", report.succeeded, report.total);
    }

    let renames = detect_renames(&inputs, ext);
    for (from, to) in &renames {
        if !rename_item(opf, from, to) {
            warn!("{} is not in the manifest", from.display());
        }
    }
    let references_updated = relink_references(opf, &renames)?;
    info!(
        "converted {}/{} images to {ext}, {} renamed",
        report.succeeded,
        report.total,
        renames.len()
    );

    Ok(PackageConversion {
        report,
        renamed: renames.len(),
        references_updated,
    })
}
