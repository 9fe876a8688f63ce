//! # sesame
//!
//! An EPUB rewriting pipeline for Japanese books: emphasis-dot spans become
//! ruby, split ruby annotations are merged, image markup is normalized,
//! chapters split across several files are merged back along the table of
//! contents, and the package is repacked.
//!
//! ## Quick Start
//!
//! ```no_run
//! use sesame::{Pipeline, Settings};
//! use std::path::Path;
//!
//! let settings = Settings {
//!     merge_chapters: true,
//!     generate_ncx: true,
//!     ..Settings::default()
//! };
//! let pipeline = Pipeline::from_settings(settings).unwrap();
//! let report = pipeline
//!     .process(Path::new("input.epub"), Path::new("output.epub"))
//!     .unwrap();
//! println!("{} documents rewritten", report.documents_rewritten);
//! ```
//!
//! ## Working with the pieces
//!
//! Every stage is usable on its own: [`epub::archive`] extracts and repacks,
//! [`epub::opf::PackageDocument`] edits the manifest and spine,
//! [`epub::nav`] reads and generates navigation, [`transform`] rewrites
//! content documents and [`merge`] folds chapters together.
//!
//! ```
//! use sesame::dom::{Document, Flavor};
//! use sesame::transform::ruby::normalize_ruby;
//!
//! let mut doc = Document::parse_xml("<p><ruby>XY<rt>a</rt><rt>b</rt></ruby></p>", Flavor::Xhtml).unwrap();
//! normalize_ruby(&mut doc);
//! assert_eq!(doc.serialize(), "<p><ruby>XY<rt>ab</rt></ruby></p>");
//! ```

pub mod config;
pub mod dom;
pub mod epub;
pub mod error;
pub mod images;
pub mod inspect;
pub mod merge;
pub mod pipeline;
pub mod transform;
pub(crate) mod util;

pub use config::{ImageConversion, Settings};
pub use epub::{Outcome, TocEntry};
pub use error::{Error, Result};
pub use images::{ConversionReport, ExternalEncoder, ImageConverter};
pub use inspect::{ClassReport, collect_classes};
pub use merge::{MergeReport, merge};
pub use pipeline::{Pipeline, ProcessReport};
pub use transform::rules::{Rule, RuleSet};
