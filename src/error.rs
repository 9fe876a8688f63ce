//! Error types for sesame operations.

use thiserror::Error;

/// Errors that can occur while transforming an EPUB package.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("archive error: {0}")]
    ArchiveMessage(String),

    #[error("invalid package structure: {0}")]
    PackageStructure(String),

    #[error("XML parsing error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("cannot parse {path}: {message}")]
    Parse { path: String, message: String },

    #[error("conversion failed: {0}")]
    Conversion(String),

    #[error("external tool failed: {0}")]
    ExternalTool(String),

    #[error("invalid rule `{pattern}`: {message}")]
    Rule { pattern: String, message: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn parse(path: impl AsRef<std::path::Path>, message: impl ToString) -> Self {
        Error::Parse {
            path: path.as_ref().display().to_string(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
