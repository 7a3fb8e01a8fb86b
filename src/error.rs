use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum PackError {
    #[error("no catalog entry for selection token: {0}")]
    CatalogLookupMiss(String),

    #[error("download failed for {url}: {message}")]
    Network { url: String, message: String },

    #[error("{url} returned status {status}: {message}")]
    HttpStatus {
        url: String,
        status: u16,
        message: String,
    },

    #[error("archive error: {0}")]
    Archive(String),

    #[error("tool reported success but no files were downloaded into {0}")]
    EmptyDownload(String),

    #[error("external tool failed: {0}")]
    ToolFailed(String),

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("no datasets selected")]
    #[diagnostic(help("pass at least one token listed by `things-dl list`"))]
    EmptySelection,

    #[error("failed to create the output archive: {0}")]
    Packaging(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to read catalog file at {0}")]
    CatalogRead(PathBuf),

    #[error("invalid catalog: {0}")]
    CatalogParse(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),
}

impl PackError {
    /// Errors that only fail the current item; the driver keeps going.
    pub fn is_item_level(&self) -> bool {
        matches!(
            self,
            PackError::CatalogLookupMiss(_)
                | PackError::Network { .. }
                | PackError::HttpStatus { .. }
                | PackError::Archive(_)
                | PackError::EmptyDownload(_)
                | PackError::ToolFailed(_)
                | PackError::MissingTool(_)
                | PackError::Timeout(_)
                | PackError::Filesystem(_)
        )
    }

    /// HTTP-style status class for request-level failures.
    pub fn status_class(&self) -> u16 {
        match self {
            PackError::EmptySelection | PackError::CatalogLookupMiss(_) => 400,
            _ => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classes() {
        assert_eq!(PackError::EmptySelection.status_class(), 400);
        assert_eq!(PackError::Packaging("zero bytes".to_string()).status_class(), 500);
        assert!(!PackError::EmptySelection.is_item_level());
        assert!(PackError::Archive("bad".to_string()).is_item_level());
    }
}
