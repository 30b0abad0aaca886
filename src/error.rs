use std::time::Duration;

use thiserror::Error;

/// Document-level failures. Everything that can degrade gracefully (OCR
/// outages, glyph gaps, overflow, missing keys) is reported through the
/// detection and fill diagnostics instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed document: {0}")]
    MalformedDocument(#[source] lopdf::Error),

    #[error("document is {size} bytes, limit is {limit}")]
    DocumentTooLarge { size: usize, limit: usize },

    #[error("document has no pages")]
    NoPages,

    #[error("font {selection} could not be resolved: {reason}")]
    FontUnresolvable { selection: String, reason: String },

    #[error("failed to serialize document: {0}")]
    Serialize(#[source] lopdf::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("OCR unavailable: {0}")]
    Unavailable(String),

    #[error("OCR timed out after {0:?}")]
    Timeout(Duration),

    #[error("OCR engine failed: {0}")]
    Engine(String),

    #[error("rasterization failed: {0}")]
    Raster(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl OcrError {
    /// Outages and timeouts abandon the whole OCR pass.
    pub fn is_outage(&self) -> bool {
        matches!(self, OcrError::Unavailable(_) | OcrError::Timeout(_))
    }
}

#[derive(Debug, Error)]
pub enum FontError {
    #[error("font object {0} {1} R not found")]
    MissingObject(u32, u16),

    #[error("font has no embedded program it can draw with: {0}")]
    NotEmbedded(String),

    #[error("unsupported font program: {0}")]
    Unsupported(String),

    #[error("font parse failed: {0}")]
    Parse(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Pdf(#[from] lopdf::Error),
}
