pub mod annotations;
pub mod config;
pub mod document;
pub mod error;
pub mod fill;
pub mod fonts;
pub mod forms;
pub mod geo;
pub mod layout;
pub mod logging;
pub mod merger;
pub mod model;
pub mod normalize;
pub mod ocr;
pub mod parse;
pub mod text_layer;

use std::sync::Arc;

use tracing::{info, warn};

pub use crate::config::EngineConfig;
pub use crate::document::PdfDocument;
pub use crate::error::{Error, FontError, OcrError, Result};
pub use crate::fonts::{FontDescriptor, FontResolver, FontSelection};
pub use crate::geo::Rect;
pub use crate::model::{
    Alignment, DetectionResult, EraseMode, FillDiagnostics, FillFieldSpec, FillOutcome, FillReport, FillStatus,
    HAlign, MergedMark, PlaceholderCandidate, ProviderPolicy, ProviderUsed, SizeMode, Source, VAlign,
};
pub use crate::normalize::{find_placeholders, normalize_key};
pub use crate::ocr::{OcrEngine, OcrExtractor, OcrStatus, PageRasterizer};

use crate::logging::DETECT;

/// Detection and fill behind one read-only configuration. Documents are
/// per-request values; the engine itself can be shared across threads.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    resolver: FontResolver,
    ocr: Option<OcrExtractor>,
}

impl Engine {
    /// Loads the default font and starts the OCR runtime. An OCR setup
    /// failure only disables OCR.
    pub fn new(config: EngineConfig) -> Self {
        let resolver = FontResolver::new(&config.fonts);
        let ocr = match OcrExtractor::new(&config.ocr) {
            Ok(extractor) => Some(extractor),
            Err(e) => {
                warn!(target: DETECT, error = %e, "OCR disabled");
                None
            }
        };
        Engine { config, resolver, ocr }
    }

    /// Engine with caller-supplied OCR parts, for embedding other engines
    /// or for tests.
    pub fn with_ocr(
        config: EngineConfig,
        engine: Arc<dyn OcrEngine>,
        rasterizer: Arc<dyn PageRasterizer>,
    ) -> std::result::Result<Self, OcrError> {
        let resolver = FontResolver::new(&config.fonts);
        let ocr = OcrExtractor::with_parts(&config.ocr, engine, rasterizer)?;
        Ok(Engine {
            config,
            resolver,
            ocr: Some(ocr),
        })
    }

    /// Engine that never runs OCR.
    pub fn local_only(config: EngineConfig) -> Self {
        let resolver = FontResolver::new(&config.fonts);
        Engine {
            config,
            resolver,
            ocr: None,
        }
    }

    /// Replaces the font resolver, e.g. to pin a specific default font.
    pub fn with_resolver(mut self, resolver: FontResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn load(&self, bytes: &[u8]) -> Result<PdfDocument> {
        PdfDocument::load_with_limit(bytes, self.config.max_document_bytes)
    }

    pub fn detect(&self, doc: &PdfDocument, policy: ProviderPolicy) -> DetectionResult {
        info!(target: DETECT, pages = doc.page_count(), %policy, "detecting placeholders");
        merger::detect(doc, policy, &self.config.detection, self.ocr.as_ref())
    }

    pub fn list_fonts(&self, doc: &PdfDocument) -> Vec<FontDescriptor> {
        fonts::list_fonts(doc)
    }

    /// Consumes `doc`; the filled bytes are in the report.
    pub fn fill(&self, doc: PdfDocument, detection: &DetectionResult, specs: &[FillFieldSpec]) -> Result<FillReport> {
        fill::fill(doc, detection, specs, &self.resolver, &self.config.fill)
    }

    /// Detects then fills in one go.
    pub fn detect_and_fill(
        &self,
        doc: PdfDocument,
        policy: ProviderPolicy,
        specs: &[FillFieldSpec],
    ) -> Result<(DetectionResult, FillReport)> {
        let detection = self.detect(&doc, policy);
        let report = self.fill(doc, &detection, specs)?;
        Ok((detection, report))
    }

    pub fn ocr_status(&self) -> OcrStatus {
        match &self.ocr {
            Some(extractor) => extractor.status(),
            None => OcrStatus {
                engine_path: self.config.ocr.tesseract_cmd.as_ref().map(|p| p.display().to_string()),
                available: false,
                version: None,
                languages: self.config.ocr.languages.clone(),
            },
        }
    }
}
