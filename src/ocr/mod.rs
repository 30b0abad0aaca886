//! Placeholders that exist only as pixels.
//!
//! Pages are rasterized, handed to an [`OcrEngine`], and the recognized
//! words are scaled into page space and stitched back into `{{key}}`
//! tokens. The extractor owns a small tokio runtime so callers stay
//! synchronous; it must not be driven from inside another runtime.

pub mod raster;
pub mod reconstruct;
pub mod tesseract;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::OcrConfig;
use crate::document::{PageGeometry, PdfDocument};
use crate::error::OcrError;
use crate::geo::Rect;
use crate::logging::OCR;
use crate::model::PlaceholderCandidate;

pub use raster::{PageRasterizer, PdfiumRasterizer};
pub use reconstruct::reconstruct;
pub use tesseract::TesseractCli;

/// Tesseract's `(block, paragraph, line)` triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct LineKey {
    pub block: u32,
    pub paragraph: u32,
    pub line: u32,
}

/// A recognized word. `rect` is in image pixels until the extractor
/// rescales it to page space.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrWord {
    pub text: String,
    pub rect: Rect,
    /// 0-100.
    pub confidence: f32,
    pub line: LineKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcrRequest {
    /// `+`-joined language codes.
    pub languages: String,
    /// Page segmentation mode.
    pub psm: u32,
}

#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn recognize(&self, image: &RgbImage, request: &OcrRequest) -> Result<Vec<OcrWord>, OcrError>;

    async fn version(&self) -> Result<String, OcrError>;

    /// Executable or model location, for status reporting.
    fn path(&self) -> Option<PathBuf> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrStatus {
    pub engine_path: Option<String>,
    pub available: bool,
    pub version: Option<String>,
    pub languages: Vec<String>,
}

/// What one OCR pass over a document produced.
#[derive(Debug, Default)]
pub struct OcrPass {
    pub candidates: Vec<PlaceholderCandidate>,
    /// Zero-based pages that failed without taking the engine down.
    pub failed_pages: Vec<usize>,
}

pub struct OcrExtractor {
    engine: Arc<dyn OcrEngine>,
    rasterizer: Arc<dyn PageRasterizer>,
    config: OcrConfig,
    runtime: tokio::runtime::Runtime,
    permits: Arc<Semaphore>,
}

impl std::fmt::Debug for OcrExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OcrExtractor")
            .field("engine", &self.engine.path())
            .field("config", &self.config)
            .finish()
    }
}

impl OcrExtractor {
    /// Tesseract plus pdfium, as configured.
    pub fn new(config: &OcrConfig) -> Result<Self, OcrError> {
        let engine = Arc::new(TesseractCli::new(config.tesseract_cmd.as_deref()));
        let rasterizer = Arc::new(PdfiumRasterizer::new(config.pdfium_library.clone()));
        Self::with_parts(config, engine, rasterizer)
    }

    pub fn with_parts(
        config: &OcrConfig,
        engine: Arc<dyn OcrEngine>,
        rasterizer: Arc<dyn PageRasterizer>,
    ) -> Result<Self, OcrError> {
        let workers = config.max_concurrent.max(1);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(workers)
            .thread_name("stencil-ocr")
            .enable_all()
            .build()?;
        Ok(OcrExtractor {
            engine,
            rasterizer,
            config: config.clone(),
            runtime,
            permits: Arc::new(Semaphore::new(workers)),
        })
    }

    pub fn status(&self) -> OcrStatus {
        let version = self.runtime.block_on(async {
            tokio::time::timeout(self.config.timeout(), self.engine.version()).await
        });
        let version = match version {
            Ok(Ok(v)) => Some(v),
            Ok(Err(e)) => {
                debug!(target: OCR, error = %e, "engine version unavailable");
                None
            }
            Err(_) => None,
        };
        OcrStatus {
            engine_path: self.engine.path().map(|p| p.display().to_string()),
            available: version.is_some(),
            version,
            languages: self.config.languages.clone(),
        }
    }

    /// Runs every page through the engine. An outage or timeout on any page
    /// abandons the pass; other page failures only drop that page and are
    /// listed in the result.
    pub fn extract(&self, doc: &PdfDocument) -> Result<OcrPass, OcrError> {
        let source = doc.source_bytes();
        let pages: Vec<(usize, PageGeometry)> = doc
            .pages()
            .iter()
            .enumerate()
            .map(|(i, p)| (i, p.geometry))
            .collect();

        let mut results = self.runtime.block_on(async {
            let mut tasks = JoinSet::new();
            let mut task_pages = HashMap::new();
            for (page_index, geometry) in pages {
                let job = PageJob {
                    engine: Arc::clone(&self.engine),
                    rasterizer: Arc::clone(&self.rasterizer),
                    permits: Arc::clone(&self.permits),
                    config: self.config.clone(),
                    source: Arc::clone(&source),
                    page_index,
                    geometry,
                };
                let handle = tasks.spawn(async move { (page_index, job.run().await) });
                task_pages.insert(handle.id(), page_index);
            }

            let mut results = Vec::new();
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(result) => results.push(result),
                    Err(e) => {
                        warn!(target: OCR, error = %e, "ocr task panicked");
                        if let Some(&page) = task_pages.get(&e.id()) {
                            results.push((page, Err(OcrError::Engine(e.to_string()))));
                        }
                    }
                }
            }
            results
        });
        results.sort_by_key(|(page, _)| *page);

        let mut pass = OcrPass::default();
        for (page, result) in results {
            match result {
                Ok(found) => pass.candidates.extend(found),
                Err(e) if e.is_outage() => return Err(e),
                Err(e) => {
                    warn!(target: OCR, page, error = %e, "ocr failed for page");
                    pass.failed_pages.push(page);
                }
            }
        }
        info!(
            target: OCR,
            found = pass.candidates.len(),
            failed = pass.failed_pages.len(),
            "ocr pass done"
        );
        Ok(pass)
    }
}

struct PageJob {
    engine: Arc<dyn OcrEngine>,
    rasterizer: Arc<dyn PageRasterizer>,
    permits: Arc<Semaphore>,
    config: OcrConfig,
    source: Arc<Vec<u8>>,
    page_index: usize,
    geometry: PageGeometry,
}

impl PageJob {
    async fn run(self) -> Result<Vec<PlaceholderCandidate>, OcrError> {
        let _permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| OcrError::Engine("ocr worker pool closed".to_string()))?;

        let rasterizer = Arc::clone(&self.rasterizer);
        let source = Arc::clone(&self.source);
        let (page_index, dpi) = (self.page_index, self.config.dpi);
        let image = tokio::task::spawn_blocking(move || rasterizer.rasterize(&source, page_index, dpi))
            .await
            .map_err(|e| OcrError::Raster(e.to_string()))??;

        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }
        let page_rect = self.geometry.page_rect();
        let scale = (
            page_rect.width() / image.width() as f32,
            page_rect.height() / image.height() as f32,
        );

        let timeout = self.config.timeout();
        tokio::time::timeout(timeout, self.recognize(&image, scale, &page_rect))
            .await
            .map_err(|_| OcrError::Timeout(timeout))?
    }

    /// Tries each segmentation mode until one yields a placeholder.
    async fn recognize(
        &self,
        image: &RgbImage,
        (sx, sy): (f32, f32),
        page_rect: &Rect,
    ) -> Result<Vec<PlaceholderCandidate>, OcrError> {
        let page_index = self.page_index;
        for &psm in &self.config.psm_modes {
            let request = OcrRequest {
                languages: self.config.language_arg(),
                psm,
            };
            let words: Vec<OcrWord> = self
                .engine
                .recognize(image, &request)
                .await?
                .into_iter()
                .filter(|w| w.confidence >= self.config.min_confidence)
                .map(|w| OcrWord {
                    rect: w.rect.scale(sx, sy),
                    ..w
                })
                .collect();
            let found = reconstruct(&words, page_index, page_rect);
            debug!(target: OCR, page = page_index, psm, words = words.len(), found = found.len(), "ocr page");
            if !found.is_empty() {
                return Ok(found);
            }
        }
        Ok(Vec::new())
    }
}
