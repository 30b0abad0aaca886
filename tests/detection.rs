pub mod setup;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use image::RgbImage;
use pretty_assertions::assert_eq;

use crate::setup::{
    create_test_pdf, create_test_pdf_with_config, free_text, run, single_page, widget, PageSpec, PdfConfig, Widget,
    PAGE_HEIGHT, PAGE_WIDTH,
};
use stencil_pdf::ocr::{LineKey, OcrRequest, OcrWord};
use stencil_pdf::{
    Engine, EngineConfig, OcrEngine, OcrError, PageRasterizer, ProviderPolicy, ProviderUsed, Rect, Source,
};

/// Returns the same words for every page and mode, or an outage.
struct FakeEngine {
    words: Vec<OcrWord>,
    unavailable: bool,
    calls: AtomicUsize,
}

impl FakeEngine {
    fn returning(words: Vec<OcrWord>) -> Arc<Self> {
        Arc::new(FakeEngine {
            words,
            unavailable: false,
            calls: AtomicUsize::new(0),
        })
    }

    fn unavailable() -> Arc<Self> {
        Arc::new(FakeEngine {
            words: Vec::new(),
            unavailable: true,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl OcrEngine for FakeEngine {
    async fn recognize(&self, _image: &RgbImage, _request: &OcrRequest) -> Result<Vec<OcrWord>, OcrError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable {
            return Err(OcrError::Unavailable("tesseract not found".to_string()));
        }
        Ok(self.words.clone())
    }

    async fn version(&self) -> Result<String, OcrError> {
        if self.unavailable {
            Err(OcrError::Unavailable("tesseract not found".to_string()))
        } else {
            Ok("fake 5.3.0".to_string())
        }
    }
}

/// Finds nothing, slowly, so every segmentation mode gets tried.
struct SlowEngine {
    delay: std::time::Duration,
    calls: AtomicUsize,
}

#[async_trait]
impl OcrEngine for SlowEngine {
    async fn recognize(&self, _image: &RgbImage, _request: &OcrRequest) -> Result<Vec<OcrWord>, OcrError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(Vec::new())
    }

    async fn version(&self) -> Result<String, OcrError> {
        Ok("slow 5.3.0".to_string())
    }
}

/// Blank page image at the requested resolution.
struct BlankRasterizer;

impl PageRasterizer for BlankRasterizer {
    fn rasterize(&self, _source: &[u8], _page_index: usize, dpi: f32) -> Result<RgbImage, OcrError> {
        let scale = dpi / 72.0;
        Ok(RgbImage::new(
            (PAGE_WIDTH * scale).round() as u32,
            (PAGE_HEIGHT * scale).round() as u32,
        ))
    }
}

/// Blank pages, except that one page cannot be rendered.
struct BrokenPageRasterizer {
    broken: usize,
}

impl PageRasterizer for BrokenPageRasterizer {
    fn rasterize(&self, source: &[u8], page_index: usize, dpi: f32) -> Result<RgbImage, OcrError> {
        if page_index == self.broken {
            return Err(OcrError::Raster(format!("page {page_index} is corrupt")));
        }
        BlankRasterizer.rasterize(source, page_index, dpi)
    }
}

fn word(text: &str, x0: f32, y0: f32, x1: f32, y1: f32) -> OcrWord {
    OcrWord {
        text: text.to_string(),
        rect: Rect::new(x0, y0, x1, y1),
        confidence: 91.0,
        line: LineKey {
            block: 1,
            paragraph: 1,
            line: 1,
        },
    }
}

/// 144 dpi, so image pixels are exactly twice page points.
fn ocr_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.ocr.dpi = 144.0;
    config
}

fn engine_with(fake: Arc<FakeEngine>, config: EngineConfig) -> Engine {
    Engine::with_ocr(config, fake, Arc::new(BlankRasterizer)).unwrap()
}

fn approx_rect(a: &Rect, b: &Rect) -> bool {
    [(a.x0, b.x0), (a.y0, b.y0), (a.x1, b.x1), (a.y1, b.y1)]
        .iter()
        .all(|(p, q)| (p - q).abs() < 0.05)
}

#[test]
fn test_form_field_scenario() {
    // page-space (100, 200, 300, 220) on an 842 pt page
    let bytes = single_page(PageSpec {
        widgets: vec![widget("ad_soyad", [100.0, 622.0, 300.0, 642.0])],
        ..Default::default()
    });
    let fake = FakeEngine::returning(Vec::new());
    let engine = engine_with(fake.clone(), EngineConfig::default());
    let doc = engine.load(&bytes).unwrap();

    let result = engine.detect(&doc, ProviderPolicy::Auto);
    assert_eq!(result.provider_used, ProviderUsed::Local);
    assert_eq!(result.unique_keys.iter().collect::<Vec<_>>(), vec!["ad_soyad"]);
    assert_eq!(result.warning, None);
    assert_eq!(fake.calls.load(Ordering::SeqCst), 0);

    let c = &result.candidates[0];
    assert_eq!(c.source, Source::Form);
    assert_eq!(c.confidence, 3);
    assert!(approx_rect(&c.rect, &Rect::new(100.0, 200.0, 300.0, 220.0)));
    assert_eq!(c.font_size, Some(10.0));
    assert!(c.object_id.is_some());
}

#[test]
fn test_form_beats_overlapping_text() {
    let bytes = single_page(PageSpec {
        runs: vec![run("{{ad_soyad}}", 120.0, 630.0, 12.0)],
        widgets: vec![widget("ad_soyad", [118.0, 626.0, 190.0, 642.0])],
        ..Default::default()
    });
    let engine = Engine::local_only(EngineConfig::default());
    let doc = engine.load(&bytes).unwrap();

    let result = engine.detect(&doc, ProviderPolicy::Local);
    assert_eq!(result.candidates.len(), 1);
    assert_eq!(result.candidates[0].source, Source::Form);
    assert!(result.has_text_layer);
}

#[test]
fn test_widget_value_overrides_name() {
    let bytes = single_page(PageSpec {
        widgets: vec![Widget {
            value: Some("{{MUSTERI_ADI}}".to_string()),
            ..widget("Text1", [100.0, 600.0, 200.0, 620.0])
        }],
        ..Default::default()
    });
    let engine = Engine::local_only(EngineConfig::default());
    let doc = engine.load(&bytes).unwrap();
    let result = engine.detect(&doc, ProviderPolicy::Local);
    assert_eq!(result.unique_keys.iter().collect::<Vec<_>>(), vec!["musteri_adi"]);
}

#[test]
fn test_buttons_are_skipped() {
    let bytes = single_page(PageSpec {
        widgets: vec![Widget {
            field_type: "Btn".to_string(),
            ..widget("onay", [100.0, 600.0, 120.0, 620.0])
        }],
        ..Default::default()
    });
    let engine = Engine::local_only(EngineConfig::default());
    let doc = engine.load(&bytes).unwrap();
    assert!(engine.detect(&doc, ProviderPolicy::Local).candidates.is_empty());
}

#[test]
fn test_annotation_contents() {
    let bytes = single_page(PageSpec {
        markups: vec![free_text("Imza: {{imza}} / {{tarih}}", [300.0, 100.0, 500.0, 130.0])],
        ..Default::default()
    });
    let engine = Engine::local_only(EngineConfig::default());
    let doc = engine.load(&bytes).unwrap();
    let result = engine.detect(&doc, ProviderPolicy::Local);

    let keys: Vec<&str> = result.candidates.iter().map(|c| c.key_norm.as_str()).collect();
    assert_eq!(keys, vec!["imza", "tarih"]);
    for c in &result.candidates {
        assert_eq!(c.source, Source::Annotation);
    }
    // each token gets its character share of the 200 pt box, padded by 0.5 pt
    let column = |chars: f32| 300.0 + 200.0 * chars / 26.0;
    assert!(approx_rect(
        &result.candidates[0].rect,
        &Rect::new(column(6.0) - 0.5, 712.0, column(14.0) + 0.5, 742.0)
    ));
    assert!(approx_rect(
        &result.candidates[1].rect,
        &Rect::new(column(17.0) - 0.5, 712.0, 500.5, 742.0)
    ));
}

#[test]
fn test_reading_order_and_unique_keys() {
    let bytes = single_page(PageSpec {
        runs: vec![
            run("{{b}}", 300.0, 700.0, 12.0),
            run("{{a}}", 50.0, 700.0, 12.0),
            run("{{c}}", 50.0, 650.0, 12.0),
            run("{{a}}", 50.0, 600.0, 12.0),
        ],
        ..Default::default()
    });
    let engine = Engine::local_only(EngineConfig::default());
    let doc = engine.load(&bytes).unwrap();
    let result = engine.detect(&doc, ProviderPolicy::Local);

    let keys: Vec<&str> = result.candidates.iter().map(|c| c.key_norm.as_str()).collect();
    assert_eq!(keys, vec!["a", "b", "c", "a"]);
    assert_eq!(result.unique_keys.iter().collect::<Vec<_>>(), vec!["a", "b", "c"]);
}

#[test]
fn test_ocr_reconstructs_split_token() {
    let fake = FakeEngine::returning(vec![
        word("{{ad_soyad", 200.0, 400.0, 330.0, 440.0),
        word("}}", 332.0, 400.0, 360.0, 440.0),
    ]);
    let engine = engine_with(fake.clone(), ocr_config());
    let doc = engine.load(&single_page(PageSpec::default())).unwrap();

    let result = engine.detect(&doc, ProviderPolicy::Ocr);
    assert_eq!(result.provider_used, ProviderUsed::Ocr);
    assert_eq!(result.candidates.len(), 1);
    let c = &result.candidates[0];
    assert_eq!(c.key_norm, "ad_soyad");
    assert_eq!(c.source, Source::Ocr);
    assert_eq!(c.confidence, 0);
    assert!(approx_rect(&c.rect, &Rect::new(100.0, 200.0, 180.0, 220.0)));
    // first mode already found something
    assert_eq!(fake.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_auto_runs_ocr_for_scanned_pages() {
    let fake = FakeEngine::returning(vec![word("{{tarih}}", 100.0, 100.0, 200.0, 130.0)]);
    let engine = engine_with(fake.clone(), ocr_config());
    let doc = engine.load(&single_page(PageSpec::default())).unwrap();

    let result = engine.detect(&doc, ProviderPolicy::Auto);
    assert_eq!(result.provider_used, ProviderUsed::Ocr);
    assert!(!result.has_text_layer);
    assert_eq!(result.unique_keys.iter().collect::<Vec<_>>(), vec!["tarih"]);
}

#[test]
fn test_ocr_duplicates_collapse_into_text_layer() {
    // OCR sees the text-layer token (misread) and one more in pixels only
    let fake = FakeEngine::returning(vec![
        word("{{ad_soyod}}", 240.0, 406.0, 376.0, 428.0),
        word("{{imza}}", 240.0, 1000.0, 330.0, 1030.0),
    ]);
    let mut config = ocr_config();
    config.detection.auto_ocr_min_keys = 5;
    let engine = engine_with(fake, config);
    let bytes = single_page(PageSpec {
        runs: vec![run("{{ad_soyad}}", 120.0, 630.0, 12.0)],
        ..Default::default()
    });
    let doc = engine.load(&bytes).unwrap();

    let result = engine.detect(&doc, ProviderPolicy::Auto);
    assert_eq!(result.provider_used, ProviderUsed::LocalAndOcr);
    let found: Vec<(&str, Source)> = result
        .candidates
        .iter()
        .map(|c| (c.key_norm.as_str(), c.source))
        .collect();
    assert_eq!(found, vec![("ad_soyad", Source::TextLayer), ("imza", Source::Ocr)]);
}

#[test]
fn test_ocr_outage_degrades_to_local() {
    let engine = engine_with(FakeEngine::unavailable(), ocr_config());
    let doc = engine.load(&create_test_pdf()).unwrap();

    let result = engine.detect(&doc, ProviderPolicy::Ocr);
    assert_eq!(result.provider_used, ProviderUsed::Local);
    assert_eq!(
        result.warning.as_deref(),
        Some("OCR unavailable (OCR unavailable: tesseract not found); local-only results")
    );
    assert_eq!(result.unique_keys.len(), 2);
}

#[test]
fn test_timeout_covers_all_segmentation_modes() {
    let slow = Arc::new(SlowEngine {
        delay: std::time::Duration::from_millis(450),
        calls: AtomicUsize::new(0),
    });
    let mut config = ocr_config();
    config.ocr.timeout_secs = 1;
    config.ocr.psm_modes = vec![6, 11, 4];
    let engine = Engine::with_ocr(config, slow.clone(), Arc::new(BlankRasterizer)).unwrap();
    let doc = engine.load(&create_test_pdf()).unwrap();

    // Each mode alone fits in the budget; the three together do not.
    let result = engine.detect(&doc, ProviderPolicy::Ocr);
    assert_eq!(result.provider_used, ProviderUsed::Local);
    assert_eq!(
        result.warning.as_deref(),
        Some("OCR unavailable (OCR timed out after 1s); local-only results")
    );
    assert!(slow.calls.load(Ordering::SeqCst) >= 3);
}

#[test]
fn test_page_failure_is_reported() {
    let fake = FakeEngine::returning(vec![word("{{tarih}}", 100.0, 100.0, 200.0, 130.0)]);
    let engine = Engine::with_ocr(ocr_config(), fake, Arc::new(BrokenPageRasterizer { broken: 1 })).unwrap();
    let bytes = create_test_pdf_with_config(PdfConfig {
        pages: vec![PageSpec::default(), PageSpec::default(), PageSpec::default()],
        ..Default::default()
    });
    let doc = engine.load(&bytes).unwrap();

    let result = engine.detect(&doc, ProviderPolicy::Ocr);
    assert_eq!(result.provider_used, ProviderUsed::Ocr);
    let pages: Vec<usize> = result.candidates.iter().map(|c| c.page).collect();
    assert_eq!(pages, vec![0, 2]);
    assert_eq!(result.warning.as_deref(), Some("OCR failed on page 2"));
}

#[test]
fn test_auto_outage_on_blank_page_is_a_warning() {
    let engine = engine_with(FakeEngine::unavailable(), ocr_config());
    let doc = engine.load(&single_page(PageSpec::default())).unwrap();

    let result = engine.detect(&doc, ProviderPolicy::Auto);
    assert_eq!(result.provider_used, ProviderUsed::Local);
    assert!(result.candidates.is_empty());
    assert!(result.warning.is_some());
}

#[test]
fn test_ocr_status_reports_fake_engine() {
    let engine = engine_with(FakeEngine::returning(Vec::new()), ocr_config());
    let status = engine.ocr_status();
    assert!(status.available);
    assert_eq!(status.version.as_deref(), Some("fake 5.3.0"));
    assert_eq!(status.languages, vec!["tur".to_string(), "eng".to_string()]);

    let down = engine_with(FakeEngine::unavailable(), ocr_config()).ocr_status();
    assert!(!down.available);
}

#[test]
fn test_bad_documents_rejected() {
    let mut config = EngineConfig::default();
    config.max_document_bytes = 10;
    let engine = Engine::local_only(config);
    assert!(matches!(
        engine.load(&create_test_pdf()),
        Err(stencil_pdf::Error::DocumentTooLarge { limit: 10, .. })
    ));
    assert!(matches!(
        Engine::local_only(EngineConfig::default()).load(b"not a pdf"),
        Err(stencil_pdf::Error::MalformedDocument(_))
    ));
}
