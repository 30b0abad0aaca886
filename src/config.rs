use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Process-wide, read-only settings. Built once at startup and handed to
/// [`crate::Engine`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub ocr: OcrConfig,
    pub detection: DetectionConfig,
    pub fonts: FontConfig,
    pub fill: FillConfig,
    pub max_document_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            ocr: OcrConfig::default(),
            detection: DetectionConfig::default(),
            fonts: FontConfig::default(),
            fill: FillConfig::default(),
            max_document_bytes: 50 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Explicit tesseract executable. `None` searches `PATH`.
    pub tesseract_cmd: Option<PathBuf>,
    pub languages: Vec<String>,
    pub dpi: f32,
    /// Tesseract word confidence floor, 0-100.
    pub min_confidence: f32,
    pub psm_modes: Vec<u32>,
    /// Recognition budget for one page, shared by every segmentation mode
    /// tried on it.
    pub timeout_secs: u64,
    pub max_concurrent: usize,
    pub pdfium_library: Option<PathBuf>,
}

impl Default for OcrConfig {
    fn default() -> Self {
        OcrConfig {
            tesseract_cmd: None,
            languages: vec!["tur".to_string(), "eng".to_string()],
            dpi: 240.0,
            min_confidence: 20.0,
            psm_modes: vec![6, 11, 4],
            timeout_secs: 60,
            max_concurrent: 2,
            pdfium_library: None,
        }
    }
}

impl OcrConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    /// Language set in tesseract's `-l` form, e.g. `tur+eng`.
    pub fn language_arg(&self) -> String {
        self.languages.join("+")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub iou_threshold: f32,
    /// Intersection over the smaller area; used when one side is OCR.
    pub overlap_threshold: f32,
    /// Auto policy runs OCR when local detection finds fewer unique keys.
    pub auto_ocr_min_keys: usize,
    pub line_tolerance: f32,
    pub max_gap_em: f32,
    pub rect_padding: f32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        DetectionConfig {
            iou_threshold: 0.5,
            overlap_threshold: 0.8,
            auto_ocr_min_keys: 1,
            line_tolerance: 2.0,
            max_gap_em: 2.0,
            rect_padding: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FontConfig {
    pub bundled_font: Option<PathBuf>,
    pub search_dirs: Vec<PathBuf>,
    pub verbose_diagnostics: bool,
}

impl Default for FontConfig {
    fn default() -> Self {
        FontConfig {
            bundled_font: None,
            search_dirs: vec![
                PathBuf::from("fonts"),
                PathBuf::from("/usr/share/fonts/truetype/dejavu"),
                PathBuf::from("/usr/share/fonts/truetype/noto"),
                PathBuf::from("/usr/share/fonts/truetype/freefont"),
            ],
            verbose_diagnostics: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FillConfig {
    pub inset: f32,
    /// Horizontal slack allowed when checking whether text fits.
    pub width_tolerance: f32,
    /// Auto-size never exceeds the detected source size by more than this factor.
    pub source_size_factor: f32,
    pub redact_fill: [f32; 3],
}

impl Default for FillConfig {
    fn default() -> Self {
        FillConfig {
            inset: 0.5,
            width_tolerance: 0.5,
            source_size_factor: 1.05,
            redact_fill: [1.0, 1.0, 1.0],
        }
    }
}

impl EngineConfig {
    /// Reads the process environment on top of the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Environment overlay with an injectable lookup, so tests never touch
    /// the real process environment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = EngineConfig::default();
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(cmd) = var("TESSERACT_CMD") {
            config.ocr.tesseract_cmd = Some(expand_path(&cmd));
        }
        if let Some(langs) = var("OCR_LANGS") {
            let languages: Vec<String> = langs
                .split('+')
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect();
            if !languages.is_empty() {
                config.ocr.languages = languages;
            }
        }
        if let Some(dpi) = var("OCR_DPI").and_then(|v| v.parse::<f32>().ok()) {
            if dpi > 0.0 {
                config.ocr.dpi = dpi;
            }
        }
        if let Some(secs) = var("OCR_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            config.ocr.timeout_secs = secs;
        }
        if let Some(n) = var("OCR_MAX_CONCURRENT").and_then(|v| v.parse::<usize>().ok()) {
            config.ocr.max_concurrent = n.max(1);
        }
        if let Some(conf) = var("OCR_MIN_CONFIDENCE").and_then(|v| v.parse().ok()) {
            config.ocr.min_confidence = conf;
        }
        if let Some(lib) = var("PDFIUM_LIBRARY_PATH") {
            config.ocr.pdfium_library = Some(expand_path(&lib));
        }
        if let Some(font) = var("STENCIL_FONT_PATH") {
            config.fonts.bundled_font = Some(expand_path(&font));
        }
        if let Some(dirs) = var("STENCIL_FONT_DIRS") {
            config.fonts.search_dirs = dirs
                .split(':')
                .filter(|d| !d.is_empty())
                .map(expand_path)
                .collect();
        }
        if let Some(flag) = var("DEBUG_FONTS") {
            config.fonts.verbose_diagnostics = matches!(flag.as_str(), "1" | "true" | "yes" | "on");
        }

        config
    }
}

fn expand_path(raw: &str) -> PathBuf {
    match shellexpand::full(raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let config = EngineConfig::from_lookup(|_| None);
        assert_eq!(config.ocr.language_arg(), "tur+eng");
        assert_eq!(config.ocr.dpi, 240.0);
        assert_eq!(config.ocr.psm_modes, vec![6, 11, 4]);
        assert!(config.ocr.tesseract_cmd.is_none());
        assert!(!config.fonts.verbose_diagnostics);
    }

    #[test]
    fn environment_overrides() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("TESSERACT_CMD", "/opt/tess/bin/tesseract"),
            ("OCR_LANGS", "deu + eng"),
            ("OCR_TIMEOUT_SECS", "5"),
            ("OCR_MAX_CONCURRENT", "0"),
            ("DEBUG_FONTS", "1"),
            ("STENCIL_FONT_DIRS", "/a:/b"),
        ]));
        assert_eq!(
            config.ocr.tesseract_cmd,
            Some(PathBuf::from("/opt/tess/bin/tesseract"))
        );
        assert_eq!(config.ocr.languages, vec!["deu", "eng"]);
        assert_eq!(config.ocr.timeout(), Duration::from_secs(5));
        assert_eq!(config.ocr.max_concurrent, 1);
        assert!(config.fonts.verbose_diagnostics);
        assert_eq!(
            config.fonts.search_dirs,
            vec![PathBuf::from("/a"), PathBuf::from("/b")]
        );
    }

    #[test]
    fn blank_values_are_ignored() {
        let config = EngineConfig::from_lookup(lookup(&[("OCR_LANGS", "  "), ("OCR_DPI", "abc")]));
        assert_eq!(config.ocr.language_arg(), "tur+eng");
        assert_eq!(config.ocr.dpi, 240.0);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"ocr": {"dpi": 300}, "detection": {"iou_threshold": 0.4}}"#)
                .unwrap();
        assert_eq!(config.ocr.dpi, 300.0);
        assert_eq!(config.ocr.language_arg(), "tur+eng");
        assert_eq!(config.detection.iou_threshold, 0.4);
        assert_eq!(config.detection.overlap_threshold, 0.8);
    }
}
