use std::fmt;
use std::str::FromStr;

use indexmap::IndexSet;
use lopdf::ObjectId;
use serde::{Deserialize, Serialize};

use crate::fonts::FontSelection;
use crate::geo::Rect;

/// Where a candidate was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    TextLayer,
    Form,
    Annotation,
    Ocr,
}

impl Source {
    /// Ordinal confidence: form > text layer > annotation > OCR.
    pub fn confidence(self) -> u8 {
        match self {
            Source::Form => 3,
            Source::TextLayer => 2,
            Source::Annotation => 1,
            Source::Ocr => 0,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Source::TextLayer => "text_layer",
            Source::Form => "form",
            Source::Annotation => "annotation",
            Source::Ocr => "ocr",
        };
        f.write_str(s)
    }
}

/// A duplicate folded into a kept candidate while merging. Fill erases it
/// together with the kept mark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedMark {
    pub source: Source,
    pub rect: Rect,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<ObjectId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceholderCandidate {
    pub key: String,
    pub key_norm: String,
    /// Zero-based page index.
    pub page: usize,
    pub rect: Rect,
    pub source: Source,
    pub font_name: Option<String>,
    pub font_size: Option<f32>,
    /// Font resource the source text was set in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_object: Option<ObjectId>,
    /// Non-stroking colour of the source text, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<[f32; 3]>,
    pub confidence: u8,
    /// Widget or annotation dictionary the candidate came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<ObjectId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub merged: Vec<MergedMark>,
}

impl PlaceholderCandidate {
    pub fn new(key: &str, page: usize, rect: Rect, source: Source) -> Self {
        PlaceholderCandidate {
            key: key.to_string(),
            key_norm: crate::normalize::normalize_key(key),
            page,
            rect,
            source,
            font_name: None,
            font_size: None,
            font_object: None,
            color: None,
            confidence: source.confidence(),
            object_id: None,
            merged: Vec::new(),
        }
    }

    pub fn mark(&self) -> MergedMark {
        MergedMark {
            source: self.source,
            rect: self.rect,
            object_id: self.object_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderPolicy {
    #[default]
    Auto,
    Local,
    Ocr,
}

impl FromStr for ProviderPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Ok(ProviderPolicy::Auto),
            "local" => Ok(ProviderPolicy::Local),
            "ocr" => Ok(ProviderPolicy::Ocr),
            other => Err(format!("unknown provider '{other}', expected auto, local or ocr")),
        }
    }
}

impl fmt::Display for ProviderPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProviderPolicy::Auto => "auto",
            ProviderPolicy::Local => "local",
            ProviderPolicy::Ocr => "ocr",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderUsed {
    #[serde(rename = "local")]
    Local,
    #[serde(rename = "ocr")]
    Ocr,
    #[serde(rename = "local+ocr")]
    LocalAndOcr,
}

impl fmt::Display for ProviderUsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProviderUsed::Local => "local",
            ProviderUsed::Ocr => "ocr",
            ProviderUsed::LocalAndOcr => "local+ocr",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub candidates: Vec<PlaceholderCandidate>,
    pub unique_keys: IndexSet<String>,
    pub provider_used: ProviderUsed,
    pub warning: Option<String>,
    pub has_text_layer: bool,
}

impl DetectionResult {
    pub fn candidates_for<'a>(
        &'a self,
        key_norm: &'a str,
    ) -> impl Iterator<Item = &'a PlaceholderCandidate> + 'a {
        self.candidates.iter().filter(move |c| c.key_norm == key_norm)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HAlign {
    Start,
    #[default]
    Center,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VAlign {
    Top,
    #[default]
    Middle,
    Baseline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Alignment {
    pub horizontal: HAlign,
    pub vertical: VAlign,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeMode {
    #[default]
    Auto,
    Fixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EraseMode {
    #[default]
    Redact,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FillFieldSpec {
    /// Normalized again before lookup, so raw keys are accepted too.
    pub key_norm: String,
    pub value: String,
    pub align: Alignment,
    pub min_font_size: f32,
    pub max_font_size: f32,
    pub size_mode: SizeMode,
    /// Used when `size_mode` is fixed; falls back to `max_font_size`.
    pub fixed_font_size: Option<f32>,
    /// `None` keeps the colour of the replaced text, or black.
    pub text_color: Option<[f32; 3]>,
    pub font: FontSelection,
    pub erase_mode: EraseMode,
}

impl Default for FillFieldSpec {
    fn default() -> Self {
        FillFieldSpec {
            key_norm: String::new(),
            value: String::new(),
            align: Alignment::default(),
            min_font_size: 6.0,
            max_font_size: 14.0,
            size_mode: SizeMode::Auto,
            fixed_font_size: None,
            text_color: None,
            font: FontSelection::Default,
            erase_mode: EraseMode::Redact,
        }
    }
}

impl FillFieldSpec {
    pub fn new(key: &str, value: &str) -> Self {
        FillFieldSpec {
            key_norm: crate::normalize::normalize_key(key),
            value: value.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FillStatus {
    Rendered,
    Skipped,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub page: usize,
    pub rect: Rect,
    pub font_size: f32,
    /// Baseline start in page space.
    pub origin: (f32, f32),
    pub text_width: f32,
    pub overflow: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillOutcome {
    pub key_norm: String,
    #[serde(flatten)]
    pub status: FillStatus,
    pub placements: Vec<Placement>,
    pub font: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FontFallback {
    pub key_norm: String,
    pub requested: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FillDiagnostics {
    /// Display names of every font that drew text, in first-use order.
    pub font_used: Vec<String>,
    /// True when every font that drew text was embedded in the output.
    pub font_embedded: bool,
    pub font_fallbacks: Vec<FontFallback>,
    pub missing_keys: IndexSet<String>,
    pub overflowed_keys: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FillReport {
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub outcomes: Vec<FillOutcome>,
    pub diagnostics: FillDiagnostics,
}
