//! OCR adapter.
//!
//! Every engine sits behind [`OcrEngine`]: an image goes in, a list of
//! [`TextMatch`]es (text, bounding box in image pixels, confidence in
//! `0.0..=1.0`) comes out. Matching a query against those results is engine
//! independent and lives here too.
//!
//! ## Engines
//!
//! - [`tesseract::TesseractEngine`] drives the `tesseract` CLI (default)
//! - `paddle::PaddleEngine` runs PaddleOCR models through ONNX Runtime
//!   (cargo feature `paddle`)
//!
//! # Example
//!
//! ```
//! use ocrtap_core::element::Frame;
//! use ocrtap_core::ocr::{find_text, TextMatch, TextQuery};
//!
//! let results = vec![
//!     TextMatch::new("Wi-Fi", Frame::new(40.0, 300.0, 80.0, 30.0), 0.92),
//!     TextMatch::new("Bluetooth", Frame::new(40.0, 360.0, 140.0, 30.0), 0.88),
//! ];
//!
//! let hit = find_text(&results, &TextQuery::contains("blue")).unwrap();
//! assert_eq!(hit.text, "Bluetooth");
//! assert!(find_text(&results, &TextQuery::exact("wi")).is_none());
//! ```

pub mod annotate;
#[cfg(feature = "paddle")]
pub mod paddle;
pub mod tesseract;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::element::{Frame, Point};

pub use annotate::annotate;

/// Results below this confidence are dropped by the engines themselves.
pub const ENGINE_MIN_CONFIDENCE: f32 = 0.3;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from OCR engines.
#[derive(Error, Debug)]
pub enum OcrError {
    /// The engine binary or models are missing.
    #[error("OCR engine unavailable: {0}")]
    EngineUnavailable(String),

    /// The engine ran but failed.
    #[error("OCR engine failed: {0}")]
    EngineFailed(String),

    /// The screenshot could not be decoded or encoded.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The requested engine is not compiled in.
    #[error("unsupported OCR engine: {0}")]
    Unsupported(String),
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// A piece of recognised text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextMatch {
    pub text: String,
    /// Bounding box in image pixels.
    pub frame: Frame,
    /// Normalised to `0.0..=1.0`.
    pub confidence: f32,
}

impl TextMatch {
    pub fn new(text: impl Into<String>, frame: Frame, confidence: f32) -> Self {
        Self {
            text: text.into(),
            frame,
            confidence,
        }
    }

    /// Center of the bounding box in image pixels.
    pub fn center(&self) -> Point {
        self.frame.center()
    }
}

/// The OCR seam.
///
/// Engines are synchronous and CPU bound; async callers should run them on
/// a blocking thread.
pub trait OcrEngine: Send + Sync {
    /// Short identifier for logs.
    fn name(&self) -> &'static str;

    /// Recognises all text in `image`, in reading order where the engine
    /// provides one.
    fn recognize(&self, image: &DynamicImage) -> Result<Vec<TextMatch>, OcrError>;
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

/// How a query is compared against recognised text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// Query occurs anywhere in the recognised text.
    #[default]
    Contains,
    /// Whole recognised text equals the query.
    Exact,
}

/// What to look for on screen.
///
/// Comparison is case-insensitive and ignores surrounding whitespace.
#[derive(Debug, Clone, PartialEq)]
pub struct TextQuery {
    pub text: String,
    pub mode: MatchMode,
    pub min_confidence: f32,
}

impl TextQuery {
    pub fn new(text: impl Into<String>, mode: MatchMode) -> Self {
        Self {
            text: text.into(),
            mode,
            min_confidence: 0.0,
        }
    }

    pub fn contains(text: impl Into<String>) -> Self {
        Self::new(text, MatchMode::Contains)
    }

    pub fn exact(text: impl Into<String>) -> Self {
        Self::new(text, MatchMode::Exact)
    }

    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    /// Whether `candidate` satisfies this query.
    pub fn matches(&self, candidate: &TextMatch) -> bool {
        if candidate.confidence < self.min_confidence {
            return false;
        }
        let needle = normalize(&self.text);
        if needle.is_empty() {
            return false;
        }
        let haystack = normalize(&candidate.text);
        match self.mode {
            MatchMode::Exact => haystack == needle,
            MatchMode::Contains => haystack.contains(&needle),
        }
    }
}

impl fmt::Display for TextQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode {
            MatchMode::Contains => write!(f, "'{}'", self.text),
            MatchMode::Exact => write!(f, "'{}' (exact)", self.text),
        }
    }
}

fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

/// First result satisfying `query`, in engine order.
pub fn find_text<'a>(matches: &'a [TextMatch], query: &TextQuery) -> Option<&'a TextMatch> {
    matches.iter().find(|m| query.matches(m))
}

/// Every result satisfying `query`.
pub fn find_all_text<'a>(matches: &'a [TextMatch], query: &TextQuery) -> Vec<&'a TextMatch> {
    matches.iter().filter(|m| query.matches(m)).collect()
}

// ---------------------------------------------------------------------------
// Engine selection
// ---------------------------------------------------------------------------

/// Which OCR engine to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OcrEngineKind {
    #[default]
    Tesseract,
    Paddle,
}

impl FromStr for OcrEngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tesseract" => Ok(OcrEngineKind::Tesseract),
            "paddle" | "paddleocr" => Ok(OcrEngineKind::Paddle),
            _ => Err(format!("unknown OCR engine '{s}'. Use: tesseract, paddle")),
        }
    }
}

impl fmt::Display for OcrEngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OcrEngineKind::Tesseract => f.write_str("tesseract"),
            OcrEngineKind::Paddle => f.write_str("paddle"),
        }
    }
}

/// Model files for the PaddleOCR engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaddleModels {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detection_model: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recognition_model: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub char_dict: Option<PathBuf>,
}

/// OCR configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    pub engine: OcrEngineKind,
    /// Path to the `tesseract` binary; looked up on `PATH` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tesseract_path: Option<PathBuf>,
    /// Tesseract language code(s), e.g. `eng` or `eng+deu`.
    pub language: String,
    /// Tesseract page segmentation mode.
    pub psm: u8,
    /// Grayscale + Otsu binarisation before recognition.
    pub preprocess: bool,
    /// Engine-level confidence floor.
    pub min_confidence: f32,
    pub paddle: PaddleModels,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            engine: OcrEngineKind::default(),
            tesseract_path: None,
            language: "eng".into(),
            psm: 11,
            preprocess: true,
            min_confidence: ENGINE_MIN_CONFIDENCE,
            paddle: PaddleModels::default(),
        }
    }
}

/// Builds the engine named by `settings`.
pub fn build_engine(settings: &OcrSettings) -> Result<Arc<dyn OcrEngine>, OcrError> {
    match settings.engine {
        OcrEngineKind::Tesseract => Ok(Arc::new(tesseract::TesseractEngine::from_settings(settings))),
        #[cfg(feature = "paddle")]
        OcrEngineKind::Paddle => Ok(Arc::new(paddle::PaddleEngine::new(
            &settings.paddle,
            settings.min_confidence,
        )?)),
        #[cfg(not(feature = "paddle"))]
        OcrEngineKind::Paddle => Err(OcrError::Unsupported(
            "paddle (rebuild with the `paddle` feature)".into(),
        )),
    }
}
