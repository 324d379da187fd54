//! PaddleOCR engine through `oar-ocr` (ONNX Runtime).
//!
//! Only compiled with the `paddle` feature. The pipeline reads images from
//! disk, so each screenshot goes through a temporary PNG.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use image::{DynamicImage, ImageFormat};
use oar_ocr::pipeline::{OAROCRBuilder, OAROCR};
use tracing::debug;

use super::{OcrEngine, OcrError, PaddleModels, TextMatch};
use crate::element::{Frame, Point};

pub struct PaddleEngine {
    // `predict` takes `&mut self`.
    pipeline: Mutex<OAROCR>,
    min_confidence: f32,
}

fn model_path(path: &Option<PathBuf>, what: &str) -> Result<String, OcrError> {
    let path = path
        .as_ref()
        .ok_or_else(|| OcrError::EngineUnavailable(format!("ocr.paddle.{what} is not set")))?;
    if !path.exists() {
        return Err(OcrError::EngineUnavailable(format!(
            "{what} not found at {}",
            path.display()
        )));
    }
    Ok(path.to_string_lossy().into_owned())
}

impl PaddleEngine {
    /// Loads the detection and recognition models.
    pub fn new(models: &PaddleModels, min_confidence: f32) -> Result<Self, OcrError> {
        let det = model_path(&models.detection_model, "detection_model")?;
        let rec = model_path(&models.recognition_model, "recognition_model")?;
        let dict = model_path(&models.char_dict, "char_dict")?;
        let pipeline = OAROCRBuilder::new(det, rec, dict)
            .build()
            .map_err(|e| OcrError::EngineUnavailable(e.to_string()))?;
        Ok(Self {
            pipeline: Mutex::new(pipeline),
            min_confidence,
        })
    }

    fn predict(&self, path: &Path) -> Result<Vec<TextMatch>, OcrError> {
        let mut pipeline = self
            .pipeline
            .lock()
            .map_err(|_| OcrError::EngineFailed("paddle pipeline poisoned".into()))?;
        let result = pipeline
            .predict(path)
            .map_err(|e| OcrError::EngineFailed(e.to_string()))?;

        let matches = result
            .text_boxes
            .iter()
            .zip(result.rec_texts.iter())
            .zip(result.rec_scores.iter())
            .filter_map(|((bbox, text), score)| {
                let text = text.trim();
                if text.is_empty() || *score < self.min_confidence {
                    return None;
                }
                let points: Vec<Point> = bbox
                    .points
                    .iter()
                    .map(|p| Point::new(p.x as f64, p.y as f64))
                    .collect();
                let frame = Frame::from_points(&points)?;
                Some(TextMatch::new(text, frame, *score))
            })
            .collect();
        Ok(matches)
    }
}

impl OcrEngine for PaddleEngine {
    fn name(&self) -> &'static str {
        "paddle"
    }

    fn recognize(&self, image: &DynamicImage) -> Result<Vec<TextMatch>, OcrError> {
        let path = std::env::temp_dir().join(format!("ocrtap-{}.png", uuid::Uuid::new_v4()));
        image.save_with_format(&path, ImageFormat::Png)?;
        let result = self.predict(&path);
        if let Err(e) = std::fs::remove_file(&path) {
            debug!(error = %e, path = %path.display(), "failed to remove temp image");
        }
        result
    }
}
