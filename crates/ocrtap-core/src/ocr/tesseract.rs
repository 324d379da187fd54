//! Tesseract engine via the `tesseract` command-line tool.
//!
//! The screenshot is piped to `tesseract stdin stdout ... tsv` as PNG and the
//! TSV word table is folded into one [`TextMatch`] per text line, so a query
//! like "Sign In" matches a two-word button.

use std::collections::BTreeMap;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use tracing::{debug, trace};

use super::{OcrEngine, OcrError, OcrSettings, TextMatch, ENGINE_MIN_CONFIDENCE};
use crate::element::Frame;

/// TSV `level` of a word row.
const WORD_LEVEL: &str = "5";

/// Runs the `tesseract` CLI.
#[derive(Debug, Clone)]
pub struct TesseractEngine {
    binary: PathBuf,
    language: String,
    psm: u8,
    preprocess: bool,
    min_confidence: f32,
}

impl Default for TesseractEngine {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("tesseract"),
            language: "eng".into(),
            psm: 11,
            preprocess: true,
            min_confidence: ENGINE_MIN_CONFIDENCE,
        }
    }
}

impl TesseractEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: &OcrSettings) -> Self {
        Self {
            binary: settings
                .tesseract_path
                .clone()
                .unwrap_or_else(|| PathBuf::from("tesseract")),
            language: settings.language.clone(),
            psm: settings.psm,
            preprocess: settings.preprocess,
            min_confidence: settings.min_confidence,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_psm(mut self, psm: u8) -> Self {
        self.psm = psm;
        self
    }

    pub fn with_preprocess(mut self, preprocess: bool) -> Self {
        self.preprocess = preprocess;
        self
    }

    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// First line of `tesseract --version`.
    pub fn version(&self) -> Result<String, OcrError> {
        let output = Command::new(&self.binary)
            .arg("--version")
            .output()
            .map_err(|e| self.spawn_error(e))?;
        // Older releases print the banner on stderr.
        let text = if output.stdout.is_empty() {
            String::from_utf8_lossy(&output.stderr).into_owned()
        } else {
            String::from_utf8_lossy(&output.stdout).into_owned()
        };
        text.lines()
            .next()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .ok_or_else(|| OcrError::EngineFailed("empty version output".into()))
    }

    fn spawn_error(&self, err: std::io::Error) -> OcrError {
        if err.kind() == std::io::ErrorKind::NotFound {
            OcrError::EngineUnavailable(format!(
                "'{}' not found (install tesseract or set ocr.tesseract_path)",
                self.binary.display()
            ))
        } else {
            OcrError::Io(err)
        }
    }

    /// Runs tesseract on PNG bytes and returns its TSV output.
    fn run(&self, png: Vec<u8>) -> Result<String, OcrError> {
        let psm = self.psm.to_string();
        let mut child = Command::new(&self.binary)
            .args(["stdin", "stdout", "-l", &self.language, "--psm", &psm, "tsv"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| OcrError::EngineFailed("tesseract stdin unavailable".into()))?;
        let writer = std::thread::spawn(move || stdin.write_all(&png));

        let output = child.wait_with_output()?;
        match writer.join() {
            Ok(result) => result?,
            Err(_) => return Err(OcrError::EngineFailed("stdin writer panicked".into())),
        }

        if !output.status.success() {
            return Err(OcrError::EngineFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl OcrEngine for TesseractEngine {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    fn recognize(&self, image: &DynamicImage) -> Result<Vec<TextMatch>, OcrError> {
        let input = if self.preprocess {
            DynamicImage::ImageLuma8(preprocess(image))
        } else {
            image.clone()
        };

        let mut png = Vec::new();
        input.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
        trace!(bytes = png.len(), "running tesseract");

        let tsv = self.run(png)?;
        let matches = parse_tsv(&tsv, self.min_confidence);
        debug!(count = matches.len(), "tesseract finished");
        Ok(matches)
    }
}

// ---------------------------------------------------------------------------
// Preprocessing
// ---------------------------------------------------------------------------

/// Otsu's threshold for an 8-bit grayscale image.
pub fn otsu_threshold(gray: &GrayImage) -> u8 {
    let mut histogram = [0u64; 256];
    for Luma([v]) in gray.pixels() {
        histogram[*v as usize] += 1;
    }
    let total: u64 = histogram.iter().sum();
    if total == 0 {
        return 0;
    }
    let weighted_total: f64 = histogram
        .iter()
        .enumerate()
        .map(|(level, count)| level as f64 * *count as f64)
        .sum();

    let mut best = (0u8, -1.0f64);
    let mut background = 0u64;
    let mut background_sum = 0.0f64;
    for (level, count) in histogram.iter().enumerate() {
        background += count;
        if background == 0 {
            continue;
        }
        let foreground = total - background;
        if foreground == 0 {
            break;
        }
        background_sum += level as f64 * *count as f64;
        let mean_bg = background_sum / background as f64;
        let mean_fg = (weighted_total - background_sum) / foreground as f64;
        let variance = background as f64 * foreground as f64 * (mean_bg - mean_fg).powi(2);
        if variance > best.1 {
            best = (level as u8, variance);
        }
    }
    best.0
}

/// Grayscale + Otsu binarisation.
///
/// Output is dark text on a light background: if most pixels end up black
/// (dark mode UI) the image is inverted.
pub fn preprocess(image: &DynamicImage) -> GrayImage {
    let mut gray = image.to_luma8();
    let threshold = otsu_threshold(&gray);
    let mut dark = 0u64;
    for Luma([v]) in gray.pixels_mut() {
        *v = if *v > threshold { 255 } else { 0 };
        if *v == 0 {
            dark += 1;
        }
    }
    let total = u64::from(gray.width()) * u64::from(gray.height());
    if dark * 2 > total {
        image::imageops::invert(&mut gray);
    }
    gray
}

// ---------------------------------------------------------------------------
// TSV parsing
// ---------------------------------------------------------------------------

#[derive(Default)]
struct LineAccumulator {
    words: Vec<String>,
    confidence_sum: f32,
    bounds: Option<(f64, f64, f64, f64)>,
}

/// Parses tesseract TSV output into line-level matches.
///
/// Word rows with empty text, negative confidence, or confidence below
/// `min_confidence` are skipped before grouping. Confidence (0–100) is
/// normalised to 0–1 and averaged over the line's remaining words. Lines are
/// returned in reading order.
pub fn parse_tsv(tsv: &str, min_confidence: f32) -> Vec<TextMatch> {
    let mut lines: BTreeMap<(u32, u32, u32, u32), LineAccumulator> = BTreeMap::new();

    for row in tsv.lines().skip(1) {
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 12 || cols[0] != WORD_LEVEL {
            continue;
        }
        let text = cols[11].trim();
        if text.is_empty() {
            continue;
        }
        let Ok(conf) = cols[10].trim().parse::<f32>() else {
            continue;
        };
        let conf = conf / 100.0;
        if conf < 0.0 || conf < min_confidence {
            continue;
        }
        let nums: Option<Vec<u32>> = cols[1..5].iter().map(|c| c.trim().parse().ok()).collect();
        let geometry: Option<Vec<f64>> = cols[6..10].iter().map(|c| c.trim().parse().ok()).collect();
        let (Some(nums), Some(geometry)) = (nums, geometry) else {
            continue;
        };

        let key = (nums[0], nums[1], nums[2], nums[3]);
        let (left, top) = (geometry[0], geometry[1]);
        let (right, bottom) = (left + geometry[2], top + geometry[3]);

        let line = lines.entry(key).or_default();
        line.words.push(text.to_string());
        line.confidence_sum += conf;
        line.bounds = Some(match line.bounds {
            None => (left, top, right, bottom),
            Some((l, t, r, b)) => (l.min(left), t.min(top), r.max(right), b.max(bottom)),
        });
    }

    lines
        .into_values()
        .filter_map(|line| {
            let (l, t, r, b) = line.bounds?;
            let confidence = line.confidence_sum / line.words.len() as f32;
            Some(TextMatch::new(
                line.words.join(" "),
                Frame::from_corners(l, t, r, b),
                confidence,
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    const HEADER: &str =
        "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    fn tsv(rows: &[&str]) -> String {
        let mut s = String::from(HEADER);
        for r in rows {
            s.push('\n');
            s.push_str(r);
        }
        s
    }

    #[test]
    fn words_on_one_line_are_joined() {
        let input = tsv(&[
            "1\t1\t0\t0\t0\t0\t0\t0\t1170\t2532\t-1\t",
            "4\t1\t1\t1\t1\t0\t100\t200\t180\t40\t-1\t",
            "5\t1\t1\t1\t1\t1\t100\t200\t80\t40\t96.0\tSign",
            "5\t1\t1\t1\t1\t2\t190\t202\t90\t40\t90.0\tIn",
        ]);
        let matches = parse_tsv(&input, 0.3);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].text, "Sign In");
        assert_eq!(matches[0].frame, Frame::new(100.0, 200.0, 180.0, 42.0));
        assert!((matches[0].confidence - 0.93).abs() < 1e-4);
    }

    #[test]
    fn separate_lines_stay_separate_and_ordered() {
        let input = tsv(&[
            "5\t1\t2\t1\t1\t1\t50\t900\t120\t30\t88\tGeneral",
            "5\t1\t1\t1\t1\t1\t50\t300\t120\t30\t91\tWi-Fi",
        ]);
        let matches = parse_tsv(&input, 0.3);
        let texts: Vec<&str> = matches.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["Wi-Fi", "General"]);
    }

    #[test]
    fn skips_empty_text_and_negative_confidence() {
        let input = tsv(&[
            "5\t1\t1\t1\t1\t1\t0\t0\t10\t10\t95\t   ",
            "5\t1\t1\t1\t2\t1\t0\t20\t10\t10\t-1\tghost",
            "5\t1\t1\t1\t3\t1\t0\t40\t10\t10\t80\tOK",
        ]);
        let matches = parse_tsv(&input, 0.3);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].text, "OK");
    }

    #[test]
    fn low_confidence_lines_dropped() {
        let input = tsv(&["5\t1\t1\t1\t1\t1\t0\t0\t10\t10\t25\tnoise"]);
        assert!(parse_tsv(&input, 0.3).is_empty());
        assert_eq!(parse_tsv(&input, 0.2).len(), 1);
    }

    #[test]
    fn low_confidence_words_do_not_join_a_line() {
        let input = tsv(&[
            "5\t1\t1\t1\t1\t1\t100\t200\t160\t40\t95\tSettings",
            "5\t1\t1\t1\t1\t2\t300\t190\t10\t60\t5\t|",
        ]);
        let matches = parse_tsv(&input, 0.3);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].text, "Settings");
        assert_eq!(matches[0].frame, Frame::new(100.0, 200.0, 160.0, 40.0));
        assert!((matches[0].confidence - 0.95).abs() < 1e-4);
    }

    #[test]
    fn malformed_rows_ignored() {
        let input = tsv(&["5\t1\t1", "5\tx\t1\t1\t1\t1\t0\t0\t10\t10\t90\tbad", ""]);
        assert!(parse_tsv(&input, 0.0).is_empty());
    }

    #[test]
    fn otsu_separates_two_levels() {
        let mut gray = GrayImage::new(10, 1);
        for x in 0..10 {
            gray.put_pixel(x, 0, Luma([if x < 5 { 20 } else { 220 }]));
        }
        let t = otsu_threshold(&gray);
        assert!((20..220).contains(&t), "threshold {t}");
    }

    #[test]
    fn otsu_on_empty_image() {
        assert_eq!(otsu_threshold(&GrayImage::new(0, 0)), 0);
    }

    #[test]
    fn preprocess_inverts_dark_mode() {
        // Mostly black with a little white text.
        let mut rgb = RgbImage::from_pixel(10, 10, image::Rgb([10, 10, 10]));
        rgb.put_pixel(2, 2, image::Rgb([250, 250, 250]));
        let out = preprocess(&DynamicImage::ImageRgb8(rgb));
        assert_eq!(out.get_pixel(0, 0).0[0], 255);
        assert_eq!(out.get_pixel(2, 2).0[0], 0);
    }

    #[test]
    fn preprocess_keeps_light_mode() {
        let mut rgb = RgbImage::from_pixel(10, 10, image::Rgb([245, 245, 245]));
        rgb.put_pixel(2, 2, image::Rgb([5, 5, 5]));
        let out = preprocess(&DynamicImage::ImageRgb8(rgb));
        assert_eq!(out.get_pixel(0, 0).0[0], 255);
        assert_eq!(out.get_pixel(2, 2).0[0], 0);
    }

    #[test]
    fn missing_binary_is_unavailable() {
        let engine = TesseractEngine::new().with_binary("/nonexistent/ocrtap-tesseract");
        let img = DynamicImage::ImageRgb8(RgbImage::new(4, 4));
        assert!(matches!(
            engine.recognize(&img),
            Err(OcrError::EngineUnavailable(_))
        ));
        assert!(matches!(engine.version(), Err(OcrError::EngineUnavailable(_))));
    }

    #[test]
    fn from_settings_copies_fields() {
        let settings = OcrSettings {
            tesseract_path: Some("/opt/bin/tesseract".into()),
            language: "deu".into(),
            psm: 6,
            ..OcrSettings::default()
        };
        let engine = TesseractEngine::from_settings(&settings);
        assert_eq!(engine.binary(), Path::new("/opt/bin/tesseract"));
        assert_eq!(engine.language, "deu");
        assert_eq!(engine.psm, 6);
    }
}
