#![allow(dead_code)]

use std::{
    io::Cursor,
    sync::atomic::{AtomicUsize, Ordering},
};

use captcha_solver::{
    BoundingBox, CaptchaSolver, CharacterDetector, FilterOptions, GlyphClassifier, LabelSet,
    NormalizedGlyph, Result, SolveError,
};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

pub const LABELS: [&str; 10] = ["a", "b", "c", "d", "e", "f", "g", "h", "i", "j"];

pub const GLYPH_WIDTH: u32 = 20;
pub const GLYPH_TOP: u32 = 10;
pub const GLYPH_HEIGHT: u32 = 40;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Synthetic CAPTCHA: black glyphs on white, where glyph `k` has its top
/// `k / 10` painted white so the fake classifier can tell them apart.
pub struct Canvas {
    pub image: RgbImage,
    pub boxes: Vec<BoundingBox>,
}

impl Canvas {
    pub fn new(width: u32) -> Self {
        Self {
            image: RgbImage::from_pixel(width, 60, Rgb([255, 255, 255])),
            boxes: Vec::new(),
        }
    }

    pub fn glyph(mut self, x: u32, class: u32) -> Self {
        let white_rows = class * GLYPH_HEIGHT / 10;
        for y in GLYPH_TOP + white_rows..GLYPH_TOP + GLYPH_HEIGHT {
            for dx in 0..GLYPH_WIDTH {
                self.image.put_pixel(x + dx, y, Rgb([0, 0, 0]));
            }
        }
        self.boxes.push(BoundingBox::new(
            x,
            GLYPH_TOP,
            x + GLYPH_WIDTH,
            GLYPH_TOP + GLYPH_HEIGHT,
        ));
        self
    }

    /// A detection over empty background.
    pub fn noise(mut self, x: u32, width: u32) -> Self {
        self.boxes.push(BoundingBox::new(
            x,
            GLYPH_TOP,
            x + width,
            GLYPH_TOP + GLYPH_HEIGHT,
        ));
        self
    }

    pub fn dynamic(&self) -> DynamicImage {
        DynamicImage::ImageRgb8(self.image.clone())
    }

    pub fn png(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        self.dynamic()
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .expect("encode png");
        bytes
    }
}

/// Returns fixed boxes, in reverse so the solver has to sort them.
pub struct FakeDetector {
    pub boxes: Vec<BoundingBox>,
    pub calls: AtomicUsize,
}

impl FakeDetector {
    pub fn new(boxes: Vec<BoundingBox>) -> Self {
        Self {
            boxes,
            calls: AtomicUsize::new(0),
        }
    }
}

impl CharacterDetector for FakeDetector {
    fn detect(&self, _image: &DynamicImage) -> Result<Vec<BoundingBox>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.boxes.iter().rev().copied().collect())
    }
}

pub struct FailingDetector;

impl CharacterDetector for FailingDetector {
    fn detect(&self, _image: &DynamicImage) -> Result<Vec<BoundingBox>> {
        Err(SolveError::Detection("model exploded".into()))
    }
}

/// One-hot on `round(white fraction * 10)`, undoing [`Canvas::glyph`].
pub struct BrightnessClassifier;

impl GlyphClassifier for BrightnessClassifier {
    fn probabilities(&self, glyph: &NormalizedGlyph) -> Result<Vec<f32>> {
        let total = (NormalizedGlyph::WIDTH * NormalizedGlyph::HEIGHT) as f32;
        let class = (glyph.white_pixels() as f32 / total * 10.0).round() as usize;
        let mut scores = vec![0.0; LABELS.len()];
        scores[class.min(LABELS.len() - 1)] = 1.0;
        Ok(scores)
    }
}

pub struct TruncatedClassifier;

impl GlyphClassifier for TruncatedClassifier {
    fn probabilities(&self, _glyph: &NormalizedGlyph) -> Result<Vec<f32>> {
        Ok(vec![1.0, 0.0])
    }
}

pub fn solver(detector: impl CharacterDetector + 'static) -> CaptchaSolver {
    CaptchaSolver::new(
        Box::new(detector),
        Box::new(BrightnessClassifier),
        LabelSet::new(LABELS),
        FilterOptions::default(),
    )
}

/// Canvas with one glyph every 40px for each class in `classes`.
pub fn spaced(classes: &[u32]) -> Canvas {
    classes
        .iter()
        .enumerate()
        .fold(Canvas::new(400), |canvas, (i, class)| {
            canvas.glyph(10 + i as u32 * 40, *class)
        })
}
