use image::GrayImage;

/// Pixel-space box around one candidate character, `x2`/`y2` exclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
    pub score: f32,
}

impl BoundingBox {
    pub fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            score: 1.0,
        }
    }

    pub fn with_score(mut self, score: f32) -> Self {
        self.score = score;
        self
    }

    pub fn width(&self) -> u32 {
        self.x2.saturating_sub(self.x1)
    }

    pub fn height(&self) -> u32 {
        self.y2.saturating_sub(self.y1)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Shrinks the box so it lies inside a `width` x `height` raster.
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        Self {
            x1: self.x1.min(width),
            y1: self.y1.min(height),
            x2: self.x2.min(width),
            y2: self.y2.min(height),
            score: self.score,
        }
    }
}

/// A 32x52 single-channel bitmap whose pixels are all 0 or 255.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedGlyph {
    pub(crate) image: GrayImage,
}

impl NormalizedGlyph {
    pub const WIDTH: u32 = 32;
    pub const HEIGHT: u32 = 52;

    pub fn image(&self) -> &GrayImage {
        &self.image
    }

    /// Number of pixels set to 255.
    pub fn white_pixels(&self) -> usize {
        self.image.as_raw().iter().filter(|p| **p == 255).count()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PredictedCharacter {
    pub position: usize,
    pub label: String,
    pub score: f32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PredictedAnswer {
    pub characters: Vec<PredictedCharacter>,
}

impl PredictedAnswer {
    pub fn text(&self) -> String {
        self.characters
            .iter()
            .map(|it| it.label.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.characters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.characters.is_empty()
    }
}

impl std::fmt::Display for PredictedAnswer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for character in &self.characters {
            f.write_str(&character.label)?;
        }
        Ok(())
    }
}
