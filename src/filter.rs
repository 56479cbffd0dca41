//! Rejection of duplicate detections and "tarakom" noise glyphs.
//!
//! The constants in [`FilterOptions::default`] were tuned on a single CAPTCHA
//! family; other corpora will need different values.

use image::DynamicImage;

use crate::{util::part_image, BoundingBox};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterOptions {
    /// Channel values above this count as white when measuring ink.
    pub binarize_threshold: u8,
    /// Nominal crop height the column coverage is measured against.
    pub reference_height: u32,
    /// A column whose coverage reaches this value is solid ink.
    pub coverage_threshold: i64,
    /// Most sparse columns a genuine character may have.
    pub max_sparse_columns: u32,
    /// Detections whose left edge is within this many pixels of the previous
    /// kept detection are duplicates.
    pub min_gap: u32,
    /// Position that is checked by the noise filter. Earlier positions are
    /// always kept and later ones are never read.
    pub filtered_position: usize,
    /// Glyph pixels at or above this gray level become 255 after
    /// normalization.
    pub glyph_cutoff: u8,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            binarize_threshold: 127,
            reference_height: 90,
            coverage_threshold: 175,
            max_sparse_columns: 22,
            min_gap: 10,
            filtered_position: 8,
            glyph_cutoff: 128,
        }
    }
}

/// What happened to one detection during selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Kept as glyph number `position`.
    Accepted { position: usize },
    /// Too close to the previously kept detection.
    Duplicate,
    /// Failed the noise filter at `position`.
    Noise { position: usize },
    /// Past the last position that is read.
    Overflow { position: usize },
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted { .. })
    }
}

/// Per-column coverage of a crop, `Σ channels (reference_height - white)`.
pub fn column_coverage(crop: &DynamicImage, options: &FilterOptions) -> Vec<i64> {
    let crop = crop.to_rgb8();
    let (width, height) = crop.dimensions();
    (0..width)
        .map(|x| {
            let mut white = [0i64; 3];
            for y in 0..height {
                for (count, value) in white.iter_mut().zip(crop.get_pixel(x, y).0) {
                    if value > options.binarize_threshold {
                        *count += 1;
                    }
                }
            }
            white
                .iter()
                .map(|count| options.reference_height as i64 - count)
                .sum()
        })
        .collect()
}

/// Returns `true` when the crop looks like a real character rather than
/// background clutter.
pub fn is_genuine_character(crop: &DynamicImage, options: &FilterOptions) -> bool {
    let coverage = column_coverage(crop, options);
    let total = coverage.len() as u32;
    let solid = coverage
        .iter()
        .filter(|value| **value >= options.coverage_threshold)
        .count() as u32;
    let sparse = total - solid;
    log::trace!("Crop has {total} columns, {solid} solid, {sparse} sparse");
    sparse <= options.max_sparse_columns
}

/// Decides for each left-to-right sorted box whether it becomes a glyph.
///
/// `is_genuine` is only consulted for the box landing on
/// [`FilterOptions::filtered_position`].
pub fn select_candidates(
    boxes: &[BoundingBox],
    options: &FilterOptions,
    mut is_genuine: impl FnMut(&BoundingBox) -> bool,
) -> Vec<Verdict> {
    let mut last_x: Option<u32> = None;
    let mut position = 0;
    boxes
        .iter()
        .map(|b_box| {
            if let Some(last_x) = last_x {
                if b_box.x1.saturating_sub(last_x) <= options.min_gap {
                    return Verdict::Duplicate;
                }
            }
            last_x = Some(b_box.x1);
            let current = position;
            position += 1;
            match current.cmp(&options.filtered_position) {
                std::cmp::Ordering::Less => Verdict::Accepted { position: current },
                std::cmp::Ordering::Equal if is_genuine(b_box) => {
                    Verdict::Accepted { position: current }
                }
                std::cmp::Ordering::Equal => Verdict::Noise { position: current },
                std::cmp::Ordering::Greater => Verdict::Overflow { position: current },
            }
        })
        .collect()
}

/// Convenience over [`select_candidates`] that measures crops of `image`.
pub fn select_glyph_boxes(
    image: &DynamicImage,
    boxes: &[BoundingBox],
    options: &FilterOptions,
) -> Vec<BoundingBox> {
    let verdicts = select_candidates(boxes, options, |b_box| {
        is_genuine_character(&part_image(image, b_box), options)
    });
    boxes
        .iter()
        .zip(verdicts)
        .filter(|(_, verdict)| verdict.is_accepted())
        .map(|(b_box, _)| *b_box)
        .collect()
}
