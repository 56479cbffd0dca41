use std::path::{Path, PathBuf};

use image::{
    imageops::{self, FilterType},
    DynamicImage, GrayImage, Luma, Pixel, Rgb, RgbImage,
};
use imageproc::{
    contrast::{threshold_mut, ThresholdType},
    map::map_colors,
};
use ndarray::{Array3, Array4};
use ort::{ExecutionProviderDispatch, GraphOptimizationLevel, Session};
use tracing::instrument;

use crate::{BoundingBox, ExecutionProvider, NormalizedGlyph};

#[cfg(feature = "tensorrt")]
fn setup_tensorrt(cache_path: PathBuf, profile_shape: &str) -> ExecutionProviderDispatch {
    use ort::TensorRTExecutionProvider;

    TensorRTExecutionProvider::default()
        .with_profile_min_shapes(profile_shape)
        .with_profile_max_shapes(profile_shape)
        .with_profile_opt_shapes(profile_shape)
        .with_engine_cache(true)
        .with_engine_cache_path(cache_path.to_string_lossy())
        .with_timing_cache(true)
        .with_builder_optimization_level(5)
        .build()
}

#[cfg(feature = "cuda")]
fn setup_cuda() -> ExecutionProviderDispatch {
    use ort::CUDAExecutionProvider;

    CUDAExecutionProvider::default().build()
}

#[cfg(feature = "directml")]
fn setup_directml() -> ExecutionProviderDispatch {
    use ort::DirectMLExecutionProvider;

    DirectMLExecutionProvider::default().build()
}

#[cfg(feature = "coreml")]
fn setup_coreml() -> ExecutionProviderDispatch {
    use ort::CoreMLExecutionProvider;

    CoreMLExecutionProvider::default().build()
}

/// Opens an ONNX session shared by the detector and the classifier.
///
/// `profile_shape` is only consulted by TensorRT, which needs the fixed input
/// shape up front (e.g. `images:1x3x640x640`).
#[allow(unused_variables)]
#[instrument(level = "debug", skip(execution_providers))]
pub(crate) fn build_session(
    path: &Path,
    num_threads: usize,
    execution_providers: &[ExecutionProvider],
    cache_path: Option<PathBuf>,
    profile_shape: &str,
) -> ort::Result<Session> {
    #[cfg(feature = "directml")]
    let parallel = !execution_providers.contains(&ExecutionProvider::DirectML);
    #[cfg(not(feature = "directml"))]
    let parallel = true;

    let execution_providers = execution_providers.iter().filter_map(
        |provider| -> Option<ExecutionProviderDispatch> {
            match provider {
                ExecutionProvider::Default => None,
                #[cfg(feature = "tensorrt")]
                ExecutionProvider::TensorRT => Some(setup_tensorrt(
                    cache_path.clone().unwrap_or_else(|| {
                        path.parent()
                            .map(|parent| parent.join(".cache"))
                            .unwrap_or_else(|| PathBuf::from(".cache"))
                    }),
                    profile_shape,
                )),
                #[cfg(feature = "coreml")]
                ExecutionProvider::CoreML => Some(setup_coreml()),
                #[cfg(feature = "cuda")]
                ExecutionProvider::Cuda => Some(setup_cuda()),
                #[cfg(feature = "directml")]
                ExecutionProvider::DirectML => Some(setup_directml()),
            }
        },
    );

    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_memory_pattern(parallel)?
        .with_parallel_execution(parallel)?
        .with_inter_threads(num_threads)?
        .with_intra_threads(num_threads)?
        .with_execution_providers(execution_providers)?
        .commit_from_file(path)?;

    log::debug!("{:?} inputs: {:?}", path, session.inputs);
    log::debug!("{:?} outputs: {:?}", path, session.outputs);

    Ok(session)
}

/// Converts `image` to a CHW float tensor of `(pixel - mean) * norm`, with
/// pixels already scaled into `0.0..=1.0`.
#[instrument(level = "debug", skip(image))]
pub(crate) fn subtract_mean_normalize(
    image: &DynamicImage,
    mean_vals: &[f32; 3],
    norm_vals: &[f32; 3],
) -> Array3<f32> {
    let image = image.to_rgb32f();
    Array3::<f32>::from_shape_fn(
        (3, image.height() as usize, image.width() as usize),
        |(ch, y, x)| {
            let pixel = image.get_pixel(x as u32, y as u32).channels()[ch];
            (pixel - mean_vals[ch]) * norm_vals[ch]
        },
    )
}

/// NHWC tensor of shape `[1, 52, 32, 1]` holding the glyph intensities.
pub(crate) fn glyph_tensor(glyph: &NormalizedGlyph, pixel_scale: f32) -> Array4<f32> {
    let image = glyph.image();
    Array4::<f32>::from_shape_fn(
        (1, image.height() as usize, image.width() as usize, 1),
        |(_, y, x, _)| image.get_pixel(x as u32, y as u32).0[0] as f32 * pixel_scale,
    )
}

pub(crate) fn part_image(image: &DynamicImage, b_box: &BoundingBox) -> DynamicImage {
    let b_box = b_box.clamp_to(image.width(), image.height());
    log::trace!("Slicing subimage to {b_box:?}");
    image.crop_imm(b_box.x1, b_box.y1, b_box.width(), b_box.height())
}

/// Placement of the source image inside the square detector input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
}

impl Letterbox {
    pub const PAD_VALUE: u8 = 114;

    /// Maps a coordinate from detector input space back to source pixels.
    pub fn source_x(&self, x: f32) -> f32 {
        (x - self.pad_x) / self.scale
    }

    pub fn source_y(&self, y: f32) -> f32 {
        (y - self.pad_y) / self.scale
    }
}

/// Scales `image` to fit a `size`x`size` square without changing its aspect
/// ratio and centres it on a gray canvas.
#[instrument(level = "debug", skip(image))]
pub(crate) fn letterbox(image: &DynamicImage, size: u32) -> (RgbImage, Letterbox) {
    let scale = (size as f32 / image.width() as f32).min(size as f32 / image.height() as f32);
    let width = ((image.width() as f32 * scale).round() as u32).clamp(1, size);
    let height = ((image.height() as f32 * scale).round() as u32).clamp(1, size);
    let pad_x = ((size - width) as f32 / 2.0 - 0.1).round().max(0.0) as u32;
    let pad_y = ((size - height) as f32 / 2.0 - 0.1).round().max(0.0) as u32;
    log::debug!(
        "Letterboxing (w: {}, h: {}) into {size}x{size}: scale {scale}, content {width}x{height} at ({pad_x}, {pad_y}).",
        image.width(),
        image.height()
    );

    let resized = image.resize_exact(width, height, FilterType::Triangle).to_rgb8();
    let mut canvas = RgbImage::from_pixel(size, size, Rgb([Letterbox::PAD_VALUE; 3]));
    imageops::replace(&mut canvas, &resized, pad_x as i64, pad_y as i64);
    (
        canvas,
        Letterbox {
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
        },
    )
}

/// Gray level with BT.601 weights, rounded the way OpenCV's fixed-point
/// `BGR2GRAY` conversion rounds.
fn bt601_luma(image: &RgbImage) -> GrayImage {
    map_colors(image, |Rgb([r, g, b])| {
        let luma = (r as u32 * 4899 + g as u32 * 9617 + b as u32 * 1868 + (1 << 13)) >> 14;
        Luma([luma as u8])
    })
}

/// Resizes a candidate crop to 32x52, drops colour and binarizes it so every
/// pixel at or above `cutoff` becomes 255 and the rest 0.
///
/// The crop must have a non-zero area.
pub fn normalize_glyph(crop: &DynamicImage, cutoff: u8) -> NormalizedGlyph {
    debug_assert!(crop.width() > 0 && crop.height() > 0, "empty crop");
    let resized = crop.resize_exact(
        NormalizedGlyph::WIDTH,
        NormalizedGlyph::HEIGHT,
        FilterType::Triangle,
    );
    let mut image = bt601_luma(&resized.to_rgb8());
    match cutoff.checked_sub(1) {
        Some(threshold) => threshold_mut(&mut image, threshold, ThresholdType::Binary),
        None => image.pixels_mut().for_each(|p| p.0[0] = 255),
    }
    NormalizedGlyph { image }
}

pub(crate) fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);
    let intersection = x2.saturating_sub(x1) as f32 * y2.saturating_sub(y1) as f32;
    let area = |it: &BoundingBox| it.width() as f32 * it.height() as f32;
    let union = area(a) + area(b) - intersection;
    if union <= 0.0 {
        0.0
    } else {
        intersection / union
    }
}

/// Greedy class-agnostic non-maximum suppression, highest score first.
pub(crate) fn non_max_suppression(mut boxes: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    boxes.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<BoundingBox> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        if kept.iter().all(|it| iou(it, &candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}
