use std::path::{Path, PathBuf};

use glyph_net::GlyphNet;
use yolo_net::YoloNet;

pub mod bot;
pub mod browser;
mod error;
pub mod filter;
mod glyph_net;
mod labels;
mod result;
pub mod util;
mod yolo_net;

use image::DynamicImage;
use tracing::instrument;
use util::{normalize_glyph, part_image};

pub use error::*;
pub use filter::FilterOptions;
pub use labels::LabelSet;
pub use result::*;

pub use ort as runtime;

/// Finds candidate character boxes in a CAPTCHA image, in any order.
pub trait CharacterDetector: Send + Sync {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<BoundingBox>>;
}

/// Produces one score per label for a normalized glyph.
pub trait GlyphClassifier: Send + Sync {
    fn probabilities(&self, glyph: &NormalizedGlyph) -> Result<Vec<f32>>;
}

pub struct CaptchaSolverBuilder {
    threads: usize,
    det_path: Option<PathBuf>,
    cls_paths: Option<(PathBuf, PathBuf)>,
    detector_options: DetectorOptions,
    filter_options: FilterOptions,
    pixel_scale: f32,
    cache_path: Option<PathBuf>,
    execution_providers: Vec<ExecutionProvider>,
}

impl CaptchaSolverBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn det_model(mut self, path: impl Into<PathBuf>) -> Self {
        self.det_path = Some(path.into());
        self
    }

    pub fn cls_model(
        mut self,
        model_path: impl Into<PathBuf>,
        labels_path: impl Into<PathBuf>,
    ) -> Self {
        self.cls_paths = Some((model_path.into(), labels_path.into()));
        self
    }

    pub fn detector_options(mut self, options: DetectorOptions) -> Self {
        self.detector_options = options;
        self
    }

    pub fn filter_options(mut self, options: FilterOptions) -> Self {
        self.filter_options = options;
        self
    }

    /// Multiplier applied to the 0/255 glyph pixels before classification.
    pub fn pixel_scale(mut self, scale: f32) -> Self {
        self.pixel_scale = scale;
        self
    }

    pub fn with_engine_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    pub fn with_execution_providers(
        mut self,
        providers: impl IntoIterator<Item = ExecutionProvider>,
    ) -> Self {
        self.execution_providers = providers.into_iter().collect();
        self
    }

    #[instrument(skip(self), level = "debug")]
    fn init_models(&mut self) -> Result<(YoloNet, GlyphNet, LabelSet)> {
        let det_path = self
            .det_path
            .take()
            .unwrap_or_else(|| "models/detector.onnx".into());
        let (cls_path, labels_path) = self.cls_paths.take().unwrap_or_else(|| {
            (
                "models/classifier.onnx".into(),
                "models/labels.txt".into(),
            )
        });
        Ok((
            YoloNet::init(
                det_path,
                self.threads,
                self.detector_options,
                &self.execution_providers,
                self.cache_path.clone(),
            )?,
            GlyphNet::init(
                cls_path,
                self.threads,
                self.pixel_scale,
                &self.execution_providers,
                self.cache_path.clone(),
            )?,
            LabelSet::load(labels_path)?,
        ))
    }

    #[instrument(skip(self))]
    pub fn build(mut self) -> Result<CaptchaSolver> {
        let (detector, classifier, labels) = self.init_models()?;
        Ok(CaptchaSolver::new(
            Box::new(detector),
            Box::new(classifier),
            labels,
            self.filter_options,
        ))
    }
}

impl Default for CaptchaSolverBuilder {
    fn default() -> Self {
        Self {
            threads: 4,
            det_path: None,
            cls_paths: None,
            detector_options: DetectorOptions::default(),
            filter_options: FilterOptions::default(),
            pixel_scale: 1.0,
            cache_path: None,
            execution_providers: DEFAULT_PROVIDERS.to_vec(),
        }
    }
}

/// The solving pipeline: localize, filter, normalize, classify, assemble.
///
/// Holds no per-image state, so one instance serves every attempt.
pub struct CaptchaSolver {
    detector: Box<dyn CharacterDetector>,
    classifier: Box<dyn GlyphClassifier>,
    labels: LabelSet,
    filter_options: FilterOptions,
}

impl CaptchaSolver {
    pub fn new(
        detector: Box<dyn CharacterDetector>,
        classifier: Box<dyn GlyphClassifier>,
        labels: LabelSet,
        filter_options: FilterOptions,
    ) -> Self {
        Self {
            detector,
            classifier,
            labels,
            filter_options,
        }
    }

    /// Detected boxes clipped to the image and sorted by left edge.
    #[instrument(skip(self, image), level = "debug")]
    pub fn localize(&self, image: &DynamicImage) -> Result<Vec<BoundingBox>> {
        let mut boxes = self
            .detector
            .detect(image)?
            .into_iter()
            .map(|it| it.clamp_to(image.width(), image.height()))
            .filter(|it| !it.is_empty())
            .collect::<Vec<_>>();
        boxes.sort_by_key(|it| it.x1);
        log::debug!("Localized {} candidate characters", boxes.len());
        Ok(boxes)
    }

    /// Applies the duplicate and noise policy to `boxes` and normalizes the
    /// survivors, in order.
    #[instrument(skip(self, image, boxes), level = "debug")]
    pub fn select_glyphs(&self, image: &DynamicImage, boxes: &[BoundingBox]) -> Vec<NormalizedGlyph> {
        filter::select_glyph_boxes(image, boxes, &self.filter_options)
            .iter()
            .map(|b_box| normalize_glyph(&part_image(image, b_box), self.filter_options.glyph_cutoff))
            .collect()
    }

    #[instrument(skip(self, glyph), level = "trace")]
    pub fn classify(&self, glyph: &NormalizedGlyph, position: usize) -> Result<PredictedCharacter> {
        let probabilities = self.classifier.probabilities(glyph)?;
        if probabilities.len() < self.labels.len() {
            return Err(SolveError::Classification(format!(
                "classifier returned {} scores for {} labels",
                probabilities.len(),
                self.labels.len()
            )));
        }
        let (label, score) = self.labels.decode_argmax(&probabilities)?;
        Ok(PredictedCharacter {
            position,
            label: label.to_string(),
            score,
        })
    }

    #[instrument(skip(self, image))]
    pub fn solve(&self, image: &DynamicImage) -> Result<PredictedAnswer> {
        let boxes = self.localize(image)?;
        let glyphs = self.select_glyphs(image, &boxes);
        if glyphs.is_empty() {
            return Err(SolveError::Detection("no usable characters found".into()));
        }
        #[cfg(feature = "debug")]
        for (i, glyph) in glyphs.iter().enumerate() {
            if let Err(err) = glyph.image().save(format!("glyphs/{i}.png")) {
                log::warn!("Failed to dump glyph {i}: {err}");
            }
        }

        let characters = glyphs
            .iter()
            .enumerate()
            .map(|(position, glyph)| self.classify(glyph, position))
            .collect::<Result<Vec<_>>>()?;
        let answer = assemble(characters);
        log::debug!("Predicted {:?}", answer.text());
        Ok(answer)
    }

    pub fn solve_path(&self, path: impl AsRef<Path>) -> Result<PredictedAnswer> {
        let path = path.as_ref();
        let image = image::open(path).map_err(|source| SolveError::Image {
            path: Some(path.to_path_buf()),
            source,
        })?;
        self.solve(&image)
    }
}

/// Joins predictions in the order given; no reordering or deduplication.
pub fn assemble(characters: Vec<PredictedCharacter>) -> PredictedAnswer {
    PredictedAnswer { characters }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorOptions {
    /// Side of the square input the detector was exported with.
    pub input_size: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            input_size: 640,
            confidence_threshold: 0.25,
            iou_threshold: 0.7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionProvider {
    Default,
    #[cfg(feature = "tensorrt")]
    TensorRT,
    #[cfg(feature = "coreml")]
    CoreML,
    #[cfg(feature = "cuda")]
    Cuda,
    #[cfg(feature = "directml")]
    DirectML,
}

const DEFAULT_PROVIDERS: &[ExecutionProvider] = &[
    #[cfg(feature = "tensorrt")]
    ExecutionProvider::TensorRT,
    #[cfg(feature = "coreml")]
    ExecutionProvider::CoreML,
    #[cfg(feature = "directml")]
    ExecutionProvider::DirectML,
    #[cfg(feature = "cuda")]
    ExecutionProvider::Cuda,
    ExecutionProvider::Default,
];
