use std::path::PathBuf;

use image::DynamicImage;
use ndarray::{Array2, ArrayView2, Axis, Ix3};
use ort::{inputs, Session};
use tracing::instrument;

use crate::{
    error::{Result, SolveError},
    util::{build_session, letterbox, non_max_suppression, subtract_mean_normalize, Letterbox},
    BoundingBox, CharacterDetector, DetectorOptions, ExecutionProvider,
};

const MEAN_VALUES: [f32; 3] = [0.0, 0.0, 0.0];
const NORM_VALUES: [f32; 3] = [1.0, 1.0, 1.0];

/// YOLOv8-style single-class character detector exported to ONNX.
pub struct YoloNet {
    session: Session,
    input_name: String,
    options: DetectorOptions,
}

impl YoloNet {
    #[instrument(level = "debug")]
    pub fn init(
        path: PathBuf,
        num_threads: usize,
        options: DetectorOptions,
        execution_providers: &[ExecutionProvider],
        cache_path: Option<PathBuf>,
    ) -> ort::Result<Self> {
        let profile_shape = format!("images:1x3x{0}x{0}", options.input_size);
        let session = build_session(
            &path,
            num_threads,
            execution_providers,
            cache_path,
            &profile_shape,
        )?;
        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .unwrap_or_else(|| "images".to_string());

        Ok(Self {
            session,
            input_name,
            options,
        })
    }

    /// Raw predictions as `(anchors, 4 + classes)` in letterboxed input space.
    #[instrument(level = "debug", skip(self, image))]
    fn predict(&self, image: &DynamicImage) -> ort::Result<(Array2<f32>, Letterbox)> {
        let (input, letterbox) = letterbox(image, self.options.input_size);
        let input_values =
            subtract_mean_normalize(&DynamicImage::ImageRgb8(input), &MEAN_VALUES, &NORM_VALUES)
                .insert_axis(Axis(0));
        let outputs = self
            .session
            .run(inputs![self.input_name.as_str() => input_values]?)?;
        let Some((_, output)) = outputs.first_key_value() else {
            return Ok((Array2::zeros((0, 0)), letterbox));
        };
        let output = output.try_extract_tensor::<f32>()?;
        log::trace!("Detector output shape: {:?}", output.shape());

        let Ok(output) = output.into_dimensionality::<Ix3>() else {
            return Ok((Array2::zeros((0, 0)), letterbox));
        };
        let output = output.index_axis_move(Axis(0), 0);
        // Exports differ on whether anchors come first; anchors always outnumber channels.
        let predictions = if output.len_of(Axis(0)) < output.len_of(Axis(1)) {
            output.t().to_owned()
        } else {
            output.to_owned()
        };
        Ok((predictions, letterbox))
    }
}

impl CharacterDetector for YoloNet {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<BoundingBox>> {
        if image.width() == 0 || image.height() == 0 {
            return Err(SolveError::Detection("empty capture".into()));
        }
        let (predictions, letterbox) = self
            .predict(image)
            .map_err(|err| SolveError::Detection(err.to_string()))?;
        if predictions.ncols() < 5 {
            return Err(SolveError::Detection(format!(
                "unexpected detector output with {} channels",
                predictions.ncols()
            )));
        }
        Ok(decode_predictions(predictions.view(), &letterbox, &self.options))
    }
}

/// Turns `(anchors, cx cy w h class-scores...)` rows into boxes in source
/// image pixels, applying the confidence threshold and NMS. Coordinates are
/// truncated to whole pixels.
#[instrument(level = "trace", skip(predictions))]
pub(crate) fn decode_predictions(
    predictions: ArrayView2<f32>,
    letterbox: &Letterbox,
    options: &DetectorOptions,
) -> Vec<BoundingBox> {
    let candidates = predictions
        .outer_iter()
        .filter_map(|row| {
            let score = row
                .iter()
                .skip(4)
                .copied()
                .fold(f32::NEG_INFINITY, f32::max);
            if score < options.confidence_threshold {
                return None;
            }
            let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
            let x1 = letterbox.source_x(cx - w / 2.0).max(0.0);
            let y1 = letterbox.source_y(cy - h / 2.0).max(0.0);
            let x2 = letterbox.source_x(cx + w / 2.0).max(0.0);
            let y2 = letterbox.source_y(cy + h / 2.0).max(0.0);
            Some(BoundingBox::new(x1 as u32, y1 as u32, x2 as u32, y2 as u32).with_score(score))
        })
        .collect::<Vec<_>>();
    log::debug!("{} candidates above confidence threshold", candidates.len());
    non_max_suppression(candidates, options.iou_threshold)
}
