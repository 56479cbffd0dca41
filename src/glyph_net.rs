use std::path::PathBuf;

use ort::{inputs, Session};
use tracing::instrument;

use crate::{
    error::{Result, SolveError},
    util::{build_session, glyph_tensor},
    ExecutionProvider, GlyphClassifier, NormalizedGlyph,
};

/// CNN over a single 32x52 glyph, exported to ONNX with an NHWC input.
pub struct GlyphNet {
    session: Session,
    input_name: String,
    pixel_scale: f32,
}

impl GlyphNet {
    #[instrument(level = "debug")]
    pub fn init(
        model_path: PathBuf,
        num_threads: usize,
        pixel_scale: f32,
        execution_providers: &[ExecutionProvider],
        cache_path: Option<PathBuf>,
    ) -> ort::Result<Self> {
        let session = build_session(
            &model_path,
            num_threads,
            execution_providers,
            cache_path,
            "input:1x52x32x1",
        )?;
        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .unwrap_or_else(|| "input".to_string());

        Ok(Self {
            session,
            input_name,
            pixel_scale,
        })
    }

    #[instrument(level = "trace", skip(self, glyph))]
    fn run(&self, glyph: &NormalizedGlyph) -> ort::Result<Vec<f32>> {
        let tensor_values = glyph_tensor(glyph, self.pixel_scale);
        let outputs = self
            .session
            .run(inputs![self.input_name.as_str() => tensor_values]?)?;
        let Some((_, output)) = outputs.first_key_value() else {
            return Ok(Vec::new());
        };
        let output_tensor = output.try_extract_tensor::<f32>()?;
        log::trace!("Classifier output shape: {:?}", output_tensor.shape());

        Ok(output_tensor.iter().copied().collect())
    }
}

impl GlyphClassifier for GlyphNet {
    fn probabilities(&self, glyph: &NormalizedGlyph) -> Result<Vec<f32>> {
        self.run(glyph)
            .map_err(|err| SolveError::Classification(err.to_string()))
    }
}
