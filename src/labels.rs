use std::path::{Path, PathBuf};

use float_ord::FloatOrd;

use crate::error::{Result, SolveError};

/// Maps classifier output indices back to characters.
///
/// The file format is one label per line in class-index order, which is what
/// a fitted label encoder's `classes_` list looks like when written out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSet {
    labels: Vec<String>,
}

impl LabelSet {
    pub fn new(labels: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            labels: labels.into_iter().map(Into::into).collect(),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| SolveError::Labels {
            path: PathBuf::from(path),
            source,
        })?;
        let labels = Self::new(
            contents
                .lines()
                .map(|line| line.trim_end_matches('\r'))
                .filter(|line| !line.is_empty()),
        );
        log::debug!("Loaded {} labels from {path:?}", labels.len());
        Ok(labels)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn decode(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    /// Picks the most probable label, returning it with its score.
    pub fn decode_argmax(&self, probabilities: &[f32]) -> Result<(&str, f32)> {
        let (index, score) = probabilities
            .iter()
            .enumerate()
            .max_by_key(|(_, score)| FloatOrd(**score))
            .ok_or_else(|| SolveError::Classification("empty probability vector".into()))?;
        let label = self.decode(index).ok_or_else(|| {
            SolveError::Classification(format!(
                "class index {index} outside of {} labels",
                self.len()
            ))
        })?;
        Ok((label, *score))
    }
}
