use serde::{Deserialize, Serialize};

use crate::error::ArtifactError;

/// Paired independent (e.g. wavelength) and dependent (intensity) series.
///
/// Both series always have the same length.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Spectrum {
    independent: Vec<f64>,
    dependent: Vec<f64>,
}

impl Spectrum {
    /// Build a spectrum from two equal-length series.
    ///
    /// # Errors
    ///
    /// Returns `ArtifactError::Format` when the lengths differ.
    pub fn new(independent: Vec<f64>, dependent: Vec<f64>) -> Result<Self, ArtifactError> {
        if independent.len() != dependent.len() {
            return Err(ArtifactError::Format(format!(
                "series length mismatch: {} independent vs {} dependent samples",
                independent.len(),
                dependent.len()
            )));
        }
        Ok(Self {
            independent,
            dependent,
        })
    }

    /// Independent variable samples.
    pub fn independent(&self) -> &[f64] {
        &self.independent
    }

    /// Dependent variable samples.
    pub fn dependent(&self) -> &[f64] {
        &self.dependent
    }

    /// Number of sample points.
    pub fn len(&self) -> usize {
        self.independent.len()
    }

    /// Returns true if the spectrum holds no samples.
    pub fn is_empty(&self) -> bool {
        self.independent.is_empty()
    }

    /// Iterate `(independent, dependent)` pairs.
    pub fn points(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.independent
            .iter()
            .copied()
            .zip(self.dependent.iter().copied())
    }
}

impl FromIterator<(f64, f64)> for Spectrum {
    fn from_iter<I: IntoIterator<Item = (f64, f64)>>(iter: I) -> Self {
        let (independent, dependent) = iter.into_iter().unzip();
        Self {
            independent,
            dependent,
        }
    }
}
