//! Banded scalar metrics extracted from a spectrum.

use serde::{Deserialize, Serialize};

use crate::data::Spectrum;
use crate::error::BandError;

/// Closed sub-range `[min, max]` of the independent variable (e.g. wavelength in nm).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    /// Lower edge, inclusive
    pub min: f64,
    /// Upper edge, inclusive
    pub max: f64,
}

impl Band {
    /// Create a band, checking that `0 <= min < max`.
    pub fn new(min: f64, max: f64) -> Result<Self, BandError> {
        let band = Self { min, max };
        band.validate()?;
        Ok(band)
    }

    /// Check that both edges are finite, non-negative and ordered.
    pub fn validate(&self) -> Result<(), BandError> {
        let (min, max) = (self.min, self.max);
        if !min.is_finite() || !max.is_finite() {
            return Err(BandError::NonFinite { min, max });
        }
        if min < 0.0 || max < 0.0 {
            return Err(BandError::Negative { min, max });
        }
        if min >= max {
            return Err(BandError::Inverted { min, max });
        }
        Ok(())
    }

    /// Whether `x` lies inside the band.
    pub fn contains(&self, x: f64) -> bool {
        x >= self.min && x <= self.max
    }
}

/// Maximum of the dependent series over samples whose independent value lies in `band`.
///
/// Returns `None` when no sample falls inside the band.
pub fn band_max(spectrum: &Spectrum, band: &Band) -> Option<f64> {
    spectrum
        .points()
        .filter(|(x, _)| band.contains(*x))
        .map(|(_, y)| y)
        .fold(None, |acc: Option<f64>, y| match acc {
            Some(best) if best >= y => Some(best),
            _ => Some(y),
        })
}
