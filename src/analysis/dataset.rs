//! The `(angle, metric)` dataset consumed by the curve fit engine.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::metric::{band_max, Band};
use crate::data::artifact::{angle_from_artifact_name, read_artifact};
use crate::error::ArtifactError;

/// One sample of the angular response.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    /// Measured stage angle in degrees
    pub angle: f64,
    /// Scalar metric at that angle (e.g. max intensity in band)
    pub value: f64,
}

impl MetricPoint {
    /// Point at `angle` with metric `value`.
    pub fn new(angle: f64, value: f64) -> Self {
        Self { angle, value }
    }
}

/// Result of loading a dataset from artifact files on disk.
#[derive(Debug, Clone, Default)]
pub struct LoadedDataset {
    /// Points extracted, in input file order
    pub points: Vec<MetricPoint>,
    /// Files that produced no point, with the reason
    pub skipped: Vec<(PathBuf, String)>,
}

impl LoadedDataset {
    /// One-line status summary, e.g. `Loaded 3/4 files. Errors: ...`.
    pub fn summary(&self) -> String {
        let total = self.points.len() + self.skipped.len();
        let mut msg = format!("Loaded {}/{} files.", self.points.len(), total);
        if !self.skipped.is_empty() {
            let reasons: Vec<_> = self.skipped.iter().map(|(_, r)| r.as_str()).collect();
            msg.push_str(&format!(" Errors: {}", reasons.join("; ")));
        }
        msg
    }
}

/// Build a metric dataset from previously saved artifacts.
///
/// The angle comes from each file name's angle token; the metric is the band
/// maximum of the file's spectrum. Files without an angle token, with a bad
/// table shape, or without samples in the band are skipped.
///
/// # Errors
///
/// Fails only when no file yields a point.
pub fn load_metric_dataset<P: AsRef<Path>>(
    paths: &[P],
    band: &Band,
) -> Result<LoadedDataset, ArtifactError> {
    band.validate()?;
    info!(files = paths.len(), min = band.min, max = band.max, "Loading analysis data");

    let mut loaded = LoadedDataset::default();
    for path in paths {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        match load_point(path, &file_name, band) {
            Ok(point) => {
                debug!(file = %file_name, angle = point.angle, value = point.value, "Loaded point");
                loaded.points.push(point);
            }
            Err(reason) => {
                warn!(file = %file_name, %reason, "Skipping file");
                loaded.skipped.push((path.to_path_buf(), reason));
            }
        }
    }

    if loaded.points.is_empty() {
        return Err(ArtifactError::Format(format!(
            "Failed to load any valid data points. {}",
            loaded.summary()
        )));
    }
    info!("{}", loaded.summary());
    Ok(loaded)
}

fn load_point(path: &Path, file_name: &str, band: &Band) -> Result<MetricPoint, String> {
    let angle = angle_from_artifact_name(file_name).map_err(|_| format!("No angle in {file_name}"))?;
    let spectrum = read_artifact(path).map_err(|e| match e {
        ArtifactError::Io(_) => format!("Not found: {file_name}"),
        _ => format!("Bad format in {file_name}"),
    })?;
    let value = band_max(&spectrum, band).ok_or_else(|| format!("No data in range for {file_name}"))?;
    Ok(MetricPoint::new(angle, value))
}
