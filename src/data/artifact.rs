//! Artifact file convention shared with the detector subsystem.
//!
//! Each step produces one artifact: a two-column, tab-delimited table
//! (independent variable, dependent variable) without a header, one row per
//! sample point. Artifact names follow `<base>[_<angle-token>]` where the token
//! is the measured angle to one decimal with the decimal point replaced by `p`
//! (e.g. `scan_-10p5`), so the names stay filesystem safe.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::analysis::dataset::MetricPoint;
use crate::data::Spectrum;
use crate::error::ArtifactError;

#[allow(clippy::expect_used)]
static ANGLE_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"_(-?\d+)p(\d+)").expect("angle token pattern is valid"));

/// Encode an angle as a filesystem-safe token (`12.34` -> `12p3`).
pub fn angle_token(angle: f64) -> String {
    format!("{angle:.1}").replace('.', "p")
}

/// Artifact name for one step.
pub fn artifact_name(base: &str, actual_angle: f64, add_position: bool) -> String {
    if add_position {
        format!("{}_{}", base, angle_token(actual_angle))
    } else {
        base.to_string()
    }
}

/// Full path of an artifact inside `dir`.
pub fn artifact_path(dir: &Path, name: &str, extension: &str) -> PathBuf {
    if extension.is_empty() {
        dir.join(name)
    } else {
        dir.join(format!("{name}.{extension}"))
    }
}

/// Recover the angle encoded in an artifact file name.
///
/// When several tokens match, the last one wins since the angle is appended
/// after the base name.
pub fn angle_from_artifact_name(name: &str) -> Result<f64, ArtifactError> {
    let stem = Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name);

    let caps = ANGLE_TOKEN
        .captures_iter(stem)
        .last()
        .ok_or_else(|| ArtifactError::NoAngleInName(name.to_string()))?;

    format!("{}.{}", &caps[1], &caps[2])
        .parse::<f64>()
        .map_err(|_| ArtifactError::NoAngleInName(name.to_string()))
}

/// Parse a tab-delimited two-column table.
pub fn parse_artifact<R: Read>(reader: R) -> Result<Spectrum, ArtifactError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let mut points = Vec::new();
    for (row, record) in csv_reader.records().enumerate() {
        let record = record?;
        if record.len() != 2 {
            return Err(ArtifactError::Format(format!(
                "row {} has {} columns, expected 2",
                row + 1,
                record.len()
            )));
        }
        let parse = |field: &str| {
            field.parse::<f64>().map_err(|_| {
                ArtifactError::Format(format!("row {}: '{}' is not a number", row + 1, field))
            })
        };
        points.push((parse(&record[0])?, parse(&record[1])?));
    }

    if points.is_empty() {
        return Err(ArtifactError::Format("artifact contains no samples".into()));
    }
    Ok(points.into_iter().collect())
}

/// Read an artifact file from disk.
pub fn read_artifact(path: &Path) -> Result<Spectrum, ArtifactError> {
    let file = File::open(path)?;
    parse_artifact(file)
}

/// Write a spectrum in the artifact format.
pub fn write_artifact(path: &Path, spectrum: &Spectrum) -> Result<(), ArtifactError> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_path(path)?;
    for (x, y) in spectrum.points() {
        writer.write_record([x.to_string(), y.to_string()])?;
    }
    writer.flush()?;
    Ok(())
}

/// Save `(angle, metric)` pairs as a tab-delimited table with 4 decimals.
pub fn write_metric_dataset(path: &Path, points: &[MetricPoint]) -> Result<(), ArtifactError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_path(path)?;
    for point in points {
        writer.write_record([
            format!("{:.4}", point.angle),
            format!("{:.4}", point.value),
        ])?;
    }
    writer.flush()?;
    tracing::info!(path = %path.display(), points = points.len(), "Metric dataset saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_name_with_position() {
        assert_eq!(artifact_name("scan", 30.04, true), "scan_30p0");
        assert_eq!(artifact_name("scan", -10.5, true), "scan_-10p5");
        assert_eq!(artifact_name("scan", 30.04, false), "scan");
    }

    #[test]
    fn test_angle_from_artifact_name() {
        assert_eq!(angle_from_artifact_name("scan_30p0.csv").unwrap(), 30.0);
        assert_eq!(angle_from_artifact_name("scan_-10p5.csv").unwrap(), -10.5);
        assert_eq!(
            angle_from_artifact_name("sample_2p5_run_45p0.csv").unwrap(),
            45.0
        );
        assert!(matches!(
            angle_from_artifact_name("scan.csv"),
            Err(ArtifactError::NoAngleInName(_))
        ));
    }

    #[test]
    fn test_parse_tab_delimited_table() {
        let text = "600.0\t10.5\n600.5\t12.0\n601.0\t9.75\n";
        let spectrum = parse_artifact(text.as_bytes()).unwrap();
        assert_eq!(spectrum.len(), 3);
        assert_eq!(spectrum.independent()[1], 600.5);
        assert_eq!(spectrum.dependent()[2], 9.75);
    }

    #[test]
    fn test_parse_rejects_wrong_column_count() {
        let text = "600.0\t10.5\t1.0\n";
        assert!(matches!(
            parse_artifact(text.as_bytes()),
            Err(ArtifactError::Format(_))
        ));
    }

    #[test]
    fn test_parse_rejects_empty_and_non_numeric() {
        assert!(parse_artifact("".as_bytes()).is_err());
        assert!(parse_artifact("600.0\tabc\n".as_bytes()).is_err());
    }

    #[test]
    fn test_write_then_read_artifact_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = artifact_path(dir.path(), "scan_15p0", "csv");
        let spectrum = Spectrum::new(vec![600.0, 601.0], vec![3.5, 4.25]).unwrap();
        write_artifact(&path, &spectrum).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "600\t3.5\n601\t4.25\n");
        assert_eq!(read_artifact(&path).unwrap(), spectrum);
    }

    #[test]
    fn test_write_metric_dataset_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("intensity_vs_angle.txt");
        let points = vec![
            MetricPoint::new(0.0, 50.0),
            MetricPoint::new(10.0, 425.123456),
        ];
        write_metric_dataset(&path, &points).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "0.0000\t50.0000\n10.0000\t425.1235\n");
    }
}
