//! Offline analysis of a scan: banded metrics, the `(angle, metric)` dataset
//! and the curve fit engine.

pub mod dataset;
pub mod fit;
pub mod metric;
pub mod model;

pub use dataset::{load_metric_dataset, LoadedDataset, MetricPoint};
pub use fit::{fit, CurveFitter, FitResult, FittedParameter, ParameterPartition};
pub use metric::{band_max, Band};
pub use model::{FitModel, ParameterBounds, PolarizationModel};
