//! Spectra, the artifact file codec and the per-run result store.

pub mod aggregator;
pub mod artifact;
mod spectrum;

pub use aggregator::{ResultAggregator, StepResult};
pub use spectrum::Spectrum;
