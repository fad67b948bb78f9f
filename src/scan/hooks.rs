//! Per-step hook pipeline.
//!
//! Two independent hooks run after every step's artifact retrieval:
//!
//! - **Live display**: forwards the spectrum to a [`LiveDisplay`] sink.
//! - **Dynamic metric**: the band maximum of the spectrum, recorded with the
//!   step and added to the fit dataset.
//!
//! Both are best effort. A failing or panicking hook yields a warning and
//! never fails the step or blocks the other hook.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::debug;

use crate::analysis::metric::band_max;
use crate::config::ScanConfig;
use crate::data::Spectrum;

/// Sink for spectra shown while a scan runs.
pub trait LiveDisplay: Send + Sync {
    /// Show the spectrum measured at `angle`.
    fn show(&self, angle: f64, spectrum: &Spectrum) -> anyhow::Result<()>;
}

/// Display that logs a one-line digest of each spectrum.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDisplay;

impl LiveDisplay for TracingDisplay {
    fn show(&self, angle: f64, spectrum: &Spectrum) -> anyhow::Result<()> {
        let peak = spectrum
            .points()
            .fold(None, |best: Option<(f64, f64)>, p| match best {
                Some(b) if b.1 >= p.1 => Some(b),
                _ => Some(p),
            });
        if let Some((x, y)) = peak {
            debug!(angle, samples = spectrum.len(), peak_x = x, peak_y = y, "Live spectrum");
        }
        Ok(())
    }
}

/// What the hooks produced for one step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HookOutcome {
    /// Band maximum, if the metric hook ran and found samples
    pub metric: Option<f64>,
    /// Warnings to surface as status messages
    pub warnings: Vec<String>,
}

/// The configured hooks for a run.
#[derive(Clone, Default)]
pub struct HookPipeline {
    display: Option<Arc<dyn LiveDisplay>>,
}

impl std::fmt::Debug for HookPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookPipeline")
            .field("display", &self.display.is_some())
            .finish()
    }
}

impl HookPipeline {
    /// Pipeline forwarding to `display` when live plotting is on.
    pub fn new(display: Option<Arc<dyn LiveDisplay>>) -> Self {
        Self { display }
    }

    /// Run both hooks for a step measured at `actual_angle`.
    ///
    /// Does nothing when `spectrum` is `None`.
    pub fn run(
        &self,
        config: &ScanConfig,
        actual_angle: f64,
        spectrum: Option<&Spectrum>,
    ) -> HookOutcome {
        let mut outcome = HookOutcome::default();
        let Some(spectrum) = spectrum else {
            return outcome;
        };

        if config.plot_live {
            if let Some(display) = &self.display {
                let shown = catch_unwind(AssertUnwindSafe(|| display.show(actual_angle, spectrum)))
                    .unwrap_or_else(|panic| Err(anyhow::anyhow!(panic_message(panic.as_ref()))));
                if let Err(e) = shown {
                    outcome
                        .warnings
                        .push(format!("Warning: Live display failed at {actual_angle:.2}°: {e}"));
                }
            }
        }

        if config.dynamic_metric_enabled {
            if let Some(band) = &config.metric_band {
                match band_max(spectrum, band) {
                    Some(value) => outcome.metric = Some(value),
                    None => outcome.warnings.push(format!(
                        "Warning: No data in range [{}, {}] at {actual_angle:.2}°",
                        band.min, band.max
                    )),
                }
            }
        }

        outcome
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "display panicked".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::metric::Band;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingDisplay {
        shown: AtomicUsize,
    }

    impl LiveDisplay for CountingDisplay {
        fn show(&self, _angle: f64, _spectrum: &Spectrum) -> anyhow::Result<()> {
            self.shown.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct BrokenDisplay;

    impl LiveDisplay for BrokenDisplay {
        fn show(&self, _angle: f64, _spectrum: &Spectrum) -> anyhow::Result<()> {
            anyhow::bail!("window closed")
        }
    }

    struct PanickingDisplay;

    impl LiveDisplay for PanickingDisplay {
        fn show(&self, _angle: f64, _spectrum: &Spectrum) -> anyhow::Result<()> {
            panic!("plot widget gone")
        }
    }

    fn spectrum() -> Spectrum {
        Spectrum::new(vec![600.0, 610.0, 620.0], vec![1.0, 7.0, 3.0]).unwrap()
    }

    fn metric_config(band: Band) -> ScanConfig {
        ScanConfig {
            dynamic_metric_enabled: true,
            metric_band: Some(band),
            ..ScanConfig::default()
        }
    }

    #[test]
    fn test_metric_and_display() {
        let display = Arc::new(CountingDisplay::default());
        let pipeline = HookPipeline::new(Some(display.clone()));
        let config = metric_config(Band::new(605.0, 625.0).unwrap());

        let outcome = pipeline.run(&config, 10.0, Some(&spectrum()));
        assert_eq!(outcome.metric, Some(7.0));
        assert!(outcome.warnings.is_empty());
        assert_eq!(display.shown.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty_band_warns_without_metric() {
        let pipeline = HookPipeline::default();
        let config = metric_config(Band::new(700.0, 710.0).unwrap());

        let outcome = pipeline.run(&config, 10.0, Some(&spectrum()));
        assert_eq!(outcome.metric, None);
        assert_eq!(outcome.warnings.len(), 1);
    }

    #[test]
    fn test_display_failure_does_not_block_metric() {
        let pipeline = HookPipeline::new(Some(Arc::new(BrokenDisplay)));
        let config = metric_config(Band::new(605.0, 625.0).unwrap());

        let outcome = pipeline.run(&config, 10.0, Some(&spectrum()));
        assert_eq!(outcome.metric, Some(7.0));
        assert!(outcome.warnings[0].contains("window closed"));
    }

    #[test]
    fn test_display_panic_becomes_warning() {
        let pipeline = HookPipeline::new(Some(Arc::new(PanickingDisplay)));
        let config = ScanConfig {
            plot_live: true,
            ..metric_config(Band::new(605.0, 625.0).unwrap())
        };

        let outcome = pipeline.run(&config, 20.0, Some(&spectrum()));
        assert_eq!(outcome.metric, Some(7.0));
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("plot widget gone"));
    }

    #[test]
    fn test_missing_spectrum_is_noop() {
        let display = Arc::new(CountingDisplay::default());
        let pipeline = HookPipeline::new(Some(display.clone()));
        let config = metric_config(Band::new(605.0, 625.0).unwrap());

        assert_eq!(pipeline.run(&config, 10.0, None), HookOutcome::default());
        assert_eq!(display.shown.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_plot_live_disabled() {
        let display = Arc::new(CountingDisplay::default());
        let pipeline = HookPipeline::new(Some(display.clone()));
        let config = ScanConfig {
            plot_live: false,
            ..ScanConfig::default()
        };
        pipeline.run(&config, 0.0, Some(&spectrum()));
        assert_eq!(display.shown.load(Ordering::SeqCst), 0);
    }
}
