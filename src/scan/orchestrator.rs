//! Scan orchestrator: run lifecycle, control signals and the scan worker.
//!
//! # Architecture
//!
//! ```text
//! caller ──start/pause/resume/abort──► ScanOrchestrator
//!                                        │  state:   watch<ScanState>
//!                                        │  control: watch<{paused, abort}>
//!                                        ▼
//!                                   ScanWorker (tokio task, one per run)
//!                                        │  move ▸ settle ▸ position ▸ name
//!                                        │  ▸ acquire ▸ fetch ▸ hooks ▸ append
//!                                        ▼
//!                              mpsc<ScanEvent> ──► caller
//! ```
//!
//! At most one worker exists at a time. `start` claims the run atomically on
//! the state channel, so concurrent `start` calls cannot both succeed.
//!
//! The pause gate is a `watch::Receiver::wait_for` at the top of each step,
//! between two abort checks. A paused run therefore aborts as soon as abort is
//! signalled, without running another step. An in-flight device call is never
//! interrupted by abort; it completes (or times out) first.
//!
//! Every accepted `start` produces exactly one [`ScanEvent::Completed`],
//! including when the worker panics.

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::events::{CompletionReason, ScanEvent, ScanState};
use super::hooks::{HookPipeline, LiveDisplay};
use super::plan::StepPlan;
use super::progress::{ProgressSnapshot, ProgressTracker};
use crate::analysis::fit::{CurveFitter, FitResult};
use crate::analysis::model::{FitModel, ParameterBounds, PolarizationModel};
use crate::config::{FitSettings, ScanConfig, TimeoutConfig};
use crate::data::artifact::artifact_name;
use crate::data::{ResultAggregator, Spectrum, StepResult};
use crate::error::{FitError, ScanError};
use crate::error_recovery::{retry_until_some, RetryPolicy};
use crate::hardware::capabilities::{Actuator, Detector};

/// Signals from the caller to the worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Control {
    paused: bool,
    abort: bool,
}

/// Event sender that also logs every status line.
#[derive(Debug, Clone)]
struct Reporter {
    events: mpsc::UnboundedSender<ScanEvent>,
}

impl Reporter {
    fn send(&self, event: ScanEvent) {
        // A dropped receiver only means nobody is listening.
        let _ = self.events.send(event);
    }

    fn status(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.send(ScanEvent::Status {
            message,
            is_error: false,
        });
    }

    fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}", message);
        self.send(ScanEvent::Status {
            message,
            is_error: true,
        });
    }

    fn progress(&self, snapshot: ProgressSnapshot) {
        debug!(
            step = snapshot.current_step,
            total = snapshot.total_steps,
            fraction = snapshot.fraction,
            eta = ?snapshot.eta_seconds,
            "Progress"
        );
        self.send(ScanEvent::Progress(snapshot));
    }

    fn completed(&self, reason: CompletionReason, message: String) {
        let success = reason == CompletionReason::Completed;
        self.send(ScanEvent::Completed {
            success,
            reason,
            message,
        });
    }
}

/// How a run left the step loop early.
#[derive(Debug)]
enum Stop {
    Aborted,
    Failed(ScanError),
}

impl From<ScanError> for Stop {
    fn from(err: ScanError) -> Self {
        Stop::Failed(err)
    }
}

/// Drives one stage and one detector through angle scans.
///
/// # Example
///
/// ```rust,ignore
/// let (orchestrator, mut events) =
///     ScanOrchestrator::new(rotator, spectrometer, TimeoutConfig::default(), None);
/// orchestrator.start(settings.scan.clone()).await?;
/// while let Some(event) = events.recv().await {
///     if let ScanEvent::Completed { message, .. } = event {
///         println!("{message}");
///         break;
///     }
/// }
/// ```
pub struct ScanOrchestrator {
    actuator: Arc<dyn Actuator>,
    detector: Arc<dyn Detector>,
    timeouts: TimeoutConfig,
    hooks: HookPipeline,
    aggregator: ResultAggregator,
    state: Arc<watch::Sender<ScanState>>,
    control: Arc<watch::Sender<Control>>,
    reporter: Reporter,
}

impl ScanOrchestrator {
    /// Create an idle orchestrator and the receiver for its events.
    pub fn new(
        actuator: Arc<dyn Actuator>,
        detector: Arc<dyn Detector>,
        timeouts: TimeoutConfig,
        display: Option<Arc<dyn LiveDisplay>>,
    ) -> (Self, mpsc::UnboundedReceiver<ScanEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ScanState::Idle);
        let (control, _) = watch::channel(Control::default());
        let orchestrator = Self {
            actuator,
            detector,
            timeouts,
            hooks: HookPipeline::new(display),
            aggregator: ResultAggregator::new(),
            state: Arc::new(state),
            control: Arc::new(control),
            reporter: Reporter { events },
        };
        (orchestrator, rx)
    }

    /// Start a run of `config` on a new worker task.
    ///
    /// Returns the run id once the worker is spawned. Results of the previous
    /// run are cleared.
    ///
    /// # Errors
    ///
    /// - `AlreadyRunning` while a run is active (the active run is unaffected)
    /// - `Config` / `InvalidRange` for a bad configuration
    /// - `DeviceNotReady` when the stage or detector reports not ready
    pub async fn start(&self, config: ScanConfig) -> Result<Uuid, ScanError> {
        if self.state().is_active() {
            warn!("Start rejected: scan already in progress");
            return Err(ScanError::AlreadyRunning);
        }
        config.validate()?;
        let plan = StepPlan::new(config.start_angle, config.end_angle, config.step_angle)?;

        if !self.actuator.is_ready().await {
            let err = ScanError::DeviceNotReady(self.actuator.name().to_string());
            self.reporter.warn(err.to_string());
            return Err(err);
        }
        if !self.detector.is_ready().await {
            let err = ScanError::DeviceNotReady(self.detector.name().to_string());
            self.reporter.warn(err.to_string());
            return Err(err);
        }

        let control = &self.control;
        let claimed = self.state.send_if_modified(|state| {
            if state.is_active() {
                return false;
            }
            control.send_replace(Control::default());
            *state = ScanState::Running;
            true
        });
        if !claimed {
            warn!("Start rejected: scan already in progress");
            return Err(ScanError::AlreadyRunning);
        }

        self.aggregator.clear();
        let run_id = Uuid::new_v4();
        info!(
            %run_id,
            start = config.start_angle,
            end = config.end_angle,
            step = config.step_angle,
            steps = plan.len(),
            "Scan accepted"
        );

        let worker = ScanWorker {
            actuator: Arc::clone(&self.actuator),
            detector: Arc::clone(&self.detector),
            timeouts: self.timeouts.clone(),
            hooks: self.hooks.clone(),
            aggregator: self.aggregator.clone(),
            state: Arc::clone(&self.state),
            control_tx: Arc::clone(&self.control),
            control: self.control.subscribe(),
            reporter: self.reporter.clone(),
        };
        tokio::spawn(
            worker
                .run(plan, config)
                .instrument(info_span!("scan", %run_id)),
        );
        Ok(run_id)
    }

    /// Hold the run before its next step. Takes effect once the current step
    /// finished; a paused run waits indefinitely.
    pub fn pause(&self) {
        let control = &self.control;
        let mut prior = ScanState::Idle;
        let paused = self.state.send_if_modified(|state| {
            prior = *state;
            if *state != ScanState::Running {
                return false;
            }
            control.send_modify(|c| c.paused = true);
            *state = ScanState::Paused;
            true
        });
        if paused {
            self.reporter.status("Pausing scan...");
        } else if prior != ScanState::Paused {
            self.reporter
                .warn(format!("Cannot pause: no scan is running ({prior:?})"));
        }
    }

    /// Release a paused run.
    pub fn resume(&self) {
        let control = &self.control;
        let mut prior = ScanState::Idle;
        let resumed = self.state.send_if_modified(|state| {
            prior = *state;
            if *state != ScanState::Paused {
                return false;
            }
            control.send_modify(|c| c.paused = false);
            *state = ScanState::Running;
            true
        });
        if resumed {
            self.reporter.status("Resuming scan...");
        } else if prior != ScanState::Running {
            self.reporter
                .warn(format!("Cannot resume: scan is not paused ({prior:?})"));
        }
    }

    /// Ask the worker to stop. The run ends in `Failed` with reason `Aborted`
    /// after any in-flight device call returns.
    pub fn abort(&self) {
        let control = &self.control;
        let mut prior = ScanState::Idle;
        let aborting = self.state.send_if_modified(|state| {
            prior = *state;
            if !matches!(*state, ScanState::Running | ScanState::Paused) {
                return false;
            }
            control.send_modify(|c| c.abort = true);
            *state = ScanState::Aborting;
            true
        });
        if aborting {
            self.reporter.status("Aborting scan...");
        } else if prior != ScanState::Aborting {
            self.reporter
                .warn(format!("Cannot abort: no scan is running ({prior:?})"));
        }
    }

    /// Whether a run is active (running, paused or aborting).
    pub fn is_running(&self) -> bool {
        self.state().is_active()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ScanState {
        *self.state.borrow()
    }

    /// Receiver observing every state transition.
    pub fn subscribe_state(&self) -> watch::Receiver<ScanState> {
        self.state.subscribe()
    }

    /// Wait until no run is active and return the resulting state.
    pub async fn wait_until_idle(&self) -> ScanState {
        let mut rx = self.state.subscribe();
        let state = match rx.wait_for(|s| !s.is_active()).await {
            Ok(state) => *state,
            Err(_) => ScanState::Failed,
        };
        state
    }

    /// Shared handle to the results of the current (or last) run.
    pub fn results(&self) -> ResultAggregator {
        self.aggregator.clone()
    }

    /// Fit the accumulated `(angle, metric)` dataset.
    pub fn fit(
        &self,
        model: &dyn FitModel,
        initial: &[f64],
        bounds: &[ParameterBounds],
        fixed_mask: &[bool],
    ) -> Result<FitResult, FitError> {
        CurveFitter::default().fit(
            model,
            initial,
            bounds,
            fixed_mask,
            &self.aggregator.metric_points(),
        )
    }

    /// Fit the accumulated dataset with the polarization model configured by
    /// `settings`.
    pub fn fit_with_settings(&self, settings: &FitSettings) -> Result<FitResult, FitError> {
        let data = self.aggregator.metric_points();
        let model = PolarizationModel::new(settings.k);
        let (initial, bounds, fixed) = model.inputs_from_settings(settings, &data);
        CurveFitter::from(settings).fit(&model, &initial, &bounds, &fixed, &data)
    }
}

/// State owned by the task executing one run.
struct ScanWorker {
    actuator: Arc<dyn Actuator>,
    detector: Arc<dyn Detector>,
    timeouts: TimeoutConfig,
    hooks: HookPipeline,
    aggregator: ResultAggregator,
    state: Arc<watch::Sender<ScanState>>,
    control_tx: Arc<watch::Sender<Control>>,
    control: watch::Receiver<Control>,
    reporter: Reporter,
}

fn abort_requested(control: &watch::Receiver<Control>) -> bool {
    control.borrow().abort
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl ScanWorker {
    async fn run(self, plan: StepPlan, config: ScanConfig) {
        self.reporter.status("Starting scan...");

        let outcome = AssertUnwindSafe(self.execute(&plan, &config))
            .catch_unwind()
            .await;

        let (reason, message) = match outcome {
            Ok(Ok(())) => {
                self.reporter.progress(ProgressSnapshot::finished(plan.len()));
                (CompletionReason::Completed, "Scan finished.".to_string())
            }
            Ok(Err(Stop::Aborted)) => (CompletionReason::Aborted, "Scan aborted by user.".to_string()),
            Ok(Err(Stop::Failed(err))) => (CompletionReason::Failed, format!("Scan failed: {err}")),
            Err(payload) => {
                let detail = panic_message(payload.as_ref());
                error!(panic = %detail, "Scan worker panicked");
                (
                    CompletionReason::Unexpected,
                    format!("Scan failed unexpectedly: {detail}"),
                )
            }
        };
        self.finish(reason, message);
    }

    /// Reset control flags, publish the terminal state and emit the single
    /// completion event.
    fn finish(&self, reason: CompletionReason, message: String) {
        self.control_tx.send_replace(Control::default());
        let terminal = match reason {
            CompletionReason::Completed => ScanState::Completed,
            _ => ScanState::Failed,
        };
        self.state.send_replace(terminal);

        match reason {
            CompletionReason::Completed | CompletionReason::Aborted => {
                self.reporter.status(message.clone())
            }
            _ => self.reporter.warn(message.clone()),
        }
        info!(
            ?reason,
            steps = self.aggregator.len(),
            "Scan worker finished"
        );
        self.reporter.completed(reason, message);
    }

    async fn execute(&self, plan: &StepPlan, config: &ScanConfig) -> Result<(), Stop> {
        let total = plan.len();
        let tracker = ProgressTracker::start(total);
        let mut control = self.control.clone();

        for (index, target) in plan.iter().enumerate() {
            if abort_requested(&control) {
                return Err(Stop::Aborted);
            }

            let released = match control.wait_for(|c| !c.paused || c.abort).await {
                Ok(c) => !c.abort,
                Err(_) => false,
            };
            if !released || abort_requested(&control) {
                return Err(Stop::Aborted);
            }

            let step = self.run_step(index, total, target, config).await?;
            self.aggregator.append(step);
            self.reporter.progress(tracker.update(index));
        }
        Ok(())
    }

    async fn run_step(
        &self,
        index: usize,
        total: usize,
        target: f64,
        config: &ScanConfig,
    ) -> Result<StepResult, ScanError> {
        let step_no = index + 1;
        self.reporter
            .status(format!("Step {step_no}/{total}: Moving to {target:.2}°"));

        let move_timeout = self.timeouts.move_timeout;
        match timeout(move_timeout, self.actuator.move_to(target)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(ScanError::Move {
                    angle: target,
                    reason: format!("{e:#}"),
                })
            }
            Err(_) => {
                return Err(ScanError::Move {
                    angle: target,
                    reason: format!("timed out after {move_timeout:?}"),
                })
            }
        }

        sleep(self.timeouts.settle_delay).await;

        let actual_angle = match timeout(move_timeout, self.actuator.current_position()).await {
            Ok(Ok(angle)) => angle,
            Ok(Err(e)) => {
                return Err(ScanError::Move {
                    angle: target,
                    reason: format!("position readback failed: {e:#}"),
                })
            }
            Err(_) => {
                return Err(ScanError::Move {
                    angle: target,
                    reason: format!("position readback timed out after {move_timeout:?}"),
                })
            }
        };
        debug!(index, target, actual_angle, "Move complete");

        let name = artifact_name(
            &config.base_filename,
            actual_angle,
            config.add_position_to_filename,
        );
        let acquire_timeout = self.timeouts.acquire_timeout;
        match timeout(acquire_timeout, self.detector.set_artifact_name(&name)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self
                .reporter
                .warn(format!("Warning: Failed to set filename {name}: {e:#}")),
            Err(_) => self
                .reporter
                .warn(format!("Warning: Setting filename {name} timed out")),
        }

        self.reporter
            .status(format!("Step {step_no}/{total}: Acquiring at {actual_angle:.2}°"));
        match timeout(acquire_timeout, self.detector.acquire()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(ScanError::Acquisition {
                    angle: actual_angle,
                    reason: format!("{e:#}"),
                })
            }
            Err(_) => {
                return Err(ScanError::Acquisition {
                    angle: actual_angle,
                    reason: format!("timed out after {acquire_timeout:?}"),
                })
            }
        }

        let spectrum = self.fetch_artifact(&name).await;
        if spectrum.is_none() {
            self.reporter
                .warn(ScanError::ArtifactMissing(name.clone()).to_string());
        }

        let outcome = self.hooks.run(config, actual_angle, spectrum.as_ref());
        for warning in outcome.warnings {
            self.reporter.warn(warning);
        }

        Ok(StepResult {
            index,
            target_angle: target,
            actual_angle,
            artifact_name: name,
            spectrum,
            derived_metric: outcome.metric,
            timestamp: chrono::Utc::now(),
        })
    }

    /// Poll the detector for `name` until it appears or `artifact_wait` elapses.
    async fn fetch_artifact(&self, name: &str) -> Option<Spectrum> {
        let wait = self.timeouts.artifact_wait;
        let policy = RetryPolicy::for_deadline(wait, self.timeouts.artifact_poll_interval);
        let detector = &self.detector;

        retry_until_some(&policy, move |remaining| async move {
            detector
                .fetch_artifact(name, remaining.unwrap_or(wait))
                .await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::{MockRotator, MockSpectrometer};

    fn orchestrator() -> (ScanOrchestrator, mpsc::UnboundedReceiver<ScanEvent>) {
        let dir = std::env::temp_dir();
        ScanOrchestrator::new(
            Arc::new(MockRotator::instant()),
            Arc::new(MockSpectrometer::new(dir)),
            TimeoutConfig::default(),
            None,
        )
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ScanEvent>) -> Vec<ScanEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_control_outside_run_warns() {
        let (orch, mut rx) = orchestrator();
        orch.pause();
        orch.resume();
        orch.abort();

        let events = drain(&mut rx);
        assert_eq!(events.len(), 3);
        assert!(events
            .iter()
            .all(|e| matches!(e, ScanEvent::Status { is_error: true, .. })));
        assert_eq!(orch.state(), ScanState::Idle);
        assert!(!orch.is_running());
    }

    #[tokio::test]
    async fn test_invalid_config_leaves_state_idle() {
        let (orch, _rx) = orchestrator();
        let config = ScanConfig {
            step_angle: 0.0,
            ..ScanConfig::default()
        };
        assert!(matches!(orch.start(config).await, Err(ScanError::Config(_))));
        assert_eq!(orch.state(), ScanState::Idle);
    }

    #[tokio::test]
    async fn test_step_direction_mismatch_is_invalid_range() {
        let (orch, _rx) = orchestrator();
        let config = ScanConfig {
            start_angle: 0.0,
            end_angle: 90.0,
            step_angle: -10.0,
            ..ScanConfig::default()
        };
        assert!(matches!(
            orch.start(config).await,
            Err(ScanError::InvalidRange(_))
        ));
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }
}
