//! Detection poller.
//!
//! Drives the capture -> infer -> render -> report cycle on a fixed-period
//! timer. At most one cycle is in flight per poller: the state is an explicit
//! `Idle`/`InFlight` pair behind a mutex, and timer firings that find a cycle
//! in flight are dropped, not queued. Failures are logged and swallowed; the
//! next firing simply tries again.

use anyhow::{anyhow, Result};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;
use crate::detect::{DetectRequest, Detector, Prediction};
use crate::display::SharedVideo;
use crate::overlay::{OverlayRenderer, SharedOverlay};
use crate::report::{ReportOutcome, ViolationReporter};
use crate::session::SessionContext;

const TIMER_SLICE: Duration = Duration::from_millis(25);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollState {
    Idle,
    InFlight,
}

/// Holds the poller in `InFlight`; dropping it returns the poller to `Idle`
/// whatever the cycle's outcome.
pub struct InFlightGuard {
    state: Arc<Mutex<PollState>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        match self.state.lock() {
            Ok(mut state) => *state = PollState::Idle,
            Err(poisoned) => *poisoned.into_inner() = PollState::Idle,
        }
    }
}

/// What a single timer firing did.
#[derive(Clone, Debug, PartialEq)]
pub enum TickOutcome {
    /// A previous cycle is still in flight.
    Busy,
    /// Class or teacher identifier missing from the session.
    NoSession,
    /// The video has no usable dimensions yet.
    NoMedia,
    /// Teardown happened while the detector call was in flight.
    Cancelled,
    Failed { error: String },
    Completed {
        predictions: Vec<Prediction>,
        report: ReportOutcome,
    },
}

pub struct PollerConfig {
    pub jpeg_quality: u8,
}

pub struct DetectionPoller {
    video: SharedVideo,
    overlay: SharedOverlay,
    renderer: OverlayRenderer,
    detector: Arc<dyn Detector>,
    reporter: Mutex<ViolationReporter>,
    session: SessionContext,
    jpeg_quality: u8,
    state: Arc<Mutex<PollState>>,
    cancel: CancelToken,
}

impl DetectionPoller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: PollerConfig,
        video: SharedVideo,
        overlay: SharedOverlay,
        renderer: OverlayRenderer,
        detector: Arc<dyn Detector>,
        reporter: ViolationReporter,
        session: SessionContext,
        cancel: CancelToken,
    ) -> Self {
        Self {
            video,
            overlay,
            renderer,
            detector,
            reporter: Mutex::new(reporter),
            session,
            jpeg_quality: config.jpeg_quality,
            state: Arc::new(Mutex::new(PollState::Idle)),
            cancel,
        }
    }

    pub fn state(&self) -> PollState {
        match self.state.lock() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Move to `InFlight` unless a cycle already is.
    pub fn begin(&self) -> Option<InFlightGuard> {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *state == PollState::InFlight {
            return None;
        }
        *state = PollState::InFlight;
        Some(InFlightGuard {
            state: self.state.clone(),
        })
    }

    /// One timer firing, run to completion on the calling thread.
    pub fn tick(&self) -> TickOutcome {
        match self.begin() {
            Some(guard) => self.run_cycle(guard),
            None => TickOutcome::Busy,
        }
    }

    /// Run a cycle already marked in flight. The guard is released on return.
    pub fn run_cycle(&self, _guard: InFlightGuard) -> TickOutcome {
        match self.cycle() {
            Ok(outcome) => outcome,
            Err(err) => {
                log::warn!("detection cycle failed: {:#}", err);
                TickOutcome::Failed {
                    error: err.to_string(),
                }
            }
        }
    }

    fn cycle(&self) -> Result<TickOutcome> {
        let Some((class_id, teacher_id)) = self.session.identifiers() else {
            return Ok(TickOutcome::NoSession);
        };

        let (frame, native, displayed) = {
            let video = self.video.lock()?;
            if !video.has_dimensions() {
                return Ok(TickOutcome::NoMedia);
            }
            let frame = video
                .frame()
                .cloned()
                .ok_or_else(|| anyhow!("video reported dimensions without a frame"))?;
            (frame, video.native_size(), video.display_size())
        };

        let image = frame.to_data_uri(self.jpeg_quality)?;
        let request = DetectRequest {
            image,
            class_id,
            teacher_id,
        };
        let response = self.detector.detect(&request)?;

        if self.cancel.is_cancelled() {
            log::debug!(
                "discarding {} detector result after teardown",
                self.detector.name()
            );
            return Ok(TickOutcome::Cancelled);
        }

        self.overlay
            .paint(&self.renderer, native, displayed, &response.predictions)?;

        let report = {
            let mut reporter = self
                .reporter
                .lock()
                .map_err(|_| anyhow!("reporter lock poisoned"))?;
            let evidence = request.image;
            reporter.evaluate(
                &response.predictions,
                response.evidence_url.as_deref(),
                (class_id, teacher_id),
                move || Ok(evidence),
                Instant::now(),
            )
        };

        Ok(TickOutcome::Completed {
            predictions: response.predictions,
            report,
        })
    }
}

/// Running poll timer. Dropping the handle does not stop it; call `stop`.
#[derive(Debug)]
pub struct PollerHandle {
    cancel: CancelToken,
    join: Option<JoinHandle<()>>,
}

impl PollerHandle {
    pub fn stop(mut self) -> Result<()> {
        self.cancel.cancel();
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("poll timer thread panicked"))?;
        }
        Ok(())
    }
}

/// Start the fixed-period timer.
///
/// Each firing that finds the poller idle runs its cycle on a worker thread,
/// so a slow detector call never delays the timer itself.
pub fn spawn(
    poller: Arc<DetectionPoller>,
    interval: Duration,
    cancel: CancelToken,
) -> Result<PollerHandle> {
    let timer_cancel = cancel.clone();
    let join = std::thread::Builder::new()
        .name("detect-poll".to_string())
        .spawn(move || run_timer(poller, interval, timer_cancel))?;
    Ok(PollerHandle {
        cancel,
        join: Some(join),
    })
}

fn run_timer(poller: Arc<DetectionPoller>, interval: Duration, cancel: CancelToken) {
    let mut next = Instant::now() + interval;
    loop {
        while Instant::now() < next {
            if cancel.is_cancelled() {
                return;
            }
            std::thread::sleep(TIMER_SLICE.min(next.saturating_duration_since(Instant::now())));
        }
        if cancel.is_cancelled() {
            return;
        }
        next += interval;

        let Some(guard) = poller.begin() else {
            log::debug!("poll skipped: previous cycle still in flight");
            continue;
        };
        let worker = poller.clone();
        let spawned = std::thread::Builder::new()
            .name("detect-cycle".to_string())
            .spawn(move || {
                let outcome = worker.run_cycle(guard);
                log_outcome(&outcome);
            });
        if let Err(err) = spawned {
            log::warn!("failed to spawn detection cycle: {}", err);
        }
    }
}

fn log_outcome(outcome: &TickOutcome) {
    match outcome {
        TickOutcome::Completed {
            predictions,
            report,
        } => log::debug!(
            "detection cycle: {} predictions, report={:?}",
            predictions.len(),
            report
        ),
        TickOutcome::NoSession => log::debug!("poll skipped: no class/teacher in session"),
        TickOutcome::NoMedia => log::debug!("poll skipped: video has no dimensions yet"),
        TickOutcome::Busy | TickOutcome::Cancelled | TickOutcome::Failed { .. } => {}
    }
}
