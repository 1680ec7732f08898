use super::driver::{CaptureDriver, CaptureJob, CompletionNotifier, RawCapture};
use super::modes::SensorMode;
use super::signals::{Wake, WorkerSignals};
use crate::error::CameraError;
use crate::frame::{CapturedFrame, FrameMetadata};
use crate::recording::{RecordingGate, RecordingStatus};
use crate::settings::SettingsStore;
use crossbeam::channel::{Sender, TrySendError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Capture worker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Configuring,
    Streaming,
    Exposing,
    Draining,
    Exiting,
    Faulted,
}

impl WorkerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerState::Exiting | WorkerState::Faulted)
    }
}

/// A frame handed to the preview consumer, with the recorder's verdict
#[derive(Debug, Clone)]
pub struct PreviewFrame {
    pub frame: Arc<CapturedFrame>,
    pub recording: RecordingStatus,
}

/// State the worker publishes to the session owner
#[derive(Debug)]
pub struct WorkerShared {
    pub signals: Arc<WorkerSignals>,
    state: Mutex<WorkerState>,
    fault: Mutex<Option<CameraError>>,
    frames_captured: AtomicU64,
}

impl WorkerShared {
    pub fn new() -> Self {
        Self {
            signals: Arc::new(WorkerSignals::new()),
            state: Mutex::new(WorkerState::Idle),
            fault: Mutex::new(None),
            frames_captured: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock()
    }

    pub fn fault(&self) -> Option<CameraError> {
        self.fault.lock().clone()
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames_captured.load(Ordering::Relaxed)
    }

    fn set_state(&self, next: WorkerState) {
        let mut state = self.state.lock();
        if *state != next {
            debug!("Capture worker {:?} -> {:?}", *state, next);
            *state = next;
        }
    }
}

impl Default for WorkerShared {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything the worker needs besides the driver
pub struct WorkerContext {
    pub settings: Arc<SettingsStore>,
    pub recorder: Arc<RecordingGate>,
    pub shared: Arc<WorkerShared>,
    pub preview_tx: Sender<PreviewFrame>,
    pub restart_each_exposure: bool,
    pub poll_period: Duration,
    pub capture_grace: Duration,
    pub camera_model: String,
    pub pixel_size_nm: (f64, f64),
}

/// Worker thread body. Owns `driver` until exit and hands it back so the
/// session can close it after the join.
pub fn run<D: CaptureDriver>(mut driver: D, ctx: WorkerContext) -> (D, Result<(), CameraError>) {
    debug!(
        "Capture worker started (restart each exposure: {})",
        ctx.restart_each_exposure
    );

    let result = ctx.capture_loop(&mut driver);

    if driver.is_started() {
        if let Err(e) = driver.stop() {
            warn!("Failed to stop camera on worker exit: {}", e);
        }
    }

    match &result {
        Ok(()) => {
            ctx.shared.set_state(WorkerState::Exiting);
            debug!(
                "Capture worker exited after {} frames",
                ctx.shared.frames_captured()
            );
        }
        Err(e) => {
            error!("Capture worker faulted: {}", e);
            *ctx.shared.fault.lock() = Some(e.clone());
            ctx.shared.set_state(WorkerState::Faulted);
        }
    }

    (driver, result)
}

impl WorkerContext {
    fn exit_requested(&self) -> bool {
        self.shared.signals.exit_requested()
    }

    fn capture_loop<D: CaptureDriver>(&self, driver: &mut D) -> Result<(), CameraError> {
        let mut sequence = 0u64;

        loop {
            if self.exit_requested() {
                return Ok(());
            }
            self.shared.set_state(WorkerState::Idle);

            // flags first: a change racing the snapshot stays flagged
            let mode_changed = self.settings.take_mode_dirty();
            let controls_changed = self.settings.take_controls_dirty();
            let snapshot = self.settings.snapshot();
            let mode = snapshot.mode.ok_or(CameraError::NoModes)?;

            let reconfigure = mode_changed || self.restart_each_exposure;
            if reconfigure {
                self.shared.set_state(WorkerState::Configuring);
                if driver.is_started() {
                    driver.stop()?;
                }
                driver.configure(&mode, !self.restart_each_exposure)?;
                if mode_changed {
                    info!("Camera configured for {}", mode.label);
                }
            }

            if controls_changed || reconfigure {
                driver.set_controls(&snapshot.controls)?;
                debug!(
                    "Controls applied: {}us gain {:.2}",
                    snapshot.controls.exposure_time_us, snapshot.controls.analogue_gain
                );
            }

            if !driver.is_started() {
                driver.start()?;
                self.shared.set_state(WorkerState::Streaming);
            }

            if self.exit_requested() {
                return Ok(());
            }

            self.shared.set_state(WorkerState::Exposing);
            let exposure = Duration::from_micros(snapshot.controls.exposure_time_us);
            let deadline = Instant::now() + exposure;
            let job = driver.submit(CompletionNotifier::new(Arc::clone(&self.shared.signals)))?;

            if !self.wait_for_exposure(&job, deadline) {
                return Ok(());
            }

            self.shared.set_state(WorkerState::Draining);
            let capture = match self.fetch(driver, &job, deadline)? {
                Some(capture) => capture,
                None => return Ok(()),
            };

            if self.exit_requested() {
                return Ok(());
            }

            if self.restart_each_exposure {
                driver.stop()?;
            }

            sequence += 1;
            self.deliver(self.build_frame(&mode, capture, sequence));
        }
    }

    /// Sleep in poll-period slices until the exposure is about to end or the
    /// driver signalled completion. False if exit was requested.
    fn wait_for_exposure(&self, job: &CaptureJob, deadline: Instant) -> bool {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining <= self.poll_period {
                return !self.exit_requested();
            }
            let slice = self.poll_period.min(remaining - self.poll_period);
            match self.shared.signals.wait_capture_or_exit(job.id(), slice) {
                Wake::Exit => return false,
                Wake::CaptureDone => return true,
                Wake::Timeout => {}
            }
        }
    }

    /// Blocking fetch in poll-period slices. `None` if exit was requested.
    fn fetch<D: CaptureDriver>(
        &self,
        driver: &mut D,
        job: &CaptureJob,
        deadline: Instant,
    ) -> Result<Option<RawCapture>, CameraError> {
        let give_up = deadline + self.capture_grace;
        let submitted_wait = Instant::now();

        loop {
            if self.exit_requested() {
                return Ok(None);
            }
            if let Some(capture) = driver.wait(job, self.poll_period)? {
                return Ok(Some(capture));
            }
            if Instant::now() >= give_up {
                return Err(CameraError::CaptureTimeout {
                    waited_ms: submitted_wait.elapsed().as_millis() as u64,
                });
            }
        }
    }

    fn build_frame(&self, mode: &SensorMode, capture: RawCapture, sequence: u64) -> CapturedFrame {
        let metadata = FrameMetadata {
            sequence,
            exposure_time_us: capture.exposure_time_us,
            analogue_gain: capture.analogue_gain,
            black_levels: capture.black_levels,
            binning: mode.binning,
            end_of_exposure: capture.end_of_exposure,
            frame_type: self.recorder.frame_type(),
            camera_model: self.camera_model.clone(),
            pixel_size_nm: self.pixel_size_nm,
        };

        let frame = CapturedFrame::new(
            mode.size.0,
            mode.size.1,
            mode.encoding,
            capture.data,
            metadata,
        );
        if !frame.validate_size() {
            warn!(
                "Frame {} has {} bytes, expected {} for {}",
                sequence,
                frame.data.len(),
                frame.expected_size(),
                mode.label
            );
        }
        frame
    }

    /// Recorder first, then the preview consumer if it asked for a frame
    fn deliver(&self, frame: CapturedFrame) {
        let frame = Arc::new(frame);
        debug!(
            "Frame {} captured ({}us)",
            frame.metadata.sequence, frame.metadata.exposure_time_us
        );

        let recording = self.recorder.admit(&frame);
        self.shared.frames_captured.fetch_add(1, Ordering::Relaxed);

        if !self.shared.signals.take_frame_request() {
            return;
        }

        match self.preview_tx.try_send(PreviewFrame { frame, recording }) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) => {
                debug!(
                    "Preview slot occupied, frame {} not delivered",
                    dropped.frame.metadata.sequence
                );
            }
            Err(TrySendError::Disconnected(_)) => {
                trace!("Preview consumer gone");
            }
        }
    }
}
