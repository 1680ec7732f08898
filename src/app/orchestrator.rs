use super::types::ShutdownReason;
use crate::auto_exposure::{AutoExposureController, ExposureStep};
use crate::camera::{CameraControl, CaptureDriver, PreviewFrame, SensorMode};
use crate::config::LuckycamConfig;
use crate::error::Result;
use crate::recording::{RecordingGate, RecordingSettings};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Application loop around one camera: feeds preview frames through the
/// auto-exposure controller and back into the settings store, and drives
/// recording runs.
pub struct LuckycamOrchestrator<D: CaptureDriver> {
    pub(super) config: LuckycamConfig,
    pub(super) camera: CameraControl<D>,
    pub(super) auto_exposure: AutoExposureController,
    pub(super) auto_exposure_enabled: bool,

    // Lifecycle management
    pub(super) shutdown_sender: Option<oneshot::Sender<ShutdownReason>>,
    pub(super) shutdown_receiver: Option<oneshot::Receiver<ShutdownReason>>,
    pub(super) cancellation_token: CancellationToken,
}

impl<D: CaptureDriver> LuckycamOrchestrator<D> {
    pub fn new(config: LuckycamConfig) -> Self {
        let recorder = RecordingGate::new(RecordingSettings::from(&config.recording));
        let camera = CameraControl::new(config.camera.clone(), recorder);
        let auto_exposure = AutoExposureController::new(config.auto_exposure.clone());
        let (shutdown_sender, shutdown_receiver) = oneshot::channel();

        Self {
            config,
            camera,
            auto_exposure,
            auto_exposure_enabled: false,
            shutdown_sender: Some(shutdown_sender),
            shutdown_receiver: Some(shutdown_receiver),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Open the camera session on `driver`
    pub fn open(&mut self, driver: D) -> Result<()> {
        self.camera.open(driver)?;
        Ok(())
    }

    pub fn camera(&self) -> &CameraControl<D> {
        &self.camera
    }

    pub fn config(&self) -> &LuckycamConfig {
        &self.config
    }

    /// Token that stops [`run`](Self::run) when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    pub fn modes(&self) -> Vec<SensorMode> {
        self.camera.settings().modes()
    }

    pub fn select_mode(&mut self, index: usize) -> Result<()> {
        if self.camera.settings().select_mode(index)? {
            info!("Switched to raw mode {}", index);
            // the converged exposure belongs to the previous mode
            if self.auto_exposure_enabled {
                self.auto_exposure.reset();
            }
        }
        Ok(())
    }

    pub fn set_exposure_time(&self, seconds: f64) {
        let settings = self.camera.settings();
        settings.set_exposure_time(seconds);
        info!("Exposure time set to {}us", settings.exposure_time_us());
    }

    pub fn set_gain(&self, gain: f64) {
        let settings = self.camera.settings();
        settings.set_gain(gain);
        info!("Analogue gain set to {:.2}", settings.gain());
    }

    /// Turning auto-exposure on starts a fresh optimisation run
    pub fn set_auto_exposure(&mut self, enabled: bool) {
        if enabled {
            self.auto_exposure.reset();
        }
        self.auto_exposure_enabled = enabled;
        info!(
            "Auto exposure {}",
            if enabled { "enabled" } else { "disabled" }
        );
    }

    pub fn auto_exposure_enabled(&self) -> bool {
        self.auto_exposure_enabled
    }

    pub fn start_recording(&self) {
        self.camera.recorder().start();
    }

    pub fn stop_recording(&self) {
        self.camera.recorder().stop();
    }

    /// Route one preview frame: auto-exposure feedback and capacity checks
    pub fn handle_frame(&mut self, preview: &PreviewFrame) -> Option<ExposureStep> {
        let status = &preview.recording;
        if let Some(path) = &status.saved_path {
            info!(
                "Recorded frame {} to {} ({} free frames)",
                status.recorded,
                path.display(),
                status.disk_free_frames
            );
        }
        if self.camera.recorder().is_recording() && status.disk_free_frames == 0 {
            warn!("Recording volume is full ({} bytes free)", status.disk_free_bytes);
        }

        if !self.auto_exposure_enabled {
            return None;
        }

        let settings = self.camera.settings();
        let limits = settings.exposure_limits()?;
        let frame = &preview.frame;
        let step = self.auto_exposure.step(
            &frame.pixels(),
            frame.encoding.bit_depth(),
            frame.metadata.exposure_seconds(),
            limits,
        );

        if step.finished {
            info!(
                "Auto exposure finished at {}us",
                settings.exposure_time_us()
            );
            self.auto_exposure_enabled = false;
        } else {
            settings.set_exposure_time(step.exposure_time);
        }

        Some(step)
    }
}
