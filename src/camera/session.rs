use super::driver::{CameraProperties, CaptureDriver};
use super::modes::enumerate_modes;
use super::quirks::needs_restart;
use super::worker::{self, PreviewFrame, WorkerContext, WorkerShared, WorkerState};
use crate::config::CameraConfig;
use crate::error::CameraError;
use crate::recording::RecordingGate;
use crate::settings::SettingsStore;
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info, warn};

type WorkerHandle<D> = JoinHandle<(D, Result<(), CameraError>)>;

struct ActiveSession<D: CaptureDriver> {
    properties: CameraProperties,
    restart_each_exposure: bool,
    pixel_size_nm: (f64, f64),
    shared: Arc<WorkerShared>,
    preview_rx: Receiver<PreviewFrame>,
    handle: WorkerHandle<D>,
}

/// Owner of one camera session: opens a driver, runs the capture worker on
/// its own thread and closes everything down in order.
///
/// The settings store and recording gate outlive sessions; they are shared
/// with the worker while a session is open.
pub struct CameraControl<D: CaptureDriver> {
    config: CameraConfig,
    settings: Arc<SettingsStore>,
    recorder: Arc<RecordingGate>,
    session: Option<ActiveSession<D>>,
}

impl<D: CaptureDriver> CameraControl<D> {
    pub fn new(config: CameraConfig, recorder: RecordingGate) -> Self {
        Self {
            config,
            settings: Arc::new(SettingsStore::new()),
            recorder: Arc::new(recorder),
            session: None,
        }
    }

    /// Enumerate the driver's raw modes, select the first one and start
    /// capturing.
    pub fn open(&mut self, mut driver: D) -> Result<(), CameraError> {
        if self.session.is_some() {
            return Err(CameraError::AlreadyOpen);
        }

        let properties = driver.properties();
        info!("Opening camera {} ({})", self.config.index, properties.model);

        let modes = match enumerate_modes(&mut driver, self.config.hardware_adjustments) {
            Ok(modes) if !modes.is_empty() => modes,
            Ok(_) => {
                let _ = driver.close();
                return Err(CameraError::NoModes);
            }
            Err(e) => {
                let _ = driver.close();
                return Err(e);
            }
        };
        self.settings.set_modes(modes);

        let restart_each_exposure = needs_restart(&properties.model, self.config.restart_policy);
        if restart_each_exposure {
            info!(
                "{} needs a stream restart around every exposure",
                properties.model
            );
        }

        let pixel_size_nm = match properties.unit_cell_size_nm {
            Some(size) if !self.config.force_pixel_size => size,
            _ => self.config.pixel_size_nm,
        };

        let shared = Arc::new(WorkerShared::new());
        let (preview_tx, preview_rx) = bounded(1);
        let ctx = WorkerContext {
            settings: Arc::clone(&self.settings),
            recorder: Arc::clone(&self.recorder),
            shared: Arc::clone(&shared),
            preview_tx,
            restart_each_exposure,
            poll_period: self.config.poll_period(),
            capture_grace: self.config.capture_grace(),
            camera_model: properties.model.clone(),
            pixel_size_nm,
        };

        let handle = thread::Builder::new()
            .name("luckycam-capture".to_string())
            .spawn(move || worker::run(driver, ctx))
            .map_err(|e| CameraError::driver(format!("failed to spawn capture worker: {}", e)))?;

        self.session = Some(ActiveSession {
            properties,
            restart_each_exposure,
            pixel_size_nm,
            shared,
            preview_rx,
            handle,
        });

        Ok(())
    }

    /// Stop the worker, join it and only then close the driver.
    pub fn close(&mut self) -> Result<(), CameraError> {
        let session = self.session.take().ok_or(CameraError::NotOpen)?;
        info!("Closing camera {}", session.properties.model);

        session.shared.signals.request_exit();
        let joined = session.handle.join();
        self.settings.reset();

        match joined {
            Ok((mut driver, result)) => {
                if let Err(e) = result {
                    warn!("Camera closed after fault: {}", e);
                }
                driver.close()
            }
            Err(_) => {
                error!("Capture worker panicked");
                Err(CameraError::WorkerPanicked)
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    pub fn settings(&self) -> Arc<SettingsStore> {
        Arc::clone(&self.settings)
    }

    pub fn recorder(&self) -> Arc<RecordingGate> {
        Arc::clone(&self.recorder)
    }

    pub fn properties(&self) -> Option<&CameraProperties> {
        self.session.as_ref().map(|s| &s.properties)
    }

    pub fn restarts_each_exposure(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.restart_each_exposure)
    }

    pub fn pixel_size_nm(&self) -> Option<(f64, f64)> {
        self.session.as_ref().map(|s| s.pixel_size_nm)
    }

    pub fn worker_state(&self) -> Option<WorkerState> {
        self.session.as_ref().map(|s| s.shared.state())
    }

    /// The hardware fault that ended the worker, if any
    pub fn fault(&self) -> Option<CameraError> {
        self.session.as_ref().and_then(|s| s.shared.fault())
    }

    pub fn frames_captured(&self) -> u64 {
        self.session
            .as_ref()
            .map_or(0, |s| s.shared.frames_captured())
    }

    /// Arm the preview rendezvous for the next captured frame
    pub fn request_frame(&self) -> Result<(), CameraError> {
        let session = self.session.as_ref().ok_or(CameraError::NotOpen)?;
        session.shared.signals.request_frame();
        Ok(())
    }

    /// Receiving end of the preview slot, for consumers that wait elsewhere
    pub fn preview_receiver(&self) -> Result<Receiver<PreviewFrame>, CameraError> {
        self.session
            .as_ref()
            .map(|s| s.preview_rx.clone())
            .ok_or(CameraError::NotOpen)
    }

    /// Request one frame and wait up to `timeout` for it.
    ///
    /// `Ok(None)` on timeout. Once the worker has stopped, returns its fault
    /// (or `NotOpen` if it exited cleanly).
    pub fn next_frame(&self, timeout: Duration) -> Result<Option<PreviewFrame>, CameraError> {
        let session = self.session.as_ref().ok_or(CameraError::NotOpen)?;
        session.shared.signals.request_frame();

        match session.preview_rx.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(session.shared.fault().unwrap_or(CameraError::NotOpen))
            }
        }
    }
}

impl<D: CaptureDriver> Drop for CameraControl<D> {
    fn drop(&mut self) {
        if self.is_open() {
            if let Err(e) = self.close() {
                warn!("Failed to close camera on drop: {}", e);
            }
        }
    }
}
