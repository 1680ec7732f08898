use super::modes::SensorMode;
use super::signals::WorkerSignals;
use crate::error::CameraError;
use crate::settings::ExposureControls;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Static properties of an opened camera
#[derive(Debug, Clone, PartialEq)]
pub struct CameraProperties {
    /// Sensor model name (e.g. `imx477`)
    pub model: String,
    /// Physical pixel pitch in nanometres, if the driver knows it
    pub unit_cell_size_nm: Option<(f64, f64)>,
    pub pixel_array_size: (u32, u32),
}

/// A raw mode exactly as the driver lists it, before filtering
#[derive(Debug, Clone, PartialEq)]
pub struct DriverSensorMode {
    pub size: (u32, u32),
    /// Encoding tag, usually packed (e.g. `SRGGB12_CSI2P`)
    pub format: String,
    /// Unpacked alternative of `format`, when the driver offers one
    pub unpacked: Option<String>,
    pub bit_depth: u8,
}

/// Control limits for the currently configured mode. `None` when unknown.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ControlLimits {
    pub exposure_us: (Option<u64>, Option<u64>),
    pub gain: (Option<f64>, Option<f64>),
}

/// Opaque handle of a submitted exposure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureJob {
    id: u64,
}

impl CaptureJob {
    pub fn new(id: u64) -> Self {
        Self { id }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Pixels and metadata of a finished exposure
#[derive(Debug, Clone)]
pub struct RawCapture {
    pub data: Vec<u8>,
    pub exposure_time_us: u64,
    pub analogue_gain: f64,
    pub black_levels: Vec<u32>,
    pub end_of_exposure: DateTime<Utc>,
}

/// Handed to the driver with every submitted exposure; the driver calls
/// [`CompletionNotifier::notify`] with the job it returned from `submit`,
/// from its own callback context, once the exposure has finished.
#[derive(Clone)]
pub struct CompletionNotifier {
    signals: Arc<WorkerSignals>,
}

impl CompletionNotifier {
    pub fn new(signals: Arc<WorkerSignals>) -> Self {
        Self { signals }
    }

    pub fn notify(&self, job: CaptureJob) {
        self.signals.notify_capture_done(job.id());
    }
}

/// Hardware capture driver.
///
/// The capture worker is the only caller once a session is running, so
/// implementations need to be `Send` but not `Sync`.
pub trait CaptureDriver: Send + 'static {
    fn properties(&self) -> CameraProperties;

    fn sensor_modes(&self) -> Result<Vec<DriverSensorMode>, CameraError>;

    /// Configure the raw stream for `mode`. `queued` enables frame queueing
    /// (two buffers) so consecutive exposures need no restart.
    fn configure(&mut self, mode: &SensorMode, queued: bool) -> Result<(), CameraError>;

    fn control_limits(&self) -> ControlLimits;

    fn set_controls(&mut self, controls: &ExposureControls) -> Result<(), CameraError>;

    fn start(&mut self) -> Result<(), CameraError>;

    fn stop(&mut self) -> Result<(), CameraError>;

    fn is_started(&self) -> bool;

    /// Submit an exposure without blocking
    fn submit(&mut self, notifier: CompletionNotifier) -> Result<CaptureJob, CameraError>;

    /// Block up to `timeout` for the result of `job`; `Ok(None)` if it is not
    /// finished yet.
    fn wait(
        &mut self,
        job: &CaptureJob,
        timeout: Duration,
    ) -> Result<Option<RawCapture>, CameraError>;

    fn close(&mut self) -> Result<(), CameraError>;
}
