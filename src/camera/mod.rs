mod driver;
mod modes;
mod quirks;
mod session;
mod signals;
mod simulated;
mod worker;

pub use driver::{
    CameraProperties, CaptureDriver, CaptureJob, CompletionNotifier, ControlLimits,
    DriverSensorMode, RawCapture,
};
pub use modes::{enumerate_modes, SensorMode, FALLBACK_MAX_EXPOSURE_US, FALLBACK_MAX_GAIN};
pub use quirks::{
    adjust_geometry, known_geometry, needs_restart, GeometryAdjustment, RestartPolicy,
};
pub use session::CameraControl;
pub use signals::{Wake, WorkerSignals};
pub use simulated::{CompletionBehavior, DriverCounters, Scene, SimulatedDriver};
pub use worker::{PreviewFrame, WorkerState};
