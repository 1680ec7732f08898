pub mod app;
pub mod auto_exposure;
pub mod camera;
pub mod config;
pub mod error;
pub mod frame;
pub mod recording;
pub mod settings;

pub use app::{LuckycamOrchestrator, RunOptions, RunSummary, ShutdownReason};
pub use auto_exposure::{AutoExposureController, ExposureStep};
pub use camera::{
    CameraControl, CaptureDriver, CompletionBehavior, PreviewFrame, RestartPolicy, SensorMode,
    SimulatedDriver, WorkerState,
};
pub use config::LuckycamConfig;
pub use error::{CameraError, LuckycamError, RecordingError, Result};
pub use frame::{CapturedFrame, FrameMetadata, FrameType, RawEncoding};
pub use recording::{RecordingGate, RecordingSettings, RecordingStatus};
pub use settings::{ExposureControls, SettingsSnapshot, SettingsStore};
