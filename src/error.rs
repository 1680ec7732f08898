use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LuckycamError {
    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("System error: {message}")]
    System { message: String },
}

/// Errors raised while talking to the sensor or driving the capture worker
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CameraError {
    #[error("Sensor mode index {index} out of range ({available} modes available)")]
    ModeOutOfRange { index: usize, available: usize },

    #[error("Unsupported raw encoding: {encoding}")]
    UnsupportedEncoding { encoding: String },

    #[error("Camera reports no usable raw modes")]
    NoModes,

    #[error("Camera is not open")]
    NotOpen,

    #[error("Camera is already open")]
    AlreadyOpen,

    #[error("Capture did not complete within {waited_ms}ms")]
    CaptureTimeout { waited_ms: u64 },

    #[error("Driver failure: {details}")]
    Driver { details: String },

    #[error("Capture worker panicked")]
    WorkerPanicked,
}

impl CameraError {
    pub fn driver<S: Into<String>>(details: S) -> Self {
        Self::Driver {
            details: details.into(),
        }
    }

    /// Hardware faults end the session; it must be closed and reopened.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::NotOpen | Self::CaptureTimeout { .. } | Self::Driver { .. } | Self::WorkerPanicked
        )
    }
}

/// Errors raised while persisting frames
#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("Failed to persist frame to {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid frame file {path}: {details}")]
    InvalidFile { path: PathBuf, details: String },

    #[error("Failed to query free space for {path}: {source}")]
    DiskQuery {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LuckycamError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    /// True when the error came from a hardware fault that ended the session
    pub fn is_fatal_camera_error(&self) -> bool {
        matches!(self, Self::Camera(e) if e.is_fatal())
    }
}

pub type Result<T> = std::result::Result<T, LuckycamError>;
