/// Why the capture loop ended
#[derive(Debug, Clone, PartialEq)]
pub enum ShutdownReason {
    Signal(String),
    /// The requested number of frames was processed
    FrameLimit,
    RecordingFinished,
    /// The camera session faulted
    Fault(String),
}

/// Limits for one [`run`](super::LuckycamOrchestrator::run) of the capture loop
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Stop after this many preview frames
    pub max_frames: Option<u64>,
    /// Stop once a recording run completed
    pub stop_after_recording: bool,
}

/// What happened during a run
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub reason: ShutdownReason,
    /// Preview frames processed
    pub frames: u64,
    /// Frames persisted by the recording gate in the last run
    pub recorded: u32,
    pub final_exposure_us: u64,
    pub auto_exposure_iterations: u32,
}
