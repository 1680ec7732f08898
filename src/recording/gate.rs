use super::disk::disk_free_bytes;
use super::sink::{FrameSink, RawFrameSink};
use crate::config::RecordingConfig;
use crate::error::RecordingError;
use crate::frame::{CapturedFrame, FrameType};
use chrono::Local;
use parking_lot::Mutex;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

/// Where and how much to record
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingSettings {
    pub folder: PathBuf,
    pub prefix: String,
    pub comment: String,
    pub frame_type: FrameType,
    pub frames_to_record: u32,
}

impl From<&RecordingConfig> for RecordingSettings {
    fn from(config: &RecordingConfig) -> Self {
        Self {
            folder: config.folder.clone(),
            prefix: config.prefix.clone(),
            comment: config.comment.clone(),
            frame_type: config.frame_type,
            frames_to_record: config.frames_to_record,
        }
    }
}

/// Result of offering one frame to the gate
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordingStatus {
    /// Frames recorded in the current run
    pub recorded: u32,
    /// Where this frame was written, if it was
    pub saved_path: Option<PathBuf>,
    /// This frame completed the run
    pub finished: bool,
    pub disk_free_bytes: u64,
    /// Frames of this size that still fit on the volume
    pub disk_free_frames: u64,
    pub last_error: Option<String>,
}

#[derive(Debug)]
struct GateState {
    settings: RecordingSettings,
    armed: bool,
    recorded: u32,
    /// Writes admitted but not yet committed
    in_flight: u32,
    /// Bumped by `start`, so writes from a previous run are not counted
    generation: u64,
    finished_latch: bool,
}

/// Admission and bookkeeping for a bounded recording run.
///
/// Counters are only touched under the state lock; the frame itself is
/// written with the lock released.
pub struct RecordingGate {
    sink: Box<dyn FrameSink>,
    state: Mutex<GateState>,
}

impl RecordingGate {
    pub fn new(settings: RecordingSettings) -> Self {
        Self::with_sink(settings, Box::new(RawFrameSink::new()))
    }

    pub fn with_sink(settings: RecordingSettings, sink: Box<dyn FrameSink>) -> Self {
        Self {
            sink,
            state: Mutex::new(GateState {
                settings,
                armed: false,
                recorded: 0,
                in_flight: 0,
                generation: 0,
                finished_latch: false,
            }),
        }
    }

    pub fn configure(&self, settings: RecordingSettings) {
        debug!("Recording configured: {:?}", settings);
        self.state.lock().settings = settings;
    }

    pub fn settings(&self) -> RecordingSettings {
        self.state.lock().settings.clone()
    }

    pub fn frame_type(&self) -> FrameType {
        self.state.lock().settings.frame_type
    }

    /// Reset the counter and arm recording
    pub fn start(&self) {
        let mut state = self.state.lock();
        state.recorded = 0;
        state.in_flight = 0;
        state.generation += 1;
        state.finished_latch = false;
        state.armed = true;
        info!(
            "Recording {} frames to {}",
            state.settings.frames_to_record,
            state.settings.folder.display()
        );
    }

    pub fn stop(&self) {
        let mut state = self.state.lock();
        if state.armed {
            info!("Recording stopped after {} frames", state.recorded);
        }
        state.armed = false;
    }

    pub fn is_recording(&self) -> bool {
        self.state.lock().armed
    }

    pub fn recorded(&self) -> u32 {
        self.state.lock().recorded
    }

    /// True once after a run reached its target
    pub fn take_finished(&self) -> bool {
        std::mem::take(&mut self.state.lock().finished_latch)
    }

    /// Persist `frame` if a run is active and not complete, and report the
    /// remaining capacity either way.
    pub fn admit(&self, frame: &CapturedFrame) -> RecordingStatus {
        let (settings, ticket) = {
            let mut state = self.state.lock();
            let admitted =
                state.armed && state.recorded + state.in_flight < state.settings.frames_to_record;
            if admitted {
                state.in_flight += 1;
            }
            (state.settings.clone(), admitted.then_some(state.generation))
        };

        let mut status = RecordingStatus::default();

        if let Some(generation) = ticket {
            let outcome = std::fs::create_dir_all(&settings.folder)
                .map_err(|source| RecordingError::Persist {
                    path: settings.folder.clone(),
                    source,
                })
                .and_then(|_| {
                    let path = self.next_path(&settings);
                    self.sink
                        .save(frame, &settings.comment, &path)
                        .map(|_| path)
                });

            let mut state = self.state.lock();
            let current = state.generation == generation;
            if current {
                state.in_flight = state.in_flight.saturating_sub(1);
            }

            match outcome {
                Ok(path) if current => {
                    state.recorded += 1;
                    status.saved_path = Some(path);
                    if state.recorded >= state.settings.frames_to_record && state.armed {
                        state.armed = false;
                        state.finished_latch = true;
                        status.finished = true;
                        info!("Recording finished: {} frames", state.recorded);
                    }
                }
                Ok(path) => {
                    debug!("Discarding count for {} from a previous run", path.display());
                }
                Err(e) => {
                    error!("Failed to record frame {}: {}", frame.metadata.sequence, e);
                    status.last_error = Some(e.to_string());
                }
            }
        }

        status.recorded = self.recorded();

        status.disk_free_bytes = match disk_free_bytes(&settings.folder) {
            Ok(free) => free,
            Err(e) => {
                warn!("{}", e);
                0
            }
        };
        let frame_size = self.sink.estimate_size(frame, &settings.comment);
        status.disk_free_frames = if frame_size > 0 {
            status.disk_free_bytes / frame_size
        } else {
            0
        };

        status
    }

    /// `<folder>/<prefix>-<yymmddTHHMMSSmmm><ext>`, with a numeric suffix if
    /// two frames land in the same millisecond
    fn next_path(&self, settings: &RecordingSettings) -> PathBuf {
        let stamp = Local::now().format("%y%m%dT%H%M%S%3f").to_string();
        let ext = self.sink.extension();
        let base = format!("{}-{}", settings.prefix, stamp);

        let mut path = settings.folder.join(format!("{}{}", base, ext));
        let mut n = 1;
        while path.exists() {
            path = settings.folder.join(format!("{}_{}{}", base, n, ext));
            n += 1;
        }
        path
    }
}
