mod disk;
mod gate;
mod sink;
#[cfg(test)]
mod tests;

pub use disk::disk_free_bytes;
pub use gate::{RecordingGate, RecordingSettings, RecordingStatus};
pub use sink::{read_frame, FrameSink, RawFrameSink, StoredFrame};
