use crate::error::RecordingError;
use crate::frame::{CapturedFrame, FrameMetadata, RawEncoding};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Magic number of the raw frame format: "LCAP"
const FRAME_MAGIC: [u8; 4] = *b"LCAP";
const FRAME_VERSION: u32 = 1;
/// magic + version + header length
const FRAME_PREAMBLE_SIZE: usize = 12;

/// Serializer used by the recording gate.
pub trait FrameSink: Send + Sync {
    /// File extension including the leading dot
    fn extension(&self) -> &str;

    /// Serialized size of `frame` in bytes
    fn estimate_size(&self, frame: &CapturedFrame, comment: &str) -> u64;

    fn save(&self, frame: &CapturedFrame, comment: &str, path: &Path)
        -> Result<(), RecordingError>;
}

/// JSON header stored in front of the pixels
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FrameHeader {
    width: u32,
    height: u32,
    encoding: RawEncoding,
    comment: String,
    metadata: FrameMetadata,
}

/// A frame loaded back from disk
#[derive(Debug, Clone)]
pub struct StoredFrame {
    pub frame: CapturedFrame,
    pub comment: String,
}

/// Self-describing raw frame files (`.lcf`).
///
/// Layout: `LCAP`, u32 version, u32 header length (all little-endian), JSON
/// header, pixel bytes exactly as captured.
#[derive(Debug, Clone, Default)]
pub struct RawFrameSink;

impl RawFrameSink {
    pub fn new() -> Self {
        Self
    }

    fn header_bytes(frame: &CapturedFrame, comment: &str) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&FrameHeader {
            width: frame.width,
            height: frame.height,
            encoding: frame.encoding,
            comment: comment.to_string(),
            metadata: frame.metadata.clone(),
        })
    }
}

impl FrameSink for RawFrameSink {
    fn extension(&self) -> &str {
        ".lcf"
    }

    fn estimate_size(&self, frame: &CapturedFrame, comment: &str) -> u64 {
        let header = Self::header_bytes(frame, comment)
            .map(|h| h.len())
            .unwrap_or(0);
        (FRAME_PREAMBLE_SIZE + header + frame.data.len()) as u64
    }

    fn save(
        &self,
        frame: &CapturedFrame,
        comment: &str,
        path: &Path,
    ) -> Result<(), RecordingError> {
        let persist = |source: std::io::Error| RecordingError::Persist {
            path: path.to_path_buf(),
            source,
        };

        let header = Self::header_bytes(frame, comment)
            .map_err(|e| persist(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;

        let file = File::create(path).map_err(persist)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&FRAME_MAGIC).map_err(persist)?;
        writer
            .write_all(&FRAME_VERSION.to_le_bytes())
            .map_err(persist)?;
        writer
            .write_all(&(header.len() as u32).to_le_bytes())
            .map_err(persist)?;
        writer.write_all(&header).map_err(persist)?;
        writer.write_all(&frame.data).map_err(persist)?;
        writer.flush().map_err(persist)?;

        debug!(
            "Wrote frame {} ({} bytes) to {}",
            frame.metadata.sequence,
            FRAME_PREAMBLE_SIZE + header.len() + frame.data.len(),
            path.display()
        );
        Ok(())
    }
}

/// Load a frame written by [`RawFrameSink`]
pub fn read_frame(path: &Path) -> Result<StoredFrame, RecordingError> {
    let invalid = |details: String| RecordingError::InvalidFile {
        path: path.to_path_buf(),
        details,
    };

    let mut file = File::open(path).map_err(|e| invalid(e.to_string()))?;
    let mut bytes = Vec::with_capacity(fs::metadata(path).map(|m| m.len() as usize).unwrap_or(0));
    file.read_to_end(&mut bytes)
        .map_err(|e| invalid(e.to_string()))?;

    if bytes.len() < FRAME_PREAMBLE_SIZE || bytes[..4] != FRAME_MAGIC {
        return Err(invalid("bad magic".to_string()));
    }

    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version != FRAME_VERSION {
        return Err(invalid(format!("unsupported version {}", version)));
    }

    let header_len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
    let pixels_start = FRAME_PREAMBLE_SIZE + header_len;
    if bytes.len() < pixels_start {
        return Err(invalid("truncated header".to_string()));
    }

    let header: FrameHeader = serde_json::from_slice(&bytes[FRAME_PREAMBLE_SIZE..pixels_start])
        .map_err(|e| invalid(format!("bad header: {}", e)))?;

    let frame = CapturedFrame {
        width: header.width,
        height: header.height,
        encoding: header.encoding,
        data: Arc::new(bytes[pixels_start..].to_vec()),
        metadata: header.metadata,
    };

    if !frame.validate_size() {
        return Err(invalid(format!(
            "expected {} pixel bytes, found {}",
            frame.expected_size(),
            frame.data.len()
        )));
    }

    Ok(StoredFrame {
        frame,
        comment: header.comment,
    })
}
