use super::*;
use crate::error::RecordingError;
use crate::frame::{encode_pixels, CapturedFrame, FrameMetadata, FrameType, RawEncoding};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn create_test_frame(sequence: u64) -> CapturedFrame {
    let encoding = RawEncoding::Mono { bits: 10 };
    let pixels: Vec<u16> = (0..16 * 8).map(|i| (i * 7 % 1024) as u16).collect();
    CapturedFrame::new(
        16,
        8,
        encoding,
        encode_pixels(encoding, &pixels),
        FrameMetadata {
            sequence,
            exposure_time_us: 50_000,
            analogue_gain: 2.0,
            black_levels: vec![4096],
            binning: (1, 1),
            end_of_exposure: Utc::now(),
            frame_type: FrameType::Dark,
            camera_model: "imx290".to_string(),
            pixel_size_nm: (2900.0, 2900.0),
        },
    )
}

fn create_test_settings(folder: &Path, frames: u32) -> RecordingSettings {
    RecordingSettings {
        folder: folder.to_path_buf(),
        prefix: "test".to_string(),
        comment: "M42 with 0.5 ND".to_string(),
        frame_type: FrameType::Dark,
        frames_to_record: frames,
    }
}

/// Counts saves and writes nothing
struct CountingSink {
    saves: Arc<AtomicUsize>,
}

impl FrameSink for CountingSink {
    fn extension(&self) -> &str {
        ".null"
    }

    fn estimate_size(&self, _frame: &CapturedFrame, _comment: &str) -> u64 {
        1024
    }

    fn save(
        &self,
        _frame: &CapturedFrame,
        _comment: &str,
        _path: &Path,
    ) -> Result<(), RecordingError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Blocks inside `save` until released, so writes stay in flight
struct BlockingSink {
    saves: Arc<AtomicUsize>,
    entered: crossbeam::channel::Sender<()>,
    release: crossbeam::channel::Receiver<()>,
}

impl FrameSink for BlockingSink {
    fn extension(&self) -> &str {
        ".null"
    }

    fn estimate_size(&self, _frame: &CapturedFrame, _comment: &str) -> u64 {
        1024
    }

    fn save(
        &self,
        _frame: &CapturedFrame,
        _comment: &str,
        _path: &Path,
    ) -> Result<(), RecordingError> {
        let _ = self.entered.send(());
        let _ = self.release.recv_timeout(Duration::from_secs(5));
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn create_blocking_gate(
    folder: &Path,
    frames: u32,
) -> (
    Arc<RecordingGate>,
    Arc<AtomicUsize>,
    crossbeam::channel::Receiver<()>,
    crossbeam::channel::Sender<()>,
) {
    let saves = Arc::new(AtomicUsize::new(0));
    let (entered_tx, entered_rx) = crossbeam::channel::unbounded();
    let (release_tx, release_rx) = crossbeam::channel::unbounded();
    let gate = RecordingGate::with_sink(
        create_test_settings(folder, frames),
        Box::new(BlockingSink {
            saves: Arc::clone(&saves),
            entered: entered_tx,
            release: release_rx,
        }),
    );
    (Arc::new(gate), saves, entered_rx, release_tx)
}

#[test]
fn test_records_exactly_target_frames() {
    let dir = tempfile::tempdir().unwrap();
    let gate = RecordingGate::new(create_test_settings(dir.path(), 3));
    gate.start();

    let mut finished = 0;
    let mut paths = Vec::new();
    for i in 0..3 {
        let status = gate.admit(&create_test_frame(i));
        if status.finished {
            finished += 1;
        }
        paths.push(status.saved_path.unwrap());
    }

    assert_eq!(gate.recorded(), 3);
    assert_eq!(finished, 1);
    assert!(!gate.is_recording());
    assert!(gate.take_finished());
    assert!(!gate.take_finished());

    let fourth = gate.admit(&create_test_frame(3));
    assert_eq!(fourth.saved_path, None);
    assert!(!fourth.finished);
    assert_eq!(fourth.recorded, 3);

    let files = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(files, 3);
    paths.sort();
    paths.dedup();
    assert_eq!(paths.len(), 3);
}

#[test]
fn test_disarmed_gate_only_reports_capacity() {
    let saves = Arc::new(AtomicUsize::new(0));
    let dir = tempfile::tempdir().unwrap();
    let gate = RecordingGate::with_sink(
        create_test_settings(dir.path(), 5),
        Box::new(CountingSink {
            saves: Arc::clone(&saves),
        }),
    );

    let status = gate.admit(&create_test_frame(0));
    assert_eq!(saves.load(Ordering::SeqCst), 0);
    assert_eq!(status.recorded, 0);
    assert!(status.disk_free_bytes > 0);
    assert_eq!(status.disk_free_frames, status.disk_free_bytes / 1024);
}

#[test]
fn test_restart_resets_counter() {
    let saves = Arc::new(AtomicUsize::new(0));
    let dir = tempfile::tempdir().unwrap();
    let gate = RecordingGate::with_sink(
        create_test_settings(dir.path(), 2),
        Box::new(CountingSink {
            saves: Arc::clone(&saves),
        }),
    );

    gate.start();
    gate.admit(&create_test_frame(0));
    gate.stop();
    assert_eq!(gate.recorded(), 1);
    assert!(gate.admit(&create_test_frame(1)).saved_path.is_none());

    gate.start();
    assert_eq!(gate.recorded(), 0);
    gate.admit(&create_test_frame(2));
    assert!(gate.admit(&create_test_frame(3)).finished);
    assert_eq!(saves.load(Ordering::SeqCst), 3);
}

#[test]
fn test_folder_created_on_demand() {
    let dir = tempfile::tempdir().unwrap();
    let folder = dir.path().join("night").join("m42");
    let gate = RecordingGate::new(create_test_settings(&folder, 1));
    gate.start();

    let status = gate.admit(&create_test_frame(0));
    let path = status.saved_path.unwrap();
    assert!(path.starts_with(&folder));
    let name = path.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("test-"));
    assert!(name.ends_with(".lcf"));
    // test-yymmddTHHMMSSmmm.lcf
    assert_eq!(name.len(), "test-".len() + 16 + ".lcf".len());
}

#[test]
fn test_persist_failure_is_reported_not_counted() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-folder");
    std::fs::write(&blocker, b"x").unwrap();

    let gate = RecordingGate::new(create_test_settings(&blocker, 2));
    gate.start();

    let status = gate.admit(&create_test_frame(0));
    assert!(status.last_error.is_some());
    assert_eq!(status.recorded, 0);
    assert!(gate.is_recording());
}

#[test]
fn test_raw_sink_reads_back() {
    let dir = tempfile::tempdir().unwrap();
    let path: PathBuf = dir.path().join("frame.lcf");
    let frame = create_test_frame(42);
    let sink = RawFrameSink::new();

    sink.save(&frame, "seeing 2\"", &path).unwrap();
    assert_eq!(
        std::fs::metadata(&path).unwrap().len(),
        sink.estimate_size(&frame, "seeing 2\"")
    );

    let stored = read_frame(&path).unwrap();
    assert_eq!(stored.comment, "seeing 2\"");
    assert_eq!(stored.frame.metadata, frame.metadata);
    assert_eq!(stored.frame.pixels(), frame.pixels());
}

#[test]
fn test_read_frame_rejects_foreign_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("junk.lcf");
    std::fs::write(&path, b"DCAM\x02\x00\x00\x00").unwrap();

    assert!(matches!(
        read_frame(&path),
        Err(RecordingError::InvalidFile { .. })
    ));
}

#[test]
fn test_concurrent_admits_never_exceed_target() {
    let dir = tempfile::tempdir().unwrap();
    let (gate, saves, entered, release) = create_blocking_gate(dir.path(), 3);
    gate.start();

    let handles: Vec<_> = (0..8)
        .map(|n| {
            let gate = Arc::clone(&gate);
            thread::spawn(move || gate.admit(&create_test_frame(n)))
        })
        .collect();

    // three writes are held inside the sink; nobody else may get a slot
    for _ in 0..3 {
        entered.recv_timeout(Duration::from_secs(5)).unwrap();
    }
    assert!(entered.recv_timeout(Duration::from_millis(100)).is_err());

    for _ in 0..8 {
        release.send(()).unwrap();
    }
    let statuses: Vec<RecordingStatus> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(saves.load(Ordering::SeqCst), 3);
    assert_eq!(gate.recorded(), 3);
    assert_eq!(statuses.iter().filter(|s| s.finished).count(), 1);
    assert_eq!(statuses.iter().filter(|s| s.saved_path.is_some()).count(), 3);
    assert!(gate.take_finished());
    assert!(!gate.take_finished());
    assert!(!gate.is_recording());
}

#[test]
fn test_write_from_previous_run_not_counted() {
    let dir = tempfile::tempdir().unwrap();
    let (gate, saves, entered, release) = create_blocking_gate(dir.path(), 1);
    gate.start();

    let stale = {
        let gate = Arc::clone(&gate);
        thread::spawn(move || gate.admit(&create_test_frame(1)))
    };
    entered.recv_timeout(Duration::from_secs(5)).unwrap();

    // restart while the first write is still in flight
    gate.start();
    release.send(()).unwrap();
    let status = stale.join().unwrap();

    assert_eq!(saves.load(Ordering::SeqCst), 1);
    assert!(status.saved_path.is_none());
    assert!(!status.finished);
    assert_eq!(gate.recorded(), 0);
    assert!(gate.is_recording());

    // the new run still gets its full target
    release.send(()).unwrap();
    let status = gate.admit(&create_test_frame(2));
    assert!(status.finished);
    assert_eq!(gate.recorded(), 1);
    assert_eq!(saves.load(Ordering::SeqCst), 2);
}
