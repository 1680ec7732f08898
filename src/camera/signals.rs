use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Flags {
    exit: bool,
    /// Id of the last job the driver reported finished
    completed_job: Option<u64>,
    frame_requested: bool,
}

/// Why [`WorkerSignals::wait_capture_or_exit`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    Exit,
    CaptureDone,
    Timeout,
}

/// Edge-triggered handshake flags shared between the capture worker, the
/// driver's completion callback and the session owner.
///
/// All flags live behind one mutex with one condvar, so a single wait
/// observes both an exit request and a finished capture.
#[derive(Debug, Default)]
pub struct WorkerSignals {
    flags: Mutex<Flags>,
    wake: Condvar,
}

impl WorkerSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_exit(&self) {
        self.flags.lock().exit = true;
        self.wake.notify_all();
    }

    pub fn exit_requested(&self) -> bool {
        self.flags.lock().exit
    }

    pub fn notify_capture_done(&self, job: u64) {
        self.flags.lock().completed_job = Some(job);
        self.wake.notify_all();
    }

    pub fn capture_done(&self, job: u64) -> bool {
        self.flags.lock().completed_job == Some(job)
    }

    /// Arm the preview rendezvous for exactly one frame
    pub fn request_frame(&self) {
        self.flags.lock().frame_requested = true;
    }

    pub fn frame_requested(&self) -> bool {
        self.flags.lock().frame_requested
    }

    /// Read and clear the preview arming flag
    pub fn take_frame_request(&self) -> bool {
        std::mem::take(&mut self.flags.lock().frame_requested)
    }

    /// Block until exit is requested, `job` finished, or `timeout` elapsed.
    /// Exit wins over a finished capture; completions of other jobs are
    /// ignored.
    pub fn wait_capture_or_exit(&self, job: u64, timeout: Duration) -> Wake {
        let deadline = Instant::now() + timeout;
        let mut flags = self.flags.lock();
        loop {
            if flags.exit {
                return Wake::Exit;
            }
            if flags.completed_job == Some(job) {
                return Wake::CaptureDone;
            }
            if self.wake.wait_until(&mut flags, deadline).timed_out() {
                return if flags.exit {
                    Wake::Exit
                } else if flags.completed_job == Some(job) {
                    Wake::CaptureDone
                } else {
                    Wake::Timeout
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_wait_times_out_without_signal() {
        let signals = WorkerSignals::new();
        let start = Instant::now();
        assert_eq!(
            signals.wait_capture_or_exit(1, Duration::from_millis(20)),
            Wake::Timeout
        );
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_exit_wakes_waiter_immediately() {
        let signals = Arc::new(WorkerSignals::new());
        let waiter = {
            let signals = Arc::clone(&signals);
            thread::spawn(move || {
                let start = Instant::now();
                let wake = signals.wait_capture_or_exit(1, Duration::from_secs(10));
                (wake, start.elapsed())
            })
        };

        thread::sleep(Duration::from_millis(20));
        signals.request_exit();

        let (wake, elapsed) = waiter.join().unwrap();
        assert_eq!(wake, Wake::Exit);
        assert!(elapsed < Duration::from_secs(2));
    }

    #[test]
    fn test_capture_done_matches_job() {
        let signals = WorkerSignals::new();
        signals.notify_capture_done(1);
        assert_eq!(
            signals.wait_capture_or_exit(1, Duration::from_millis(1)),
            Wake::CaptureDone
        );
        assert!(signals.capture_done(1));
        assert!(!signals.capture_done(2));
    }

    #[test]
    fn test_late_completion_of_previous_job_ignored() {
        let signals = Arc::new(WorkerSignals::new());
        let waiter = {
            let signals = Arc::clone(&signals);
            thread::spawn(move || {
                let start = Instant::now();
                let wake = signals.wait_capture_or_exit(2, Duration::from_millis(150));
                (wake, start.elapsed())
            })
        };

        thread::sleep(Duration::from_millis(20));
        signals.notify_capture_done(1);

        let (wake, elapsed) = waiter.join().unwrap();
        assert_eq!(wake, Wake::Timeout);
        assert!(elapsed >= Duration::from_millis(150));

        signals.notify_capture_done(2);
        assert_eq!(
            signals.wait_capture_or_exit(2, Duration::from_millis(1)),
            Wake::CaptureDone
        );
    }

    #[test]
    fn test_frame_request_take_and_clear() {
        let signals = WorkerSignals::new();
        assert!(!signals.take_frame_request());
        signals.request_frame();
        assert!(signals.frame_requested());
        assert!(signals.take_frame_request());
        assert!(!signals.take_frame_request());
    }
}
