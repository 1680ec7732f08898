use super::LuckycamOrchestrator;
use crate::camera::CaptureDriver;
use tracing::{error, info};

impl<D: CaptureDriver> LuckycamOrchestrator<D> {
    /// Stop recording and close the camera. Returns the process exit code.
    pub fn shutdown(&mut self) -> i32 {
        info!("Beginning graceful shutdown");
        self.cancellation_token.cancel();
        self.stop_recording();

        let mut exit_code = 0;
        if let Some(fault) = self.camera.fault() {
            error!("Camera faulted: {}", fault);
            exit_code = 1;
        }

        if self.camera.is_open() {
            if let Err(e) = self.camera.close() {
                error!("Error closing camera: {}", e);
                exit_code = 1;
            }
        }

        info!("Graceful shutdown completed with exit code: {}", exit_code);
        exit_code
    }
}
