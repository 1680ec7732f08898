use super::types::{RunOptions, RunSummary, ShutdownReason};
use super::LuckycamOrchestrator;
use crate::camera::CaptureDriver;
use crate::error::{LuckycamError, Result};
use crossbeam::channel::RecvTimeoutError;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Longest single wait for a preview frame before re-checking for shutdown
const PREVIEW_WAIT: Duration = Duration::from_secs(1);

impl<D: CaptureDriver> LuckycamOrchestrator<D> {
    /// Run the capture loop until a signal, cancellation, fault or one of the
    /// limits in `options`
    pub async fn run(&mut self, options: RunOptions) -> Result<RunSummary> {
        info!("Capture loop running");

        let mut shutdown_receiver =
            self.shutdown_receiver
                .take()
                .ok_or_else(|| LuckycamError::System {
                    message: "Shutdown receiver already taken".to_string(),
                })?;
        if let Some(sender) = self.shutdown_sender.take() {
            self.setup_signal_handlers(sender);
        }

        let token = self.cancellation_token.clone();
        let preview = self.camera.preview_receiver()?;
        let rearm_delay = Duration::from_millis(self.config.preview.rearm_delay_ms);
        let mut frames = 0u64;

        let reason = loop {
            self.camera.request_frame()?;
            let rx = preview.clone();
            let wait = tokio::task::spawn_blocking(move || rx.recv_timeout(PREVIEW_WAIT));

            let received = tokio::select! {
                _ = token.cancelled() => None,
                received = wait => Some(received),
            };

            let Some(received) = received else {
                break shutdown_receiver
                    .try_recv()
                    .unwrap_or_else(|_| ShutdownReason::Signal("cancelled".to_string()));
            };

            match received {
                Ok(Ok(frame)) => {
                    frames += 1;
                    self.handle_frame(&frame);

                    if self.camera.recorder().take_finished() {
                        info!("Recording run complete");
                        if options.stop_after_recording {
                            break ShutdownReason::RecordingFinished;
                        }
                    }
                    if options.max_frames.is_some_and(|max| frames >= max) {
                        break ShutdownReason::FrameLimit;
                    }
                }
                Ok(Err(RecvTimeoutError::Timeout)) => {
                    debug!("No preview frame within {:?}", PREVIEW_WAIT);
                }
                Ok(Err(RecvTimeoutError::Disconnected)) => {
                    let fault = self
                        .camera
                        .fault()
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "capture worker stopped".to_string());
                    error!("Camera session ended: {}", fault);
                    break ShutdownReason::Fault(fault);
                }
                Err(e) => {
                    return Err(LuckycamError::system(format!(
                        "Preview wait task failed: {}",
                        e
                    )));
                }
            }

            if !rearm_delay.is_zero() {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(rearm_delay) => {}
                }
            }
        };

        info!("Capture loop stopped: {:?}", reason);

        Ok(RunSummary {
            reason,
            frames,
            recorded: self.camera.recorder().recorded(),
            final_exposure_us: self.camera.settings().exposure_time_us(),
            auto_exposure_iterations: self.auto_exposure.iteration(),
        })
    }

    /// Ctrl+C and SIGTERM report their reason and cancel the loop
    fn setup_signal_handlers(&self, shutdown_sender: oneshot::Sender<ShutdownReason>) {
        let shutdown_sender = Arc::new(Mutex::new(Some(shutdown_sender)));

        #[cfg(unix)]
        {
            let sender = Arc::clone(&shutdown_sender);
            let token = self.cancellation_token.clone();
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::spawn(async move {
                        if sigterm.recv().await.is_some() {
                            info!("Received SIGTERM signal");
                            notify_shutdown(&sender, &token, "SIGTERM").await;
                        }
                    });
                }
                Err(e) => warn!("Failed to register SIGTERM handler: {}", e),
            }
        }

        let sender = Arc::clone(&shutdown_sender);
        let token = self.cancellation_token.clone();
        tokio::spawn(async move {
            if let Ok(()) = signal::ctrl_c().await {
                info!("Received SIGINT signal (Ctrl+C)");
                notify_shutdown(&sender, &token, "SIGINT").await;
            }
        });
    }
}

async fn notify_shutdown(
    sender: &Mutex<Option<oneshot::Sender<ShutdownReason>>>,
    token: &CancellationToken,
    signal_name: &str,
) {
    if let Some(sender) = sender.lock().await.take() {
        let _ = sender.send(ShutdownReason::Signal(signal_name.to_string()));
    }
    token.cancel();
}
