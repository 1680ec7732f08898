use super::*;
use crate::camera::{CompletionBehavior, ControlLimits, DriverSensorMode, Scene, SimulatedDriver};
use crate::config::LuckycamConfig;
use crate::frame::FrameType;
use std::path::Path;
use std::time::Duration;

fn create_test_config(folder: &Path) -> LuckycamConfig {
    let mut config = LuckycamConfig::default();
    config.camera.poll_period_ms = 20;
    config.preview.rearm_delay_ms = 0;
    config.recording.folder = folder.to_path_buf();
    config.recording.prefix = "run".to_string();
    config.recording.frame_type = FrameType::Flat;
    config.recording.frames_to_record = 3;
    config.auto_exposure.iterations = 5;
    config
}

fn create_test_driver(scene: Scene) -> SimulatedDriver {
    SimulatedDriver::new(
        "imx477",
        vec![DriverSensorMode {
            size: (64, 48),
            format: "SRGGB12_CSI2P".to_string(),
            unpacked: Some("SRGGB12".to_string()),
            bit_depth: 12,
        }],
    )
    .with_behavior(CompletionBehavior::Immediate)
    .with_scene(scene)
    .with_limits(ControlLimits {
        exposure_us: (Some(100), Some(2_000_000)),
        gain: (Some(1.0), Some(16.0)),
    })
}

fn create_orchestrator(
    folder: &Path,
    scene: Scene,
) -> LuckycamOrchestrator<SimulatedDriver> {
    let mut orchestrator = LuckycamOrchestrator::new(create_test_config(folder));
    orchestrator.open(create_test_driver(scene)).unwrap();
    orchestrator
}

#[tokio::test]
async fn test_run_stops_at_frame_limit() {
    let dir = tempfile::tempdir().unwrap();
    let mut orchestrator = create_orchestrator(dir.path(), Scene::Uniform(1000));

    let summary = orchestrator
        .run(RunOptions {
            max_frames: Some(4),
            stop_after_recording: false,
        })
        .await
        .unwrap();

    assert_eq!(summary.reason, ShutdownReason::FrameLimit);
    assert_eq!(summary.frames, 4);
    assert_eq!(summary.recorded, 0);
    assert_eq!(orchestrator.shutdown(), 0);
    assert!(!orchestrator.camera().is_open());
}

#[tokio::test]
async fn test_run_stops_after_recording() {
    let dir = tempfile::tempdir().unwrap();
    let mut orchestrator = create_orchestrator(dir.path(), Scene::Uniform(1000));
    orchestrator.start_recording();

    let summary = orchestrator
        .run(RunOptions {
            max_frames: Some(1_000),
            stop_after_recording: true,
        })
        .await
        .unwrap();

    assert_eq!(summary.reason, ShutdownReason::RecordingFinished);
    assert_eq!(summary.recorded, 3);
    orchestrator.shutdown();

    let files: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(files.len(), 3);
    let stored = crate::recording::read_frame(&files[0]).unwrap();
    assert_eq!(stored.frame.metadata.frame_type, FrameType::Flat);
    assert_eq!(stored.frame.metadata.camera_model, "imx477");
}

#[tokio::test]
async fn test_auto_exposure_closes_the_loop() {
    let dir = tempfile::tempdir().unwrap();
    let mut orchestrator = create_orchestrator(
        dir.path(),
        Scene::LinearFlux {
            counts_per_second: 20_000.0,
        },
    );
    orchestrator.set_exposure_time(0.01);
    orchestrator.set_auto_exposure(true);

    let summary = orchestrator
        .run(RunOptions {
            max_frames: Some(20),
            stop_after_recording: false,
        })
        .await
        .unwrap();

    assert_eq!(summary.auto_exposure_iterations, 5);
    assert!(!orchestrator.auto_exposure_enabled());
    // 80% of 4096 needs about 0.16s at this flux
    assert!(summary.final_exposure_us > 100_000);
    assert!(summary.final_exposure_us < 250_000);
    orchestrator.shutdown();
}

#[tokio::test]
async fn test_cancellation_stops_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut orchestrator = create_orchestrator(dir.path(), Scene::Uniform(10));
    let token = orchestrator.cancellation_token();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });

    let summary = tokio::time::timeout(
        Duration::from_secs(5),
        orchestrator.run(RunOptions::default()),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(summary.reason, ShutdownReason::Signal("cancelled".to_string()));
    assert!(summary.frames > 0);
    assert_eq!(orchestrator.shutdown(), 0);
}

#[tokio::test]
async fn test_fault_ends_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = create_test_config(dir.path());
    config.camera.capture_grace_ms = 20;
    let mut orchestrator = LuckycamOrchestrator::new(config);
    orchestrator
        .open(create_test_driver(Scene::Uniform(0)).with_behavior(CompletionBehavior::Never))
        .unwrap();

    let summary = orchestrator.run(RunOptions::default()).await.unwrap();
    assert!(matches!(summary.reason, ShutdownReason::Fault(_)));
    assert_eq!(orchestrator.shutdown(), 1);
}

#[tokio::test]
async fn test_invalid_mode_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut orchestrator = create_orchestrator(dir.path(), Scene::Uniform(0));

    let err = orchestrator.select_mode(7).unwrap_err();
    assert!(!err.is_fatal_camera_error());
    assert!(orchestrator.select_mode(0).is_ok());
    assert_eq!(orchestrator.modes().len(), 1);
    orchestrator.shutdown();
}
