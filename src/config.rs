use crate::camera::RestartPolicy;
use crate::frame::FrameType;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LuckycamConfig {
    pub camera: CameraConfig,
    pub auto_exposure: AutoExposureConfig,
    pub recording: RecordingConfig,
    pub preview: PreviewConfig,
    pub simulation: SimulationConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CameraConfig {
    /// Camera index as enumerated by the driver
    #[serde(default = "default_camera_index")]
    pub index: u32,

    /// Stop/start the stream around every exposure (auto, always, never)
    #[serde(default)]
    pub restart_policy: RestartPolicy,

    /// Apply known per-model geometry and binning corrections
    #[serde(default = "default_hardware_adjustments")]
    pub hardware_adjustments: bool,

    /// Use `pixel_size_nm` even when the driver reports a unit cell size
    #[serde(default)]
    pub force_pixel_size: bool,

    /// Pixel pitch in nanometres (width, height)
    #[serde(default = "default_pixel_size_nm")]
    pub pixel_size_nm: (f64, f64),

    /// Exposure poll period of the capture worker
    #[serde(default = "default_poll_period_ms")]
    pub poll_period_ms: u64,

    /// How long past its expected end an exposure may take before the
    /// session is faulted
    #[serde(default = "default_capture_grace_ms")]
    pub capture_grace_ms: u64,
}

impl CameraConfig {
    pub fn poll_period(&self) -> Duration {
        Duration::from_millis(self.poll_period_ms)
    }

    pub fn capture_grace(&self) -> Duration {
        Duration::from_millis(self.capture_grace_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct AutoExposureConfig {
    /// Exposure target in % of full scale
    #[serde(default = "default_target_percent")]
    pub target_percent: f64,

    /// % of pixels allowed to be overexposed (defective pixels)
    #[serde(default = "default_allowed_overexposed_percent")]
    pub allowed_overexposed_percent: f64,

    /// Number of optimisation iterations per run
    #[serde(default = "default_iterations")]
    pub iterations: u32,

    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,

    /// Step multiplier used when the image is saturated high or low
    #[serde(default = "default_saturation_rate")]
    pub saturation_rate: f64,
}

impl Default for AutoExposureConfig {
    fn default() -> Self {
        Self {
            target_percent: default_target_percent(),
            allowed_overexposed_percent: default_allowed_overexposed_percent(),
            iterations: default_iterations(),
            learning_rate: default_learning_rate(),
            saturation_rate: default_saturation_rate(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RecordingConfig {
    /// Folder receiving recorded frames
    #[serde(default = "default_recording_folder")]
    pub folder: PathBuf,

    /// File name prefix
    #[serde(default = "default_recording_prefix")]
    pub prefix: String,

    /// Free text stored with every frame
    #[serde(default)]
    pub comment: String,

    #[serde(default)]
    pub frame_type: FrameType,

    /// Frames per recording run
    #[serde(default = "default_frames_to_record")]
    pub frames_to_record: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PreviewConfig {
    /// Delay before the preview consumer asks for the next frame
    #[serde(default = "default_rearm_delay_ms")]
    pub rearm_delay_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SimulationConfig {
    /// Sensor model reported by the simulated camera
    #[serde(default = "default_simulation_model")]
    pub model: String,

    /// Raw mode sizes the simulated sensor lists
    #[serde(default = "default_simulation_modes")]
    pub modes: Vec<(u32, u32)>,

    #[serde(default = "default_simulation_bit_depth")]
    pub bit_depth: u8,

    /// Signal collected per pixel per second of exposure
    #[serde(default = "default_flux_per_second")]
    pub flux_per_second: f64,
}

impl LuckycamConfig {
    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("camera.index", default_camera_index())?
            .set_default("camera.restart_policy", "auto")?
            .set_default(
                "camera.hardware_adjustments",
                default_hardware_adjustments(),
            )?
            .set_default("camera.force_pixel_size", false)?
            .set_default(
                "camera.pixel_size_nm",
                vec![default_pixel_size_nm().0, default_pixel_size_nm().1],
            )?
            .set_default("camera.poll_period_ms", default_poll_period_ms())?
            .set_default("camera.capture_grace_ms", default_capture_grace_ms())?
            .set_default("auto_exposure.target_percent", default_target_percent())?
            .set_default(
                "auto_exposure.allowed_overexposed_percent",
                default_allowed_overexposed_percent(),
            )?
            .set_default("auto_exposure.iterations", default_iterations())?
            .set_default("auto_exposure.learning_rate", default_learning_rate())?
            .set_default("auto_exposure.saturation_rate", default_saturation_rate())?
            .set_default(
                "recording.folder",
                default_recording_folder().to_string_lossy().to_string(),
            )?
            .set_default("recording.prefix", default_recording_prefix())?
            .set_default("recording.comment", "")?
            .set_default("recording.frame_type", "light")?
            .set_default("recording.frames_to_record", default_frames_to_record())?
            .set_default("preview.rearm_delay_ms", default_rearm_delay_ms())?
            .set_default("simulation.model", default_simulation_model())?
            .set_default(
                "simulation.modes",
                default_simulation_modes()
                    .into_iter()
                    .map(|(w, h)| vec![w, h])
                    .collect::<Vec<_>>(),
            )?
            .set_default("simulation.bit_depth", default_simulation_bit_depth() as u32)?
            .set_default("simulation.flux_per_second", default_flux_per_second())?
            .add_source(File::with_name(&path_str).required(false))
            // LUCKYCAM_CAMERA__POLL_PERIOD_MS=100
            .add_source(
                Environment::with_prefix("LUCKYCAM")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: LuckycamConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.poll_period_ms == 0 {
            return Err(ConfigError::Message(
                "Camera poll_period_ms must be greater than 0".to_string(),
            ));
        }

        let (px, py) = self.camera.pixel_size_nm;
        if px <= 0.0 || py <= 0.0 {
            return Err(ConfigError::Message(
                "Camera pixel_size_nm must be greater than 0".to_string(),
            ));
        }

        let ae = &self.auto_exposure;
        if !(1.0..=100.0).contains(&ae.target_percent) {
            return Err(ConfigError::Message(
                "Auto exposure target_percent must be between 1 and 100".to_string(),
            ));
        }

        if !(0.0..=100.0).contains(&ae.allowed_overexposed_percent) {
            return Err(ConfigError::Message(
                "Auto exposure allowed_overexposed_percent must be between 0 and 100".to_string(),
            ));
        }

        if ae.iterations > 100 {
            return Err(ConfigError::Message(
                "Auto exposure iterations must be at most 100".to_string(),
            ));
        }

        if !(0.1..=1.9).contains(&ae.learning_rate) {
            return Err(ConfigError::Message(
                "Auto exposure learning_rate must be between 0.1 and 1.9".to_string(),
            ));
        }

        if !(1.0..=64.0).contains(&ae.saturation_rate) {
            return Err(ConfigError::Message(
                "Auto exposure saturation_rate must be between 1 and 64".to_string(),
            ));
        }

        if self.recording.frames_to_record == 0 {
            return Err(ConfigError::Message(
                "Recording frames_to_record must be greater than 0".to_string(),
            ));
        }

        let sim = &self.simulation;
        if sim.modes.is_empty() || sim.modes.iter().any(|&(w, h)| w == 0 || h == 0) {
            return Err(ConfigError::Message(
                "Simulation modes must list at least one non-empty size".to_string(),
            ));
        }

        if !(1..=16).contains(&sim.bit_depth) {
            return Err(ConfigError::Message(
                "Simulation bit_depth must be between 1 and 16".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for LuckycamConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig {
                index: default_camera_index(),
                restart_policy: RestartPolicy::default(),
                hardware_adjustments: default_hardware_adjustments(),
                force_pixel_size: false,
                pixel_size_nm: default_pixel_size_nm(),
                poll_period_ms: default_poll_period_ms(),
                capture_grace_ms: default_capture_grace_ms(),
            },
            auto_exposure: AutoExposureConfig::default(),
            recording: RecordingConfig {
                folder: default_recording_folder(),
                prefix: default_recording_prefix(),
                comment: String::new(),
                frame_type: FrameType::default(),
                frames_to_record: default_frames_to_record(),
            },
            preview: PreviewConfig {
                rearm_delay_ms: default_rearm_delay_ms(),
            },
            simulation: SimulationConfig {
                model: default_simulation_model(),
                modes: default_simulation_modes(),
                bit_depth: default_simulation_bit_depth(),
                flux_per_second: default_flux_per_second(),
            },
        }
    }
}

// Default value functions
fn default_camera_index() -> u32 {
    0
}
fn default_hardware_adjustments() -> bool {
    true
}
fn default_pixel_size_nm() -> (f64, f64) {
    (1550.0, 1550.0)
}
fn default_poll_period_ms() -> u64 {
    200
}
fn default_capture_grace_ms() -> u64 {
    5000
}

fn default_target_percent() -> f64 {
    80.0
}
fn default_allowed_overexposed_percent() -> f64 {
    0.1
}
fn default_iterations() -> u32 {
    15
}
fn default_learning_rate() -> f64 {
    1.0
}
fn default_saturation_rate() -> f64 {
    8.0
}

fn default_recording_folder() -> PathBuf {
    PathBuf::from("./recordings")
}
fn default_recording_prefix() -> String {
    "capture".to_string()
}
fn default_frames_to_record() -> u32 {
    100
}

fn default_rearm_delay_ms() -> u64 {
    100
}

fn default_simulation_model() -> String {
    "imx477".to_string()
}
fn default_simulation_modes() -> Vec<(u32, u32)> {
    vec![(2028, 1520), (1332, 990)]
}
fn default_simulation_bit_depth() -> u8 {
    12
}
fn default_flux_per_second() -> f64 {
    20_000.0
}
