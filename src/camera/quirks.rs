use serde::{Deserialize, Serialize};
use tracing::warn;

/// Override for the per-model "restart around every exposure" quirk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestartPolicy {
    /// Decide from the sensor model
    #[default]
    Auto,
    #[serde(alias = "yes")]
    Always,
    #[serde(alias = "no")]
    Never,
}

/// Sensors that lose frames unless the stream is stopped and restarted
/// around every single exposure
const RESTART_EACH_EXPOSURE_MODELS: &[&str] = &["imx290", "imx519"];

/// Whether the capture worker must stop/start the stream for every exposure
pub fn needs_restart(model: &str, policy: RestartPolicy) -> bool {
    match policy {
        RestartPolicy::Always => true,
        RestartPolicy::Never => false,
        RestartPolicy::Auto => RESTART_EACH_EXPOSURE_MODELS.contains(&model),
    }
}

/// Geometry correction for raw modes whose buffer differs from the usable
/// image (padding columns, binned readout)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeometryAdjustment {
    pub true_size: (u32, u32),
    pub binning: (u32, u32),
}

/// Geometry of `size` for `model` from the table of known sensors.
///
/// `None` when the model is in the table but the size is not. Models
/// outside the table are always native.
pub fn known_geometry(model: &str, size: (u32, u32)) -> Option<GeometryAdjustment> {
    let native = GeometryAdjustment {
        true_size: size,
        binning: (1, 1),
    };
    let binned = |factor: u32, true_size: (u32, u32)| GeometryAdjustment {
        true_size,
        binning: (factor, factor),
    };

    if model == "imx477" {
        match size {
            (1332, 990) => Some(binned(2, size)),
            (2028, 1080) => Some(binned(2, (2024, 1080))),
            (2028, 1520) => Some(binned(2, (2024, 1520))),
            (4056, 3040) => Some(native),
            _ => None,
        }
    } else if model == "ov5647" {
        match size {
            (640, 480) => Some(binned(4, size)),
            (1296, 972) => Some(binned(2, size)),
            (1920, 1080) | (2592, 1944) => Some(native),
            _ => None,
        }
    } else if model.starts_with("imx708") {
        match size {
            (1536, 864) | (2304, 1296) => Some(binned(2, size)),
            (4608, 2592) => Some(native),
            _ => None,
        }
    } else {
        Some(native)
    }
}

/// Known geometry corrections per sensor model and raw size.
///
/// Sizes missing from the table of a known model are passed through
/// unchanged with a warning.
pub fn adjust_geometry(model: &str, size: (u32, u32)) -> GeometryAdjustment {
    known_geometry(model, size).unwrap_or_else(|| {
        warn!("Unsupported frame size {}x{} for {}", size.0, size.1, model);
        GeometryAdjustment {
            true_size: size,
            binning: (1, 1),
        }
    })
}
