use super::driver::{CaptureDriver, ControlLimits};
use super::quirks::adjust_geometry;
use crate::error::CameraError;
use crate::frame::RawEncoding;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Exposure ceiling used when the driver reports none, in microseconds
pub const FALLBACK_MAX_EXPOSURE_US: u64 = 1_000_000;
/// Gain ceiling used when the driver reports none
pub const FALLBACK_MAX_GAIN: f64 = 250.0;

/// A usable raw sensor mode, immutable for the life of a camera session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorMode {
    pub label: String,
    /// Raw buffer geometry (width, height)
    pub size: (u32, u32),
    /// Geometry without padding columns
    pub true_size: (u32, u32),
    pub encoding: RawEncoding,
    pub bit_depth: u8,
    pub binning: (u32, u32),
    pub min_exposure_us: u64,
    pub max_exposure_us: u64,
    pub min_gain: f64,
    pub max_gain: f64,
}

impl SensorMode {
    /// Mode with native geometry and fallback limits
    pub fn new(size: (u32, u32), encoding: RawEncoding) -> Self {
        let bit_depth = encoding.bit_depth();
        Self {
            label: mode_label(size, encoding),
            size,
            true_size: size,
            encoding,
            bit_depth,
            binning: (1, 1),
            min_exposure_us: 0,
            max_exposure_us: FALLBACK_MAX_EXPOSURE_US,
            min_gain: 0.0,
            max_gain: FALLBACK_MAX_GAIN,
        }
    }

    pub fn with_exposure_limits(mut self, min_us: u64, max_us: u64) -> Self {
        self.min_exposure_us = min_us;
        self.max_exposure_us = max_us;
        self
    }

    pub fn with_gain_limits(mut self, min: f64, max: f64) -> Self {
        self.min_gain = min;
        self.max_gain = max;
        self
    }

    pub fn clamp_exposure_us(&self, exposure_us: u64) -> u64 {
        exposure_us.min(self.max_exposure_us).max(self.min_exposure_us)
    }

    pub fn clamp_gain(&self, gain: f64) -> f64 {
        gain.min(self.max_gain).max(self.min_gain)
    }

    /// Exposure limits in seconds
    pub fn exposure_limits(&self) -> (f64, f64) {
        (
            self.min_exposure_us as f64 / 1e6,
            self.max_exposure_us as f64 / 1e6,
        )
    }

    fn apply_limits(&mut self, limits: ControlLimits) {
        let (min_exp, max_exp) = limits.exposure_us;
        self.min_exposure_us = min_exp.unwrap_or(0);
        self.max_exposure_us = match max_exp {
            Some(max) if max >= self.min_exposure_us => max,
            _ => FALLBACK_MAX_EXPOSURE_US.max(self.min_exposure_us),
        };

        let (min_gain, max_gain) = limits.gain;
        self.min_gain = min_gain.unwrap_or(0.0);
        self.max_gain = match max_gain {
            Some(max) if max >= self.min_gain => max,
            _ => FALLBACK_MAX_GAIN.max(self.min_gain),
        };
    }

    /// Ordering key: larger frames first, then deeper bit depth
    fn sort_key(&self) -> u64 {
        self.size.0 as u64 * self.size.1 as u64 * 100 + self.bit_depth as u64
    }
}

fn mode_label(size: (u32, u32), encoding: RawEncoding) -> String {
    let kind = match encoding {
        RawEncoding::Mono { .. } => "mono".to_string(),
        RawEncoding::Bayer { pattern, .. } => pattern.as_str().to_string(),
    };
    format!("{}x{} {} {}bit", size.0, size.1, kind, encoding.bit_depth())
}

/// List the raw modes this crate can record, with per-mode control limits.
///
/// Each usable mode is configured once to read its limits, so this must run
/// before the capture worker takes ownership of the driver.
pub fn enumerate_modes<D: CaptureDriver>(
    driver: &mut D,
    hardware_adjustments: bool,
) -> Result<Vec<SensorMode>, CameraError> {
    let model = driver.properties().model;
    let mut modes = Vec::new();

    for listed in driver.sensor_modes()? {
        let tag = listed.unpacked.as_deref().unwrap_or(&listed.format);
        let encoding: RawEncoding = match tag.parse() {
            Ok(encoding) => encoding,
            Err(e) => {
                warn!("Raw mode not supported: {:?} ({})", listed, e);
                continue;
            }
        };

        let mut mode = SensorMode::new(listed.size, encoding);
        if hardware_adjustments {
            let adjustment = adjust_geometry(&model, listed.size);
            mode.true_size = adjustment.true_size;
            mode.binning = adjustment.binning;
        }

        driver.configure(&mode, true)?;
        let limits = driver.control_limits();
        debug!("Raw mode \"{}\": limits {:?}", mode.label, limits);
        mode.apply_limits(limits);

        modes.push(mode);
    }

    modes.sort_by(|a, b| b.sort_key().cmp(&a.sort_key()));

    info!(
        "Found {} usable raw modes for {}: {:?}",
        modes.len(),
        model,
        modes.iter().map(|m| m.label.as_str()).collect::<Vec<_>>()
    );

    Ok(modes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::BayerPattern;

    #[test]
    fn test_mode_label() {
        let mono = SensorMode::new((100, 100), RawEncoding::Mono { bits: 10 });
        assert_eq!(mono.label, "100x100 mono 10bit");

        let bayer = SensorMode::new(
            (4056, 3040),
            RawEncoding::Bayer {
                pattern: BayerPattern::Bggr,
                bits: 12,
            },
        );
        assert_eq!(bayer.label, "4056x3040 BGGR 12bit");
    }

    #[test]
    fn test_limit_fallbacks() {
        let mut mode = SensorMode::new((10, 10), RawEncoding::Mono { bits: 8 });
        mode.apply_limits(ControlLimits {
            exposure_us: (Some(100), Some(50)),
            gain: (None, None),
        });
        assert_eq!(mode.min_exposure_us, 100);
        assert_eq!(mode.max_exposure_us, FALLBACK_MAX_EXPOSURE_US);
        assert_eq!(mode.min_gain, 0.0);
        assert_eq!(mode.max_gain, FALLBACK_MAX_GAIN);
    }

    #[test]
    fn test_clamping() {
        let mode = SensorMode::new((10, 10), RawEncoding::Mono { bits: 8 })
            .with_exposure_limits(10, 1_000)
            .with_gain_limits(1.0, 16.0);
        assert_eq!(mode.clamp_exposure_us(5), 10);
        assert_eq!(mode.clamp_exposure_us(5_000), 1_000);
        assert_eq!(mode.clamp_gain(0.5), 1.0);
        assert_eq!(mode.clamp_gain(20.0), 16.0);
        assert_eq!(mode.exposure_limits(), (0.00001, 0.001));
    }
}
