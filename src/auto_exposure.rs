use crate::config::AutoExposureConfig;
use tracing::debug;

/// Exposure used when the current exposure time is zero or negative
pub const DEGENERATE_EXPOSURE_FLOOR: f64 = 0.01;

/// Outcome of one auto-exposure iteration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExposureStep {
    /// No more iterations left; the caller should stop invoking the loop
    pub finished: bool,
    /// Next exposure time in seconds
    pub exposure_time: f64,
}

/// Closed-loop exposure time optimiser.
///
/// Each call looks at one frame taken with `exposure_time` and proposes the
/// next exposure time. The controller only counts iterations; it keeps no
/// other state between calls.
#[derive(Debug, Clone)]
pub struct AutoExposureController {
    config: AutoExposureConfig,
    iteration: u32,
}

impl AutoExposureController {
    pub fn new(config: AutoExposureConfig) -> Self {
        Self {
            config,
            iteration: 0,
        }
    }

    pub fn config(&self) -> &AutoExposureConfig {
        &self.config
    }

    /// Start a new optimisation run
    pub fn reset(&mut self) {
        self.iteration = 0;
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn is_finished(&self) -> bool {
        self.iteration >= self.config.iterations
    }

    /// Propose the next exposure time for `pixels` captured at
    /// `exposure_time` seconds with `bit_depth` bit samples.
    pub fn step(
        &mut self,
        pixels: &[u16],
        bit_depth: u8,
        exposure_time: f64,
        limits: (f64, f64),
    ) -> ExposureStep {
        if self.is_finished() || pixels.is_empty() {
            return ExposureStep {
                finished: self.is_finished(),
                exposure_time,
            };
        }

        let cfg = &self.config;
        let full_scale = 2f64.powi(bit_depth as i32);
        let current = percentile(pixels, 100.0 - cfg.allowed_overexposed_percent);
        let target = cfg.target_percent / 100.0 * full_scale;

        let proportional =
            |t: f64| t + cfg.learning_rate * (t * target / current - t);

        let proposed = if current < target {
            if exposure_time <= 0.0 {
                DEGENERATE_EXPOSURE_FLOOR
            } else if current <= 0.0 {
                // black frame
                exposure_time * cfg.saturation_rate
            } else {
                proportional(exposure_time)
            }
        } else {
            let saturation_level = (full_scale - 1.0) as u32;
            let saturated = pixels
                .iter()
                .filter(|&&p| p as u32 >= saturation_level)
                .count();
            if saturated as f64 > cfg.allowed_overexposed_percent / 100.0 * pixels.len() as f64 {
                exposure_time / cfg.saturation_rate
            } else {
                proportional(exposure_time)
            }
        };

        let (min, max) = limits;
        let exposure = proposed.min(max).max(min);
        self.iteration += 1;

        debug!(
            "Auto exposure iteration {}/{}: level {:.1} target {:.1}, {:.6}s -> {:.6}s",
            self.iteration, cfg.iterations, current, target, exposure_time, exposure
        );

        ExposureStep {
            finished: false,
            exposure_time: exposure,
        }
    }
}

/// `q`-th percentile (0..=100) with linear interpolation between the closest
/// ranks. `values` must not be empty.
fn percentile(values: &[u16], q: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_unstable();

    let rank = (q.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let fraction = rank - lower as f64;

    let lo = sorted[lower] as f64;
    let hi = sorted[upper] as f64;
    lo + (hi - lo) * fraction
}
