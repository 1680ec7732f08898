use crate::camera::SensorMode;
use crate::error::CameraError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default exposure time before any mode is selected, in microseconds
pub const DEFAULT_EXPOSURE_US: u64 = 10_000;
pub const DEFAULT_GAIN: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoiseReductionMode {
    Off,
    Fast,
    HighQuality,
}

/// Control values pushed to the sensor.
///
/// Every automatic regulation stays off so raw output is deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureControls {
    pub exposure_time_us: u64,
    pub analogue_gain: f64,
    pub ae_enable: bool,
    pub awb_enable: bool,
    pub noise_reduction: NoiseReductionMode,
    /// Fixed red/blue gains compensating the two green pixels of a Bayer cell
    pub colour_gains: (f64, f64),
}

impl Default for ExposureControls {
    fn default() -> Self {
        Self {
            exposure_time_us: DEFAULT_EXPOSURE_US,
            analogue_gain: DEFAULT_GAIN,
            ae_enable: false,
            awb_enable: false,
            noise_reduction: NoiseReductionMode::Off,
            colour_gains: (2.0, 2.0),
        }
    }
}

impl ExposureControls {
    pub fn exposure_seconds(&self) -> f64 {
        self.exposure_time_us as f64 / 1e6
    }

    /// Clamp exposure and gain into `mode`'s limits; true if anything moved
    fn clamp_to(&mut self, mode: &SensorMode) -> bool {
        let exposure = mode.clamp_exposure_us(self.exposure_time_us);
        let gain = mode.clamp_gain(self.analogue_gain);
        let changed = exposure != self.exposure_time_us || gain != self.analogue_gain;
        self.exposure_time_us = exposure;
        self.analogue_gain = gain;
        changed
    }
}

/// Consistent copy of the settings for one capture-loop iteration
#[derive(Debug, Clone, PartialEq)]
pub struct SettingsSnapshot {
    pub mode_index: Option<usize>,
    pub mode: Option<SensorMode>,
    pub controls: ExposureControls,
}

#[derive(Debug)]
struct SettingsInner {
    modes: Vec<SensorMode>,
    selected: Option<usize>,
    controls: ExposureControls,
    mode_dirty: bool,
    controls_dirty: bool,
}

impl Default for SettingsInner {
    fn default() -> Self {
        Self {
            modes: Vec::new(),
            selected: None,
            controls: ExposureControls::default(),
            mode_dirty: true,
            controls_dirty: true,
        }
    }
}

impl SettingsInner {
    fn mode(&self) -> Option<&SensorMode> {
        self.selected.and_then(|idx| self.modes.get(idx))
    }
}

/// Thread-shared sensor mode and exposure controls.
///
/// Writers (the orchestrator) go through the setters; the capture worker
/// consumes changes with the take-and-clear calls so every change reaches the
/// hardware exactly once. The lock is held for a single operation only.
#[derive(Debug, Default)]
pub struct SettingsStore {
    inner: Mutex<SettingsInner>,
}

impl SettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore the state of a freshly constructed store
    pub fn reset(&self) {
        *self.inner.lock() = SettingsInner::default();
    }

    /// Replace the mode list and select its first entry.
    pub fn set_modes(&self, modes: Vec<SensorMode>) {
        let mut inner = self.inner.lock();
        inner.modes = modes;
        inner.selected = None;
        inner.mode_dirty = true;
        inner.controls_dirty = true;
        if !inner.modes.is_empty() {
            inner.selected = Some(0);
            let mode = inner.modes[0].clone();
            inner.controls.clamp_to(&mode);
        }
    }

    pub fn modes(&self) -> Vec<SensorMode> {
        self.inner.lock().modes.clone()
    }

    /// Select a mode by index. Reselecting the current mode is a no-op.
    ///
    /// Returns whether the selection changed.
    pub fn select_mode(&self, index: usize) -> Result<bool, CameraError> {
        let mut inner = self.inner.lock();
        let available = inner.modes.len();
        if index >= available {
            return Err(CameraError::ModeOutOfRange { index, available });
        }
        if inner.selected == Some(index) {
            return Ok(false);
        }

        let mode = inner.modes[index].clone();
        inner.selected = Some(index);
        inner.mode_dirty = true;
        if inner.controls.clamp_to(&mode) {
            inner.controls_dirty = true;
        }
        debug!(
            "Selected raw mode {} ({}), controls {:?}",
            index, mode.label, inner.controls
        );
        Ok(true)
    }

    pub fn selected_index(&self) -> Option<usize> {
        self.inner.lock().selected
    }

    pub fn selected_mode(&self) -> Option<SensorMode> {
        self.inner.lock().mode().cloned()
    }

    /// Set the exposure time in seconds, rounded to whole microseconds and
    /// clamped to the selected mode. Returns whether the value changed.
    pub fn set_exposure_time(&self, seconds: f64) -> bool {
        if !seconds.is_finite() {
            return false;
        }
        self.set_exposure_time_us((seconds.max(0.0) * 1e6).round() as u64)
    }

    pub fn set_exposure_time_us(&self, exposure_us: u64) -> bool {
        let mut inner = self.inner.lock();
        let exposure_us = match inner.mode() {
            Some(mode) => mode.clamp_exposure_us(exposure_us),
            None => exposure_us,
        };
        if exposure_us == inner.controls.exposure_time_us {
            return false;
        }
        inner.controls.exposure_time_us = exposure_us;
        inner.controls_dirty = true;
        true
    }

    /// Exposure time in seconds
    pub fn exposure_time(&self) -> f64 {
        self.inner.lock().controls.exposure_seconds()
    }

    pub fn exposure_time_us(&self) -> u64 {
        self.inner.lock().controls.exposure_time_us
    }

    /// Set the analogue gain clamped to the selected mode. Returns whether
    /// the value changed.
    pub fn set_gain(&self, gain: f64) -> bool {
        if !gain.is_finite() {
            return false;
        }
        let mut inner = self.inner.lock();
        let gain = match inner.mode() {
            Some(mode) => mode.clamp_gain(gain),
            None => gain,
        };
        if gain == inner.controls.analogue_gain {
            return false;
        }
        inner.controls.analogue_gain = gain;
        inner.controls_dirty = true;
        true
    }

    pub fn gain(&self) -> f64 {
        self.inner.lock().controls.analogue_gain
    }

    /// Exposure limits of the selected mode in seconds
    pub fn exposure_limits(&self) -> Option<(f64, f64)> {
        self.inner.lock().mode().map(SensorMode::exposure_limits)
    }

    pub fn gain_limits(&self) -> Option<(f64, f64)> {
        self.inner.lock().mode().map(|m| (m.min_gain, m.max_gain))
    }

    pub fn take_mode_dirty(&self) -> bool {
        std::mem::take(&mut self.inner.lock().mode_dirty)
    }

    pub fn take_controls_dirty(&self) -> bool {
        std::mem::take(&mut self.inner.lock().controls_dirty)
    }

    pub fn snapshot(&self) -> SettingsSnapshot {
        let inner = self.inner.lock();
        SettingsSnapshot {
            mode_index: inner.selected,
            mode: inner.mode().cloned(),
            controls: inner.controls.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::RawEncoding;
    use std::sync::Arc;
    use std::thread;

    fn test_modes() -> Vec<SensorMode> {
        vec![
            SensorMode::new((100, 100), RawEncoding::Mono { bits: 10 })
                .with_exposure_limits(10, 1_000_000)
                .with_gain_limits(1.0, 16.0),
            SensorMode::new((50, 50), RawEncoding::Mono { bits: 8 })
                .with_exposure_limits(20_000, 200_000)
                .with_gain_limits(2.0, 8.0),
            SensorMode::new((25, 25), RawEncoding::Mono { bits: 8 })
                .with_exposure_limits(100, 5_000)
                .with_gain_limits(1.0, 1.5),
        ]
    }

    #[test]
    fn test_new_store_is_dirty() {
        let store = SettingsStore::new();
        assert!(store.take_mode_dirty());
        assert!(store.take_controls_dirty());
        assert_eq!(store.exposure_time_us(), DEFAULT_EXPOSURE_US);
        assert_eq!(store.selected_mode(), None);
    }

    #[test]
    fn test_select_mode_clamps_into_limits() {
        let store = SettingsStore::new();
        store.set_modes(test_modes());

        for (i, mode) in test_modes().iter().enumerate() {
            store.select_mode(i).unwrap();
            let exposure = store.exposure_time_us();
            let gain = store.gain();
            assert!(mode.min_exposure_us <= exposure && exposure <= mode.max_exposure_us);
            assert!(mode.min_gain <= gain && gain <= mode.max_gain);
        }
    }

    #[test]
    fn test_select_mode_out_of_range_leaves_state() {
        let store = SettingsStore::new();
        store.set_modes(test_modes());
        store.take_mode_dirty();
        store.take_controls_dirty();

        let err = store.select_mode(3).unwrap_err();
        assert_eq!(
            err,
            CameraError::ModeOutOfRange {
                index: 3,
                available: 3
            }
        );
        assert_eq!(store.selected_index(), Some(0));
        assert!(!store.take_mode_dirty());
        assert!(!store.take_controls_dirty());
    }

    #[test]
    fn test_reselecting_same_mode_is_noop() {
        let store = SettingsStore::new();
        store.set_modes(test_modes());
        store.take_mode_dirty();

        assert!(!store.select_mode(0).unwrap());
        assert!(!store.take_mode_dirty());

        assert!(store.select_mode(1).unwrap());
        assert!(store.take_mode_dirty());
        assert!(!store.take_mode_dirty());
    }

    #[test]
    fn test_set_exposure_time_is_idempotent() {
        let store = SettingsStore::new();
        store.set_modes(test_modes());
        store.take_controls_dirty();

        assert!(store.set_exposure_time(0.05));
        assert_eq!(store.exposure_time_us(), 50_000);
        assert!(store.take_controls_dirty());

        assert!(!store.set_exposure_time(0.05));
        assert!(!store.set_exposure_time(0.0500001));
        assert!(!store.take_controls_dirty());
    }

    #[test]
    fn test_exposure_and_gain_clamped_to_mode() {
        let store = SettingsStore::new();
        store.set_modes(test_modes());
        store.select_mode(1).unwrap();

        store.set_exposure_time(10.0);
        assert_eq!(store.exposure_time_us(), 200_000);
        store.set_exposure_time(-1.0);
        assert_eq!(store.exposure_time_us(), 20_000);

        store.set_gain(100.0);
        assert_eq!(store.gain(), 8.0);
        assert!(!store.set_gain(f64::NAN));
        assert_eq!(store.exposure_limits(), Some((0.02, 0.2)));
        assert_eq!(store.gain_limits(), Some((2.0, 8.0)));
    }

    #[test]
    fn test_take_dirty_read_and_clear() {
        let store = SettingsStore::new();
        store.set_modes(test_modes());
        store.take_controls_dirty();

        store.set_gain(4.0);
        assert!(store.take_controls_dirty());
        assert!(!store.take_controls_dirty());
    }

    #[test]
    fn test_mode_switch_reclamps_controls() {
        let store = SettingsStore::new();
        store.set_modes(test_modes());
        store.set_exposure_time(0.5);
        store.take_controls_dirty();

        store.select_mode(2).unwrap();
        assert_eq!(store.exposure_time_us(), 5_000);
        assert_eq!(store.gain(), 1.0);
        assert!(store.take_controls_dirty());
    }

    #[test]
    fn test_snapshot_is_consistent_under_concurrent_writes() {
        let store = Arc::new(SettingsStore::new());
        store.set_modes(test_modes());

        let writer = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..1_000u64 {
                    store.select_mode((i % 3) as usize).unwrap();
                    store.set_exposure_time_us(i * 1_000);
                }
            })
        };

        for _ in 0..1_000 {
            let snapshot = store.snapshot();
            let mode = snapshot.mode.unwrap();
            assert!(snapshot.controls.exposure_time_us >= mode.min_exposure_us);
            assert!(snapshot.controls.exposure_time_us <= mode.max_exposure_us);
        }

        writer.join().unwrap();
    }

    #[test]
    fn test_reset_restores_defaults() {
        let store = SettingsStore::new();
        store.set_modes(test_modes());
        store.set_gain(3.0);
        store.reset();
        assert!(store.modes().is_empty());
        assert_eq!(store.gain(), DEFAULT_GAIN);
    }
}
