use super::driver::{
    CameraProperties, CaptureDriver, CaptureJob, CompletionNotifier, ControlLimits,
    DriverSensorMode, RawCapture,
};
use super::modes::SensorMode;
use crate::config::SimulationConfig;
use crate::error::CameraError;
use crate::frame::{encode_pixels, RawEncoding};
use crate::settings::ExposureControls;
use chrono::Utc;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// When a submitted exposure completes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionBehavior {
    /// Completes inside `submit`
    Immediate,
    /// Completes on a timer thread after the exposure time
    AfterExposure,
    /// Never completes; models a stuck sensor
    Never,
}

/// What the simulated sensor looks at
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scene {
    /// Every pixel reads this value regardless of exposure
    Uniform(u16),
    /// Horizontal gradient whose brightest column collects
    /// `counts_per_second` per second of exposure at unit gain
    LinearFlux { counts_per_second: f64 },
}

/// Call counters for asserting on driver traffic
#[derive(Debug, Default)]
pub struct DriverCounters {
    configures: AtomicU64,
    starts: AtomicU64,
    stops: AtomicU64,
    control_updates: AtomicU64,
    submits: AtomicU64,
    completed: AtomicU64,
    closes: AtomicU64,
}

impl DriverCounters {
    pub fn configures(&self) -> u64 {
        self.configures.load(Ordering::SeqCst)
    }
    pub fn starts(&self) -> u64 {
        self.starts.load(Ordering::SeqCst)
    }
    pub fn stops(&self) -> u64 {
        self.stops.load(Ordering::SeqCst)
    }
    pub fn control_updates(&self) -> u64 {
        self.control_updates.load(Ordering::SeqCst)
    }
    pub fn submits(&self) -> u64 {
        self.submits.load(Ordering::SeqCst)
    }
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }
    pub fn closes(&self) -> u64 {
        self.closes.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct PendingSlot {
    finished: Mutex<Option<(u64, RawCapture)>>,
    ready: Condvar,
}

impl PendingSlot {
    fn complete(&self, id: u64, capture: RawCapture) {
        *self.finished.lock() = Some((id, capture));
        self.ready.notify_all();
    }
}

/// Software camera implementing [`CaptureDriver`].
///
/// Used by the CLI in place of real hardware and by tests to script
/// completion timing.
pub struct SimulatedDriver {
    properties: CameraProperties,
    modes: Vec<DriverSensorMode>,
    limits: ControlLimits,
    behavior: CompletionBehavior,
    scene: Scene,
    counters: Arc<DriverCounters>,
    configured: Option<SensorMode>,
    controls: ExposureControls,
    started: bool,
    next_job: u64,
    pending: Arc<PendingSlot>,
}

impl SimulatedDriver {
    pub fn new(model: &str, modes: Vec<DriverSensorMode>) -> Self {
        let pixel_array_size = modes
            .iter()
            .map(|m| m.size)
            .max_by_key(|(w, h)| *w as u64 * *h as u64)
            .unwrap_or((0, 0));

        Self {
            properties: CameraProperties {
                model: model.to_string(),
                unit_cell_size_nm: None,
                pixel_array_size,
            },
            modes,
            limits: ControlLimits::default(),
            behavior: CompletionBehavior::AfterExposure,
            scene: Scene::LinearFlux {
                counts_per_second: 20_000.0,
            },
            counters: Arc::new(DriverCounters::default()),
            configured: None,
            controls: ExposureControls::default(),
            started: false,
            next_job: 0,
            pending: Arc::new(PendingSlot::default()),
        }
    }

    /// Bayer sensor listing the configured sizes, each packed with an
    /// unpacked alternative
    pub fn from_config(config: &SimulationConfig) -> Self {
        let modes = config
            .modes
            .iter()
            .map(|&size| DriverSensorMode {
                size,
                format: format!("SRGGB{}_CSI2P", config.bit_depth),
                unpacked: Some(format!("SRGGB{}", config.bit_depth)),
                bit_depth: config.bit_depth,
            })
            .collect();

        Self::new(&config.model, modes)
            .with_limits(ControlLimits {
                exposure_us: (Some(100), Some(10_000_000)),
                gain: (Some(1.0), Some(16.0)),
            })
            .with_scene(Scene::LinearFlux {
                counts_per_second: config.flux_per_second,
            })
    }

    pub fn with_behavior(mut self, behavior: CompletionBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn with_scene(mut self, scene: Scene) -> Self {
        self.scene = scene;
        self
    }

    pub fn with_limits(mut self, limits: ControlLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_unit_cell_size(mut self, size_nm: (f64, f64)) -> Self {
        self.properties.unit_cell_size_nm = Some(size_nm);
        self
    }

    pub fn counters(&self) -> Arc<DriverCounters> {
        Arc::clone(&self.counters)
    }

    fn render(&self, mode: &SensorMode) -> Vec<u8> {
        let (width, height) = mode.size;
        let full_scale = mode.encoding.full_scale() as f64;

        let pixels: Vec<u16> = match self.scene {
            Scene::Uniform(value) => {
                vec![(value as f64).min(full_scale) as u16; width as usize * height as usize]
            }
            Scene::LinearFlux { counts_per_second } => {
                let peak = counts_per_second
                    * self.controls.exposure_seconds()
                    * self.controls.analogue_gain;
                let span = width.saturating_sub(1).max(1) as f64;
                let row: Vec<u16> = (0..width)
                    .map(|x| {
                        let level = peak * (0.25 + 0.75 * x as f64 / span);
                        level.round().clamp(0.0, full_scale) as u16
                    })
                    .collect();
                row.iter()
                    .copied()
                    .cycle()
                    .take(width as usize * height as usize)
                    .collect()
            }
        };

        encode_pixels(mode.encoding, &pixels)
    }

    fn capture(&self, mode: &SensorMode) -> RawCapture {
        let channels = match mode.encoding {
            RawEncoding::Mono { .. } => 1,
            RawEncoding::Bayer { .. } => 4,
        };
        RawCapture {
            data: self.render(mode),
            exposure_time_us: self.controls.exposure_time_us,
            analogue_gain: self.controls.analogue_gain,
            black_levels: vec![0; channels],
            end_of_exposure: Utc::now()
                + chrono::Duration::microseconds(self.controls.exposure_time_us as i64),
        }
    }
}

impl CaptureDriver for SimulatedDriver {
    fn properties(&self) -> CameraProperties {
        self.properties.clone()
    }

    fn sensor_modes(&self) -> Result<Vec<DriverSensorMode>, CameraError> {
        Ok(self.modes.clone())
    }

    fn configure(&mut self, mode: &SensorMode, queued: bool) -> Result<(), CameraError> {
        if self.started {
            return Err(CameraError::driver("cannot configure while streaming"));
        }
        self.counters.configures.fetch_add(1, Ordering::SeqCst);
        trace!("Simulated camera configured: {} (queued: {})", mode.label, queued);
        self.configured = Some(mode.clone());
        Ok(())
    }

    fn control_limits(&self) -> ControlLimits {
        self.limits
    }

    fn set_controls(&mut self, controls: &ExposureControls) -> Result<(), CameraError> {
        self.counters.control_updates.fetch_add(1, Ordering::SeqCst);
        self.controls = controls.clone();
        Ok(())
    }

    fn start(&mut self) -> Result<(), CameraError> {
        if self.configured.is_none() {
            return Err(CameraError::driver("start before configure"));
        }
        self.counters.starts.fetch_add(1, Ordering::SeqCst);
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CameraError> {
        if self.started {
            self.counters.stops.fetch_add(1, Ordering::SeqCst);
        }
        self.started = false;
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.started
    }

    fn submit(&mut self, notifier: CompletionNotifier) -> Result<CaptureJob, CameraError> {
        if !self.started {
            return Err(CameraError::driver("exposure submitted while stopped"));
        }
        let mode = self
            .configured
            .clone()
            .ok_or_else(|| CameraError::driver("exposure submitted before configure"))?;

        self.next_job += 1;
        let id = self.next_job;
        self.counters.submits.fetch_add(1, Ordering::SeqCst);

        match self.behavior {
            CompletionBehavior::Immediate => {
                self.pending.complete(id, self.capture(&mode));
                self.counters.completed.fetch_add(1, Ordering::SeqCst);
                notifier.notify(CaptureJob::new(id));
            }
            CompletionBehavior::AfterExposure => {
                let capture = self.capture(&mode);
                let pending = Arc::clone(&self.pending);
                let counters = Arc::clone(&self.counters);
                let exposure = Duration::from_micros(capture.exposure_time_us);
                thread::spawn(move || {
                    thread::sleep(exposure);
                    pending.complete(id, capture);
                    counters.completed.fetch_add(1, Ordering::SeqCst);
                    notifier.notify(CaptureJob::new(id));
                });
            }
            CompletionBehavior::Never => {
                debug!("Simulated exposure {} will never complete", id);
            }
        }

        Ok(CaptureJob::new(id))
    }

    fn wait(
        &mut self,
        job: &CaptureJob,
        timeout: Duration,
    ) -> Result<Option<RawCapture>, CameraError> {
        let deadline = Instant::now() + timeout;
        let mut finished = self.pending.finished.lock();
        loop {
            if matches!(&*finished, Some((id, _)) if *id == job.id()) {
                return Ok(finished.take().map(|(_, capture)| capture));
            }
            if self.pending.ready.wait_until(&mut finished, deadline).timed_out() {
                let ready = matches!(&*finished, Some((id, _)) if *id == job.id());
                return Ok(if ready {
                    finished.take().map(|(_, capture)| capture)
                } else {
                    None
                });
            }
        }
    }

    fn close(&mut self) -> Result<(), CameraError> {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        self.started = false;
        self.configured = None;
        Ok(())
    }
}
