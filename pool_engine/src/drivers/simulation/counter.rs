//! Simulated counter/timer controller.
//!
//! Every channel counts at its own rate. A positive start value is an
//! integration time in seconds; a negative one is a monitor count, and the
//! channel runs until it has counted that much.

use pool_common::config::ControllerConfig;
use pool_common::controller::{Controller, CtrlCapabilities, CtrlError, ExtraValue, StateInfo};
use pool_common::element::{Axis, ElementState};
use std::collections::HashMap;
use std::time::Instant;
use tracing::debug;

const DEFAULT_RATE: f64 = 1000.0;

#[derive(Debug, Clone)]
struct SimChannel {
    /// Counts per second.
    rate: f64,
    counts: f64,
    /// Start value of the running acquisition.
    target: f64,
    started: Option<Instant>,
}

impl SimChannel {
    fn new(rate: f64) -> Self {
        Self {
            rate,
            counts: 0.0,
            target: 0.0,
            started: None,
        }
    }

    /// Count up to `now`, stopping at the end of the acquisition.
    fn advance(&mut self, now: Instant) {
        let Some(started) = self.started else {
            return;
        };
        let elapsed = now.saturating_duration_since(started).as_secs_f64();
        if self.target > 0.0 {
            if elapsed >= self.target {
                self.counts = self.rate * self.target;
                self.started = None;
            } else {
                self.counts = self.rate * elapsed;
            }
        } else {
            let count = -self.target;
            self.counts = (self.rate * elapsed).min(count);
            if self.counts >= count {
                self.started = None;
            }
        }
    }

    fn is_counting(&self) -> bool {
        self.started.is_some()
    }
}

/// Simulated counter/timer controller.
///
/// Property: `rate` (counts per second of new channels).
pub struct SimCounterTimerController {
    name: String,
    rate: f64,
    channels: HashMap<Axis, SimChannel>,
    /// Value loaded on the master channel.
    loaded: Option<(Axis, f64)>,
}

impl SimCounterTimerController {
    /// Controller with no channel.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            rate: DEFAULT_RATE,
            channels: HashMap::new(),
            loaded: None,
        }
    }

    /// Controller built from its configuration properties.
    pub fn from_config(config: &ControllerConfig) -> Result<Self, CtrlError> {
        let mut ctrl = Self::new(&config.name);
        if let Some(rate) = config.property_f64("rate") {
            if !(rate.is_finite() && rate > 0.0) {
                return Err(CtrlError::InvalidValue(format!("rate must be positive, got {rate}")));
            }
            ctrl.rate = rate;
        }
        Ok(ctrl)
    }

    fn channel_mut(&mut self, axis: Axis) -> Result<&mut SimChannel, CtrlError> {
        let ch = self.channels.get_mut(&axis).ok_or(CtrlError::UnknownAxis(axis))?;
        ch.advance(Instant::now());
        Ok(ch)
    }
}

impl Controller for SimCounterTimerController {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> CtrlCapabilities {
        CtrlCapabilities::COUNTER_TIMER | CtrlCapabilities::LOADABLE
    }

    fn add_device(&mut self, axis: Axis) -> Result<(), CtrlError> {
        debug!("{}: add channel {}", self.name, axis);
        self.channels.insert(axis, SimChannel::new(self.rate));
        Ok(())
    }

    fn delete_device(&mut self, axis: Axis) -> Result<(), CtrlError> {
        self.channels.remove(&axis).map(|_| ()).ok_or(CtrlError::UnknownAxis(axis))
    }

    fn pre_load_all(&mut self) -> Result<(), CtrlError> {
        self.loaded = None;
        Ok(())
    }

    fn pre_load_one(&mut self, axis: Axis, value: f64) -> Result<bool, CtrlError> {
        Ok(self.channels.contains_key(&axis) && value.is_finite() && value != 0.0)
    }

    fn load_one(&mut self, axis: Axis, value: f64) -> Result<(), CtrlError> {
        self.loaded = Some((axis, value));
        Ok(())
    }

    fn start_one(&mut self, axis: Axis, target: f64) -> Result<(), CtrlError> {
        if target == 0.0 || !target.is_finite() {
            return Err(CtrlError::InvalidValue(format!("start value {target}")));
        }
        let ch = self.channel_mut(axis)?;
        ch.counts = 0.0;
        ch.target = target;
        ch.started = Some(Instant::now());
        Ok(())
    }

    fn state_one(&mut self, axis: Axis) -> Result<StateInfo, CtrlError> {
        let ch = self.channel_mut(axis)?;
        Ok(if ch.is_counting() {
            StateInfo::with_status(ElementState::InProgress, "counting")
        } else {
            StateInfo::new(ElementState::Idle)
        })
    }

    fn read_one(&mut self, axis: Axis) -> Result<f64, CtrlError> {
        Ok(self.channel_mut(axis)?.counts)
    }

    fn abort_one(&mut self, axis: Axis) -> Result<(), CtrlError> {
        let ch = self.channel_mut(axis)?;
        ch.started = None;
        Ok(())
    }

    fn get_extra_attribute(&self, axis: Axis, name: &str) -> Result<ExtraValue, CtrlError> {
        let ch = self.channels.get(&axis).ok_or(CtrlError::UnknownAxis(axis))?;
        if name.eq_ignore_ascii_case("rate") {
            Ok(ExtraValue::Double(ch.rate))
        } else {
            Err(CtrlError::NotSupported(format!("extra attribute '{name}'")))
        }
    }

    fn set_extra_attribute(
        &mut self,
        axis: Axis,
        name: &str,
        value: ExtraValue,
    ) -> Result<(), CtrlError> {
        if !name.eq_ignore_ascii_case("rate") {
            return Err(CtrlError::NotSupported(format!("extra attribute '{name}'")));
        }
        let rate = value
            .as_f64()
            .filter(|r| r.is_finite() && *r > 0.0)
            .ok_or_else(|| CtrlError::InvalidValue(format!("rate {value}")))?;
        self.channel_mut(axis)?.rate = rate;
        Ok(())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
