//! Scripted controller and pool fixtures shared by the integration tests.

use parking_lot::Mutex;
use pool_common::config::{ChannelConfig, EngineConfig, GroupConfig, MotorConfig};
use pool_common::controller::{Controller, CtrlCapabilities, CtrlError, StateInfo};
use pool_common::element::{Axis, ControllerId, ElementId, ElementState};
use pool_common::event::{ElementEvent, EventKind};
use pool_engine::{EventLog, NotificationSink, Pool};
use std::collections::HashMap;
use std::sync::Arc;

// ── Scripted controller ─────────────────────────────────────────────

/// Life-cycle calls, in the order the controller received them.
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Behavior of one axis after `start_one`.
#[derive(Debug, Clone, Copy)]
pub struct AxisScript {
    /// State reads answering `InProgress` before the axis stops.
    pub polls: u32,
    /// Value increment per read while running; `0` jumps to the target on stop.
    pub step: f64,
    /// State reported once the axis stops by itself.
    pub final_state: ElementState,
}

impl Default for AxisScript {
    fn default() -> Self {
        Self {
            polls: 2,
            step: 0.0,
            final_state: ElementState::Idle,
        }
    }
}

impl AxisScript {
    pub fn polls(polls: u32) -> Self {
        Self {
            polls,
            ..Self::default()
        }
    }

    /// Counts `step` per read and never stops on its own.
    pub fn counting(step: f64) -> Self {
        Self {
            polls: u32::MAX,
            step,
            ..Self::default()
        }
    }

    pub fn ending_in(mut self, state: ElementState) -> Self {
        self.final_state = state;
        self
    }
}

#[derive(Debug)]
struct AxisRun {
    script: AxisScript,
    value: f64,
    target: f64,
    remaining: u32,
    running: bool,
    state: ElementState,
}

/// Controller answering from per-axis scripts and recording every
/// life-cycle call (reads are not recorded).
pub struct ScriptedController {
    name: String,
    capabilities: CtrlCapabilities,
    log: CallLog,
    scripts: HashMap<Axis, AxisScript>,
    axes: HashMap<Axis, AxisRun>,
    reject: Option<Axis>,
    panic_on_start: Option<Axis>,
    fail_start: Option<Axis>,
    fail_start_all: bool,
    fail_state: Option<Axis>,
}

impl ScriptedController {
    pub fn new(name: &str, log: &CallLog) -> Self {
        Self {
            name: name.to_string(),
            capabilities: CtrlCapabilities::MOTOR | CtrlCapabilities::COUNTER_TIMER,
            log: Arc::clone(log),
            scripts: HashMap::new(),
            axes: HashMap::new(),
            reject: None,
            panic_on_start: None,
            fail_start: None,
            fail_start_all: false,
            fail_state: None,
        }
    }

    pub fn with_capabilities(mut self, capabilities: CtrlCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn script(mut self, axis: Axis, script: AxisScript) -> Self {
        self.scripts.insert(axis, script);
        self
    }

    /// `pre_start_one` answers `false` for `axis`.
    pub fn reject(mut self, axis: Axis) -> Self {
        self.reject = Some(axis);
        self
    }

    pub fn panic_on_start(mut self, axis: Axis) -> Self {
        self.panic_on_start = Some(axis);
        self
    }

    /// `start_one` returns an error for `axis`.
    pub fn fail_start(mut self, axis: Axis) -> Self {
        self.fail_start = Some(axis);
        self
    }

    /// `start_all` returns an error.
    pub fn fail_start_all(mut self) -> Self {
        self.fail_start_all = true;
        self
    }

    /// `state_one` fails for `axis` while it runs.
    pub fn fail_state(mut self, axis: Axis) -> Self {
        self.fail_state = Some(axis);
        self
    }

    fn record(&self, call: String) {
        self.log.lock().push(call);
    }

    fn run(&mut self, axis: Axis) -> Result<&mut AxisRun, CtrlError> {
        self.axes.get_mut(&axis).ok_or(CtrlError::UnknownAxis(axis))
    }
}

impl Controller for ScriptedController {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> CtrlCapabilities {
        self.capabilities
    }

    fn add_device(&mut self, axis: Axis) -> Result<(), CtrlError> {
        let script = self.scripts.get(&axis).copied().unwrap_or_default();
        self.axes.insert(
            axis,
            AxisRun {
                script,
                value: 0.0,
                target: 0.0,
                remaining: 0,
                running: false,
                state: ElementState::Idle,
            },
        );
        Ok(())
    }

    fn delete_device(&mut self, axis: Axis) -> Result<(), CtrlError> {
        self.axes.remove(&axis).map(|_| ()).ok_or(CtrlError::UnknownAxis(axis))
    }

    fn pre_load_all(&mut self) -> Result<(), CtrlError> {
        self.record("pre_load_all".into());
        Ok(())
    }

    fn pre_load_one(&mut self, axis: Axis, value: f64) -> Result<bool, CtrlError> {
        self.record(format!("pre_load_one({axis},{value})"));
        Ok(true)
    }

    fn load_one(&mut self, axis: Axis, value: f64) -> Result<(), CtrlError> {
        self.record(format!("load_one({axis},{value})"));
        Ok(())
    }

    fn load_all(&mut self) -> Result<(), CtrlError> {
        self.record("load_all".into());
        Ok(())
    }

    fn pre_start_all(&mut self) -> Result<(), CtrlError> {
        self.record("pre_start_all".into());
        Ok(())
    }

    fn pre_start_one(&mut self, axis: Axis, target: f64) -> Result<bool, CtrlError> {
        self.record(format!("pre_start_one({axis},{target})"));
        Ok(self.reject != Some(axis))
    }

    fn start_one(&mut self, axis: Axis, target: f64) -> Result<(), CtrlError> {
        self.record(format!("start_one({axis},{target})"));
        if self.panic_on_start == Some(axis) {
            panic!("scripted panic on axis {axis}");
        }
        if self.fail_start == Some(axis) {
            return Err(CtrlError::Hardware("drive not enabled".into()));
        }
        let run = self.run(axis)?;
        run.target = target;
        run.remaining = run.script.polls;
        run.running = true;
        run.state = ElementState::InProgress;
        Ok(())
    }

    fn start_all(&mut self) -> Result<(), CtrlError> {
        self.record("start_all".into());
        if self.fail_start_all {
            return Err(CtrlError::Hardware("trigger line down".into()));
        }
        Ok(())
    }

    fn state_one(&mut self, axis: Axis) -> Result<StateInfo, CtrlError> {
        let fail = self.fail_state == Some(axis);
        let run = self.run(axis)?;
        if fail && run.running {
            return Err(CtrlError::Hardware("encoder lost".into()));
        }
        if run.running {
            if run.remaining > 0 {
                run.remaining -= 1;
                return Ok(StateInfo::with_status(ElementState::InProgress, "moving"));
            }
            run.running = false;
            if run.script.step == 0.0 {
                run.value = run.target;
            }
            run.state = run.script.final_state;
        }
        Ok(StateInfo::new(run.state))
    }

    fn read_one(&mut self, axis: Axis) -> Result<f64, CtrlError> {
        let run = self.run(axis)?;
        if run.running && run.script.step != 0.0 {
            run.value += run.script.step;
        }
        Ok(run.value)
    }

    fn abort_one(&mut self, axis: Axis) -> Result<(), CtrlError> {
        self.record(format!("abort_one({axis})"));
        let run = self.run(axis)?;
        if run.running {
            run.running = false;
            run.state = ElementState::Idle;
        }
        Ok(())
    }
}

// ── Pool fixtures ───────────────────────────────────────────────────

/// Loop settings for tests: 1 ms ticks, a value read on every tick.
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        motion_loop_sleep_ms: 1,
        motion_loop_states_per_position: 1,
        acq_loop_sleep_ms: 1,
        acq_loop_states_per_value: 1,
    }
}

/// Pool with the given controllers and an event log subscribed.
pub fn pool_with(controllers: Vec<(u32, ScriptedController)>) -> (Pool, Arc<EventLog>) {
    let pool = Pool::new(fast_config());
    for (id, ctrl) in controllers {
        pool.add_controller(ControllerId(id), "Scripted", Box::new(ctrl))
            .expect("controller registered");
    }
    let events = Arc::new(EventLog::new());
    pool.subscribe(events.clone());
    (pool, events)
}

pub fn motor(id: u32, name: &str, controller: u32, axis: Axis) -> MotorConfig {
    MotorConfig {
        id: ElementId(id),
        name: name.to_string(),
        controller: ControllerId(controller),
        axis,
        backlash: 0.0,
        sign: 1,
        offset: 0.0,
        step_per_unit: 1.0,
        instability_time_ms: 0,
    }
}

pub fn channel(id: u32, name: &str, controller: u32, axis: Axis) -> ChannelConfig {
    ChannelConfig {
        id: ElementId(id),
        name: name.to_string(),
        controller: ControllerId(controller),
        axis,
    }
}

pub fn group(id: u32, name: &str, members: &[u32], master: Option<u32>) -> GroupConfig {
    GroupConfig {
        id: ElementId(id),
        name: name.to_string(),
        members: members.iter().map(|m| ElementId(*m)).collect(),
        master: master.map(ElementId),
    }
}

// ── Event helpers ───────────────────────────────────────────────────

struct OnEvent<F>(F);

impl<F> NotificationSink for OnEvent<F>
where
    F: Fn(&ElementEvent) + Send + Sync,
{
    fn notify(&self, event: &ElementEvent) {
        (self.0)(event)
    }
}

/// Sink running `f` on every event, on the worker thread.
pub fn on_event<F>(f: F) -> Arc<dyn NotificationSink>
where
    F: Fn(&ElementEvent) + Send + Sync + 'static,
{
    Arc::new(OnEvent(f))
}

/// New states of the state events of `id`, in delivery order.
pub fn states_of(events: &[ElementEvent], id: u32) -> Vec<ElementState> {
    events
        .iter()
        .filter(|e| e.element == ElementId(id))
        .filter_map(|e| e.new_state())
        .collect()
}

/// Index of the first state event of `id` to `state`.
pub fn state_index(events: &[ElementEvent], id: u32, state: ElementState) -> usize {
    events
        .iter()
        .position(|e| e.element == ElementId(id) && e.new_state() == Some(state))
        .unwrap_or_else(|| panic!("no {state} event for #{id}"))
}

/// Index of the "operation ended" event.
pub fn ended_index(events: &[ElementEvent]) -> usize {
    events
        .iter()
        .position(|e| e.is_operation_ended())
        .expect("operation ended event")
}

/// Priority value events of `id`.
pub fn final_values(events: &[ElementEvent], id: u32) -> Vec<f64> {
    events
        .iter()
        .filter(|e| e.element == ElementId(id) && e.priority)
        .filter_map(|e| match &e.kind {
            EventKind::Value { new, .. } => *new,
            _ => None,
        })
        .collect()
}

/// Calls recorded so far.
pub fn calls(log: &CallLog) -> Vec<String> {
    log.lock().clone()
}
