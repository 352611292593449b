//! Integration test: notification sinks that call back into the pool.

use super::support::*;
use parking_lot::Mutex;
use pool_common::element::{ElementId, ElementState};
use pool_engine::{EngineError, OperationHandle, Pool};
use std::sync::{Arc, Weak};

// ── Helpers ─────────────────────────────────────────────────────────

type Started = Arc<Mutex<Vec<Result<OperationHandle, EngineError>>>>;

/// On the first `InProgress` event of `watched`, the sink runs `start`
/// against the pool and keeps the result.
fn start_on_progress<F>(pool: &Arc<Pool>, watched: u32, start: F) -> Started
where
    F: Fn(&Pool) -> Result<OperationHandle, EngineError> + Send + Sync + 'static,
{
    let started: Started = Arc::new(Mutex::new(Vec::new()));
    let weak: Weak<Pool> = Arc::downgrade(pool);
    let results = Arc::clone(&started);
    pool.subscribe(on_event(move |event| {
        if event.element != ElementId(watched)
            || event.new_state() != Some(ElementState::InProgress)
            || !results.lock().is_empty()
        {
            return;
        }
        if let Some(pool) = weak.upgrade() {
            let result = start(&pool);
            results.lock().push(result);
        }
    }));
    started
}

fn two_motors() -> (Arc<Pool>, CallLog) {
    let log = call_log();
    let ctrl = ScriptedController::new("motctrl01", &log)
        .script(1, AxisScript::polls(3))
        .script(2, AxisScript::polls(3));
    let (pool, _events) = pool_with(vec![(1, ctrl)]);
    pool.add_motor(&motor(1, "mot01", 1, 1)).unwrap();
    pool.add_motor(&motor(2, "mot02", 1, 2)).unwrap();
    pool.add_group(&group(10, "mg01", &[1, 2], None)).unwrap();
    (Arc::new(pool), log)
}

fn take(started: &Started) -> Result<OperationHandle, EngineError> {
    let mut results = started.lock();
    assert_eq!(results.len(), 1, "sink ran {} time(s)", results.len());
    results.remove(0)
}

// ── Tests ───────────────────────────────────────────────────────────

#[test]
fn sink_restarting_running_motor_gets_busy() {
    let (pool, _log) = two_motors();
    let started = start_on_progress(&pool, 1, |pool| pool.move_motor(ElementId(1), 5.0));

    let outcome = pool.move_motor(ElementId(1), 2.0).unwrap().wait().unwrap();

    assert_eq!(outcome.state, ElementState::Idle);
    assert_eq!(take(&started).unwrap_err(), EngineError::Busy("mot01".into()));
}

#[test]
fn sink_restarting_running_group_gets_busy() {
    let (pool, _log) = two_motors();
    let started =
        start_on_progress(&pool, 10, |pool| pool.move_group(ElementId(10), &[5.0, 5.0]));

    let outcome = pool
        .move_group(ElementId(10), &[1.0, 2.0])
        .unwrap()
        .wait()
        .unwrap();

    assert_eq!(outcome.state, ElementState::Idle);
    assert_eq!(take(&started).unwrap_err(), EngineError::Busy("mg01".into()));
}

#[test]
fn sink_can_start_an_independent_motion() {
    let (pool, log) = two_motors();
    let started = start_on_progress(&pool, 1, |pool| pool.move_motor(ElementId(2), 7.0));

    let first = pool.move_motor(ElementId(1), 2.0).unwrap().wait().unwrap();
    let second = take(&started).unwrap().wait().unwrap();

    assert_eq!(first.state, ElementState::Idle);
    assert_eq!(second.member(ElementId(2)).unwrap().value, Some(7.0));
    assert!(calls(&log).contains(&"start_one(2,7)".to_string()));
}
