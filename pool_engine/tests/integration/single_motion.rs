//! Integration test: single motor motion, start to completion.

use super::support::*;
use pool_common::element::{ElementId, ElementState};
use pool_engine::EngineError;

// ── Helpers ─────────────────────────────────────────────────────────

fn one_motor(script: AxisScript) -> (pool_engine::Pool, std::sync::Arc<pool_engine::EventLog>, CallLog) {
    let log = call_log();
    let ctrl = ScriptedController::new("motctrl01", &log).script(1, script);
    let (pool, events) = pool_with(vec![(1, ctrl)]);
    pool.add_motor(&motor(1, "mot01", 1, 1)).unwrap();
    (pool, events, log)
}

// ── Tests ───────────────────────────────────────────────────────────

#[test]
fn move_zero_to_ten() {
    let (pool, events, log) = one_motor(AxisScript::polls(2));

    let handle = pool.move_motor(ElementId(1), 10.0).unwrap();
    let outcome = handle.wait().unwrap();

    assert_eq!(outcome.state, ElementState::Idle);
    assert!(!outcome.aborted);
    assert_eq!(
        calls(&log),
        vec!["pre_start_all", "pre_start_one(1,10)", "start_one(1,10)", "start_all"]
    );

    let events = events.events();
    assert_eq!(
        states_of(&events, 1),
        vec![ElementState::InProgress, ElementState::Idle]
    );
    assert_eq!(final_values(&events, 1), vec![10.0]);

    // The final value precedes the final state, which precedes the end.
    let final_value = events.iter().position(|e| e.priority).unwrap();
    let idle = state_index(&events, 1, ElementState::Idle);
    assert!(final_value < idle);
    assert!(idle < ended_index(&events));
    assert_eq!(ended_index(&events), events.len() - 1);

    let element = pool.element(ElementId(1)).unwrap();
    assert!(!element.is_driven());
    assert_eq!(element.state(), ElementState::Idle);
    assert_eq!(element.value(), Some(10.0));
}

#[test]
fn priority_value_is_last_value_event() {
    let (pool, events, _log) = one_motor(AxisScript::polls(5));
    pool.move_motor(ElementId(1), 3.0).unwrap().wait().unwrap();

    let events = events.events();
    let last_value = events.iter().rposition(|e| e.is_value()).unwrap();
    assert!(events[last_value].priority);
    assert_eq!(events.iter().filter(|e| e.priority).count(), 1);
}

#[test]
fn user_position_converted_to_dial() {
    let log = call_log();
    let ctrl = ScriptedController::new("motctrl01", &log);
    let (pool, events) = pool_with(vec![(1, ctrl)]);
    let mut cfg = motor(1, "mot01", 1, 1);
    cfg.sign = -1;
    cfg.offset = 5.0;
    pool.add_motor(&cfg).unwrap();

    pool.move_motor(ElementId(1), 2.0).unwrap().wait().unwrap();

    // dial = (2 - 5) / -1 = 3
    assert!(calls(&log).contains(&"start_one(1,3)".to_string()));
    // Published values are user positions.
    assert_eq!(final_values(&events.events(), 1), vec![2.0]);
}

#[test]
fn motion_ending_in_alarm() {
    let (pool, events, _log) = one_motor(AxisScript::polls(1).ending_in(ElementState::Alarm));

    let outcome = pool.move_motor(ElementId(1), 4.0).unwrap().wait().unwrap();

    assert_eq!(outcome.state, ElementState::Alarm);
    assert_eq!(
        states_of(&events.events(), 1),
        vec![ElementState::InProgress, ElementState::Alarm]
    );
}

#[test]
fn second_move_while_moving_is_busy() {
    let (pool, _events, _log) = one_motor(AxisScript::polls(u32::MAX));

    let handle = pool.move_motor(ElementId(1), 10.0).unwrap();
    let second = pool.move_motor(ElementId(1), 20.0);
    assert!(matches!(second, Err(EngineError::Busy(_))));

    pool.abort(ElementId(1)).unwrap();
    let outcome = handle.wait().unwrap();
    assert!(outcome.aborted);

    // Free again once the first operation ended.
    let third = pool.move_motor(ElementId(1), 1.0).unwrap();
    third.abort();
    third.wait().unwrap();
}

#[test]
fn move_unknown_element() {
    let (pool, _events, _log) = one_motor(AxisScript::default());
    assert!(matches!(
        pool.move_motor(ElementId(99), 1.0),
        Err(EngineError::UnknownElement(_))
    ));
}

#[test]
fn read_value_outside_operation() {
    let (pool, _events, _log) = one_motor(AxisScript::polls(0));
    pool.move_motor(ElementId(1), 7.0).unwrap().wait().unwrap();
    assert_eq!(pool.read_value(ElementId(1)).unwrap(), 7.0);
}
