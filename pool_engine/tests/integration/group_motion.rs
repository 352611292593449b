//! Integration test: motor group motion across controllers.

use super::support::*;
use pool_common::element::{ElementId, ElementState};
use pool_engine::EngineError;

// ── Tests ───────────────────────────────────────────────────────────

#[test]
fn shared_controller_started_once() {
    let log = call_log();
    let (pool, events) = pool_with(vec![(1, ScriptedController::new("motctrl01", &log))]);
    pool.add_motor(&motor(1, "mot01", 1, 1)).unwrap();
    pool.add_motor(&motor(2, "mot02", 1, 2)).unwrap();
    pool.add_group(&group(10, "mg01", &[1, 2], None)).unwrap();

    let outcome = pool.move_group(ElementId(10), &[1.0, 2.0]).unwrap().wait().unwrap();

    assert_eq!(outcome.state, ElementState::Idle);
    assert_eq!(
        calls(&log),
        vec![
            "pre_start_all",
            "pre_start_one(1,1)",
            "start_one(1,1)",
            "pre_start_one(2,2)",
            "start_one(2,2)",
            "start_all",
        ]
    );

    let events = events.events();
    assert_eq!(
        states_of(&events, 10),
        vec![ElementState::InProgress, ElementState::Idle]
    );
    assert_eq!(final_values(&events, 1), vec![1.0]);
    assert_eq!(final_values(&events, 2), vec![2.0]);
    assert_eq!(outcome.member(ElementId(2)).unwrap().value, Some(2.0));
}

#[test]
fn early_member_reported_before_group() {
    let log_a = call_log();
    let log_b = call_log();
    let (pool, events) = pool_with(vec![
        (1, ScriptedController::new("motctrl01", &log_a).script(1, AxisScript::polls(1))),
        (2, ScriptedController::new("motctrl02", &log_b).script(1, AxisScript::polls(10))),
    ]);
    pool.add_motor(&motor(1, "fast", 1, 1)).unwrap();
    pool.add_motor(&motor(2, "slow", 2, 1)).unwrap();
    pool.add_group(&group(10, "mg01", &[1, 2], None)).unwrap();

    pool.move_group(ElementId(10), &[1.0, 1.0]).unwrap().wait().unwrap();

    let events = events.events();
    let fast_idle = state_index(&events, 1, ElementState::Idle);
    let slow_idle = state_index(&events, 2, ElementState::Idle);
    let group_idle = state_index(&events, 10, ElementState::Idle);
    assert!(fast_idle < slow_idle);
    assert!(slow_idle < group_idle);
    assert!(group_idle < ended_index(&events));

    // Both members and the group flip before any completion.
    let last_flip = [1, 2, 10]
        .iter()
        .map(|id| state_index(&events, *id, ElementState::InProgress))
        .max()
        .unwrap();
    assert!(last_flip < fast_idle);

    // One state event per transition.
    assert_eq!(states_of(&events, 1).len(), 2);
    assert_eq!(states_of(&events, 2).len(), 2);

    // Each controller got its own start sequence.
    assert_eq!(calls(&log_a).first().map(String::as_str), Some("pre_start_all"));
    assert_eq!(calls(&log_b).last().map(String::as_str), Some("start_all"));
}

#[test]
fn member_in_alarm_aborts_the_others() {
    let log = call_log();
    let ctrl = ScriptedController::new("motctrl01", &log)
        .script(1, AxisScript::polls(1).ending_in(ElementState::Alarm))
        .script(2, AxisScript::polls(u32::MAX));
    let (pool, _events) = pool_with(vec![(1, ctrl)]);
    pool.add_motor(&motor(1, "mot01", 1, 1)).unwrap();
    pool.add_motor(&motor(2, "mot02", 1, 2)).unwrap();
    pool.add_group(&group(10, "mg01", &[1, 2], None)).unwrap();

    let outcome = pool.move_group(ElementId(10), &[1.0, 1.0]).unwrap().wait().unwrap();

    assert!(calls(&log).contains(&"abort_one(2)".to_string()));
    assert!(!calls(&log).contains(&"abort_one(1)".to_string()));
    assert_eq!(outcome.state, ElementState::Alarm);
}

#[test]
fn member_busy_in_single_motion() {
    let log = call_log();
    let ctrl = ScriptedController::new("motctrl01", &log).script(1, AxisScript::polls(u32::MAX));
    let (pool, _events) = pool_with(vec![(1, ctrl)]);
    pool.add_motor(&motor(1, "mot01", 1, 1)).unwrap();
    pool.add_motor(&motor(2, "mot02", 1, 2)).unwrap();
    pool.add_group(&group(10, "mg01", &[1, 2], None)).unwrap();

    let single = pool.move_motor(ElementId(1), 5.0).unwrap();
    let err = pool.move_group(ElementId(10), &[1.0, 1.0]).unwrap_err();
    assert_eq!(err, EngineError::Busy("mot01".to_string()));

    // Refused before any life-cycle call of the group.
    assert_eq!(calls(&log).iter().filter(|c| *c == "pre_start_all").count(), 1);

    single.abort();
    single.wait().unwrap();
}

#[test]
fn wrong_number_of_positions() {
    let log = call_log();
    let (pool, _events) = pool_with(vec![(1, ScriptedController::new("motctrl01", &log))]);
    pool.add_motor(&motor(1, "mot01", 1, 1)).unwrap();
    pool.add_group(&group(10, "mg01", &[1], None)).unwrap();

    assert!(matches!(
        pool.move_group(ElementId(10), &[1.0, 2.0]),
        Err(EngineError::InvalidRequest(_))
    ));
}
