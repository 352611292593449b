//! Integration test: backlash correction as a follow-up move.

use super::support::*;
use parking_lot::Mutex;
use pool_common::element::{ElementId, ElementState};
use std::sync::Arc;

// ── Helpers ─────────────────────────────────────────────────────────

/// Motor with 2 units of backlash, approaching targets from below.
fn backlash_motor(script: AxisScript) -> (pool_engine::Pool, std::sync::Arc<pool_engine::EventLog>, CallLog) {
    let log = call_log();
    let ctrl = ScriptedController::new("motctrl01", &log).script(1, script);
    let (pool, events) = pool_with(vec![(1, ctrl)]);
    let mut cfg = motor(1, "mot01", 1, 1);
    cfg.backlash = 2.0;
    pool.add_motor(&cfg).unwrap();
    (pool, events, log)
}

// ── Tests ───────────────────────────────────────────────────────────

#[test]
fn move_down_overshoots_then_corrects() {
    let (pool, events, log) = backlash_motor(AxisScript::default());

    let outcome = pool.move_motor(ElementId(1), -10.0).unwrap().wait().unwrap();

    assert_eq!(outcome.state, ElementState::Idle);
    assert_eq!(outcome.followups, 1);
    assert_eq!(
        calls(&log),
        vec![
            "pre_start_all",
            "pre_start_one(1,-12)",
            "start_one(1,-12)",
            "start_all",
            "pre_start_all",
            "pre_start_one(1,-10)",
            "start_one(1,-10)",
            "start_all",
        ]
    );

    let events = events.events();
    // The intermediate stop is not reported as a state change.
    assert_eq!(
        states_of(&events, 1),
        vec![ElementState::InProgress, ElementState::Idle]
    );
    assert_eq!(final_values(&events, 1), vec![-10.0]);
    // The overshoot position is published before the correction starts.
    assert!(events
        .iter()
        .any(|e| e.element == ElementId(1) && !e.priority && e.new_value() == Some(-12.0)));

    assert!(!pool.element(ElementId(1)).unwrap().has_pending_backlash());
}

#[test]
fn move_up_needs_no_correction() {
    let (pool, _events, log) = backlash_motor(AxisScript::default());

    let outcome = pool.move_motor(ElementId(1), 10.0).unwrap().wait().unwrap();

    assert_eq!(outcome.followups, 0);
    assert_eq!(
        calls(&log),
        vec!["pre_start_all", "pre_start_one(1,10)", "start_one(1,10)", "start_all"]
    );
}

#[test]
fn alarm_discards_correction() {
    let (pool, events, log) = backlash_motor(AxisScript::polls(1).ending_in(ElementState::Alarm));

    let outcome = pool.move_motor(ElementId(1), -10.0).unwrap().wait().unwrap();

    assert_eq!(outcome.state, ElementState::Alarm);
    assert_eq!(outcome.followups, 0);
    assert_eq!(calls(&log).iter().filter(|c| c.starts_with("start_one")).count(), 1);
    assert_eq!(final_values(&events.events(), 1), vec![-12.0]);
    assert!(!pool.element(ElementId(1)).unwrap().has_pending_backlash());
}

#[test]
fn abort_discards_correction() {
    let (pool, _events, log) = backlash_motor(AxisScript::polls(u32::MAX));

    let handle = pool.move_motor(ElementId(1), -10.0).unwrap();
    pool.abort(ElementId(1)).unwrap();
    let outcome = handle.wait().unwrap();

    assert!(outcome.aborted);
    assert!(!calls(&log).contains(&"start_one(1,-10)".to_string()));
    assert!(!pool.element(ElementId(1)).unwrap().has_pending_backlash());
}

#[test]
fn correction_runs_with_backlash_cleared() {
    let (pool, _events, _log) = backlash_motor(AxisScript::default());
    let mot = pool.element(ElementId(1)).unwrap();
    // (pending backlash, driven, state) seen when the overshoot is published.
    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = Arc::clone(&seen);
        let mot = Arc::clone(&mot);
        pool.subscribe(on_event(move |event| {
            if event.element == ElementId(1) && !event.priority && event.new_value() == Some(-12.0) {
                seen.lock()
                    .push((mot.has_pending_backlash(), mot.is_driven(), mot.state()));
            }
        }));
    }

    let outcome = pool.move_motor(ElementId(1), -10.0).unwrap().wait().unwrap();

    assert_eq!(outcome.followups, 1);
    assert_eq!(
        seen.lock().as_slice(),
        &[(false, true, ElementState::InProgress)]
    );
}
