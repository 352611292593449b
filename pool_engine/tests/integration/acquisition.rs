//! Integration test: channel and measurement group acquisition.

use super::support::*;
use pool_common::controller::CtrlCapabilities;
use pool_common::element::{ElementId, ElementState};
use pool_engine::{AcquisitionRequest, EngineError};

// ── Helpers ─────────────────────────────────────────────────────────

fn loadable(name: &str, log: &CallLog) -> ScriptedController {
    ScriptedController::new(name, log)
        .with_capabilities(CtrlCapabilities::COUNTER_TIMER | CtrlCapabilities::LOADABLE)
}

// ── Tests ───────────────────────────────────────────────────────────

#[test]
fn timer_group_loads_master_and_starts_it_last() {
    let log = call_log();
    let ctrl = loadable("ctctrl01", &log)
        .script(1, AxisScript::polls(6))
        .script(2, AxisScript::polls(2));
    let (pool, events) = pool_with(vec![(1, ctrl)]);
    pool.add_channel(&channel(10, "ct01", 1, 1)).unwrap();
    pool.add_channel(&channel(11, "ct02", 1, 2)).unwrap();
    pool.add_group(&group(20, "mntgrp01", &[10, 11], Some(10))).unwrap();

    let outcome = pool
        .acquire(ElementId(20), AcquisitionRequest::timer(5.0))
        .unwrap()
        .wait()
        .unwrap();

    assert_eq!(outcome.state, ElementState::Idle);
    assert_eq!(
        calls(&log),
        vec![
            "pre_load_all",
            "pre_load_one(1,5)",
            "load_one(1,5)",
            "load_all",
            "pre_start_all",
            "pre_start_one(2,5)",
            "start_one(2,5)",
            "start_all",
            "pre_start_one(1,5)",
            "start_one(1,5)",
            "start_all",
        ]
    );

    let events = events.events();
    let slave_idle = state_index(&events, 11, ElementState::Idle);
    let master_idle = state_index(&events, 10, ElementState::Idle);
    let group_idle = state_index(&events, 20, ElementState::Idle);
    assert!(slave_idle < master_idle);
    assert!(master_idle < group_idle);
    assert!(group_idle < ended_index(&events));

    // The master flips last.
    assert!(
        state_index(&events, 11, ElementState::InProgress)
            < state_index(&events, 10, ElementState::InProgress)
    );
}

#[test]
fn monitor_threshold_stops_every_channel() {
    let log = call_log();
    let ctrl = loadable("ctctrl01", &log)
        .script(1, AxisScript::counting(10.0))
        .script(2, AxisScript::counting(1.0));
    let (pool, events) = pool_with(vec![(1, ctrl)]);
    pool.add_channel(&channel(10, "mon01", 1, 1)).unwrap();
    pool.add_channel(&channel(11, "ct01", 1, 2)).unwrap();
    pool.add_group(&group(20, "mntgrp01", &[10, 11], Some(10))).unwrap();

    let outcome = pool
        .acquire(ElementId(20), AcquisitionRequest::monitor(50.0))
        .unwrap()
        .wait()
        .unwrap();

    let log = calls(&log);
    // The master is loaded with the negated count.
    assert!(log.contains(&"pre_load_one(1,-50)".to_string()));
    assert!(log.contains(&"abort_one(1)".to_string()));
    assert!(log.contains(&"abort_one(2)".to_string()));
    assert_eq!(log.iter().filter(|c| c.starts_with("abort_one")).count(), 2);

    assert_eq!(outcome.state, ElementState::Idle);
    assert!(!outcome.aborted);
    let master = outcome.member(ElementId(10)).unwrap().value.unwrap();
    assert!(master >= 50.0);
    assert_eq!(final_values(&events.events(), 10).len(), 1);
}

#[test]
fn single_channel_is_its_own_master() {
    let log = call_log();
    let (pool, events) = pool_with(vec![(1, loadable("ctctrl01", &log))]);
    pool.add_channel(&channel(1, "ct01", 1, 1)).unwrap();

    let outcome = pool
        .acquire(ElementId(1), AcquisitionRequest::timer(1.0))
        .unwrap()
        .wait()
        .unwrap();

    assert_eq!(outcome.state, ElementState::Idle);
    assert_eq!(
        calls(&log),
        vec![
            "pre_load_all",
            "pre_load_one(1,1)",
            "load_one(1,1)",
            "load_all",
            "pre_start_all",
            "pre_start_one(1,1)",
            "start_one(1,1)",
            "start_all",
        ]
    );
    assert_eq!(final_values(&events.events(), 1), vec![1.0]);
}

#[test]
fn no_load_step_without_loadable_capability() {
    let log = call_log();
    let ctrl = ScriptedController::new("ctctrl01", &log)
        .with_capabilities(CtrlCapabilities::COUNTER_TIMER);
    let (pool, _events) = pool_with(vec![(1, ctrl)]);
    pool.add_channel(&channel(1, "ct01", 1, 1)).unwrap();

    pool.acquire(ElementId(1), AcquisitionRequest::timer(2.0))
        .unwrap()
        .wait()
        .unwrap();

    assert!(!calls(&log).iter().any(|c| c.contains("load")));
}

#[test]
fn monitor_without_master_refused() {
    let log = call_log();
    let (pool, _events) = pool_with(vec![(1, loadable("ctctrl01", &log))]);
    pool.add_channel(&channel(10, "ct01", 1, 1)).unwrap();
    pool.add_channel(&channel(11, "ct02", 1, 2)).unwrap();
    pool.add_group(&group(20, "mntgrp01", &[10, 11], None)).unwrap();

    assert!(matches!(
        pool.acquire(ElementId(20), AcquisitionRequest::monitor(100.0)),
        Err(EngineError::InvalidRequest(_))
    ));
    // A master given with the request is enough.
    let handle = pool
        .acquire(
            ElementId(20),
            AcquisitionRequest::timer(1.0).with_master(ElementId(11)),
        )
        .unwrap();
    assert_eq!(handle.wait().unwrap().state, ElementState::Idle);
    assert!(calls(&log).contains(&"load_one(2,1)".to_string()));
}

#[test]
fn invalid_integration_time() {
    let log = call_log();
    let (pool, _events) = pool_with(vec![(1, loadable("ctctrl01", &log))]);
    pool.add_channel(&channel(1, "ct01", 1, 1)).unwrap();

    assert!(pool.acquire(ElementId(1), AcquisitionRequest::timer(0.0)).is_err());
    assert!(calls(&log).is_empty());
}

#[test]
fn channel_cannot_be_moved() {
    let log = call_log();
    let (pool, events) = pool_with(vec![(1, loadable("ctctrl01", &log))]);
    pool.add_channel(&channel(1, "ct01", 1, 1)).unwrap();

    assert!(pool.move_motor(ElementId(1), 1.0).is_err());
    assert!(calls(&log).is_empty());
    assert!(events.events().is_empty());
}
