//! Integration test: adding and removing controllers and elements.

use super::support::*;
use pool_common::controller::CtrlCapabilities;
use pool_common::element::{ControllerId, ElementId, ElementKind, ElementState};
use pool_engine::EngineError;

// ── Tests ───────────────────────────────────────────────────────────

#[test]
fn group_kind_follows_members() {
    let log = call_log();
    let (pool, _events) = pool_with(vec![(1, ScriptedController::new("ctrl01", &log))]);
    pool.add_motor(&motor(1, "mot01", 1, 1)).unwrap();
    pool.add_channel(&channel(2, "ct01", 1, 2)).unwrap();

    let mg = pool.add_group(&group(10, "mg01", &[1], None)).unwrap();
    assert_eq!(mg.kind(), ElementKind::MotorGroup);
    let mnt = pool.add_group(&group(11, "mntgrp01", &[2], Some(2))).unwrap();
    assert_eq!(mnt.kind(), ElementKind::MeasurementGroup);

    assert!(matches!(
        pool.add_group(&group(12, "mixed", &[1, 2], None)),
        Err(EngineError::InvalidRequest(_))
    ));
    // Motor groups have no master.
    assert!(pool.add_group(&group(13, "mg02", &[1], Some(1))).is_err());
}

#[test]
fn duplicates_refused() {
    let log = call_log();
    let (pool, _events) = pool_with(vec![(1, ScriptedController::new("ctrl01", &log))]);
    pool.add_motor(&motor(1, "mot01", 1, 1)).unwrap();

    // Same axis.
    assert!(matches!(
        pool.add_motor(&motor(2, "mot02", 1, 1)),
        Err(EngineError::AlreadyRegistered(_))
    ));
    // Same name, other axis: the device added on the controller is removed again.
    assert!(matches!(
        pool.add_motor(&motor(3, "mot01", 1, 2)),
        Err(EngineError::AlreadyRegistered(_))
    ));
    pool.add_motor(&motor(3, "mot03", 1, 2)).unwrap();

    assert!(matches!(
        pool.add_controller(
            ControllerId(1),
            "Scripted",
            Box::new(ScriptedController::new("ctrl02", &log))
        ),
        Err(EngineError::AlreadyRegistered(_))
    ));
}

#[test]
fn capability_checked_on_add() {
    let log = call_log();
    let ctrl = ScriptedController::new("ctctrl01", &log)
        .with_capabilities(CtrlCapabilities::COUNTER_TIMER);
    let (pool, _events) = pool_with(vec![(1, ctrl)]);

    assert!(matches!(
        pool.add_motor(&motor(1, "mot01", 1, 1)),
        Err(EngineError::InvalidRequest(_))
    ));
    pool.add_channel(&channel(1, "ct01", 1, 1)).unwrap();
}

#[test]
fn delete_element_rules() {
    let log = call_log();
    let ctrl = ScriptedController::new("ctrl01", &log).script(2, AxisScript::polls(u32::MAX));
    let (pool, _events) = pool_with(vec![(1, ctrl)]);
    pool.add_motor(&motor(1, "mot01", 1, 1)).unwrap();
    pool.add_motor(&motor(2, "mot02", 1, 2)).unwrap();
    pool.add_group(&group(10, "mg01", &[1], None)).unwrap();

    // Grouped.
    assert!(matches!(
        pool.delete_element(ElementId(1)),
        Err(EngineError::InvalidRequest(_))
    ));

    // Driven.
    let handle = pool.move_motor(ElementId(2), 3.0).unwrap();
    assert!(matches!(pool.delete_element(ElementId(2)), Err(EngineError::Busy(_))));
    handle.abort();
    handle.wait().unwrap();

    pool.delete_element(ElementId(10)).unwrap();
    pool.delete_element(ElementId(1)).unwrap();
    assert!(pool.find("mot01").is_none());
    assert!(matches!(
        pool.element(ElementId(1)),
        Err(EngineError::UnknownElement(_))
    ));

    // The axis is free again.
    pool.add_motor(&motor(4, "mot04", 1, 1)).unwrap();
    assert_eq!(pool.element(ElementId(4)).unwrap().state(), ElementState::Idle);
}
