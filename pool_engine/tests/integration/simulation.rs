//! Integration test: the sample pool built from `config/pool.toml` on the
//! simulation controllers.

use pool_common::config::PoolConfig;
use pool_common::controller::ExtraValue;
use pool_common::element::{ElementId, ElementState};
use pool_engine::drivers::register_all_drivers;
use pool_engine::{AcquisitionRequest, DriverRegistry, EngineError, EventLog, Pool};
use std::path::PathBuf;
use std::sync::Arc;

// ── Helpers ─────────────────────────────────────────────────────────

fn sample_config() -> PoolConfig {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../config/pool.toml");
    let mut config = PoolConfig::load_validated(&path).expect("sample config loads");
    config.engine.motion_loop_sleep_ms = 1;
    config.engine.acq_loop_sleep_ms = 1;
    config
}

fn build(config: &PoolConfig) -> (Pool, Arc<EventLog>) {
    let mut drivers = DriverRegistry::new();
    register_all_drivers(&mut drivers);
    let pool = Pool::from_config(config, &drivers).expect("pool builds");
    let events = Arc::new(EventLog::new());
    pool.subscribe(events.clone());
    (pool, events)
}

// ── Tests ───────────────────────────────────────────────────────────

#[test]
fn sample_pool_builds() {
    let (pool, _events) = build(&sample_config());
    assert_eq!(pool.controllers().len(), 2);
    assert_eq!(pool.elements().len(), 6);
    assert_eq!(pool.find("mntgrp01").unwrap().master(), Some(ElementId(10)));
}

#[test]
fn sim_motor_reaches_target() {
    let (pool, events) = build(&sample_config());

    let outcome = pool.move_motor(ElementId(1), 2.0).unwrap().wait().unwrap();

    assert_eq!(outcome.state, ElementState::Idle);
    assert_eq!(outcome.member(ElementId(1)).unwrap().value, Some(2.0));
    assert_eq!(pool.read_value(ElementId(1)).unwrap(), 2.0);
    assert!(events.events().last().unwrap().is_operation_ended());
}

#[test]
fn sim_group_with_backlash_member() {
    let (pool, _events) = build(&sample_config());

    let outcome = pool
        .move_group(ElementId(20), &[0.5, -0.5])
        .unwrap()
        .wait()
        .unwrap();

    assert_eq!(outcome.state, ElementState::Idle);
    assert_eq!(outcome.followups, 1);
    assert!((pool.read_value(ElementId(1)).unwrap() - 0.5).abs() < 1e-9);
    assert!((pool.read_value(ElementId(2)).unwrap() + 0.5).abs() < 1e-9);
}

#[test]
fn sim_soft_limit_ends_in_alarm() {
    let mut config = sample_config();
    config.controllers[0]
        .properties
        .insert("upper_limit".into(), toml::Value::Float(1.0));
    let (pool, _events) = build(&config);

    let outcome = pool.move_motor(ElementId(1), 3.0).unwrap().wait().unwrap();

    assert_eq!(outcome.state, ElementState::Alarm);
    let member = outcome.member(ElementId(1)).unwrap();
    assert_eq!(member.status.as_deref(), Some("upper limit reached"));
    assert_eq!(member.value, Some(1.0));
}

#[test]
fn sim_timer_acquisition() {
    let (pool, events) = build(&sample_config());

    let outcome = pool
        .acquire(ElementId(21), AcquisitionRequest::timer(0.125))
        .unwrap()
        .wait()
        .unwrap();

    assert_eq!(outcome.state, ElementState::Idle);
    assert_eq!(outcome.member(ElementId(10)).unwrap().value, Some(125.0));
    assert_eq!(outcome.member(ElementId(11)).unwrap().value, Some(125.0));
    let ended = events.events().into_iter().filter(|e| e.is_operation_ended()).count();
    assert_eq!(ended, 1);
}

#[test]
fn sim_monitor_acquisition() {
    let (pool, _events) = build(&sample_config());

    let outcome = pool
        .acquire(ElementId(21), AcquisitionRequest::monitor(100.0))
        .unwrap()
        .wait()
        .unwrap();

    assert_eq!(outcome.state, ElementState::Idle);
    assert_eq!(outcome.member(ElementId(10)).unwrap().value, Some(100.0));
}

#[test]
fn sim_extra_attributes() {
    let (pool, _events) = build(&sample_config());

    assert_eq!(
        pool.get_extra_attribute(ElementId(1), "Velocity").unwrap(),
        ExtraValue::Double(50.0)
    );
    pool.set_extra_attribute(ElementId(1), "Velocity", ExtraValue::Double(80.0))
        .unwrap();
    assert_eq!(
        pool.get_extra_attribute(ElementId(1), "velocity").unwrap(),
        ExtraValue::Double(80.0)
    );
    assert_eq!(
        pool.get_extra_attribute(ElementId(10), "Rate").unwrap(),
        ExtraValue::Double(1000.0)
    );
    assert!(matches!(
        pool.get_extra_attribute(ElementId(1), "Color"),
        Err(EngineError::Controller { .. })
    ));
}

#[test]
fn unknown_controller_class() {
    let mut config = sample_config();
    config.controllers[1].class = "NoSuchController".to_string();

    let mut drivers = DriverRegistry::new();
    register_all_drivers(&mut drivers);
    assert!(matches!(
        Pool::from_config(&config, &drivers),
        Err(EngineError::DriverNotFound(class)) if class == "NoSuchController"
    ));
}
