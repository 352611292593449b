//! Simulation controllers.
//!
//! Software controllers for development and testing without hardware.
//! Both advance their axes from the wall clock each time they are queried.

mod counter;
mod motor;

pub use counter::SimCounterTimerController;
pub use motor::SimMotorController;

use pool_common::config::ControllerConfig;
use pool_common::controller::{Controller, CtrlError};

/// Class name of [`SimMotorController`].
pub const SIM_MOTOR_CLASS: &str = "SimMotorController";
/// Class name of [`SimCounterTimerController`].
pub const SIM_COUNTER_TIMER_CLASS: &str = "SimCounterTimerController";

/// Factory of [`SimMotorController`].
pub fn create_motor_controller(config: &ControllerConfig) -> Result<Box<dyn Controller>, CtrlError> {
    Ok(Box::new(SimMotorController::from_config(config)?))
}

/// Factory of [`SimCounterTimerController`].
pub fn create_counter_timer_controller(
    config: &ControllerConfig,
) -> Result<Box<dyn Controller>, CtrlError> {
    Ok(Box::new(SimCounterTimerController::from_config(config)?))
}
