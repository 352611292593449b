//! Controller implementations.
//!
//! - [`simulation`] - Software motor and counter/timer controllers for
//!   development and testing
//!
//! # Adding New Controllers
//!
//! 1. Create a new submodule under `drivers/`
//! 2. Implement the `Controller` trait from `pool_common::controller`
//! 3. Register its class name in [`register_all_drivers`]

pub mod simulation;

use crate::driver_registry::DriverRegistry;

/// Register every built-in controller class.
pub fn register_all_drivers(registry: &mut DriverRegistry) {
    registry.register(
        simulation::SIM_MOTOR_CLASS,
        simulation::create_motor_controller,
    );
    registry.register(
        simulation::SIM_COUNTER_TIMER_CLASS,
        simulation::create_counter_timer_controller,
    );
}
