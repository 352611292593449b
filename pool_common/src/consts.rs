//! Engine defaults.
//!
//! Values used when the `[engine]` section of the pool configuration omits a
//! field.

/// Sleep between two state polls of a motion, in milliseconds.
pub const DEFAULT_MOTION_LOOP_SLEEP_MS: u64 = 10;

/// Number of state polls between two position reads of a motion.
pub const DEFAULT_MOTION_LOOP_STATES_PER_POSITION: u32 = 10;

/// Sleep between two state polls of an acquisition, in milliseconds.
pub const DEFAULT_ACQ_LOOP_SLEEP_MS: u64 = 10;

/// Number of state polls between two value reads of an acquisition.
pub const DEFAULT_ACQ_LOOP_STATES_PER_VALUE: u32 = 10;

/// Operation id meaning "no operation drives this element".
pub const NO_OPERATION: u64 = 0;

/// Default service name of the pool process.
pub const POOL_SERVICE_NAME: &str = "pool";
