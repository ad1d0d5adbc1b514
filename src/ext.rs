//! Public extension contracts for collaborators the engine consults but does not own.
//!
//! The circuit-breaker/flow-control gate is the only one today: services plug their own
//! implementation into [`LocalPolicy`], or use one of the simple built-ins.

pub mod local_policy;

pub use local_policy::*;
