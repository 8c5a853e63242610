//! Types shared between the docker-machine host process and driver plugins.
//!
//! Both sides of the plugin boundary link this crate so that error kinds,
//! machine states and protocol constants agree across independently built
//! binaries.

pub mod constants;
pub mod errors;
pub mod state;

pub use errors::{MachineError, MachineResult};
pub use state::State;
