//! Machine provisioning with out-of-process driver plugins.
//!
//! ```text
//! CLI ── LocalClient ── Filestore ── <root>/machines/<name>/config.json
//!            │
//!            └─ DriverFactory ── LocalBinaryPlugin (child process)
//!                                   │  stdout line 1: 127.0.0.1:<port>
//!                                   ▼
//!                 RpcClientDriver ══ TCP ══ RpcServerDriver ── concrete Driver
//! ```
//!
//! Drivers never run inside the host process. Each one is served by a
//! plugin process that owns the concrete implementation; the host talks to
//! it through [`plugin::rpc::RpcClientDriver`], which implements the same
//! [`drivers::Driver`] trait.

pub mod client;
pub mod drivers;
pub mod host;
pub mod options;
pub mod persist;
pub mod plugin;
pub mod util;

pub use client::LocalClient;
pub use drivers::{Driver, DriverRegistry};
pub use host::Host;
pub use machine_shared::errors::{MachineError, MachineResult};
pub use machine_shared::State;
pub use options::MachineOptions;
