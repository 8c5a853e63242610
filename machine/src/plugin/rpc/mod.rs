//! Driver RPC between the host and plugin processes.

mod client;
mod client_driver;
pub mod protocol;
mod server;

pub use client::RpcClient;
pub use client_driver::{RpcClientDriver, WeakRpcClientDriver};
pub use server::{RpcServerDriver, serve_driver};
