pub mod logging;

pub use logging::{LogGuard, init_logging, init_plugin_logging};
