//! Protocol and layout constants.
//!
//! Host and plugin binaries are compiled separately, so anything both sides
//! must agree on lives here.

use std::time::Duration;

/// Plugin RPC protocol version. Bumped on any incompatible wire change.
pub const API_VERSION: i32 = 1;

/// Current schema version of a persisted host record.
pub const CONFIG_VERSION: i32 = 3;

pub mod plugin {
    use super::Duration;

    /// Environment variable the host sets before spawning a plugin.
    pub const ENV_KEY: &str = "MACHINE_PLUGIN_TOKEN";

    /// Sentinel value of [`ENV_KEY`].
    pub const ENV_VAL: &str = "42";

    /// Names the core driver to serve when the host binary runs itself as a
    /// plugin.
    pub const ENV_DRIVER_NAME: &str = "MACHINE_PLUGIN_DRIVER_NAME";

    /// Executable name prefix of external driver plugins.
    pub const BINARY_PREFIX: &str = "docker-machine-driver-";

    /// Interval between client heartbeats.
    pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(200);

    /// Server exits when no heartbeat arrives within this window.
    pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Maximum wait for the address handshake line.
    pub const ADDRESS_TIMEOUT: Duration = Duration::from_secs(10);

    /// Loopback address plugin servers bind to.
    pub const LISTEN_ADDR: &str = "127.0.0.1:0";
}

pub mod store {
    /// Directory under the store root that holds one directory per host.
    pub const MACHINES_DIR: &str = "machines";

    /// Directory under the store root that holds the shared certificates.
    pub const CERTS_DIR: &str = "certs";

    /// Rolling log files of the CLI.
    pub const LOGS_DIR: &str = "logs";

    /// Host record file name.
    pub const CONFIG_FILE: &str = "config.json";

    /// Suffix of the pre-migration backup.
    pub const BACKUP_SUFFIX: &str = ".bak";

    /// Advisory lock file inside each host directory.
    pub const LOCK_FILE: &str = ".lock";

    /// Environment variable overriding the store root.
    pub const STORAGE_PATH_ENV: &str = "MACHINE_STORAGE_PATH";
}
