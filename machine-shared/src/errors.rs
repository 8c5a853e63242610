//! Error types for docker-machine.

use std::time::Duration;

/// Result type alias for machine operations.
pub type MachineResult<T> = Result<T, MachineError>;

/// Errors that can occur anywhere between the CLI, the host store and a
/// driver plugin.
#[derive(Debug, thiserror::Error)]
pub enum MachineError {
    // =========================================================================
    // Plugin Errors
    // =========================================================================
    /// No executable for the driver was found on the search path.
    #[error("driver \"{driver}\" not found. Do you have the plugin binary \"docker-machine-driver-{driver}\" accessible in your PATH?")]
    DriverBinaryNotFound { driver: String },

    /// Plugin speaks a different protocol version than this binary.
    #[error("driver binary uses an incompatible API version ({got}), expected {expected}")]
    IncompatibleVersion { expected: i32, got: i32 },

    /// Plugin never wrote its listen address.
    #[error("failed to dial the plugin server in {0:?}")]
    AddressTimeout(Duration),

    /// RPC connection to the plugin is gone.
    #[error("connection to driver plugin is closed")]
    ConnectionClosed,

    /// Plugin process could not be started or served.
    #[error("plugin error: {0}")]
    Plugin(String),

    /// Error returned by the remote side of an RPC call.
    #[error("{0}")]
    Rpc(String),

    // =========================================================================
    // Driver / Lifecycle Errors
    // =========================================================================
    /// Driver operation failed.
    #[error("{0}")]
    Driver(String),

    /// Machine already reports the requested state.
    #[error("Machine \"{name}\" is already {state}.")]
    AlreadyInState { name: String, state: String },

    /// Operation not valid for the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Bounded wait ran out of attempts.
    #[error("operation timed out after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    /// Bad value for a driver flag.
    #[error("invalid flag: {0}")]
    InvalidFlag(String),

    // =========================================================================
    // Store Errors
    // =========================================================================
    /// No record for this host in the store.
    #[error("Host does not exist: \"{0}\"")]
    HostDoesNotExist(String),

    /// A record for this host is already stored.
    #[error("Host already exists: \"{0}\"")]
    HostAlreadyExists(String),

    /// Name not usable as a machine name.
    #[error("Invalid hostname specified. Allowed hostname chars are: 0-9a-zA-Z . - (got \"{0}\")")]
    InvalidHostName(String),

    /// Saving a host failed.
    #[error("error saving host \"{name}\": {source}")]
    Save {
        name: String,
        #[source]
        source: Box<MachineError>,
    },

    /// A schema migration step failed.
    #[error("error migrating host config from version {from} to {to}: {reason}")]
    Migration { from: i32, to: i32, reason: String },

    /// Storage layout problem.
    #[error("storage error: {0}")]
    Storage(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    // =========================================================================
    // I/O Errors
    // =========================================================================
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error (should not happen).
    #[error("internal error: {0}")]
    Internal(String),
}

impl MachineError {
    /// True when the driver's plugin binary is missing.
    pub fn is_binary_not_found(&self) -> bool {
        matches!(self, MachineError::DriverBinaryNotFound { .. })
    }

    /// True when the store has no record for the host.
    pub fn is_host_not_found(&self) -> bool {
        matches!(self, MachineError::HostDoesNotExist(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_not_found_message() {
        let err = MachineError::DriverBinaryNotFound {
            driver: "foo".to_string(),
        };
        assert!(err.is_binary_not_found());
        assert!(err.to_string().contains("docker-machine-driver-foo"));
    }

    #[test]
    fn test_save_error_keeps_host_and_cause() {
        let err = MachineError::Save {
            name: "alpha".to_string(),
            source: Box::new(MachineError::Storage("disk full".to_string())),
        };
        let msg = err.to_string();
        assert!(msg.contains("alpha"));
        assert!(msg.contains("disk full"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_already_in_state_message() {
        let err = MachineError::AlreadyInState {
            name: "dev".to_string(),
            state: "Running".to_string(),
        };
        assert_eq!(err.to_string(), "Machine \"dev\" is already Running.");
    }
}
