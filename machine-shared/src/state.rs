//! Machine state as reported by drivers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// State of a machine.
///
/// Drivers report it; the host orchestrator only polls it and never tracks
/// transitions on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum State {
    #[default]
    None,
    Running,
    Paused,
    Saved,
    Stopped,
    Stopping,
    Starting,
    Error,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            State::None => "",
            State::Running => "Running",
            State::Paused => "Paused",
            State::Saved => "Saved",
            State::Stopped => "Stopped",
            State::Stopping => "Stopping",
            State::Starting => "Starting",
            State::Error => "Error",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for State {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "None" => Ok(State::None),
            "Running" => Ok(State::Running),
            "Paused" => Ok(State::Paused),
            "Saved" => Ok(State::Saved),
            "Stopped" => Ok(State::Stopped),
            "Stopping" => Ok(State::Stopping),
            "Starting" => Ok(State::Starting),
            "Error" => Ok(State::Error),
            other => Err(format!("unknown machine state: {}", other)),
        }
    }
}
