//! Wire protocol between the host and a driver plugin.
//!
//! # Protocol Format
//!
//! - **Transport**: TCP on the loopback interface
//! - **Encoding**: JSON
//! - **Framing**: Newline-delimited (each message ends with `\n`)
//!
//! Every request carries an id that its response echoes, so a heartbeat
//! can be answered while a long `Create` is still running on the same
//! connection. Callers still see plain call/response semantics.
//!
//! ```text
//! Host                                   Plugin
//!   |  {"Id":7,"Call":{"Method":"Create"}}\n  |
//!   |---------------------------------------->|
//!   |  {"Id":8,"Call":{"Method":"Heartbeat"}}\n
//!   |---------------------------------------->|
//!   |  {"Id":8,"Reply":{"Status":"Ok",...}}\n |
//!   |<----------------------------------------|
//!   |  {"Id":7,"Reply":{"Status":"Ok",...}}\n |
//!   |<----------------------------------------|
//! ```

use crate::drivers::RpcFlags;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// One remote call: a driver method or a control method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "Method", content = "Params")]
pub enum Call {
    // Control methods
    GetVersion,
    Heartbeat,
    Close,
    GetConfigRaw,
    SetConfigRaw(RawConfig),
    SetConfigFromFlags(RpcFlags),
    GetCreateFlags,

    // Driver methods
    DriverName,
    Create,
    #[serde(rename = "GetIP")]
    GetIp,
    GetMachineName,
    #[serde(rename = "GetSSHHostname")]
    GetSshHostname,
    #[serde(rename = "GetSSHKeyPath")]
    GetSshKeyPath,
    #[serde(rename = "GetSSHPort")]
    GetSshPort,
    #[serde(rename = "GetSSHUsername")]
    GetSshUsername,
    #[serde(rename = "GetURL")]
    GetUrl,
    GetState,
    Kill,
    PreCreateCheck,
    Remove,
    Restart,
    Start,
    Stop,
}

impl Call {
    /// Method name as it appears on the wire.
    pub fn method(&self) -> &'static str {
        match self {
            Call::GetVersion => "GetVersion",
            Call::Heartbeat => "Heartbeat",
            Call::Close => "Close",
            Call::GetConfigRaw => "GetConfigRaw",
            Call::SetConfigRaw(_) => "SetConfigRaw",
            Call::SetConfigFromFlags(_) => "SetConfigFromFlags",
            Call::GetCreateFlags => "GetCreateFlags",
            Call::DriverName => "DriverName",
            Call::Create => "Create",
            Call::GetIp => "GetIP",
            Call::GetMachineName => "GetMachineName",
            Call::GetSshHostname => "GetSSHHostname",
            Call::GetSshKeyPath => "GetSSHKeyPath",
            Call::GetSshPort => "GetSSHPort",
            Call::GetSshUsername => "GetSSHUsername",
            Call::GetUrl => "GetURL",
            Call::GetState => "GetState",
            Call::Kill => "Kill",
            Call::PreCreateCheck => "PreCreateCheck",
            Call::Remove => "Remove",
            Call::Restart => "Restart",
            Call::Start => "Start",
            Call::Stop => "Stop",
        }
    }
}

/// Opaque driver configuration, base64 encoded on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawConfig(pub Vec<u8>);

impl Serialize for RawConfig {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for RawConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(RawConfig)
            .map_err(serde::de::Error::custom)
    }
}

/// Request from host to plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    #[serde(rename = "Id")]
    pub id: u64,
    #[serde(rename = "Call")]
    pub call: Call,
}

/// Outcome of a call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "Status")]
pub enum Reply {
    Ok {
        #[serde(rename = "Value", default)]
        value: serde_json::Value,
    },
    Error {
        #[serde(rename = "Message")]
        message: String,
    },
}

impl Reply {
    pub fn ok(value: serde_json::Value) -> Self {
        Reply::Ok { value }
    }

    pub fn empty() -> Self {
        Reply::Ok {
            value: serde_json::Value::Null,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Reply::Error {
            message: message.into(),
        }
    }
}

/// Response from plugin to host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "Id")]
    pub id: u64,
    #[serde(rename = "Reply")]
    pub reply: Reply,
}

// =============================================================================
// Wire Format Helpers
// =============================================================================

impl Request {
    /// Serializes request to JSON line (with newline).
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s.trim())
    }
}

impl Response {
    /// Serializes response to JSON line (with newline).
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s.trim())
    }
}
