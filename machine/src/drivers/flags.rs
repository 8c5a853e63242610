//! Driver create flags and the values that configure a driver.
//!
//! Flags are declared by drivers ([`McnFlag`]) and read back through the
//! [`DriverOptions`] capability. Values cross the plugin boundary as
//! [`RpcFlags`]: every value carries its variant, so the receiving side
//! checks the type instead of asserting it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A driver specific `create` flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "Kind")]
pub enum McnFlag {
    String {
        #[serde(rename = "Name")]
        name: String,
        #[serde(rename = "Usage")]
        usage: String,
        #[serde(rename = "EnvVar", default)]
        env_var: String,
        #[serde(rename = "Value", default)]
        value: String,
    },
    StringSlice {
        #[serde(rename = "Name")]
        name: String,
        #[serde(rename = "Usage")]
        usage: String,
        #[serde(rename = "EnvVar", default)]
        env_var: String,
        #[serde(rename = "Value", default)]
        value: Vec<String>,
    },
    Int {
        #[serde(rename = "Name")]
        name: String,
        #[serde(rename = "Usage")]
        usage: String,
        #[serde(rename = "EnvVar", default)]
        env_var: String,
        #[serde(rename = "Value", default)]
        value: i64,
    },
    Bool {
        #[serde(rename = "Name")]
        name: String,
        #[serde(rename = "Usage")]
        usage: String,
        #[serde(rename = "EnvVar", default)]
        env_var: String,
    },
}

impl McnFlag {
    pub fn string(name: &str, usage: &str, value: &str) -> Self {
        McnFlag::String {
            name: name.to_string(),
            usage: usage.to_string(),
            env_var: String::new(),
            value: value.to_string(),
        }
    }

    pub fn int(name: &str, usage: &str, value: i64) -> Self {
        McnFlag::Int {
            name: name.to_string(),
            usage: usage.to_string(),
            env_var: String::new(),
            value,
        }
    }

    pub fn bool(name: &str, usage: &str) -> Self {
        McnFlag::Bool {
            name: name.to_string(),
            usage: usage.to_string(),
            env_var: String::new(),
        }
    }

    pub fn string_slice(name: &str, usage: &str, value: Vec<String>) -> Self {
        McnFlag::StringSlice {
            name: name.to_string(),
            usage: usage.to_string(),
            env_var: String::new(),
            value,
        }
    }

    /// Attach an environment variable that provides the flag's default.
    pub fn with_env_var(mut self, var: &str) -> Self {
        match &mut self {
            McnFlag::String { env_var, .. }
            | McnFlag::StringSlice { env_var, .. }
            | McnFlag::Int { env_var, .. }
            | McnFlag::Bool { env_var, .. } => *env_var = var.to_string(),
        }
        self
    }

    pub fn name(&self) -> &str {
        match self {
            McnFlag::String { name, .. }
            | McnFlag::StringSlice { name, .. }
            | McnFlag::Int { name, .. }
            | McnFlag::Bool { name, .. } => name,
        }
    }

    pub fn usage(&self) -> &str {
        match self {
            McnFlag::String { usage, .. }
            | McnFlag::StringSlice { usage, .. }
            | McnFlag::Int { usage, .. }
            | McnFlag::Bool { usage, .. } => usage,
        }
    }

    pub fn env_var(&self) -> Option<&str> {
        let var = match self {
            McnFlag::String { env_var, .. }
            | McnFlag::StringSlice { env_var, .. }
            | McnFlag::Int { env_var, .. }
            | McnFlag::Bool { env_var, .. } => env_var,
        };
        (!var.is_empty()).then_some(var.as_str())
    }

    pub fn default_value(&self) -> FlagValue {
        match self {
            McnFlag::String { value, .. } => FlagValue::String(value.clone()),
            McnFlag::StringSlice { value, .. } => FlagValue::StringSlice(value.clone()),
            McnFlag::Int { value, .. } => FlagValue::Int(*value),
            McnFlag::Bool { .. } => FlagValue::Bool(false),
        }
    }
}

/// A typed flag value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "Type", content = "Value")]
pub enum FlagValue {
    String(String),
    StringSlice(Vec<String>),
    Int(i64),
    Bool(bool),
}

/// Read access to flag values, keyed by flag name.
///
/// Missing keys and type mismatches yield the zero value of the requested
/// type.
pub trait DriverOptions: Send + Sync {
    fn string(&self, key: &str) -> String;
    fn string_slice(&self, key: &str) -> Vec<String>;
    fn int(&self, key: &str) -> i64;
    fn bool(&self, key: &str) -> bool;

    /// Every value, in the form that crosses the plugin boundary.
    fn to_rpc_flags(&self) -> RpcFlags;
}

/// Flag values in transit between the CLI, the host and a plugin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcFlags {
    #[serde(rename = "Values")]
    values: BTreeMap<String, FlagValue>,
}

impl RpcFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: FlagValue) {
        self.values.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&FlagValue> {
        self.values.get(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl DriverOptions for RpcFlags {
    fn string(&self, key: &str) -> String {
        match self.values.get(key) {
            Some(FlagValue::String(s)) => s.clone(),
            _ => String::new(),
        }
    }

    fn string_slice(&self, key: &str) -> Vec<String> {
        match self.values.get(key) {
            Some(FlagValue::StringSlice(v)) => v.clone(),
            _ => Vec::new(),
        }
    }

    fn int(&self, key: &str) -> i64 {
        match self.values.get(key) {
            Some(FlagValue::Int(i)) => *i,
            _ => 0,
        }
    }

    fn bool(&self, key: &str) -> bool {
        matches!(self.values.get(key), Some(FlagValue::Bool(true)))
    }

    fn to_rpc_flags(&self) -> RpcFlags {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mismatched_type_yields_zero_value() {
        let mut flags = RpcFlags::new();
        flags.insert("url", FlagValue::Int(3));
        flags.insert("memory", FlagValue::String("lots".into()));

        assert_eq!(flags.string("url"), "");
        assert_eq!(flags.int("memory"), 0);
        assert!(!flags.bool("missing"));
        assert!(flags.string_slice("url").is_empty());
    }

    #[test]
    fn test_rpc_flags_wire_format() {
        let mut flags = RpcFlags::new();
        flags.insert("url", FlagValue::String("tcp://1.2.3.4:2376".into()));
        flags.insert("engine-label", FlagValue::StringSlice(vec!["a=b".into()]));

        let json = serde_json::to_value(flags.to_rpc_flags()).unwrap();
        assert_eq!(json["Values"]["url"]["Type"], "String");
        assert_eq!(json["Values"]["engine-label"]["Value"][0], "a=b");

        let parsed: RpcFlags = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.string_slice("engine-label"), vec!["a=b".to_string()]);
    }

    #[test]
    fn test_flag_wire_format() {
        let flag = McnFlag::string("url", "engine url", "").with_env_var("MACHINE_URL");
        let json = serde_json::to_value(&flag).unwrap();
        assert_eq!(json["Kind"], "String");
        assert_eq!(json["Name"], "url");
        assert_eq!(json["EnvVar"], "MACHINE_URL");
        assert_eq!(flag.env_var(), Some("MACHINE_URL"));

        let value = serde_json::to_value(FlagValue::Int(7)).unwrap();
        assert_eq!(value, serde_json::json!({"Type": "Int", "Value": 7}));
    }
}
