//! Forward migration of stored host records.
//!
//! | Version | Shape |
//! |---------|-------|
//! | 0 | flat record, TLS paths and swarm settings at the top level |
//! | 1 | `HostOptions` with auth, engine and swarm bundles |
//! | 2 | `AuthOptions.PrivateKeyPath` renamed to `CaPrivateKeyPath`, `CertDir` added |
//! | 3 | driver blob carries `MachineName` and `StorePath` |
//!
//! Each step rewrites the parsed document in place. There is no path back
//! down.

use super::HostDocument;
use machine_shared::constants::CONFIG_VERSION;
use machine_shared::constants::store::CERTS_DIR;
use machine_shared::errors::{MachineError, MachineResult};
use serde_json::{Map, Value, json};
use std::path::Path;

type Step = fn(&mut Map<String, Value>, &MigrationContext) -> Result<(), String>;

struct MigrationContext<'a> {
    store_path: &'a str,
}

/// `STEPS[n]` migrates version `n` to `n + 1`.
const STEPS: [Step; 3] = [v0_to_v1, v1_to_v2, v2_to_v3];

/// Version of a stored document; records written before versioning are 0.
pub fn config_version(doc: &Value) -> i32 {
    doc.get("ConfigVersion")
        .and_then(Value::as_i64)
        .and_then(|v| i32::try_from(v).ok())
        .unwrap_or(0)
}

/// Bring `data` up to [`CONFIG_VERSION`].
///
/// Returns the parsed document and whether any step ran.
pub fn migrate_host(name: &str, data: &[u8], store_path: &str) -> MachineResult<(HostDocument, bool)> {
    let mut doc: Value = serde_json::from_slice(data)?;
    let from = config_version(&doc);

    if from > CONFIG_VERSION {
        return Err(MachineError::Migration {
            from,
            to: CONFIG_VERSION,
            reason: format!(
                "host \"{}\" was written by a newer docker-machine; downgrades are not supported",
                name
            ),
        });
    }

    if from == CONFIG_VERSION {
        return Ok((serde_json::from_slice(data)?, false));
    }

    let ctx = MigrationContext { store_path };
    for version in from..CONFIG_VERSION {
        let to = version + 1;
        let Some(fields) = doc.as_object_mut() else {
            return Err(MachineError::Migration {
                from: version,
                to,
                reason: "host record is not a JSON object".to_string(),
            });
        };
        let step = usize::try_from(version)
            .ok()
            .and_then(|i| STEPS.get(i))
            .ok_or_else(|| MachineError::Migration {
                from: version,
                to,
                reason: "no migration step".to_string(),
            })?;
        step(fields, &ctx).map_err(|reason| MachineError::Migration {
            from: version,
            to,
            reason,
        })?;
        fields.insert("ConfigVersion".to_string(), json!(to));
        tracing::debug!(machine = name, from = version, to, "Migrated host record");
    }

    // Raw driver values are captured from text.
    let text = serde_json::to_string(&doc)?;
    let parsed: HostDocument = serde_json::from_str(&text).map_err(|e| MachineError::Migration {
        from,
        to: CONFIG_VERSION,
        reason: e.to_string(),
    })?;
    Ok((parsed, true))
}

fn take_string(fields: &mut Map<String, Value>, key: &str) -> Value {
    match fields.remove(key) {
        Some(Value::String(s)) => Value::String(s),
        _ => Value::String(String::new()),
    }
}

fn object_at<'a>(fields: &'a mut Map<String, Value>, key: &str) -> Result<&'a mut Map<String, Value>, String> {
    fields
        .entry(key.to_string())
        .or_insert_with(|| json!({}))
        .as_object_mut()
        .ok_or_else(|| format!("{} is not an object", key))
}

fn v0_to_v1(fields: &mut Map<String, Value>, _ctx: &MigrationContext) -> Result<(), String> {
    let swarm_master = fields.remove("SwarmMaster").and_then(|v| v.as_bool()).unwrap_or(false);
    let swarm = json!({
        "Address": "",
        "Discovery": take_string(fields, "SwarmDiscovery"),
        "Host": take_string(fields, "SwarmHost"),
        "Master": swarm_master,
    });
    let auth = json!({
        "StorePath": take_string(fields, "StorePath"),
        "CaCertPath": take_string(fields, "CaCertPath"),
        "CaCertRemotePath": "",
        "ServerCertPath": take_string(fields, "ServerCertPath"),
        "ServerKeyPath": take_string(fields, "ServerKeyPath"),
        "ClientKeyPath": take_string(fields, "ClientKeyPath"),
        "ServerCertRemotePath": "",
        "ServerKeyRemotePath": "",
        "PrivateKeyPath": take_string(fields, "PrivateKeyPath"),
        "ClientCertPath": take_string(fields, "ClientCertPath"),
    });

    let options = object_at(fields, "HostOptions")?;
    options.entry("EngineOptions").or_insert_with(|| json!({}));
    options.insert("SwarmOptions".to_string(), swarm);
    options.insert("AuthOptions".to_string(), auth);
    Ok(())
}

fn v1_to_v2(fields: &mut Map<String, Value>, ctx: &MigrationContext) -> Result<(), String> {
    let options = object_at(fields, "HostOptions")?;
    let auth = object_at(options, "AuthOptions")?;

    let private_key = auth.remove("PrivateKeyPath").unwrap_or_else(|| json!(""));
    auth.entry("CaPrivateKeyPath").or_insert(private_key);

    let store_path = match auth.get("StorePath").and_then(Value::as_str) {
        Some(path) if !path.is_empty() => path.to_string(),
        _ => ctx.store_path.to_string(),
    };
    let cert_dir = Path::new(&store_path).join(CERTS_DIR);
    auth.entry("CertDir")
        .or_insert_with(|| json!(cert_dir.to_string_lossy()));
    Ok(())
}

fn v2_to_v3(fields: &mut Map<String, Value>, ctx: &MigrationContext) -> Result<(), String> {
    let name = fields
        .get("Name")
        .and_then(Value::as_str)
        .ok_or("record has no Name")?
        .to_string();

    let driver = object_at(fields, "Driver")?;
    let missing = |v: Option<&Value>| v.and_then(Value::as_str).is_none_or(str::is_empty);
    if missing(driver.get("MachineName")) {
        driver.insert("MachineName".to_string(), json!(name));
    }
    if missing(driver.get("StorePath")) {
        driver.insert("StorePath".to_string(), json!(ctx.store_path));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const V0_FIXTURE: &str = r#"{
        "Name": "legacy",
        "DriverName": "none",
        "Driver": {"URL": "tcp://10.0.0.7:2376", "IPAddress": "10.0.0.7"},
        "StorePath": "/old/store",
        "CaCertPath": "/old/store/certs/ca.pem",
        "PrivateKeyPath": "/old/store/certs/ca-key.pem",
        "ServerCertPath": "/old/store/machines/legacy/server.pem",
        "ServerKeyPath": "/old/store/machines/legacy/server-key.pem",
        "ClientCertPath": "/old/store/certs/cert.pem",
        "SwarmMaster": true,
        "SwarmHost": "tcp://0.0.0.0:3376",
        "SwarmDiscovery": "token://abc"
    }"#;

    #[test]
    fn test_v0_reaches_current_version() {
        let (doc, migrated) = migrate_host("legacy", V0_FIXTURE.as_bytes(), "/new/store").unwrap();
        assert!(migrated);
        assert_eq!(doc.config_version, CONFIG_VERSION);
        assert_eq!(doc.name, "legacy");
        assert_eq!(doc.driver_name, "none");

        let auth = &doc.host_options.auth_options;
        assert_eq!(auth.ca_private_key_path, "/old/store/certs/ca-key.pem");
        assert_eq!(auth.cert_dir, "/old/store/certs");
        assert_eq!(auth.store_path, "/old/store");

        let swarm = &doc.host_options.swarm_options;
        assert!(swarm.master);
        assert_eq!(swarm.discovery, "token://abc");

        let driver: Value = serde_json::from_str(doc.driver.get()).unwrap();
        assert_eq!(driver["MachineName"], "legacy");
        assert_eq!(driver["StorePath"], "/new/store");
        assert_eq!(driver["URL"], "tcp://10.0.0.7:2376");
    }

    #[test]
    fn test_current_version_is_untouched() {
        let current = format!(
            r#"{{"ConfigVersion":{},"Name":"dev","DriverName":"none","Driver":{{"URL":"tcp://x","IPAddress":"x"}},"HostOptions":{{}}}}"#,
            CONFIG_VERSION
        );
        let (doc, migrated) = migrate_host("dev", current.as_bytes(), "/store").unwrap();
        assert!(!migrated);
        assert_eq!(doc.driver.get(), r#"{"URL":"tcp://x","IPAddress":"x"}"#);
    }

    #[test]
    fn test_newer_version_is_rejected() {
        let newer = format!(
            r#"{{"ConfigVersion":{},"Name":"dev","DriverName":"none","Driver":{{}}}}"#,
            CONFIG_VERSION + 1
        );
        let err = migrate_host("dev", newer.as_bytes(), "/store").unwrap_err();
        assert!(matches!(err, MachineError::Migration { .. }));
    }

    #[test]
    fn test_broken_step_aborts() {
        let err = migrate_host(
            "dev",
            br#"{"ConfigVersion":2,"DriverName":"none","Driver":{}}"#,
            "/store",
        )
        .unwrap_err();
        assert!(matches!(err, MachineError::Migration { from: 2, to: 3, .. }));
    }

    #[test]
    fn test_config_version_defaults_to_zero() {
        assert_eq!(config_version(&json!({"Name": "x"})), 0);
        assert_eq!(config_version(&json!({"ConfigVersion": 2})), 2);
    }
}
