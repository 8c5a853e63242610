//! End-to-end runs of the `docker-machine` CLI against a scratch store.

use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn machine(store: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_docker-machine"))
        .env_remove("MACHINE_PLUGIN_TOKEN")
        .env_remove("RUST_LOG")
        .arg("--storage-path")
        .arg(store)
        .args(args)
        .output()
        .unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn create_inspect_and_remove_none_machine() {
    let store = TempDir::new().unwrap();

    let created = machine(
        store.path(),
        &["create", "-d", "none", "alpha", "--url", "tcp://10.0.0.5:2376"],
    );
    assert!(created.status.success(), "{}", stderr(&created));
    assert!(store.path().join("machines/alpha/config.json").exists());

    let url = machine(store.path(), &["url", "alpha"]);
    assert!(url.status.success(), "{}", stderr(&url));
    assert_eq!(stdout(&url).trim(), "tcp://10.0.0.5:2376");

    let status = machine(store.path(), &["status", "alpha"]);
    assert_eq!(stdout(&status).trim(), "Running");

    let ls = machine(store.path(), &["ls"]);
    assert!(ls.status.success(), "{}", stderr(&ls));
    let listing = stdout(&ls);
    assert!(listing.contains("alpha"));
    assert!(listing.contains("none"));

    let inspect = machine(store.path(), &["inspect", "alpha"]);
    let doc: serde_json::Value = serde_json::from_str(&stdout(&inspect)).unwrap();
    assert_eq!(doc["Name"], "alpha");
    assert_eq!(doc["DriverName"], "none");
    assert_eq!(doc["Driver"]["URL"], "tcp://10.0.0.5:2376");

    let stop = machine(store.path(), &["stop", "alpha"]);
    assert!(!stop.status.success());
    assert!(stderr(&stop).contains("cannot be stopped"));

    let rm = machine(store.path(), &["rm", "alpha"]);
    assert!(rm.status.success(), "{}", stderr(&rm));
    assert!(!store.path().join("machines/alpha").exists());
}

#[test]
fn none_driver_requires_url() {
    let store = TempDir::new().unwrap();
    let created = machine(store.path(), &["create", "-d", "none", "beta"]);
    assert!(!created.status.success());
    assert!(stderr(&created).contains("--url"));
    assert!(!store.path().join("machines/beta").exists());
}

#[test]
fn host_with_missing_driver_is_still_listed() {
    let store = TempDir::new().unwrap();
    let dir = store.path().join("machines/ghost");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("config.json"),
        br#"{"ConfigVersion":3,"Name":"ghost","DriverName":"doesnotexist99","Driver":{"MachineName":"ghost"},"HostOptions":{}}"#,
    )
    .unwrap();

    let ls = machine(store.path(), &["ls"]);
    assert!(ls.status.success(), "{}", stderr(&ls));
    let listing = stdout(&ls);
    assert!(listing.contains("ghost"));
    assert!(listing.contains("not found"));
}

#[test]
fn invalid_name_is_rejected() {
    let store = TempDir::new().unwrap();
    let created = machine(
        store.path(),
        &["create", "-d", "none", "bad_name", "--url", "tcp://1.2.3.4:2376"],
    );
    assert!(!created.status.success());
    assert!(stderr(&created).contains("Invalid hostname"));
}

#[test]
fn unknown_machine_is_reported() {
    let store = TempDir::new().unwrap();
    let status = machine(store.path(), &["status", "nothere"]);
    assert!(!status.status.success());
    assert!(stderr(&status).contains("Host does not exist"));
}

#[test]
fn forced_rm_of_empty_name_keeps_machines() {
    let store = TempDir::new().unwrap();
    for name in ["alpha", "beta"] {
        let created = machine(
            store.path(),
            &["create", "-d", "none", name, "--url", "tcp://1.2.3.4:2376"],
        );
        assert!(created.status.success(), "{}", stderr(&created));
    }

    let removed = machine(store.path(), &["rm", "-f", ""]);
    assert!(!removed.status.success());
    assert!(stderr(&removed).contains("Invalid hostname"));

    let listing = stdout(&machine(store.path(), &["ls"]));
    assert!(listing.contains("alpha"));
    assert!(listing.contains("beta"));
}
