//! Drives the built `docker-machine` binary as a driver plugin.
//!
//! The binary serves its core drivers when started with the plugin token,
//! so these tests exercise the real handshake, RPC and teardown paths
//! without any external plugin installed.

use machine::drivers::{Driver, DriverRegistry, FlagValue, RpcFlags};
use machine::plugin::localbinary::LocalBinaryPlugin;
use machine::plugin::rpc::RpcClientDriver;
use machine::plugin::{DriverFactory, PluginProcess, RpcClientDriverFactory};
use machine::{MachineError, State};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn host_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_docker-machine"))
}

fn factory() -> RpcClientDriverFactory {
    RpcClientDriverFactory::new(DriverRegistry::with_core_drivers()).with_host_binary(host_binary())
}

#[tokio::test]
async fn none_driver_served_by_host_binary() {
    let factory = factory();
    let raw = br#"{"MachineName":"alpha","StorePath":"/tmp/store"}"#;

    let mut driver = factory.new_driver("none", raw).await.unwrap();
    assert_eq!(factory.open_count(), 1);
    assert_eq!(driver.driver_name().await.unwrap(), "none");
    assert_eq!(driver.get_machine_name().await.unwrap(), "alpha");
    assert_eq!(driver.get_state().await.unwrap(), State::Running);

    let mut flags = RpcFlags::new();
    flags.insert("url", FlagValue::String("tcp://10.20.30.40:2376".into()));
    driver.set_config_from_flags(&flags).await.unwrap();
    assert_eq!(driver.get_url().await.unwrap(), "tcp://10.20.30.40:2376");
    assert_eq!(driver.get_ip().await.unwrap(), "10.20.30.40");

    let err = driver.start().await.unwrap_err();
    assert!(err.to_string().contains("cannot be started"));

    // Configuration survives a trip through a second plugin process.
    let exported = driver.get_config_raw().await.unwrap();
    let again = factory.new_driver("none", &exported).await.unwrap();
    assert_eq!(again.get_config_raw().await.unwrap(), exported);

    factory.close().await.unwrap();
    assert_eq!(factory.open_count(), 0);
    assert!(driver.get_state().await.is_err());
}

#[tokio::test]
async fn heartbeats_keep_an_idle_plugin_alive() {
    let plugin: Arc<dyn PluginProcess> = LocalBinaryPlugin::core(host_binary(), "none").launch();
    let driver = RpcClientDriver::new(plugin, br#"{"MachineName":"idle"}"#)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!driver.is_closed());
    assert_eq!(driver.get_machine_name().await.unwrap(), "idle");
    driver.close().await.unwrap();
}

#[tokio::test]
async fn unknown_core_driver_never_hands_out_an_address() {
    let plugin = LocalBinaryPlugin::core(host_binary(), "virtualbox99")
        .with_address_timeout(Duration::from_secs(5))
        .launch();

    let err = plugin.address().await.unwrap_err();
    assert!(matches!(err, MachineError::Plugin(_)), "{:?}", err);
    let _ = plugin.close().await;
}

#[test]
fn missing_plugin_binary_is_its_own_error() {
    let err = LocalBinaryPlugin::new("doesnotexist99").err().unwrap();
    assert!(err.is_binary_not_found(), "{:?}", err);
}

#[test]
fn driver_name_without_token_runs_the_cli() {
    let output = std::process::Command::new(host_binary())
        .env_remove("MACHINE_PLUGIN_TOKEN")
        .env("MACHINE_PLUGIN_DRIVER_NAME", "none")
        .arg("--help")
        .output()
        .unwrap();
    // Without the token the binary is an ordinary CLI.
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("Create and manage machines"));
}
