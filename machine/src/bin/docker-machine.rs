//! docker-machine command line.
//!
//! Run with the plugin token in the environment, the binary serves one of
//! its built-in drivers over RPC instead of acting as a CLI.

use clap::{Arg, ArgAction, ArgMatches, Parser, Subcommand};
use machine::drivers::{BaseDriver, Driver, FlagValue, McnFlag, RpcFlags};
use machine::host::validate_host_name;
use machine::plugin::serve_registered_driver;
use machine::util::{init_logging, init_plugin_logging};
use machine::{DriverRegistry, Host, LocalClient, MachineError, MachineOptions, MachineResult};
use machine_shared::constants::plugin::{ENV_DRIVER_NAME, ENV_KEY, ENV_VAL};
use machine_shared::constants::store::STORAGE_PATH_ENV;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(
    name = "docker-machine",
    version,
    about = "Create and manage machines running Docker"
)]
struct Cli {
    /// Root directory of the machine store
    #[arg(short = 's', long, env = STORAGE_PATH_ENV, global = true)]
    storage_path: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short = 'D', long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a machine
    Create {
        /// Driver to create the machine with
        #[arg(short = 'd', long, default_value = "none")]
        driver: String,

        /// Name of the machine
        name: String,

        /// Driver specific flags, e.g. `--url tcp://10.0.0.5:2376`
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        driver_args: Vec<String>,
    },
    /// List machines
    Ls,
    /// Get the status of a machine
    Status { name: String },
    /// Start machines
    Start {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Stop machines
    Stop {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Restart machines
    Restart {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Kill machines
    Kill {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Remove machines
    Rm {
        /// Remove local configuration even if the machine cannot be removed
        #[arg(short, long)]
        force: bool,

        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Get the URL of a machine
    Url { name: String },
    /// Inspect information about a machine
    Inspect { name: String },
}

#[derive(Debug, Clone, Copy)]
enum Action {
    Start,
    Stop,
    Restart,
    Kill,
}

impl Action {
    async fn run(self, host: &mut Host) -> MachineResult<()> {
        match self {
            Action::Start => host.start().await,
            Action::Stop => host.stop().await,
            Action::Restart => host.restart().await,
            Action::Kill => host.kill().await,
        }
    }
}

/// clap command accepting the create flags a driver declares.
fn driver_flag_command(driver_name: &str, flags: &[McnFlag]) -> clap::Command {
    let mut cmd = clap::Command::new(format!("create -d {}", driver_name)).no_binary_name(true);
    for flag in flags {
        let mut arg = Arg::new(flag.name().to_string())
            .long(flag.name().to_string())
            .help(flag.usage().to_string());
        if let Some(var) = flag.env_var() {
            arg = arg.env(var.to_string());
        }
        arg = match flag {
            McnFlag::Bool { .. } => arg.action(ArgAction::SetTrue),
            McnFlag::StringSlice { .. } => arg.action(ArgAction::Append),
            McnFlag::Int { .. } => arg.value_parser(clap::value_parser!(i64)),
            McnFlag::String { .. } => arg,
        };
        cmd = cmd.arg(arg);
    }
    cmd
}

/// Values for every declared flag; flags not given keep their defaults.
fn collect_flag_values(flags: &[McnFlag], matches: &ArgMatches) -> RpcFlags {
    let mut values = RpcFlags::new();
    for flag in flags {
        let name = flag.name();
        let value = match flag.default_value() {
            FlagValue::String(default) => FlagValue::String(
                matches.get_one::<String>(name).cloned().unwrap_or(default),
            ),
            FlagValue::StringSlice(default) => FlagValue::StringSlice(
                matches
                    .get_many::<String>(name)
                    .map(|v| v.cloned().collect())
                    .unwrap_or(default),
            ),
            FlagValue::Int(default) => {
                FlagValue::Int(matches.get_one::<i64>(name).copied().unwrap_or(default))
            }
            FlagValue::Bool(_) => FlagValue::Bool(matches.get_flag(name)),
        };
        values.insert(name, value);
    }
    values
}

fn parse_driver_flags(driver_name: &str, flags: &[McnFlag], args: &[String]) -> MachineResult<RpcFlags> {
    let matches = driver_flag_command(driver_name, flags)
        .try_get_matches_from(args)
        .map_err(|e| MachineError::InvalidFlag(e.to_string()))?;
    Ok(collect_flag_values(flags, &matches))
}

async fn cmd_create(
    client: &LocalClient,
    driver_name: &str,
    name: &str,
    driver_args: &[String],
) -> MachineResult<()> {
    if !validate_host_name(name) {
        return Err(MachineError::InvalidHostName(name.to_string()));
    }
    if client.exists(name).await? {
        return Err(MachineError::HostAlreadyExists(name.to_string()));
    }

    let store_path = client.options().storage_path.to_string_lossy().into_owned();
    let raw = serde_json::to_vec(&BaseDriver::new(name, &store_path))?;
    let mut host = client.new_host(driver_name, &raw).await?;

    let flags = host.driver.get_create_flags().await?;
    let values = parse_driver_flags(driver_name, &flags, driver_args)?;
    host.driver.set_config_from_flags(&values).await?;

    client.create(&mut host).await?;
    println!(
        "Machine \"{}\" was created with driver \"{}\".",
        host.name, host.driver_name
    );
    Ok(())
}

async fn cmd_ls(client: &LocalClient) -> MachineResult<()> {
    println!("{:<20} {:<12} {:<10} {:<30} ERRORS", "NAME", "DRIVER", "STATE", "URL");
    for name in client.list().await? {
        match client.load(&name).await {
            Ok(host) => {
                let (state, state_err) = match host.state().await {
                    Ok(state) => (state.to_string(), None),
                    Err(e) => ("Error".to_string(), Some(e.to_string())),
                };
                let url = host.url().await.unwrap_or_default();
                println!(
                    "{:<20} {:<12} {:<10} {:<30} {}",
                    host.name,
                    host.driver_name,
                    state,
                    url,
                    state_err.unwrap_or_default()
                );
            }
            Err(e) => println!("{:<20} {:<12} {:<10} {:<30} {}", name, "", "Error", "", e),
        }
    }
    Ok(())
}

async fn cmd_action(client: &LocalClient, action: Action, names: &[String]) -> MachineResult<()> {
    let mut first_err = None;
    for name in names {
        let result = async {
            let mut host = client.load(name).await?;
            action.run(&mut host).await?;
            client.save(&mut host).await
        }
        .await;
        if let Err(e) = result {
            eprintln!("Error: {}", e);
            first_err.get_or_insert(e);
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

async fn cmd_rm(client: &LocalClient, names: &[String], force: bool) -> MachineResult<()> {
    let mut first_err = None;
    for name in names {
        if let Err(e) = client.remove(name, force).await {
            eprintln!("Error removing host \"{}\": {}", name, e);
            first_err.get_or_insert(e);
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

async fn cmd_inspect(client: &LocalClient, name: &str) -> MachineResult<()> {
    let mut host = client.load(name).await?;
    host.sync_raw_driver().await?;
    let doc = host.to_document()?;
    println!("{}", serde_json::to_string_pretty(&doc)?);
    Ok(())
}

async fn run(cli: Cli, client: &LocalClient) -> MachineResult<()> {
    match cli.command {
        Command::Create {
            driver,
            name,
            driver_args,
        } => cmd_create(client, &driver, &name, &driver_args).await,
        Command::Ls => cmd_ls(client).await,
        Command::Status { name } => {
            let host = client.load(&name).await?;
            println!("{}", host.state().await?);
            Ok(())
        }
        Command::Start { names } => cmd_action(client, Action::Start, &names).await,
        Command::Stop { names } => cmd_action(client, Action::Stop, &names).await,
        Command::Restart { names } => cmd_action(client, Action::Restart, &names).await,
        Command::Kill { names } => cmd_action(client, Action::Kill, &names).await,
        Command::Rm { force, names } => cmd_rm(client, &names, force).await,
        Command::Url { name } => {
            let host = client.load(&name).await?;
            println!("{}", host.url().await?);
            Ok(())
        }
        Command::Inspect { name } => cmd_inspect(client, &name).await,
    }
}

async fn serve_plugin(registry: &DriverRegistry, driver_name: &str) -> ExitCode {
    init_plugin_logging();
    match serve_registered_driver(registry, driver_name).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(driver = driver_name, error = %e, "Plugin server exited");
            ExitCode::FAILURE
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let registry = DriverRegistry::with_core_drivers();

    if std::env::var(ENV_KEY).ok().as_deref() == Some(ENV_VAL) {
        if let Ok(driver_name) = std::env::var(ENV_DRIVER_NAME) {
            return serve_plugin(&registry, &driver_name).await;
        }
    }

    let cli = Cli::parse();
    let options = match MachineOptions::resolve(cli.storage_path.clone()) {
        Ok(options) => options.with_debug(cli.debug),
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let _log_guard = init_logging(options.storage_path(), options.debug);
    tracing::debug!(storage_path = %options.storage_path().display(), "docker-machine starting");

    let client = LocalClient::new(options, registry);
    let result = run(cli, &client).await;
    if let Err(e) = client.close().await {
        tracing::debug!(error = %e, "Error closing driver plugins");
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags() -> Vec<McnFlag> {
        vec![
            McnFlag::string("url", "URL of the engine", ""),
            McnFlag::int("cpus", "CPU count", 1),
            McnFlag::bool("quiet", "Less output"),
            McnFlag::string_slice("label", "Engine labels", vec![]),
        ]
    }

    fn args(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_cli_create_collects_driver_args() {
        let cli = Cli::try_parse_from([
            "docker-machine",
            "create",
            "-d",
            "none",
            "alpha",
            "--url",
            "tcp://10.0.0.5:2376",
        ])
        .unwrap();
        match cli.command {
            Command::Create {
                driver,
                name,
                driver_args,
            } => {
                assert_eq!(driver, "none");
                assert_eq!(name, "alpha");
                assert_eq!(driver_args, args(&["--url", "tcp://10.0.0.5:2376"]));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_driver_flags_are_typed() {
        let values = parse_driver_flags(
            "fake",
            &flags(),
            &args(&["--url", "tcp://x:2376", "--cpus", "4", "--quiet", "--label", "a=b", "--label", "c=d"]),
        )
        .unwrap();
        assert_eq!(values.get("url"), Some(&FlagValue::String("tcp://x:2376".into())));
        assert_eq!(values.get("cpus"), Some(&FlagValue::Int(4)));
        assert_eq!(values.get("quiet"), Some(&FlagValue::Bool(true)));
        assert_eq!(
            values.get("label"),
            Some(&FlagValue::StringSlice(vec!["a=b".into(), "c=d".into()]))
        );
    }

    #[test]
    fn test_absent_driver_flags_keep_defaults() {
        let values = parse_driver_flags("fake", &flags(), &[]).unwrap();
        assert_eq!(values.len(), 4);
        assert_eq!(values.get("cpus"), Some(&FlagValue::Int(1)));
        assert_eq!(values.get("quiet"), Some(&FlagValue::Bool(false)));
    }

    #[test]
    fn test_unknown_or_malformed_driver_flags_fail() {
        assert!(matches!(
            parse_driver_flags("fake", &flags(), &args(&["--nope"])),
            Err(MachineError::InvalidFlag(_))
        ));
        assert!(matches!(
            parse_driver_flags("fake", &flags(), &args(&["--cpus", "many"])),
            Err(MachineError::InvalidFlag(_))
        ));
    }
}
