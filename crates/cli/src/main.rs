mod demo;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Arg, ArgAction, ArgMatches, Command};
use roundtable_engine::config::default_config_path;
use roundtable_engine::{TestRunner, load_config_with_overrides};
use roundtable_types::RunnerConfig;
use serde_json::{Map, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let matches = build_cli().get_matches();

    match matches.subcommand() {
        Some(("run", sub)) => run_cmd(sub).await,
        Some(("reset", sub)) => reset_cmd(sub),
        Some(("status", sub)) => status_cmd(sub),
        Some(("reconcile", sub)) => reconcile_cmd(sub),
        Some((other, _)) => bail!("unknown command: {other}"),
        None => {
            build_cli().print_help()?;
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn build_cli() -> Command {
    Command::new("roundtable")
        .about("Drive worker services through round-based test steps")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .action(ArgAction::Set)
                .help("Path to the runner configuration (defaults to $ROUNDTABLE_CONFIG or roundtable.yaml)"),
        )
        .arg(
            Arg::new("set")
                .long("set")
                .global(true)
                .action(ArgAction::Append)
                .value_name("KEY=VALUE")
                .help("Override a top-level configuration value; VALUE is parsed as JSON when possible"),
        )
        .subcommand(
            Command::new("run").about("Run the demo step sequence, resuming if possible").arg(
                Arg::new("force-reset")
                    .long("force-reset")
                    .action(ArgAction::SetTrue)
                    .help("Discard persisted progress and start from round 1"),
            ),
        )
        .subcommand(Command::new("reset").about("Delete persisted progress and reseed the backing store"))
        .subcommand(Command::new("status").about("Print persisted progress as JSON"))
        .subcommand(
            Command::new("reconcile").about("Check the backing store and reseed it if needed").arg(
                Arg::new("force")
                    .long("force")
                    .action(ArgAction::SetTrue)
                    .help("Reseed even when the store is consistent"),
            ),
        )
}

fn load_config(matches: &ArgMatches) -> Result<RunnerConfig> {
    let path = matches
        .get_one::<String>("config")
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path);
    let overrides = parse_overrides(matches.get_many::<String>("set").into_iter().flatten())?;
    load_config_with_overrides(&path, overrides).with_context(|| format!("loading configuration from {}", path.display()))
}

fn parse_overrides<'a>(pairs: impl Iterator<Item = &'a String>) -> Result<Map<String, Value>> {
    let mut overrides = Map::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .with_context(|| format!("override '{pair}' is not KEY=VALUE"))?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        overrides.insert(key.trim().to_string(), value);
    }
    Ok(overrides)
}

async fn run_cmd(matches: &ArgMatches) -> Result<()> {
    let config = load_config(matches)?;
    let runner = TestRunner::new(demo::steps(), config)?;
    let outcome = runner.run(matches.get_flag("force-reset")).await?;
    info!(
        phase = %outcome.phase,
        final_round = outcome.final_round,
        rounds_completed = outcome.rounds_completed,
        "run finished"
    );
    Ok(())
}

fn reset_cmd(matches: &ArgMatches) -> Result<()> {
    let runner = TestRunner::new(Vec::new(), load_config(matches)?)?;
    runner.reset()?;
    println!("Reset state for task {}", runner.config().task_id);
    Ok(())
}

fn status_cmd(matches: &ArgMatches) -> Result<()> {
    let runner = TestRunner::new(Vec::new(), load_config(matches)?)?;
    match runner.load_state()? {
        Some(state) => println!("{}", serde_json::to_string_pretty(state.state())?),
        None => println!("No persisted state at {}", runner.config().state_path().display()),
    }
    Ok(())
}

fn reconcile_cmd(matches: &ArgMatches) -> Result<()> {
    let runner = TestRunner::new(Vec::new(), load_config(matches)?)?;
    let reseeded = runner.ensure_clean_state(matches.get_flag("force"))?;
    if reseeded {
        println!("Backing store reseeded");
    } else {
        println!("Backing store is consistent");
    }
    Ok(())
}
