//! epmd-ctl: command-line interface for a running epmd.
//!
//! Exit codes: 0 success, 1 the daemon said no (or the node is unknown),
//! 2 the daemon could not be reached.

use std::net::IpAddr;
use std::process::ExitCode;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use epmd_client::{ClientError, EpmdClient};
use epmd_core::config::EpmdConfig;
use epmd_core::message::{DumpState, KillResult, NodeInfo, StopResult};

const EXIT_DENIED: u8 = 1;
const EXIT_UNREACHABLE: u8 = 2;
const EXIT_FAILURE: u8 = 1;

// ── Subcommand handlers ───────────────────────────────────────────────────────

/// What a command wants the process to exit with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Done,
    Denied,
}

async fn cmd_names(client: &EpmdClient, json: bool) -> Result<Outcome> {
    let info = client.list_nodes().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(Outcome::Done);
    }
    println!("epmd: up and running on port {} with data:", info.port);
    for node in &info.nodes {
        println!("{node}");
    }
    Ok(Outcome::Done)
}

async fn cmd_dump(client: &EpmdClient, json: bool) -> Result<Outcome> {
    let dump = client.dump().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&dump)?);
        return Ok(Outcome::Done);
    }
    println!("epmd: dumping database on port {}", dump.port);
    let (active, old): (Vec<_>, Vec<_>) = dump
        .entries
        .iter()
        .partition(|e| e.state == DumpState::Active);
    println!("Active names ({}):", active.len());
    for entry in active {
        println!("  {entry}");
    }
    println!("Old/unused names ({}):", old.len());
    for entry in old {
        println!("  {entry}");
    }
    Ok(Outcome::Done)
}

async fn cmd_port(client: &EpmdClient, name: &str) -> Result<Outcome> {
    match client.lookup(name).await? {
        NodeInfo::Found(node) => {
            println!("{}", node.port);
            Ok(Outcome::Done)
        }
        NodeInfo::NotFound => {
            eprintln!("epmd: node {name} not found");
            Ok(Outcome::Denied)
        }
    }
}

async fn cmd_stop(client: &EpmdClient, name: &str) -> Result<Outcome> {
    let result = client.stop(name).await?;
    println!("{}", result.as_str());
    Ok(match result {
        StopResult::Stopped => Outcome::Done,
        StopResult::NoExist => Outcome::Denied,
    })
}

async fn cmd_kill(client: &EpmdClient) -> Result<Outcome> {
    let result = client.kill().await?;
    println!("{}", result.as_str());
    Ok(match result {
        KillResult::Ok => Outcome::Done,
        KillResult::Nok => Outcome::Denied,
    })
}

fn print_usage() {
    println!("epmd-ctl: talk to a running epmd");
    println!();
    println!("USAGE:");
    println!("  epmd-ctl [--host <ip>] [--port <port>] [-d] <command>");
    println!();
    println!("COMMANDS:");
    println!("  names [--json]     Registered nodes and their ports");
    println!("  dump [--json]      Active and old registrations");
    println!("  port <name>        Port of one node");
    println!("  stop <name>        Unregister a node (daemon needs -relaxed_command_check)");
    println!("  kill               Stop the daemon (daemon needs -relaxed_command_check)");
    println!("  help               Show this message");
}

fn exit_status(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<ClientError>() {
        Some(e) if e.is_connection() => EXIT_UNREACHABLE,
        _ => EXIT_FAILURE,
    }
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(Outcome::Done) => ExitCode::SUCCESS,
        Ok(Outcome::Denied) => ExitCode::from(EXIT_DENIED),
        Err(e) => {
            eprintln!("epmd-ctl: {e:#}");
            ExitCode::from(exit_status(&e))
        }
    }
}

async fn run() -> Result<Outcome> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut config = EpmdConfig::load().context("failed to load config")?;
    let mut debug = config.logging.debug;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-port" => {
                i += 1;
                config.client.port = args
                    .get(i)
                    .context("--port requires a value")?
                    .parse()
                    .context("--port must be a number")?;
            }
            "--host" | "-host" => {
                i += 1;
                config.client.host = args
                    .get(i)
                    .context("--host requires a value")?
                    .parse::<IpAddr>()
                    .context("--host must be an IP address")?;
            }
            "-d" | "--debug" => debug = true,
            other => remaining.push(other),
        }
        i += 1;
    }

    let default_level = if debug { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let client = EpmdClient::new(config.client);
    match remaining.as_slice() {
        ["names"] | [] => cmd_names(&client, false).await,
        ["names", "--json"] => cmd_names(&client, true).await,
        ["dump"] => cmd_dump(&client, false).await,
        ["dump", "--json"] => cmd_dump(&client, true).await,
        ["port", name] => cmd_port(&client, name).await,
        ["stop", name] => cmd_stop(&client, name).await,
        ["kill"] => cmd_kill(&client).await,
        ["help"] | ["--help"] | ["-h"] => {
            print_usage();
            Ok(Outcome::Done)
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            Ok(Outcome::Denied)
        }
    }
}
