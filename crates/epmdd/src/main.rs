//! epmdd: the Erlang port mapper daemon.

use std::net::IpAddr;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use epmd_core::config::{parse_address_list, EpmdConfig};
use epmd_server::EpmdServer;
use epmd_services::{NodeRegistry, TcpProbe};

// ── Arguments ─────────────────────────────────────────────────────────────────

/// Flags given on the command line. Unset flags leave the config alone.
#[derive(Debug, Default, PartialEq)]
struct Args {
    port: Option<u16>,
    addresses: Option<Vec<IpAddr>>,
    relaxed: bool,
    debug: bool,
    help: bool,
}

/// Accepts both the historical single-dash spelling (`-port 4369`) and
/// `--port 4369`.
fn parse_args(args: &[String]) -> Result<Args> {
    let mut parsed = Args::default();
    let mut i = 0;
    while i < args.len() {
        match args[i].trim_start_matches('-') {
            "port" => {
                i += 1;
                parsed.port = Some(
                    args.get(i)
                        .context("-port requires a value")?
                        .parse()
                        .context("-port must be a number")?,
                );
            }
            "address" => {
                i += 1;
                let list = args.get(i).context("-address requires a value")?;
                parsed.addresses = Some(
                    parse_address_list(list)
                        .with_context(|| format!("-address: cannot parse {list:?}"))?,
                );
            }
            "relaxed_command_check" => parsed.relaxed = true,
            "d" | "debug" => parsed.debug = true,
            "h" | "help" => parsed.help = true,
            _ => anyhow::bail!("unknown argument {:?}", args[i]),
        }
        i += 1;
    }
    Ok(parsed)
}

fn print_usage() {
    println!("epmdd: Erlang port mapper daemon");
    println!();
    println!("USAGE:");
    println!("  epmdd [-port <port>] [-address <ip>[,<ip>...]] [-relaxed_command_check] [-d]");
    println!();
    println!("OPTIONS:");
    println!("  -port <port>              Listen port (default 4369, or $ERL_EPMD_PORT)");
    println!("  -address <list>           Source addresses allowed to connect");
    println!("  -relaxed_command_check    Allow kill and stop requests");
    println!("  -d, --debug               Log at debug level");
    println!();
    println!("Config file: $EPMD_CONFIG or ~/.config/epmd/config.toml");
}

fn apply_args(config: &mut EpmdConfig, args: Args) {
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(addresses) = args.addresses {
        config.server.allowed_addresses = addresses;
    }
    if args.relaxed {
        config.server.relaxed_command_check = true;
    }
    if args.debug {
        config.logging.debug = true;
    }
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let argv: Vec<String> = std::env::args().skip(1).collect();
    let args = parse_args(&argv)?;
    if args.help {
        print_usage();
        return Ok(());
    }

    let mut config = EpmdConfig::load().context("failed to load config")?;
    apply_args(&mut config, args);

    let default_level = if config.logging.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let registry = NodeRegistry::new(TcpProbe::new(config.server.liveness_timeout()));
    let server = EpmdServer::bind(config.server.clone(), registry).await?;

    // ── Shutdown ─────────────────────────────────────────────────────────────
    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("shutdown signal received");
        shutdown.shutdown();
    });

    server.run().await?;
    tracing::info!("epmd stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn historical_flags() {
        let args = parse_args(&argv(&[
            "-port",
            "4400",
            "-address",
            "127.0.0.1,10.0.0.1",
            "-relaxed_command_check",
            "-d",
        ]))
        .unwrap();
        assert_eq!(args.port, Some(4400));
        assert_eq!(args.addresses.as_ref().map(Vec::len), Some(2));
        assert!(args.relaxed);
        assert!(args.debug);
    }

    #[test]
    fn double_dash_flags() {
        let args = parse_args(&argv(&["--port", "5000", "--debug"])).unwrap();
        assert_eq!(args.port, Some(5000));
        assert!(args.debug);
        assert!(!args.relaxed);
    }

    #[test]
    fn bad_arguments_are_rejected() {
        assert!(parse_args(&argv(&["-port"])).is_err());
        assert!(parse_args(&argv(&["-port", "high"])).is_err());
        assert!(parse_args(&argv(&["-address", "nowhere"])).is_err());
        assert!(parse_args(&argv(&["-daemon"])).is_err());
    }

    #[test]
    fn flags_win_over_config() {
        let mut config = EpmdConfig::default();
        config.server.port = 5000;
        apply_args(
            &mut config,
            Args {
                port: Some(6000),
                relaxed: true,
                ..Args::default()
            },
        );
        assert_eq!(config.server.port, 6000);
        assert!(config.server.relaxed_command_check);
        assert_eq!(
            config.server.allowed_addresses,
            EpmdConfig::default().server.allowed_addresses
        );
    }
}
