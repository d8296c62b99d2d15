//! ethrpc CLI: send JSON-RPC calls and probe Ethereum nodes from the terminal.
//!
//! Usage:
//! ```bash
//! # Latest block number, failing over across two nodes
//! ethrpc call --node https://eth1.example,https://eth2.example --method eth_blockNumber
//!
//! # eth_getBalance through a local geth IPC socket
//! ethrpc call --ipc ~/.ethereum/geth.ipc --method eth_getBalance --params '["0xd403…","latest"]'
//!
//! # Round-trip latency of every configured node
//! ethrpc probe --config nodes.json --rounds 5
//! ```

use std::env;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ethrpc_core::{numeric, Command, DebugOptions, Dispatcher, ReturnType, RpcConfig, RpcPrefix};
use ethrpc_http::HttpTransport;
use ethrpc_ipc::IpcTransport;

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }
    init_tracing(has_flag(&args, "--verbose"));

    let result = match args[1].as_str() {
        "call" => cmd_call(&args[2..]).await,
        "probe" => cmd_probe(&args[2..]).await,
        "config" => cmd_config(&args[2..]),
        "version" | "--version" | "-V" => {
            println!("ethrpc {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("ethrpc {}", env!("CARGO_PKG_VERSION"));
    println!("Send JSON-RPC calls and probe Ethereum nodes\n");
    println!("USAGE:");
    println!("    ethrpc <COMMAND> [FLAGS]\n");
    println!("COMMANDS:");
    println!("    call       Broadcast one JSON-RPC call with failover");
    println!("    probe      Measure round-trip latency of each node");
    println!("    config     Print the effective configuration as JSON");
    println!("    version    Print version");
    println!("    help       Print this help\n");
    println!("NODE FLAGS:");
    println!("    --config <FILE>    JSON configuration file");
    println!("    --node <URLS>      Comma-separated hosted node URLs");
    println!("    --local <URL>      Local node, used exclusively");
    println!("    --ipc <PATH>       IPC socket, used exclusively");
    println!("    --timeout <MS>     Per-request timeout");
    println!("    --verbose          Debug logging\n");
    println!("CALL FLAGS:");
    println!("    --method <NAME>    Full method name, e.g. eth_blockNumber  [required]");
    println!("    --params <JSON>    Parameters (array or single value)");
    println!("    --returns <TYPE>   Return type: number, unfix, string, address, bool, X[]");
    println!("    --sync             Use the blocking dispatcher\n");
    println!("PROBE FLAGS:");
    println!("    --rounds <N>       Requests per node (default 3)");
}

/// `RUST_LOG` wins; otherwise `warn`, or `debug` for this workspace's
/// crates under `--verbose`.
fn init_tracing(verbose: bool) {
    let fallback = if verbose {
        "warn,ethrpc_core=debug,ethrpc_http=debug,ethrpc_ipc=debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(args: &[String]) -> Result<RpcConfig> {
    let mut config = match parse_flag(args, "--config") {
        Some(path) => {
            let text = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
            RpcConfig::from_json(&text).with_context(|| format!("parsing {path}"))?
        }
        None => RpcConfig::default(),
    };
    if let Some(nodes) = parse_flag(args, "--node") {
        config.hosted_nodes = nodes
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
    }
    if let Some(local) = parse_flag(args, "--local") {
        config.local_node = Some(local);
    }
    if let Some(path) = parse_flag(args, "--ipc") {
        config.ipc_path = Some(PathBuf::from(path));
    }
    if let Some(ms) = parse_flag(args, "--timeout") {
        let ms: u64 = ms.parse().with_context(|| format!("--timeout {ms}"))?;
        config.request_timeout = Duration::from_millis(ms);
    }
    if has_flag(args, "--verbose") {
        config.debug = DebugOptions {
            connect: true,
            broadcast: true,
            ..config.debug
        };
    }
    tracing::debug!(
        hosted = config.hosted_nodes.len(),
        local = ?config.local_node,
        ipc = ?config.ipc_path,
        timeout_ms = config.request_timeout.as_millis() as u64,
        "configuration loaded"
    );
    Ok(config)
}

fn build_dispatcher(config: RpcConfig) -> Result<Arc<Dispatcher>> {
    let ipc = config.ipc_path.is_some();
    let http = HttpTransport::with_defaults().context("building HTTP client")?;
    let mut dispatcher = Dispatcher::new(config, Arc::new(http));
    if ipc {
        dispatcher = dispatcher.with_ipc(Arc::new(IpcTransport::new()));
    }
    Ok(Arc::new(dispatcher))
}

async fn cmd_call(args: &[String]) -> Result<()> {
    let method = parse_flag(args, "--method").context("--method is required")?;
    let params: Value = match parse_flag(args, "--params") {
        Some(p) => serde_json::from_str(&p).context("--params is not valid JSON")?,
        None => Value::Null,
    };
    let returns = parse_flag(args, "--returns").map(|r| ReturnType::parse(&r));
    let dispatcher = build_dispatcher(load_config(args)?)?;

    let value = if has_flag(args, "--sync") {
        let d = Arc::clone(&dispatcher);
        tokio::task::spawn_blocking(move || d.request_blocking(&method, params, RpcPrefix::Raw, returns)).await??
    } else {
        dispatcher.request(&method, params, RpcPrefix::Raw, returns).await?
    };

    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

async fn cmd_probe(args: &[String]) -> Result<()> {
    let rounds: usize = match parse_flag(args, "--rounds") {
        Some(n) => n.parse().with_context(|| format!("--rounds {n}"))?,
        None => 3,
    };
    let dispatcher = build_dispatcher(load_config(args)?)?;
    let pool = dispatcher.pool_snapshot();
    let nodes: Vec<String> = match pool.local() {
        Some(local) => vec![local.to_string()],
        None => pool.hosted().to_vec(),
    };
    if nodes.is_empty() {
        bail!("no nodes configured");
    }

    for node in &nodes {
        println!("{node}");
        for round in 1..=rounds {
            let command = Command::Single(dispatcher.marshal("blockNumber", Value::Null, RpcPrefix::Eth));
            let started = Instant::now();
            match dispatcher.post(node, &command).await {
                Ok(reply) => {
                    let ms = started.elapsed().as_secs_f64() * 1000.0;
                    dispatcher.with_pool(|p| p.update_mean_latency(node, ms));
                    let value = reply.into_value();
                    let block = value.as_str().and_then(numeric::parse_quantity);
                    match block {
                        Some(b) => println!("  #{round}  {ms:>8.1}ms  block {b}"),
                        None => println!("  #{round}  {ms:>8.1}ms  {value}"),
                    }
                }
                Err(e) => {
                    tracing::warn!(node = %node, round, error = %e, "latency request failed");
                    println!("  #{round}  failed: {e}");
                }
            }
        }
    }

    let pool = dispatcher.pool_snapshot();
    println!();
    for node in &nodes {
        match pool.latency(node) {
            Some(stats) => println!("  {:>8.1}ms mean over {:>3}  {node}", stats.mean_ms, stats.samples),
            None => println!("  {:>10}  {:>12}  {node}", "-", "unreachable"),
        }
    }
    let network = pool.network_latency();
    println!("  {:>8.1}ms mean over {:>3}  (all nodes)", network.mean_ms, network.samples);
    Ok(())
}

fn cmd_config(args: &[String]) -> Result<()> {
    let config = load_config(args)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn parse_flag(args: &[String], flag: &str) -> Option<String> {
    let pos = args.iter().position(|a| a == flag)?;
    args.get(pos + 1).cloned()
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn flags_override_defaults() {
        let config = load_config(&args(&[
            "--node",
            "http://a, http://b,",
            "--timeout",
            "250",
            "--verbose",
        ]))
        .unwrap();
        assert_eq!(config.hosted_nodes, vec!["http://a", "http://b"]);
        assert_eq!(config.request_timeout, Duration::from_millis(250));
        assert!(config.debug.connect && config.debug.broadcast);
        assert!(!config.debug.sync);
    }

    #[test]
    fn bad_timeout_is_rejected() {
        assert!(load_config(&args(&["--timeout", "soon"])).is_err());
    }

    #[test]
    fn missing_flag_value() {
        assert_eq!(parse_flag(&args(&["--node"]), "--node"), None);
        assert!(has_flag(&args(&["call", "--sync"]), "--sync"));
    }
}
