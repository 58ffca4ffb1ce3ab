//! EmberKV - An In-Memory, Multi-Database, RESP-Speaking Key-Value Server
//!
//! The main entry point: parses the CLI flags, sets up logging, builds the
//! server engine, binds the listener, and runs the accept loop until a
//! shutdown signal arrives.
//!
//! Exit codes: 0 on clean shutdown, 1 on configuration errors, 2 when the
//! listen address cannot be bound.

use emberkv::server::{Server, ServerConfig};
use emberkv::storage::EvictionPolicy;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// Exit code for configuration errors.
const EXIT_CONFIG: u8 = 1;
/// Exit code for a port-bind failure.
const EXIT_BIND: u8 = 2;

/// Parses the command line into a server configuration.
fn config_from_args() -> Result<ServerConfig, String> {
    let mut config = ServerConfig::default();
    let args: Vec<String> = std::env::args().collect();

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--bind-addr" => {
                config.bind_addr = take_value(&args, &mut i)?.to_string();
            }
            "--port" => {
                config.port = take_value(&args, &mut i)?
                    .parse()
                    .map_err(|_| "invalid port number".to_string())?;
            }
            "--data-dir" => {
                config.data_dir = take_value(&args, &mut i)?.to_string();
            }
            "--eviction-policy" => {
                let raw = take_value(&args, &mut i)?;
                config.eviction.policy = EvictionPolicy::parse(raw)
                    .ok_or_else(|| format!("unknown eviction policy '{}'", raw))?;
            }
            "--eviction-interval" => {
                let ms: u64 = take_value(&args, &mut i)?
                    .parse()
                    .map_err(|_| "invalid eviction interval (milliseconds)".to_string())?;
                config.eviction.interval = Duration::from_millis(ms);
            }
            "--max-memory" => {
                config.eviction.max_memory = take_value(&args, &mut i)?
                    .parse()
                    .map_err(|_| "invalid max-memory byte count".to_string())?;
            }
            "--help" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-v" => {
                println!("EmberKV version {}", emberkv::VERSION);
                std::process::exit(0);
            }
            _ => return Err(format!("unknown argument: {}", flag)),
        }
        i += 1;
    }

    Ok(config)
}

/// Consumes the flag's value argument.
fn take_value<'a>(args: &'a [String], i: &mut usize) -> Result<&'a str, String> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| format!("{} requires a value", args[*i - 1]))
}

fn print_help() {
    println!(
        r#"
EmberKV - An In-Memory, Multi-Database, RESP-Speaking Key-Value Server

USAGE:
    emberkv [OPTIONS]

OPTIONS:
    --bind-addr <ADDR>          Listening address (default: 127.0.0.1)
    --port <PORT>               Listening port (default: 6379)
    --data-dir <DIR>            Directory for snapshots/logs; empty disables
                                persistence (default: empty)
    --eviction-policy <POLICY>  noeviction | allkeys-lru | allkeys-lfu |
                                allkeys-random | volatile-lru | volatile-lfu |
                                volatile-random | volatile-ttl
                                (default: noeviction)
    --eviction-interval <MS>    Milliseconds between sweeper runs
                                (default: 100)
    --max-memory <BYTES>        Memory cap in bytes; 0 disables (default: 0)
    -v, --version               Print version information
        --help                  Print this help message

CONNECTING:
    Use redis-cli or any RESP client:
    $ redis-cli -p 6379
    127.0.0.1:6379> SET greeting hello
    OK
    127.0.0.1:6379> GET greeting
    "hello"
"#
    );
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = match config_from_args() {
        Ok(config) => config,
        Err(message) => {
            eprintln!("Error: {}", message);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let _subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    info!(
        version = emberkv::VERSION,
        address = %config.listen_address(),
        policy = %config.eviction.policy,
        max_memory = config.eviction.max_memory,
        "starting EmberKV"
    );
    if !config.data_dir.is_empty() {
        info!(data_dir = %config.data_dir, "persistence collaborator not wired; running in-memory only");
    }

    let address = config.listen_address();
    let listener = match TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(address = %address, error = %e, "failed to bind listener");
            return ExitCode::from(EXIT_BIND);
        }
    };
    info!(address = %address, "listening");

    let server = Arc::new(Server::new(config));
    let (shutdown_tx, _) = watch::channel(false);

    let serve_shutdown = shutdown_tx.clone();
    let serve = tokio::spawn(Arc::clone(&server).serve(listener, serve_shutdown));

    match signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received, stopping server"),
        Err(e) => error!(error = %e, "failed to listen for shutdown signal"),
    }
    let _ = shutdown_tx.send(true);
    let _ = serve.await;

    ExitCode::SUCCESS
}
