use std::path::PathBuf;

use clap::Parser;
use flint_core::Engine;
use flint_server::{Executor, FlintConfig};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

#[derive(Parser)]
#[command(name = "flint-server", about = "flint in-memory key-value engine")]
struct Args {
    /// path to TOML configuration file
    #[arg(short = 'c', long, env = "FLINT_CONFIG")]
    config: Option<PathBuf>,

    /// print default configuration as TOML and exit
    #[arg(long)]
    config_template: bool,

    /// number of shards. defaults to available CPU cores
    #[arg(long, env = "FLINT_SHARDS")]
    shards: Option<usize>,

    /// maximum memory limit (e.g. "100M", "1G", "512K"). default: unlimited
    #[arg(long, env = "FLINT_MAX_MEMORY")]
    max_memory: Option<String>,

    /// maximum number of keys. default: unlimited
    #[arg(long, env = "FLINT_MAX_KEYS")]
    max_keys: Option<usize>,

    /// eviction policy when a limit is reached: noeviction, allkeys-lru
    /// or allkeys-lfu
    #[arg(long, env = "FLINT_EVICTION_POLICY")]
    eviction_policy: Option<String>,

    /// milliseconds between active expiry passes
    #[arg(long, env = "FLINT_EXPIRY_TICK_MS")]
    expiry_tick_ms: Option<u64>,

    /// how EXAT/PXAT timestamps are validated: floor, future-only or any
    #[arg(long, env = "FLINT_ABSOLUTE_EXPIRY")]
    absolute_expiry: Option<String>,

    /// smallest EXAT/PXAT instant (unix ms) accepted by the floor rule
    #[arg(long, env = "FLINT_ABSOLUTE_EXPIRY_FLOOR_MS")]
    absolute_expiry_floor_ms: Option<u64>,

    /// pending watch notifications per session before updates are skipped
    #[arg(long, env = "FLINT_WATCH_QUEUE_CAPACITY")]
    watch_queue_capacity: Option<usize>,
}

/// Applies CLI overrides to a `FlintConfig`. Only `Some` values take
/// effect, preserving the order defaults → TOML file → env vars → flags.
fn apply_args(cfg: &mut FlintConfig, args: &Args) {
    if let Some(n) = args.shards {
        cfg.shards = n;
    }
    if let Some(ref mem) = args.max_memory {
        cfg.maxmemory = Some(mem.clone());
    }
    if let Some(n) = args.max_keys {
        cfg.maxkeys = Some(n);
    }
    if let Some(ref policy) = args.eviction_policy {
        cfg.maxmemory_policy = policy.clone();
    }
    if let Some(ms) = args.expiry_tick_ms {
        cfg.expiry_tick_ms = ms;
    }
    if let Some(ref rule) = args.absolute_expiry {
        cfg.absolute_expiry = rule.clone();
    }
    if let Some(ms) = args.absolute_expiry_floor_ms {
        cfg.absolute_expiry_floor_ms = ms;
    }
    if let Some(n) = args.watch_queue_capacity {
        cfg.watch_queue_capacity = n;
    }
}

/// Prints `msg` to stderr and exits with code 1.
fn exit_err(msg: impl std::fmt::Display) -> ! {
    eprintln!("{msg}");
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flint=info".into()),
        )
        .init();

    let args = Args::parse();

    if args.config_template {
        match FlintConfig::default().to_toml() {
            Ok(toml) => {
                println!("{toml}");
                std::process::exit(0);
            }
            Err(e) => exit_err(format!("failed to generate config template: {e}")),
        }
    }

    let mut cfg = match &args.config {
        Some(path) => FlintConfig::from_file(path).unwrap_or_else(|e| exit_err(e)),
        None => FlintConfig::default(),
    };
    apply_args(&mut cfg, &args);

    let engine_config = cfg.engine_config().unwrap_or_else(|e| exit_err(e));
    let expiry_rule = cfg.absolute_expiry_rule().unwrap_or_else(|e| exit_err(e));
    let shard_count = cfg.resolved_shard_count();

    let engine = Engine::with_config(shard_count, engine_config);
    let executor = Executor::new(engine)
        .with_expiry_rule(expiry_rule)
        .with_watch_queue_capacity(cfg.watch_queue_capacity);

    info!(shards = shard_count, "flint ready, reading commands from stdin");

    if let Err(e) = repl(&executor).await {
        exit_err(format!("i/o error: {e}"));
    }
}

/// Reads one command per line and prints each reply. Watch
/// notifications are printed as they arrive, between replies.
async fn repl(executor: &Executor) -> std::io::Result<()> {
    let mut session = executor.session();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut out = tokio::io::stdout();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if let Some(reply) = executor.execute_line(&session, &line).await {
                    out.write_all(format!("{reply}\n").as_bytes()).await?;
                    out.flush().await?;
                }
            }
            Some(note) = session.next_notification() => {
                out.write_all(format!("{note}\n").as_bytes()).await?;
                out.flush().await?;
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    let removed = session.close();
    info!(subscriptions = removed, "session closed, shutting down");
    Ok(())
}
