use std::{net::IpAddr, sync::Arc};

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "mainline")]
use dht_gateway::engine::mainline::MainlineEngine;
use dht_gateway::{
    config::{DEFAULT_BUCKET_SIZE, DEFAULT_GATEWAY_PORT, DEFAULT_LISTEN_PORT},
    engine::memory::MemoryEngine,
    run_blocking,
    token::SystemClock,
    CancellationToken, DhtEngine, GatewayConfig, JoinPolicy, Node, NodeConfig, TimeBucketTokens,
    TokenGate, Variant,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// IP address of an existing node to join.
    #[arg(short, long, env = "DHT_GATEWAY_BOOTSTRAP_IP")]
    ip: Option<String>,
    /// Port of the existing node to join.
    #[arg(short, long, env = "DHT_GATEWAY_BOOTSTRAP_PORT")]
    port: Option<u16>,
    /// DHT listen port of this node.
    #[arg(short, long, default_value_t = DEFAULT_LISTEN_PORT, env = "DHT_GATEWAY_LISTEN")]
    listen: u16,
    /// Routing table fan-out passed to the engine.
    #[arg(long, default_value_t = DEFAULT_BUCKET_SIZE, env = "DHT_GATEWAY_BUCKET_SIZE")]
    bucket_size: usize,
    /// Gateway HTTP port.
    #[arg(long, default_value_t = DEFAULT_GATEWAY_PORT, env = "DHT_GATEWAY_HTTP_PORT")]
    http_port: u16,
    /// Gateway bind address, defaults to loopback for `basic` and all interfaces for `hardened`.
    #[arg(long, env = "DHT_GATEWAY_HTTP_BIND")]
    http_bind: Option<IpAddr>,
    #[arg(long, value_enum, default_value_t = VariantArg::Hardened, env = "DHT_GATEWAY_VARIANT")]
    variant: VariantArg,
    /// What to do when the bootstrap peer can't be joined.
    #[arg(long, value_enum, default_value_t = JoinPolicyArg::FailFast, env = "DHT_GATEWAY_JOIN_POLICY")]
    join_policy: JoinPolicyArg,
    #[arg(long, value_enum, default_value_t = EngineKind::default(), env = "DHT_GATEWAY_ENGINE")]
    engine: EngineKind,
    /// Log level, overridden by `RUST_LOG`.
    #[arg(long, default_value = "info", env = "DHT_GATEWAY_LOG")]
    log_level: String,
    /// Print the token for the current minute and exit.
    #[arg(long)]
    print_token: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum VariantArg {
    Basic,
    Hardened,
}

impl From<VariantArg> for Variant {
    fn from(arg: VariantArg) -> Self {
        match arg {
            VariantArg::Basic => Variant::Basic,
            VariantArg::Hardened => Variant::Hardened,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum JoinPolicyArg {
    FailFast,
    Standalone,
}

impl From<JoinPolicyArg> for JoinPolicy {
    fn from(arg: JoinPolicyArg) -> Self {
        match arg {
            JoinPolicyArg::FailFast => JoinPolicy::FailFast,
            JoinPolicyArg::Standalone => JoinPolicy::Standalone,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EngineKind {
    #[cfg(feature = "mainline")]
    Mainline,
    Memory,
}

impl Default for EngineKind {
    #[cfg(feature = "mainline")]
    fn default() -> Self {
        EngineKind::Mainline
    }

    #[cfg(not(feature = "mainline"))]
    fn default() -> Self {
        EngineKind::Memory
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.print_token {
        println!("{}", TimeBucketTokens::new(SystemClock).issue());
        return Ok(());
    }

    init_tracing(&cli.log_level);

    let config = NodeConfig {
        listen_port: cli.listen,
        bucket_size: cli.bucket_size,
        join_policy: cli.join_policy.into(),
        gateway: GatewayConfig {
            variant: cli.variant.into(),
            port: cli.http_port,
            bind: cli.http_bind,
        },
        ..Default::default()
    }
    .with_bootstrap_parts(cli.ip, cli.port)?;

    let engine: Arc<dyn DhtEngine> = match cli.engine {
        #[cfg(feature = "mainline")]
        EngineKind::Mainline => Arc::new(MainlineEngine::new(config.bucket_size)),
        EngineKind::Memory => Arc::new(MemoryEngine::new()),
    };

    info!(engine = ?cli.engine, ?config, "Starting node");

    let node = Node::new(config, engine)?;

    let shutdown = CancellationToken::new();
    let interrupt = shutdown.clone();

    ctrlc::set_handler(move || {
        info!("Interrupted, shutting down");
        interrupt.cancel();
    })
    .context("failed to install the interrupt handler")?;

    run_blocking(node, shutdown)?;

    Ok(())
}
