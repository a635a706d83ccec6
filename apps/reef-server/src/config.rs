use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use reef_core::{AppConfig, DispatchMode};

#[derive(Debug, Parser)]
#[command(
    name = "reef-server",
    author,
    version,
    about = "Serves Reef pages over HTTP and keeps them live over WebSocket"
)]
pub struct Cli {
    /// Address to bind the HTTP and WebSocket listener to.
    #[arg(long, env = "REEF_LISTEN_ADDR", default_value = "127.0.0.1:8080")]
    pub listen_addr: String,

    /// Redis connection URI for persisted session state. Falls back to an
    /// in-process store when unset or unreachable.
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// How long persisted session state outlives its last write.
    #[arg(long, env = "REEF_SESSION_TTL", default_value_t = 86_400)]
    pub session_ttl_secs: u64,

    /// Purge interval for the in-process store.
    #[arg(long, env = "REEF_SWEEP_INTERVAL", default_value_t = 60)]
    pub sweep_interval_secs: u64,

    /// `inline` awaits each handler in the read loop; `concurrent` spawns one task per event.
    #[arg(long, env = "REEF_DISPATCH_MODE", default_value = "inline")]
    pub dispatch_mode: String,

    #[arg(
        long,
        env = "RUST_LOG",
        default_value = "info,reef_core=debug,reef_server=debug"
    )]
    pub log_filter: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub redis_url: Option<String>,
    pub sweep_interval: Duration,
    pub log_filter: String,
    pub app: AppConfig,
}

impl TryFrom<Cli> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let listen_addr: SocketAddr = cli
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address: {}", cli.listen_addr))?;
        if cli.sweep_interval_secs == 0 {
            bail!("sweep interval must be at least one second");
        }
        let dispatch_mode: DispatchMode = cli
            .dispatch_mode
            .parse()
            .map_err(anyhow::Error::msg)?;
        let redis_url = cli.redis_url.filter(|url| !url.trim().is_empty());
        Ok(ServerConfig {
            listen_addr,
            redis_url,
            sweep_interval: Duration::from_secs(cli.sweep_interval_secs),
            log_filter: cli.log_filter,
            app: AppConfig {
                session_ttl: Duration::from_secs(cli.session_ttl_secs),
                dispatch_mode,
            },
        })
    }
}
