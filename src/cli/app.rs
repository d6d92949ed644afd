use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use memcluster::{
    ClusterConfig, Endpoint, LocatorKind, Protocol, ServerPool, SimulatedNodeFactory,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "memcluster")]
#[command(about = "Inspect cache cluster membership and key routing")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show which server each key routes to
    Route {
        /// Comma separated host:port list
        #[arg(long)]
        servers: String,
        #[arg(long, default_value_t = LocatorKind::Ketama)]
        locator: LocatorKind,
        /// Mark these servers dead before routing
        #[arg(long)]
        fail: Vec<String>,
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Parse a memcluster:// connection string and print the normalized form
    CheckConfig { url: String },
}

pub async fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Route {
            servers,
            locator,
            fail,
            keys,
        } => route(&servers, locator, &fail, &keys),
        Command::CheckConfig { url } => check_config(&url),
    }
}

fn route(servers: &str, locator: LocatorKind, fail: &[String], keys: &[String]) -> Result<()> {
    let endpoints = Endpoint::parse_list(servers).context("invalid --servers")?;
    let config = ClusterConfig::new()
        .servers(endpoints.clone())
        .protocol(Protocol::Text)
        .locator(locator);

    let factory = Arc::new(SimulatedNodeFactory::new());
    let pool = ServerPool::new(&config, factory.clone())?;
    pool.start(endpoints)?;

    for raw in fail {
        let endpoint: Endpoint = raw.parse().with_context(|| format!("invalid --fail '{}'", raw))?;
        let node = factory
            .latest(&endpoint)
            .ok_or_else(|| anyhow!("{} is not one of the servers", endpoint))?;
        node.fail();
    }

    for key in keys {
        match pool.locate(key) {
            Some(node) => println!("{} -> {}", key, node.endpoint()),
            None => println!("{} -> (no working server)", key),
        }
    }
    println!("{}", pool.stats());

    pool.dispose();
    Ok(())
}

fn check_config(url: &str) -> Result<()> {
    let config = ClusterConfig::from_url(url)?;
    println!("{}", config.to_url());
    println!("poll interval: {:?}", config.effective_poll_interval());
    println!("dead timeout: {:?}", config.dead_timeout);
    Ok(())
}
