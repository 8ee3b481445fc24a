use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use log::info;
use std::path::{Path, PathBuf};
use tejido::config::example_config;
use tejido::{ClientConfig, ClientFactory, KvClient, Lifecycle, Properties};

#[derive(Parser)]
#[command(name = "tejido")]
#[command(about = "A client-side Redis fabric: sentinel-mastered, read-only, write-all and sharded clients")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = "Tejido Team")]
struct Cli {
    /// Log level (error, warn, info, debug, trace); overrides RUST_LOG
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate every client section of a configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Open a client and report its healthy set and key count
    Ping {
        #[arg(short, long)]
        config: PathBuf,
        /// Client section name
        #[arg(long)]
        client: String,
    },
    /// Print INFO from a client
    Info {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        client: String,
        /// INFO section, e.g. server or replication
        #[arg(short, long)]
        section: Option<String>,
    },
    /// Print an example configuration
    ExampleConfig,
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref())?;

    match cli.command {
        Commands::Validate { config } => validate_config(&config)?,
        Commands::Ping { config, client } => ping(&config, &client).await?,
        Commands::Info {
            config,
            client,
            section,
        } => show_info(&config, &client, section.as_deref()).await?,
        Commands::ExampleConfig => print!("{}", example_config()),
        Commands::Version => show_version(),
    }

    Ok(())
}

fn validate_config(path: &Path) -> anyhow::Result<()> {
    println!("Validating configuration file: {:?}", path);
    let root = Properties::load_from_file(path)
        .with_context(|| format!("Failed to load config from {:?}", path))?;

    let names = root.client_names();
    if names.is_empty() {
        bail!("no client sections found in {:?}", path);
    }

    let mut failures = 0;
    for name in &names {
        match ClientConfig::from_properties(&root.scoped(name)) {
            Ok(config) => {
                println!("✓ {} ({})", name, config.client_type);
                if !config.namespace.is_empty() {
                    println!("    namespace: {}", config.namespace);
                }
                for (i, server) in config.topology.servers.iter().enumerate() {
                    println!("    server {}: {}", i + 1, server);
                }
                for (i, sentinel) in config.topology.sentinels.iter().enumerate() {
                    println!("    sentinel {}: {}", i + 1, sentinel);
                }
                if !config.shard.clients.is_empty() {
                    println!("    shards: {}", config.shard.clients.join(", "));
                }
            }
            Err(e) => {
                failures += 1;
                eprintln!("✗ {}: {}", name, e);
            }
        }
    }

    if failures > 0 {
        bail!("{} of {} client sections are invalid", failures, names.len());
    }
    println!("Configuration file is valid ({} clients)", names.len());
    Ok(())
}

async fn open(path: &Path, name: &str) -> anyhow::Result<std::sync::Arc<dyn KvClient>> {
    let factory = ClientFactory::from_file(path)
        .with_context(|| format!("Failed to load config from {:?}", path))?;
    info!("Opening client {} from {:?}", name, path);
    factory
        .open(name)
        .await
        .with_context(|| format!("Failed to open client {}", name))
}

async fn ping(path: &Path, name: &str) -> anyhow::Result<()> {
    let client = open(path, name).await?;
    let outcome = async {
        let healthy = client.healthy_endpoints().await;
        println!("{} ({})", client.name(), client.client_type());
        println!("  healthy: {}", render_endpoints(&healthy));
        println!("  dbSize: {}", client.db_size().await?);
        anyhow::Ok(())
    }
    .await;
    client.stop().await;
    outcome
}

async fn show_info(path: &Path, name: &str, section: Option<&str>) -> anyhow::Result<()> {
    let client = open(path, name).await?;
    let outcome = client.info(section).await;
    client.stop().await;
    print!("{}", outcome?);
    Ok(())
}

fn render_endpoints(endpoints: &[tejido::Endpoint]) -> String {
    if endpoints.is_empty() {
        return "-".to_string();
    }
    endpoints
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn show_version() {
    println!("tejido v{}", env!("CARGO_PKG_VERSION"));
    println!("A client-side Redis fabric");
    println!();
    println!("Target: {}", std::env::consts::ARCH);
    println!();
    println!("Client types:");
    println!("  • default         sentinel master for writes, supervised replicas for reads");
    println!("  • sentinel        everything through the sentinel-resolved master");
    println!("  • readonly        supervised replicas, writes rejected");
    println!("  • writeallreadany writes fanned out to every healthy member");
    println!("  • shared          consistent-hash sharding over child clients");
}

/// `log` records go through env_logger, `tracing` events through an EnvFilter subscriber.
fn init_logging(level: Option<&str>) -> anyhow::Result<()> {
    let log_level = match level.map(str::to_ascii_lowercase).as_deref() {
        Some("trace") => log::LevelFilter::Trace,
        Some("debug") => log::LevelFilter::Debug,
        Some("info") => log::LevelFilter::Info,
        Some("warn") => log::LevelFilter::Warn,
        Some("error") => log::LevelFilter::Error,
        Some(other) => bail!("unknown log level {:?}", other),
        None => log::LevelFilter::Warn,
    };

    let mut builder = env_logger::Builder::from_default_env();
    if level.is_some() {
        builder.filter_level(log_level);
    }
    builder.init();

    let filter = match level {
        Some(level) => tracing_subscriber::EnvFilter::new(level.to_ascii_lowercase()),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
    };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install the tracing subscriber")?;

    info!("Logging initialized at level: {:?}", log_level);
    Ok(())
}
