//! Wolfpack - Cluster Coordination Node
//!
//! Joins the cluster through ZooKeeper: volunteers for leadership,
//! registers the node address in the service registry, and blocks until
//! the session dies or shutdown is requested.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use wolfpack::cluster::{ElectionParticipant, MembershipRegistry, RoleCallback};
use wolfpack::config::{
    ClusterConfig, CoordinationConfig, LoggingConfig, NodeConfig, WolfpackConfig,
};
use wolfpack::coordination::zookeeper::ZooKeeperCoordination;
use wolfpack::coordination::Session;
use wolfpack::error::Result;

/// Wolfpack - Cluster Coordination Node
#[derive(Parser)]
#[command(name = "wolfpack")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "wolfpack.toml")]
    config: PathBuf,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Join the cluster and run until shutdown
    Start,

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "wolfpack.toml")]
        output: PathBuf,

        /// Address other members use to reach this node
        #[arg(long, default_value = "127.0.0.1:9000")]
        advertise_address: String,

        /// Node ID (generated at startup when omitted)
        #[arg(long)]
        node_id: Option<String>,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start => {
            let config = WolfpackConfig::from_file(&cli.config)?;
            let level = cli
                .log_level
                .clone()
                .unwrap_or_else(|| config.logging.level.clone());
            init_logging(&level);
            run_start(config).await
        }
        Commands::Init {
            output,
            advertise_address,
            node_id,
        } => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"));
            run_init(output, advertise_address, node_id)
        }
        Commands::Validate => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"));
            run_validate(cli.config)
        }
    }
}

/// Initialize logging
fn init_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Role-change callback that reports transitions in the log
struct LoggingRoleCallback {
    node_id: String,
}

impl RoleCallback for LoggingRoleCallback {
    fn on_became_leader(&self) {
        tracing::info!("node {} took cluster leadership", self.node_id);
    }

    fn on_became_follower(&self) {
        tracing::info!("node {} following the current leader", self.node_id);
    }
}

/// Join the cluster and block until the session dies or ctrl-c
async fn run_start(config: WolfpackConfig) -> Result<()> {
    let node_id = config
        .node
        .id
        .clone()
        .unwrap_or_else(|| format!("node-{}", Uuid::new_v4()));

    tracing::info!(
        "starting wolfpack node {} ({})",
        node_id,
        config.node.advertise_address
    );

    let coordination = Arc::new(
        ZooKeeperCoordination::connect(&config.coordination.servers, config.session_timeout())
            .await?,
    );
    let session = Session::new(coordination.clone());
    session.wait_until_connected().await?;
    tracing::info!(
        "connected to coordination service at {}",
        config.coordination.servers
    );

    let callback = Arc::new(LoggingRoleCallback {
        node_id: node_id.clone(),
    });
    let election = ElectionParticipant::new(
        session.client(),
        config.cluster.election_path.clone(),
        callback,
    );
    let registry = MembershipRegistry::new(session.client(), config.cluster.registry_path.clone());

    election.volunteer().await?;
    registry.register(&config.node.advertise_address).await?;
    tracing::info!("cluster members: {:?}", registry.snapshot().await);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested, leaving the cluster");
            if let Err(err) = registry.unregister().await {
                tracing::warn!("unregister failed: {}", err);
            }
            if let Err(err) = election.resign().await {
                tracing::warn!("resign failed: {}", err);
            }
        }
        state = session.wait_until_disconnected() => {
            tracing::warn!("coordination session {}; exiting", state);
        }
    }

    election.shutdown();
    registry.shutdown();
    if let Err(err) = coordination.close().await {
        tracing::warn!("session close failed: {}", err);
    }

    tracing::info!("disconnected from coordination service, exiting");
    Ok(())
}

/// Write a fresh configuration file
fn run_init(output: PathBuf, advertise_address: String, node_id: Option<String>) -> Result<()> {
    let config = WolfpackConfig {
        node: NodeConfig {
            id: node_id,
            advertise_address,
        },
        coordination: CoordinationConfig::default(),
        cluster: ClusterConfig::default(),
        logging: LoggingConfig::default(),
    };

    let content = toml::to_string_pretty(&config)
        .map_err(|err| wolfpack::Error::Config(format!("serialize config: {}", err)))?;
    std::fs::write(&output, content)?;

    tracing::info!("wrote configuration to {}", output.display());
    Ok(())
}

/// Check that a configuration file parses and validates
fn run_validate(path: PathBuf) -> Result<()> {
    let config = WolfpackConfig::from_file(&path)?;
    tracing::info!(
        "configuration valid: election {} registry {} via {}",
        config.cluster.election_path,
        config.cluster.registry_path,
        config.coordination.servers
    );
    Ok(())
}
