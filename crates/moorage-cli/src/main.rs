//! moorctl: operate a Moorage cluster from the command line.
//!
//! # Usage
//!
//! ```text
//! moorctl init-config --cluster prod --store /var/lib/moorage/prod.redb
//! moorctl --config moorage.toml create --request zookeeper.toml
//! moorctl --config moorage.toml show zookeeper
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::Instrument;

use moorage_core::{LogConfig, LogFormat, MoorageConfig, gen_request_id};

mod commands;

#[derive(Parser)]
#[command(
    name = "moorctl",
    about = "Moorage: control plane for stateful services",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Path to moorage.toml.
    #[arg(short, long, global = true, default_value = "moorage.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a moorage.toml with every default spelled out.
    InitConfig {
        #[arg(long)]
        cluster: String,
        #[arg(long, default_value = "us-east-1")]
        region: String,
        /// Path of the state database.
        #[arg(long, default_value = "/var/lib/moorage/moorage.redb")]
        store: PathBuf,
        /// Where to write the config (default: --config).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Create a service from a request file, or resume an interrupted create.
    Create {
        /// TOML file holding a CreateServiceRequest.
        #[arg(short, long)]
        request: PathBuf,
    },
    /// List clusters that own services in the store.
    Clusters,
    /// List services in the cluster.
    List,
    /// Show a service's attributes and members as JSON.
    Show { service: String },
    /// List the volume IDs held by a service's members.
    Volumes { service: String },
    /// Mark a service as initialized (Active).
    Initialized { service: String },
    /// Replace one member config file with the contents of a local file.
    UpdateConfig {
        service: String,
        member: String,
        file_name: String,
        /// Local file with the new content.
        #[arg(long)]
        from: PathBuf,
    },
    /// Delete a service's records and print the volumes left to reclaim.
    Delete { service: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::InitConfig {
        cluster,
        region,
        store,
        output,
    } = &cli.command
    {
        init_tracing(&LogConfig::default())?;
        let output = output.as_ref().unwrap_or(&cli.config);
        return commands::config::init_config(cluster, region, store, output);
    }

    let config = MoorageConfig::from_file(&cli.config)?;
    init_tracing(&config.log)?;

    let requuid = gen_request_id();
    let span = tracing::info_span!("request", %requuid);
    run(cli.command, &config).instrument(span).await
}

async fn run(command: Commands, config: &MoorageConfig) -> anyhow::Result<()> {
    let svc = commands::service::open(config)?;
    let cluster = config.cluster.name.as_str();
    match command {
        Commands::InitConfig { .. } => Ok(()),
        Commands::Create { request } => commands::service::create(&svc, &request).await,
        Commands::Clusters => commands::service::clusters(&svc),
        Commands::List => commands::service::list(&svc, cluster),
        Commands::Show { service } => commands::service::show(&svc, cluster, &service),
        Commands::Volumes { service } => commands::service::volumes(&svc, cluster, &service),
        Commands::Initialized { service } => {
            commands::service::initialized(&svc, cluster, &service).await
        }
        Commands::UpdateConfig {
            service,
            member,
            file_name,
            from,
        } => commands::service::update_config(&svc, cluster, &service, &member, &file_name, &from),
        Commands::Delete { service } => commands::service::delete(&svc, cluster, &service).await,
    }
}

fn init_tracing(log: &LogConfig) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&log.filter))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match log.format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}
