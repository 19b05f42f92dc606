use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, info};
use tracing_subscriber::EnvFilter;
use lyra_orchestrator::resources::{GpuAccountant, GpuProbe, NvidiaSmiProbe, StaticGpuProbe};
use lyra_orchestrator::worker_client::HttpWorkerClient;
use lyra_orchestrator::{
    DatabaseConfig, NodeArgs, NodeConfig, PlacementDomain, SurrealEnvironmentStore, WorkerServer,
    WorkerServerId, create_app_state, create_router,
};

#[derive(Parser)]
#[command(name = "lyra-orchestrator")]
#[command(about = "GPU environment control plane and worker agent")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API for this node's role
    Serve {
        #[arg(long, default_value = "0.0.0.0:8000")]
        bind: String,
        #[arg(long, env = "SURREALDB_URL", default_value = "memory")]
        db_url: String,
        #[command(flatten)]
        node: NodeArgs,
    },
    /// Initialize the database
    Init {
        #[arg(long, env = "SURREALDB_URL", default_value = "memory")]
        db_url: String,
    },
    /// Register (or update) a worker server
    RegisterWorker {
        #[arg(long)]
        name: String,
        /// Base URL of the worker's API, e.g. http://10.0.0.5:8000
        #[arg(long)]
        base_url: String,
        /// Existing worker id to update (a new id is generated otherwise)
        #[arg(long)]
        id: Option<String>,
        #[arg(long, env = "SURREALDB_URL", default_value = "memory")]
        db_url: String,
    },
    /// List registered worker servers
    Workers {
        #[arg(long, env = "SURREALDB_URL", default_value = "memory")]
        db_url: String,
    },
    /// Print the host GPU snapshot as JSON
    Gpu {
        #[arg(long, env = "LYRA_GPU_COUNT")]
        gpu_count: Option<u32>,
        #[arg(long, env = "SURREALDB_URL", default_value = "memory")]
        db_url: String,
    },
}

async fn open_store(db_url: String) -> Result<SurrealEnvironmentStore> {
    let db_config = DatabaseConfig {
        url: db_url,
        ..Default::default()
    };
    info!("Using database url: {}", db_config.url);
    let db = lyra_orchestrator::create_connection(db_config).await?;
    lyra_orchestrator::ensure_schema(&db).await?;
    Ok(SurrealEnvironmentStore::new(db))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("lyra_orchestrator=info".parse()?)
                .add_directive("bollard=warn".parse()?),
        )
        .with_max_level(Level::INFO)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { bind, db_url, node } => {
            let config = NodeConfig::try_from(node)?;
            info!(role = %config.role, "Starting node");

            let store = open_store(db_url).await?;
            let state = create_app_state(&config, store)?;
            let app = create_router(state);

            let listener = tokio::net::TcpListener::bind(&bind).await?;
            info!("{} API listening on http://{}", config.role, bind);
            axum::serve(listener, app).await?;
        }
        Commands::Init { db_url } => {
            info!("Initializing database...");
            open_store(db_url).await?;
            info!("Database initialized successfully");
        }
        Commands::RegisterWorker {
            name,
            base_url,
            id,
            db_url,
        } => {
            url::Url::parse(&base_url)?;
            let store = open_store(db_url).await?;
            let worker = WorkerServer {
                id: id.map(WorkerServerId::new).unwrap_or_else(WorkerServerId::generate),
                name,
                base_url,
            };
            let saved = store.save_worker(&worker).await?;

            println!("Worker registered.");
            println!();
            println!("  Id:       {}", saved.id);
            println!("  Name:     {}", saved.name);
            println!("  Base URL: {}", saved.base_url);
        }
        Commands::Workers { db_url } => {
            let store = open_store(db_url).await?;
            let workers = store.list_workers().await?;
            if workers.is_empty() {
                println!("No workers registered.");
            }
            for worker in workers {
                println!("{}  {}  {}", worker.id, worker.name, worker.base_url);
            }
        }
        Commands::Gpu { gpu_count, db_url } => {
            let store = Arc::new(open_store(db_url).await?);
            let probe: Arc<dyn GpuProbe> = match gpu_count {
                Some(count) => Arc::new(StaticGpuProbe(count)),
                None => Arc::new(NvidiaSmiProbe::default()),
            };
            let workers = Arc::new(HttpWorkerClient::new(None, Duration::from_secs(30))?);
            let accountant = GpuAccountant::new(store, probe, workers, Duration::from_secs(30));

            let snapshot = accountant
                .get_gpu_resources(&PlacementDomain::Host)
                .await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
    }

    Ok(())
}
