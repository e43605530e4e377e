//! Knowledge graph MCP server
//!
//! Entry point: parses the command line, layers configuration, sets up
//! logging on stderr (stdout carries protocol bytes) and runs the selected
//! command.

use clap::{Parser, Subcommand};
use kg_core::{
    error::Result,
    storage::{ConnectionMode, RetryPolicy},
    GraphDocument, GraphEngine, KgConfig, LazyStore, LibsqlGraphStore, McpServer, ToolRegistry,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "knowledge-graph-mcp")]
#[command(about = "Knowledge graph memory server over the Model Context Protocol", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Store location: file path, :memory:, or libsql:// / https:// URL
    #[arg(long, global = true)]
    store_url: Option<String>,

    /// Namespace selector within the store
    #[arg(long, global = true)]
    namespace: Option<String>,

    /// Database selector within the namespace
    #[arg(long, global = true)]
    database: Option<String>,

    /// Set log level
    #[arg(short, long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start MCP server (stdio mode)
    Serve,

    /// Create the store schema and exit
    Init,

    /// Write the whole graph as JSON
    Export {
        /// Output path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Load a graph JSON file, skipping entities and relations that already exist
    Import {
        /// Graph file with `entities` and `relations`
        file: PathBuf,
    },
}

impl Cli {
    fn apply_overrides(&self, config: &mut KgConfig) {
        if let Some(url) = &self.store_url {
            config.store_url = url.clone();
        }
        if let Some(namespace) = &self.namespace {
            config.namespace = namespace.clone();
        }
        if let Some(database) = &self.database {
            config.database = database.clone();
        }
        if let Some(level) = &self.log_level {
            config.trace_level = level.clone();
        }
    }
}

fn init_tracing(level: &str) {
    // RUST_LOG wins when set; otherwise our crates at `level`, libsql quieter
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "kg_core={level},knowledge_graph_mcp={level},libsql=warn",
            level = level.to_lowercase()
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr) // Write logs to stderr, not stdout
        .init();
}

fn connection_mode(config: &KgConfig) -> ConnectionMode {
    ConnectionMode::from_url(&config.store_url, &config.store_token)
}

fn retry_policy(config: &KgConfig) -> RetryPolicy {
    RetryPolicy {
        retries: config.connect_retries,
        base_delay: config.retry_backoff(),
    }
}

async fn open_store(config: &KgConfig) -> Result<LibsqlGraphStore> {
    LibsqlGraphStore::open(
        connection_mode(config),
        &config.namespace,
        &config.database,
        retry_policy(config),
    )
    .await
}

/// Run the MCP server until `exit`, end of input or Ctrl-C; returns the exit code
async fn start_mcp_server(config: &KgConfig) -> Result<i32> {
    let store = Arc::new(LazyStore::new(
        connection_mode(config),
        config.namespace.clone(),
        config.database.clone(),
        retry_policy(config),
    ));

    // Connect in the background; the handshake must not wait on the store
    let warm = Arc::clone(&store);
    tokio::spawn(async move {
        warm.warm_up().await;
    });

    let engine = GraphEngine::with_timeout(store, config.store_timeout());
    let server =
        McpServer::new(ToolRegistry::new(engine)).with_max_frame_bytes(config.max_frame_bytes);

    // Run server with graceful shutdown on signals
    let code = tokio::select! {
        result = server.run() => result?.exit_code(),
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal, stopping MCP server gracefully...");
            0
        }
    };

    info!("MCP server shut down complete");
    Ok(code)
}

async fn export_graph(config: &KgConfig, output: Option<PathBuf>) -> Result<()> {
    let store = open_store(config).await?;
    let engine = GraphEngine::with_timeout(Arc::new(store), config.store_timeout());
    let graph = engine.read_graph().await?;
    let json = serde_json::to_string_pretty(&graph)?;

    match output {
        Some(path) => {
            std::fs::write(&path, json)?;
            println!(
                "Exported {} entities and {} relations to {}",
                graph.entities.len(),
                graph.relations.len(),
                path.display()
            );
        }
        None => println!("{}", json),
    }
    Ok(())
}

async fn import_graph(config: &KgConfig, file: PathBuf) -> Result<()> {
    let raw = std::fs::read_to_string(&file)?;
    let document: GraphDocument = serde_json::from_str(&raw)?;
    debug!(
        "Importing {} entities and {} relations from {}",
        document.entities.len(),
        document.relations.len(),
        file.display()
    );

    let store = open_store(config).await?;
    let engine = GraphEngine::with_timeout(Arc::new(store), config.store_timeout());
    let summary = engine.import(document).await?;

    println!(
        "Imported {} entities and {} relations",
        summary.entities, summary.relations
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = KgConfig::load(cli.config.as_deref())?;
    cli.apply_overrides(&mut config);
    init_tracing(&config.trace_level);

    debug!("knowledge-graph-mcp v{} starting...", env!("CARGO_PKG_VERSION"));

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let code = start_mcp_server(&config).await?;
            if code != 0 {
                warn!("Exiting with status {}", code);
                std::process::exit(code);
            }
            Ok(())
        }
        Commands::Init => {
            let store = open_store(&config).await?;
            println!(
                "Store ready at {} (scope {})",
                connection_mode(&config),
                store.session().scope()
            );
            store.close();
            Ok(())
        }
        Commands::Export { output } => export_graph(&config, output).await,
        Commands::Import { file } => import_graph(&config, file).await,
    }
}
