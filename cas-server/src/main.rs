//! CAS Server - single sign-on ticketing service
//!
//! Serves the login, validation and proxy endpoints over HTTP and keeps
//! tickets in memory or in a SQLite file shared by every node.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use cas_auth::PrincipalToken;
use cas_core::SystemClock;
use cas_server::cleaner::ShutdownCoordinator;
use cas_server::config::{self, CasConfig};
use cas_server::db::DbService;
use cas_server::proxy_callback::HttpProxyCallback;
use cas_server::store::{MemoryTicketStore, RetryingTicketStore, SqliteTicketStore, TicketStore};
use cas_server::CasApp;

// ============================================================================
// CLI Definition
// ============================================================================

/// CAS Server - Central Authentication Service
#[derive(Parser)]
#[command(name = "cas-server", version, about)]
struct Cli {
    /// Configuration file (JSON); built-in defaults when absent
    #[arg(long, global = true, env = "CAS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server (default if no command given)
    Serve(ServeArgs),

    /// Principal token management
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },
}

#[derive(clap::Args, Default)]
struct ServeArgs {
    /// Address to listen on [default: 127.0.0.1:8443]
    #[arg(long, env = "CAS_BIND")]
    bind: Option<SocketAddr>,

    /// SQLite ticket store shared by all nodes; in-memory when absent
    #[arg(long, env = "CAS_DATABASE")]
    database: Option<PathBuf>,

    /// Suffix of every ticket id issued by this node
    #[arg(long, env = "CAS_NODE_ID")]
    node_id: Option<String>,
}

#[derive(Subcommand)]
enum TokenAction {
    /// Issue a principal token signed by the server key
    Issue {
        /// Principal the token authenticates
        #[arg(long)]
        subject: String,

        /// Token validity (e.g. "30m", "1h", "7d")
        #[arg(long)]
        validity: Option<String>,
    },
}

const DEFAULT_BIND: &str = "127.0.0.1:8443";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = CasConfig::load(cli.config.as_deref())?;

    match cli.command {
        Some(Commands::Token { action }) => cmd_token(&config, action),
        Some(Commands::Serve(args)) => cmd_serve(config, args).await,
        None => cmd_serve(config, ServeArgs::default()).await,
    }
}

/// Handle token subcommands.
fn cmd_token(config: &CasConfig, action: TokenAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        TokenAction::Issue { subject, validity } => {
            let validity_secs = match validity.as_deref() {
                Some(v) => config::parse_duration(v).ok_or_else(|| format!("Invalid duration: {v}"))?,
                None => config.token.default_validity_secs,
            };
            let validity_secs = i64::try_from(validity_secs)?;

            let key = config::load_or_create_signing_key(&config.token_key_path())?;
            let token = PrincipalToken::issue(&key, &subject, chrono::Utc::now(), validity_secs)?;

            let expires_at = chrono::DateTime::from_timestamp(token.expires_at(), 0)
                .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                .unwrap_or_else(|| "unknown".to_string());

            println!("Principal Token Issued");
            println!("======================");
            println!();
            println!("Token:   {}", token.encode());
            println!();
            println!("Subject: {}", token.subject());
            println!("Expires: {}", expires_at);
            println!();
            println!("Present it as the `token` field of POST /login.");

            Ok(())
        }
    }
}

/// Start the server.
async fn cmd_serve(config: CasConfig, args: ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let node_id = args
        .node_id
        .or_else(|| config.server.node_id.clone())
        .unwrap_or_else(|| Uuid::new_v4().simple().to_string()[..8].to_string());

    let store: Arc<dyn TicketStore> = match &args.database {
        Some(path) => {
            tracing::info!(path = %path.display(), "Opening shared ticket store");
            let db = DbService::open(path).await?;
            Arc::new(RetryingTicketStore::new(Arc::new(SqliteTicketStore::new(&db))))
        }
        None => {
            tracing::warn!("No database configured; tickets are kept in memory on this node only");
            Arc::new(MemoryTicketStore::new())
        }
    };

    let signing_key = config::load_or_create_signing_key(&config.token_key_path())?;
    let app = CasApp::new(
        &config,
        &node_id,
        store,
        Some(signing_key.public_key()),
        Arc::new(HttpProxyCallback::new()?),
        Arc::new(SystemClock),
    )?;

    let shutdown = ShutdownCoordinator::new();
    let cleaner_handle = app.cleaner().spawn(shutdown.signal());

    let addr = match args.bind {
        Some(addr) => addr,
        None => DEFAULT_BIND.parse()?,
    };
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(
        addr = %addr,
        node = %node_id,
        server_name = %config.server.name,
        "CAS server listening"
    );

    let router = app.router();
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
        }
        tracing::info!("Shutdown signal received");
    })
    .await?;

    shutdown.shutdown();
    if let Err(e) = cleaner_handle.await {
        tracing::warn!(error = %e, "Registry cleaner did not stop cleanly");
    }
    tracing::info!("Server stopped");
    Ok(())
}
