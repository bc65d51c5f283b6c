//! casctl - Command-line client for the CAS server

use anyhow::Result;
use clap::{Parser, Subcommand};

mod api;
mod commands;
mod utils;

use api::CasClient;
use commands::ProtocolArg;

/// casctl - CAS login, ticket validation and session administration
#[derive(Parser)]
#[command(name = "casctl", version, about)]
struct Cli {
    /// Server base URL (including any mount prefix)
    #[arg(long, env = "CAS_SERVER", default_value = "http://127.0.0.1:8443", global = true)]
    server: String,

    /// Bearer token for the actuator endpoints
    #[arg(long, env = "CAS_ACTUATOR_TOKEN", global = true, hide_env_values = true)]
    token: Option<String>,

    /// Output JSON instead of human-readable text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and print the service ticket (or the TGT without --service)
    Login {
        #[arg(long, short)]
        username: String,

        /// Read from stdin when omitted
        #[arg(long, env = "CAS_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// Service to obtain a ticket for
        #[arg(long, short)]
        service: Option<String>,
    },

    /// Validate a service or proxy ticket
    Validate {
        /// ST-... or PT-...
        ticket: String,

        #[arg(long, short)]
        service: String,

        #[arg(long, value_enum, default_value = "v3")]
        protocol: ProtocolArg,

        /// Callback that should receive a proxy-granting ticket
        #[arg(long)]
        pgt_url: Option<String>,
    },

    /// Obtain a proxy ticket with a proxy-granting ticket
    Proxy {
        /// PGT-...
        pgt: String,

        #[arg(long, short)]
        target_service: String,
    },

    /// SSO sessions
    Sessions {
        #[command(subcommand)]
        action: SessionsAction,
    },

    /// Recorded events
    Events {
        /// Show last N events
        #[arg(long, default_value = "50")]
        recent: usize,

        /// Clear the event log instead of listing it
        #[arg(long)]
        clear: bool,
    },

    /// Forget all failed-login throttles
    Unthrottle,
}

#[derive(Subcommand)]
enum SessionsAction {
    /// List active sessions
    Ls {
        /// ALL, PROXIED or DIRECT
        #[arg(long = "type")]
        scope: Option<String>,

        #[arg(long)]
        username: Option<String>,
    },

    /// Destroy one session and its tickets
    Rm {
        /// TGT-...
        ticket: String,
    },

    /// Destroy every session of a user, or every session of a type
    Purge {
        #[arg(long = "type")]
        scope: Option<String>,

        #[arg(long)]
        username: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let result = run(cli).await;

    if let Err(e) = &result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }

    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let client = CasClient::new(&cli.server, cli.token)?;
    let json = cli.json;

    match cli.command {
        Commands::Login {
            username,
            password,
            service,
        } => commands::login(&client, json, &username, password, service.as_deref()).await,

        Commands::Validate {
            ticket,
            service,
            protocol,
            pgt_url,
        } => {
            commands::validate(&client, json, &ticket, &service, protocol, pgt_url.as_deref())
                .await
        }

        Commands::Proxy {
            pgt,
            target_service,
        } => commands::proxy(&client, json, &pgt, &target_service).await,

        Commands::Sessions { action } => match action {
            SessionsAction::Ls { scope, username } => {
                commands::list_sessions(&client, json, scope.as_deref(), username.as_deref()).await
            }
            SessionsAction::Rm { ticket } => commands::destroy_session(&client, &ticket).await,
            SessionsAction::Purge { scope, username } => {
                commands::destroy_sessions(&client, scope.as_deref(), username.as_deref()).await
            }
        },

        Commands::Events { recent, clear } => {
            if clear {
                commands::clear_events(&client).await
            } else {
                commands::list_events(&client, json, recent).await
            }
        }

        Commands::Unthrottle => commands::clear_throttles(&client).await,
    }
}
