//! Rollcall - classroom attendance with rotating kiosk codes
//!
//! One binary for every role: the API server, a terminal kiosk, account
//! provisioning for operators, and a command-line client for admins,
//! teachers and students.

mod client;
mod kiosk;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rand::Rng;
use rollcall_auth::{CredentialService, NewAccount};
use rollcall_core::config::{DEFAULT_ROTATE_SECONDS, DEFAULT_SESSION_MAX_MINUTES};
use rollcall_core::{Config, Database, Role};
use rollcall_server::{create_router, AppState};
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

/// Rollcall - classroom attendance check-in
#[derive(Parser, Debug)]
#[command(name = "rollcall")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the API server
    Serve(ServeArgs),
    /// Manage accounts directly in the database
    Account {
        #[command(subcommand)]
        command: AccountCommand,
    },
    /// Run a terminal kiosk against a server
    Kiosk {
        /// Server base URL
        #[arg(long, env = "ROLLCALL_SERVER", default_value = "http://localhost:8080")]
        server: String,

        /// Where the kiosk keeps its registration [default: ~/.config/rollcall/kiosk.json]
        #[arg(long, env = "ROLLCALL_KIOSK_FILE")]
        registration: Option<PathBuf>,
    },
    /// Talk to a server as an admin, teacher or student
    Client(client::ClientArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Server port
    #[arg(short, long, env = "ROLLCALL_PORT", default_value = "8080")]
    port: u16,

    /// SQLite database path
    #[arg(long, env = "ROLLCALL_DB")]
    database: Option<PathBuf>,

    /// Width of a check-in token window in seconds
    #[arg(long, default_value_t = DEFAULT_ROTATE_SECONDS)]
    rotate_seconds: u32,

    /// Close active sessions older than this many minutes
    #[arg(long, default_value_t = DEFAULT_SESSION_MAX_MINUTES, value_parser = clap::value_parser!(u32).range(1..))]
    session_max_minutes: u32,

    /// Access token signing secret
    #[arg(long, env = "ROLLCALL_JWT_SECRET", hide_env_values = true)]
    jwt_secret: Option<String>,
}

#[derive(Subcommand, Debug)]
enum AccountCommand {
    /// Create an account
    Add {
        /// SQLite database path
        #[arg(long, env = "ROLLCALL_DB")]
        database: Option<PathBuf>,

        username: String,

        /// admin, teacher or student
        #[arg(long)]
        role: Role,

        /// Display name
        #[arg(long)]
        name: String,

        /// Student id used for check-ins
        #[arg(long)]
        entity_id: Option<String>,

        #[arg(long, env = "ROLLCALL_PASSWORD", hide_env_values = true)]
        password: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .with_env_filter(EnvFilter::from_default_env().add_directive(log_level.into()))
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Account { command } => account(command).await,
        Command::Kiosk {
            server,
            registration,
        } => kiosk::run(&server, registration).await,
        Command::Client(args) => client::run(args).await,
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    info!("Rollcall v{}", env!("CARGO_PKG_VERSION"));

    let jwt_secret = match args.jwt_secret.filter(|s| !s.is_empty()) {
        Some(secret) => secret,
        None => {
            warn!("No JWT secret configured; issued tokens will not survive a restart");
            let bytes: [u8; 32] = rand::thread_rng().gen();
            hex::encode(bytes)
        }
    };

    let config = Config::new()
        .with_port(args.port)
        .with_database_path(args.database.unwrap_or_else(Config::default_database_path))
        .with_rotate_seconds(args.rotate_seconds)
        .with_session_max_minutes(args.session_max_minutes)
        .with_jwt_secret(jwt_secret);

    let db = Database::open(&config.database_path)
        .await
        .with_context(|| format!("Failed to open database at {:?}", config.database_path))?;

    let state = Arc::new(AppState::new(config.clone(), db));
    match state.credentials.purge_expired().await {
        Ok(0) => {}
        Ok(purged) => info!("Purged {} expired refresh tokens", purged),
        Err(e) => warn!("Failed to purge refresh tokens: {}", e),
    }

    let router = create_router(state);

    info!("Starting server on port {}...", config.port);
    info!("  Token window: {}s", config.rotate_seconds);
    info!("  Session limit: {} min", config.session_max_minutes);
    info!("Press Ctrl+C to stop.");

    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutting down...");
    };

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Goodbye!");
    Ok(())
}

async fn account(command: AccountCommand) -> Result<()> {
    match command {
        AccountCommand::Add {
            database,
            username,
            role,
            name,
            entity_id,
            password,
        } => {
            let config = Config::new()
                .with_database_path(database.unwrap_or_else(Config::default_database_path));
            let db = Database::open(&config.database_path).await?;
            let service = CredentialService::new(db, &config);

            let account = service
                .create_account(NewAccount {
                    username,
                    password,
                    role,
                    display_name: name,
                    entity_id,
                })
                .await?;
            println!("Created {} account '{}' ({})", account.role, account.username, account.id);
            Ok(())
        }
    }
}
