//! Gatehouse CLI - log in to a dashboard API and make authenticated calls.
//!
//! # Usage
//!
//! ```bash
//! # Log in and remember the email for next time
//! GATEHOUSE_PASSWORD=secret gatehouse login -e admin@example.com --remember
//!
//! # Show the current user and their permissions
//! gatehouse whoami
//!
//! # Authenticated GET, refreshing the access token if needed
//! gatehouse get /products
//!
//! # Log out
//! gatehouse logout
//! ```
//!
//! # Commands
//!
//! - `login` - Log in and persist the token pair
//! - `logout` - End the session
//! - `whoami` - Show the current user
//! - `get` - Authenticated GET request
//! - `change-password` - Change the current user's password
//! - `watch` - Log session changes until interrupted
//!
//! Configuration is read from the environment (see `gatehouse::config`).
//! Tokens are kept in `GATEHOUSE_SESSION_DIR`.

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};
use gatehouse::{ClientConfig, Origin, SessionManager};
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::CommandError;

#[derive(Parser)]
#[command(name = "gatehouse")]
#[command(author, version, about = "Gatehouse session CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and persist the token pair
    Login {
        /// Account email address
        #[arg(short, long)]
        email: Option<String>,

        /// Account password
        #[arg(short, long, env = "GATEHOUSE_PASSWORD", hide_env_values = true)]
        password: String,

        /// Remember the email for the next login
        #[arg(short, long)]
        remember: bool,
    },
    /// End the session
    Logout,
    /// Show the current user
    Whoami,
    /// Authenticated GET request; the response body is written to stdout
    Get {
        /// Path relative to the API base URL
        path: String,
    },
    /// Change the current user's password
    ChangePassword {
        /// Current password
        #[arg(long, env = "GATEHOUSE_OLD_PASSWORD", hide_env_values = true)]
        old: String,

        /// New password
        #[arg(long, env = "GATEHOUSE_NEW_PASSWORD", hide_env_values = true)]
        new: String,

        /// New password again
        #[arg(long, env = "GATEHOUSE_CONFIRM_PASSWORD", hide_env_values = true)]
        confirm: String,
    },
    /// Log session changes until interrupted
    Watch,
}

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &ClientConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            attach_stacktrace: true,
            send_default_pii: false,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR => sentry_tracing::EventFilter::Event,
        tracing::Level::WARN | tracing::Level::INFO => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

fn init_tracing() {
    // Defaults to info level for our crates if RUST_LOG is not set
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "gatehouse=info,gatehouse_cli=info".into());

    // JSON lines when asked for (log shippers), text otherwise
    let is_json = std::env::var("GATEHOUSE_LOG_FORMAT").is_ok_and(|format| format == "json");
    let json_layer = is_json.then(|| tracing_subscriber::fmt::layer().json().flatten_event(true));
    let text_layer = (!is_json).then(tracing_subscriber::fmt::layer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Load configuration first: Sentry must be set up before tracing
    let config = ClientConfig::from_env();
    let _sentry_guard = config.as_ref().ok().and_then(init_sentry);
    init_tracing();

    let result = match config {
        Ok(config) => run(cli, config).await,
        Err(e) => Err(e.into()),
    };

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli, config: ClientConfig) -> Result<(), CommandError> {
    let origin = Origin::file(&config.session_dir, &config.channel_name);
    let session = SessionManager::new(config, &origin)?;

    match cli.command {
        Commands::Login {
            email,
            password,
            remember,
        } => commands::session::login(&session, email, password, remember).await?,
        Commands::Logout => commands::session::logout(&session).await,
        Commands::Whoami => commands::session::whoami(&session).await,
        Commands::Get { path } => commands::api::get(&session, &path).await?,
        Commands::ChangePassword { old, new, confirm } => {
            commands::session::change_password(&session, old, new, confirm).await?;
        }
        Commands::Watch => commands::watch::run(&session).await?,
    }

    session.cleanup();
    Ok(())
}
