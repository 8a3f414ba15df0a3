//! FieldTrack CLI - inspect and drive the sync core of one device.
//!
//! # Usage
//!
//! ```bash
//! # Connect (or fall back to the device replica) and show counts
//! ft-cli status
//!
//! # List organizations and approve one as the bootstrap super-admin
//! ft-cli org list
//! ft-cli org approve 7d0c9a1e-...
//!
//! # Run the mail consent flow, then fold tagged messages into the replica
//! ft-cli mail authorize
//! ft-cli mail poll --limit 20
//! ```
//!
//! # Commands
//!
//! - `status` - Sync mode and collection counts
//! - `org` - Organization approval
//! - `mail` - Email channel authorization and polling

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};
use fieldtrack_sync::SyncConfig;
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "ft-cli")]
#[command(author, version, about = "FieldTrack sync tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show sync mode and collection counts
    Status,
    /// Manage organizations
    Org {
        #[command(subcommand)]
        action: OrgAction,
    },
    /// Email transport channel
    Mail {
        #[command(subcommand)]
        action: MailAction,
    },
}

#[derive(Subcommand)]
enum OrgAction {
    /// List organizations and their approval state
    List,
    /// Approve an organization and its pending org-admins
    Approve {
        /// Organization ID
        id: String,
    },
}

#[derive(Subcommand)]
enum MailAction {
    /// Run the OAuth consent flow
    Authorize,
    /// Fold recent envelopes from the inbox into the replica
    Poll {
        /// Maximum number of messages to read (capped at 50)
        #[arg(short, long, default_value_t = fieldtrack_sync::mail::PAGE_SIZE)]
        limit: usize,
    },
}

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &SyncConfig) -> Option<sentry::ClientInitGuard> {
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
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "fieldtrack_sync=info,fieldtrack_cli=info".into());

    // JSON for log shippers, text for terminals
    let json = std::env::var("FIELDTRACK_LOG_JSON").is_ok();
    let json_layer = json.then(|| tracing_subscriber::fmt::layer().json().flatten_event(true));
    let text_layer = (!json).then(tracing_subscriber::fmt::layer);

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

    let config = match SyncConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing_subscriber::fmt::init();
            tracing::error!(error = %e, "Failed to load configuration");
            std::process::exit(2);
        }
    };

    // Sentry must be up before the subscriber so the layer sees a client
    let _sentry_guard = init_sentry(&config);
    init_tracing();

    if let Err(e) = run(cli, &config).await {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli, config: &SyncConfig) -> Result<(), commands::CliError> {
    match cli.command {
        Commands::Status => commands::status::show(config).await?,
        Commands::Org { action } => match action {
            OrgAction::List => commands::org::list(config).await?,
            OrgAction::Approve { id } => commands::org::approve(config, &id).await?,
        },
        Commands::Mail { action } => match action {
            MailAction::Authorize => commands::mail::authorize(config).await?,
            MailAction::Poll { limit } => commands::mail::poll(config, limit).await?,
        },
    }
    Ok(())
}
