//! piper - polls music services for what users are listening to and publishes
//! now-playing status and completed plays to their AT Protocol repositories.

mod api;
mod config;
mod core;
mod db;
mod error;
mod models;
mod providers;
#[cfg(test)]
mod testutil;
mod utils;

use actix_web::{middleware, web, App, HttpServer};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::AppState;
use crate::config::{AppConfig, Paths};
use crate::core::{
    Ingestor, MetadataResolver, MusicBrainzClient, Pipeline, PlaybackTracker, RepositoryPublisher,
    Scheduler, XrpcRepository,
};
use crate::db::{run_migrations, DbEngine, SqliteStore, UserStore};
use crate::models::{AtprotoSession, ProviderCredentials, User};
use crate::utils::ratelimit::ApiRateLimiter;

/// piper - listening activity poller
#[derive(Parser, Debug)]
#[command(name = "piper")]
#[command(version)]
#[command(about = "Publishes what you listen to into your AT Protocol repository")]
struct Args {
    /// Host address to bind to
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Path to a TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory holding the database
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the pollers and the HTTP API (default)
    Serve,
    /// Create a user and print its API token
    AddUser {
        handle: String,
        #[arg(long)]
        did: Option<String>,
    },
    /// Issue a new API token, invalidating the old one
    RotateToken { handle: String },
    /// Link provider credentials given as tagged JSON, e.g. {"kind":"lastfm","username":"rob"}
    Link { handle: String, credentials: String },
    /// Store the repository session used for publishing
    Session {
        handle: String,
        #[arg(long)]
        did: String,
        #[arg(long)]
        pds_url: String,
        #[arg(long)]
        access_token: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins over --debug when set
    let log_level = if args.debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("{},sqlx=warn,hyper=warn", log_level))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    info!("piper v{} starting...", env!("CARGO_PKG_VERSION"));

    let paths = Paths::new(args.data_dir)?;
    let config_file = args.config.unwrap_or_else(|| paths.config_file());
    let mut config = AppConfig::load(Some(&config_file))
        .with_context(|| format!("Failed to load configuration from {:?}", config_file))?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let database_url = config
        .database_url
        .clone()
        .unwrap_or_else(|| paths.database_url());
    info!("Database: {}", database_url);

    let engine = DbEngine::connect(&database_url).await?;
    run_migrations(&engine).await?;
    let store = Arc::new(SqliteStore::new(engine));

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, store).await,
        Command::AddUser { handle, did } => {
            let (user, token) = store.create_user(&handle, did.as_deref()).await?;
            println!("Created user {} (id {})", user.handle, user.id);
            println!("API token: {}", token);
            Ok(())
        }
        Command::RotateToken { handle } => {
            let user = find_user(&store, &handle).await?;
            let token = store.rotate_api_token(user.id).await?;
            println!("API token: {}", token);
            Ok(())
        }
        Command::Link {
            handle,
            credentials,
        } => {
            let user = find_user(&store, &handle).await?;
            let credentials: ProviderCredentials =
                serde_json::from_str(&credentials).context("Invalid credentials JSON")?;
            store.update_credentials(user.id, &credentials).await?;
            println!("Linked {} for {}", credentials.provider(), user.handle);
            Ok(())
        }
        Command::Session {
            handle,
            did,
            pds_url,
            access_token,
        } => {
            let user = find_user(&store, &handle).await?;
            let session = AtprotoSession {
                did,
                pds_url,
                access_token,
            };
            store.save_session(user.id, &session).await?;
            println!("Stored repository session for {}", user.handle);
            Ok(())
        }
    }
}

async fn find_user(store: &SqliteStore, handle: &str) -> Result<User> {
    match store.user_by_handle(handle).await? {
        Some(user) => Ok(user),
        None => bail!("No user with handle {}", handle),
    }
}

async fn serve(config: AppConfig, store: Arc<SqliteStore>) -> Result<()> {
    let client = config.http.build_client()?;
    let shutdown = CancellationToken::new();

    let resolver = if config.musicbrainz.hydrate {
        let limiter = Arc::new(ApiRateLimiter::per_second(
            "musicbrainz",
            config.musicbrainz.requests_per_second,
        ));
        let backend = Arc::new(MusicBrainzClient::new(
            client.clone(),
            &config.musicbrainz.base_url,
        ));
        Some(Arc::new(MetadataResolver::new(
            backend,
            limiter,
            &config.musicbrainz,
        )))
    } else {
        info!("Metadata hydration disabled");
        None
    };

    let publisher = Arc::new(RepositoryPublisher::new(
        Arc::new(XrpcRepository::new(client.clone())),
        store.clone(),
        config.atproto.client_agent(),
    ));

    let pipeline = Pipeline {
        tracker: Arc::new(PlaybackTracker::new(config.tracker)),
        publisher,
        plays: store.clone(),
        users: store.clone(),
        resolver,
    };

    // Start pollers
    let adapters = providers::build_adapters(&config, client);
    if adapters.is_empty() {
        warn!("No providers configured; only the ingestion API will run");
    }

    let mut pollers = Vec::new();
    for adapter in adapters {
        let provider = adapter.provider();
        let scheduler = Arc::new(Scheduler::new(
            adapter,
            pipeline.clone(),
            config.scheduler.interval_for(provider),
            config.scheduler.max_concurrency,
        ));
        pollers.push(tokio::spawn(scheduler.run(shutdown.clone())));
    }

    let state = web::Data::new(AppState {
        ingestor: Ingestor::new(pipeline),
        users: store.clone(),
        plays: store,
        shutdown: shutdown.clone(),
    });

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Server listening on http://{}", addr);

    // the server stops on SIGINT/SIGTERM
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(middleware::Logger::default())
            .configure(api::configure)
    })
    .bind(&addr)?
    .run()
    .await?;

    info!("Stopping pollers...");
    shutdown.cancel();
    for poller in pollers {
        if let Err(e) = poller.await {
            warn!("Poller task failed: {}", e);
        }
    }

    Ok(())
}
