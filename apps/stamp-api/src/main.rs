//! Stamp Server
//!
//! HTTP front end for placing company and individual seals on PDF pages.
//! Provides REST API endpoints for:
//!
//! - Single-document stamping with per-placement units and opacity
//! - Batch stamping of many files with one placement
//! - Standard A4 stamp coordinates
//! - Page sizes and rotations of an uploaded document
//!
//! ## Architecture
//!
//! Stamp artwork is loaded once at startup into a shared `StampCache`; a
//! missing or invalid PNG aborts startup unless placeholders are allowed.
//! Requests hand decoded bytes to the `BatchCoordinator` on the blocking pool.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use clap::Parser;
use stamp_core::{BatchCoordinator, DirectoryArtwork, StampCache, StampConfig};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod api;
mod error;

use api::{
    handle_batch_process, handle_coordinates, handle_health, handle_page_info, handle_ping,
    handle_stamp,
};

/// Command-line arguments for the stamp server
#[derive(Parser, Debug)]
#[command(name = "stamp-api")]
#[command(about = "Seal and signature stamping server for PDF documents")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Host address to bind to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Directory holding the seal PNGs (overrides STAMP_ARTWORK_DIR)
    #[arg(long)]
    artwork_dir: Option<PathBuf>,

    /// Draw a generated seal for any missing artwork
    #[arg(long)]
    allow_placeholder: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Smallest request body accepted regardless of the document limit
const MIN_BODY_LIMIT: usize = 1024 * 1024;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<BatchCoordinator>,
}

impl AppState {
    pub fn new(coordinator: BatchCoordinator) -> Self {
        Self {
            coordinator: Arc::new(coordinator),
        }
    }
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    // Base64 inflates by 4/3; leave room for a few documents per batch body.
    // Oversized documents inside the body fail one by one in the coordinator.
    let body_limit = state
        .coordinator
        .max_document_bytes()
        .saturating_mul(4)
        .max(MIN_BODY_LIMIT);

    Router::new()
        // Health checks
        .route("/health", get(handle_health))
        .route("/ping", get(handle_ping))
        // API endpoints
        .route("/api/coordinates", get(handle_coordinates))
        .route("/api/page-info", post(handle_page_info))
        .route("/api/stamp", post(handle_stamp))
        .route("/api/batch-process", post(handle_batch_process))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("stamp_api=info,stamp_core=info,tower_http=debug"));
    let filter = if args.verbose {
        filter.add_directive(Level::DEBUG.into())
    } else {
        filter
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = StampConfig::from_env().context("Invalid stamp configuration")?;
    if let Some(dir) = args.artwork_dir {
        config.artwork_dir = dir;
    }
    config.allow_placeholder |= args.allow_placeholder;

    info!(
        artwork_dir = %config.artwork_dir.display(),
        allow_placeholder = config.allow_placeholder,
        clamp_mode = ?config.clamp_mode,
        "Loading stamp artwork"
    );

    let cache = StampCache::build(
        &DirectoryArtwork::new(&config.artwork_dir),
        config.allow_placeholder,
    )
    .context("Failed to initialise stamp cache")?;
    let coordinator = BatchCoordinator::from_config(Arc::new(cache), &config)
        .context("Failed to start batch workers")?;

    // Configure CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = router(AppState::new(coordinator))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start server
    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("Server listening on http://{}", addr);
    info!("Max document size: {} bytes", config.max_document_bytes);

    axum::serve(listener, app).await?;

    Ok(())
}
