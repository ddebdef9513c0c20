use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::task;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ticket_gate::{config::Config, controllers, seed, services::cleanup::CleanupService, AppState};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.app.rust_log))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting Ticket Gate (environment: {})",
        config.app.environment
    );

    // Load the seat catalog
    let catalog = match seed::load_catalog(&config.seed.file) {
        Ok(catalog) => catalog,
        Err(e) => {
            warn!(
                "Seed catalog not loaded: {:#}. Starting with an empty catalog",
                e
            );
            seed::SeedCatalog::default()
        }
    };

    // Create the shared application state and register seeded events
    let app_state = AppState::new(config.clone(), catalog);
    info!(
        "Engine initialized with {} events",
        app_state.seats.event_ids().len()
    );

    // --- Start background tasks ---

    // Task to expire reservations and tidy the admission queues
    let cleanup = CleanupService::new(app_state.clone());
    let sweep_interval = config.sweeper.interval_secs;
    task::spawn(async move {
        loop {
            cleanup.run_sweep();
            tokio::time::sleep(Duration::from_secs(sweep_interval)).await;
        }
    });

    // --- Start the web server ---

    // Create the main router
    let app = Router::new()
        .route("/", get(|| async { "Ticket Gate v1.0" }))
        .route("/health", get(|| async { "OK" }))
        // Queue transport lives outside /api
        .merge(controllers::queue::ws_routes())
        // Mount the routes from the controllers module
        .nest("/api", controllers::routes(&config.features))
        // Pass the application state to the router
        .with_state(app_state.clone())
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::new(
        config
            .app
            .host
            .parse()
            .expect("HOST must be a valid IP address"),
        config.app.port,
    );
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app.into_make_service())
        .await
        .unwrap();
}
