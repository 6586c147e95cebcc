//! Payment engine - Entry point.

use gateway_client::{GatewayClient, PaymentGateway};
use payment_engine::{
    api::{create_router, AppState},
    config::Config,
    orchestrator::{CheckoutSettings, PaymentOrchestrator},
    reconciliation::Reconciler,
    store::PaymentStore,
    SeedData,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() {
    // Load configuration
    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log.level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting payment engine");

    // Catalog, customers and starting coupons/balances
    let seed = match &config.catalog.seed_path {
        Some(path) => match SeedData::load(path).await {
            Ok(seed) => seed,
            Err(e) => {
                error!("Failed to load seed data from {:?}: {}", path, e);
                std::process::exit(1);
            }
        },
        None => {
            warn!("No catalog seed configured, every purchase will be rejected as unknown");
            SeedData::default()
        }
    };

    // Initialize storage
    let store = if config.store.persist {
        match PaymentStore::open(config.store.path.clone()).await {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to open payment store: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        info!("Persistence disabled, using in-memory storage");
        PaymentStore::memory()
    };
    let store = Arc::new(store);

    match store.transaction(|data| data.apply_seed(&seed)).await {
        Ok(0) => {}
        Ok(n) => info!("Applied {} seed records", n),
        Err(e) => {
            error!("Failed to apply seed data: {}", e);
            std::process::exit(1);
        }
    }

    // Initialize gateway client
    let gateway = match GatewayClient::new(
        &config.gateway.api_base_url,
        config.gateway.api_key.clone(),
        config.gateway.hmac_secret.clone(),
        &config.gateway.currency,
        config.gateway.timeout,
    ) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to create gateway client: {}", e);
            std::process::exit(1);
        }
    };
    let gateway: Arc<dyn PaymentGateway> = Arc::new(gateway);

    // Create application state
    let orchestrator = PaymentOrchestrator::new(
        store.clone(),
        gateway.clone(),
        Arc::new(seed.catalog()),
        Arc::new(seed.users()),
        CheckoutSettings::from(&config.gateway),
    );
    let reconciler = Reconciler::new(store, gateway);
    let state = AppState::new(orchestrator, reconciler);

    let app = create_router(state);

    // Bind to address
    let addr = SocketAddr::new(
        config.server.listen_addr.parse().unwrap_or([0, 0, 0, 0].into()),
        config.server.port,
    );

    info!("Listening on {}", addr);

    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    // Run server
    if let Err(e) = axum::serve(listener, app).await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}
