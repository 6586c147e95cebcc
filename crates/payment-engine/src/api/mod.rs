//! HTTP API for the payment engine.

mod handlers;
mod middleware;
mod types;

pub use handlers::*;
pub use middleware::logging_middleware;
pub use types::*;

use crate::orchestrator::PaymentOrchestrator;
use crate::reconciliation::Reconciler;
use crate::store::PaymentStore;
use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Purchase initiation
    pub orchestrator: Arc<PaymentOrchestrator>,
    /// Confirmation handling
    pub reconciler: Arc<Reconciler>,
    /// Engine state
    pub store: Arc<PaymentStore>,
}

impl AppState {
    pub fn new(orchestrator: PaymentOrchestrator, reconciler: Reconciler) -> Self {
        let store = orchestrator.store().clone();
        Self {
            orchestrator: Arc::new(orchestrator),
            reconciler: Arc::new(reconciler),
            store,
        }
    }
}

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/v1/purchases", post(handlers::create_purchase))
        .route("/v1/coupons/validate", post(handlers::validate_coupon))
        .route("/v1/wallet/:user_id", get(handlers::get_wallet))
        // Static segment wins over the id capture
        .route("/v1/payments/return", get(handlers::payment_return))
        .route("/v1/payments/:payment_id", get(handlers::get_payment))
        .route("/v1/webhooks/gateway", post(handlers::gateway_webhook))
        .layer(axum_middleware::from_fn(logging_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
