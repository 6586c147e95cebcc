//! Payment engine - purchase orchestration and gateway reconciliation.
//!
//! Purchases of courses and service tiers are paid with any mix of wallet
//! balance, a discount coupon and a card or mobile-wallet checkout at the
//! gateway. The engine:
//! - Debits the wallet and records the payment before the gateway is contacted
//! - Finalizes payments from signed webhooks and browser return redirects
//! - Grants access and cashback exactly once, and compensates on failure

pub mod api;
pub mod catalog;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod reconciliation;
pub mod store;
pub mod types;

pub use catalog::{Catalog, InMemoryCatalog, InMemoryUserDirectory, SeedData, UserDirectory};
pub use config::Config;
pub use error::PaymentError;
pub use orchestrator::{CheckoutSettings, PaymentOrchestrator};
pub use reconciliation::{ReconcileOutcome, Reconciler};
pub use store::{PaymentStore, StoreData};
pub use types::{Payment, PaymentStatus, PurchaseOutcome, PurchaseRequest, PurchaseTarget};
