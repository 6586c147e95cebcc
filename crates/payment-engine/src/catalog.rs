//! Read-only lookups the engine depends on: prices and customer contacts.

use crate::error::PaymentError;
use crate::types::{PurchaseTarget, UserId};
use async_trait::async_trait;
use coupons::Coupon;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;
use wallet_ledger::CashbackPolicy;

/// A course on sale.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CourseListing {
    pub id: i64,
    pub title: String,
    pub price: Decimal,
    /// The instructor selling the course.
    pub seller_id: UserId,
    #[serde(default)]
    pub cashback: Option<CashbackPolicy>,
}

/// A price point of a service tier.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServicePriceListing {
    pub id: i64,
    pub label: String,
    pub price: Decimal,
}

/// Contact details used for gateway billing data.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
}

/// A purchase target resolved to its price and rules.
#[derive(Debug, Clone, PartialEq)]
pub struct PricedTarget {
    pub target: PurchaseTarget,
    pub price: Decimal,
    pub seller_id: Option<UserId>,
    pub cashback: Option<CashbackPolicy>,
}

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn course(&self, course_id: i64) -> Result<Option<CourseListing>, PaymentError>;

    async fn service_price(&self, price_id: i64)
        -> Result<Option<ServicePriceListing>, PaymentError>;

    /// Resolve any target to its price.
    async fn price_of(&self, target: PurchaseTarget) -> Result<Option<PricedTarget>, PaymentError> {
        let priced = match target {
            PurchaseTarget::Course(id) => self.course(id).await?.map(|course| PricedTarget {
                target,
                price: course.price,
                seller_id: Some(course.seller_id),
                cashback: course.cashback,
            }),
            PurchaseTarget::ServicePrice(id) => {
                self.service_price(id).await?.map(|tier| PricedTarget {
                    target,
                    price: tier.price,
                    seller_id: None,
                    cashback: None,
                })
            }
        };
        Ok(priced)
    }
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn profile(&self, user_id: UserId) -> Result<Option<UserProfile>, PaymentError>;
}

/// Catalog held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    courses: HashMap<i64, CourseListing>,
    service_prices: HashMap<i64, ServicePriceListing>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_course(mut self, course: CourseListing) -> Self {
        self.courses.insert(course.id, course);
        self
    }

    pub fn with_service_price(mut self, tier: ServicePriceListing) -> Self {
        self.service_prices.insert(tier.id, tier);
        self
    }

    pub fn len(&self) -> usize {
        self.courses.len() + self.service_prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn course(&self, course_id: i64) -> Result<Option<CourseListing>, PaymentError> {
        Ok(self.courses.get(&course_id).cloned())
    }

    async fn service_price(
        &self,
        price_id: i64,
    ) -> Result<Option<ServicePriceListing>, PaymentError> {
        Ok(self.service_prices.get(&price_id).cloned())
    }
}

/// User directory held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryUserDirectory {
    users: HashMap<UserId, UserProfile>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, profile: UserProfile) -> Self {
        self.users.insert(profile.id, profile);
        self
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn profile(&self, user_id: UserId) -> Result<Option<UserProfile>, PaymentError> {
        Ok(self.users.get(&user_id).cloned())
    }
}

/// Starting wallet balance for a user.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OpeningBalance {
    pub user_id: UserId,
    pub amount: Decimal,
}

/// Startup data for single-process deployments.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeedData {
    #[serde(default)]
    pub courses: Vec<CourseListing>,
    #[serde(default)]
    pub service_prices: Vec<ServicePriceListing>,
    #[serde(default)]
    pub users: Vec<UserProfile>,
    #[serde(default)]
    pub coupons: Vec<Coupon>,
    #[serde(default)]
    pub wallets: Vec<OpeningBalance>,
}

impl SeedData {
    pub async fn load(path: &Path) -> Result<Self, PaymentError> {
        let bytes = tokio::fs::read(path).await?;
        let seed: SeedData = serde_json::from_slice(&bytes)?;
        info!(
            courses = seed.courses.len(),
            service_prices = seed.service_prices.len(),
            users = seed.users.len(),
            coupons = seed.coupons.len(),
            wallets = seed.wallets.len(),
            "Loaded seed data from {:?}",
            path
        );
        Ok(seed)
    }

    pub fn catalog(&self) -> InMemoryCatalog {
        let catalog = self
            .courses
            .iter()
            .cloned()
            .fold(InMemoryCatalog::new(), InMemoryCatalog::with_course);
        self.service_prices
            .iter()
            .cloned()
            .fold(catalog, InMemoryCatalog::with_service_price)
    }

    pub fn users(&self) -> InMemoryUserDirectory {
        self.users
            .iter()
            .cloned()
            .fold(InMemoryUserDirectory::new(), InMemoryUserDirectory::with_user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_price_of_course() {
        let catalog = InMemoryCatalog::new().with_course(CourseListing {
            id: 1,
            title: "Rust".into(),
            price: dec!(200),
            seller_id: 7,
            cashback: Some(CashbackPolicy::Percentage(dec!(10))),
        });

        let priced = catalog
            .price_of(PurchaseTarget::Course(1))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(priced.price, dec!(200));
        assert_eq!(priced.seller_id, Some(7));
        assert!(priced.cashback.is_some());
        assert!(catalog
            .price_of(PurchaseTarget::Course(2))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_price_of_service_tier() {
        let catalog = InMemoryCatalog::new().with_service_price(ServicePriceListing {
            id: 4,
            label: "Monthly mentoring".into(),
            price: dec!(75.5),
        });

        let priced = catalog
            .price_of(PurchaseTarget::ServicePrice(4))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(priced.price, dec!(75.5));
        assert_eq!(priced.seller_id, None);
        assert_eq!(priced.cashback, None);
    }

    #[tokio::test]
    async fn test_seed_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("seed.json");
        std::fs::write(
            &path,
            serde_json::json!({
                "courses": [{"id": 1, "title": "A", "price": "100", "seller_id": 2,
                             "cashback": {"type": "FIXED", "value": "5"}}],
                "service_prices": [{"id": 3, "label": "B", "price": "50"}],
                "users": [{"id": 9, "first_name": "Mona"}]
            })
            .to_string(),
        )
        .unwrap();

        let seed = SeedData::load(&path).await.unwrap();
        assert_eq!(seed.catalog().len(), 2);
        assert!(seed.coupons.is_empty());

        let profile = seed.users().profile(9).await.unwrap().unwrap();
        assert_eq!(profile.first_name.as_deref(), Some("Mona"));
    }
}
