//! crates/storefront_core/src/purchases.rs
//!
//! Read side of purchase history, plus the admin-only completion transition.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::domain::{Purchase, PurchaseStatus};
use crate::ports::{PortResult, PurchaseStore};

#[derive(Clone)]
pub struct PurchaseHistory {
    purchases: Arc<dyn PurchaseStore>,
}

impl PurchaseHistory {
    pub fn new(purchases: Arc<dyn PurchaseStore>) -> Self {
        Self { purchases }
    }

    pub async fn list_by_owner(&self, user_id: Uuid) -> PortResult<Vec<Purchase>> {
        self.purchases.list_purchases(user_id, None).await
    }

    /// `status` is matched case-insensitively against `pending` and `completed`.
    pub async fn list_by_owner_and_status(
        &self,
        user_id: Uuid,
        status: &str,
    ) -> PortResult<Vec<Purchase>> {
        let status = status.parse::<PurchaseStatus>()?;
        self.purchases.list_purchases(user_id, Some(status)).await
    }

    pub async fn get_by_id(&self, user_id: Uuid, purchase_id: Uuid) -> PortResult<Purchase> {
        self.purchases.get_purchase(user_id, purchase_id).await
    }

    pub async fn mark_completed(&self, purchase_id: Uuid) -> PortResult<Purchase> {
        let purchase = self
            .purchases
            .update_purchase_status(purchase_id, PurchaseStatus::Completed)
            .await?;
        info!(purchase_id = %purchase_id, "purchase completed");
        Ok(purchase)
    }
}
