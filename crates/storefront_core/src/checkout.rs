//! crates/storefront_core/src/checkout.rs
//!
//! Converts a user's cart into an immutable purchase.
//!
//! The engine prices a single snapshot of the cart lines and hands it to
//! [`PurchaseStore::commit_checkout`], which performs the purchase insert, the
//! line inserts and the cart cleanup as one transaction. The store refuses the
//! commit when the cart changed after the snapshot was taken, in which case the
//! engine takes a fresh snapshot and tries again.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{CartOwner, CheckoutOrder, Purchase};
use crate::ports::{CartStore, PortError, PortResult, PurchaseStore};

/// How many snapshots are priced before a conflict is reported to the caller.
const MAX_ATTEMPTS: usize = 3;

#[derive(Clone)]
pub struct CheckoutEngine {
    carts: Arc<dyn CartStore>,
    purchases: Arc<dyn PurchaseStore>,
}

impl CheckoutEngine {
    pub fn new(carts: Arc<dyn CartStore>, purchases: Arc<dyn PurchaseStore>) -> Self {
        Self { carts, purchases }
    }

    /// Checks out the user's whole cart.
    ///
    /// Fails with `EmptyCart` when the user has no cart or it has no items, in
    /// which case no purchase is created.
    pub async fn checkout(&self, user_id: Uuid) -> PortResult<Purchase> {
        let mut attempt = 1;
        loop {
            let order = self.snapshot(user_id).await?;
            match self.purchases.commit_checkout(order).await {
                Ok(purchase) => {
                    info!(
                        purchase_id = %purchase.id,
                        user_id = %user_id,
                        total = %purchase.total,
                        items = purchase.items.len(),
                        "checkout completed"
                    );
                    return Ok(purchase);
                }
                Err(PortError::Conflict(reason)) if attempt < MAX_ATTEMPTS => {
                    warn!(user_id = %user_id, attempt, "cart changed during checkout: {}", reason);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn snapshot(&self, user_id: Uuid) -> PortResult<CheckoutOrder> {
        let cart = self
            .carts
            .find_cart(CartOwner::User(user_id))
            .await?
            .ok_or(PortError::EmptyCart)?;
        let lines = self.carts.get_cart_lines(cart.id).await?;
        CheckoutOrder::from_snapshot(cart.id, user_id, lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Cart, CartLine, PurchaseLineItem, PurchaseStatus};
    use crate::ports::{MockCartStore, MockPurchaseStore};
    use chrono::Utc;
    use mockall::predicate::eq;
    use rust_decimal::Decimal;
    use testresult::TestResult;

    fn user_cart(user_id: Uuid) -> Cart {
        Cart {
            id: Uuid::new_v4(),
            user_id: Some(user_id),
            session_token: None,
            created_at: Utc::now(),
        }
    }

    fn line(price: i64, quantity: u32) -> CartLine {
        CartLine {
            item_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            product_name: format!("Product at {}", price),
            quantity,
            unit_price: Decimal::new(price, 0),
        }
    }

    /// Echoes an order back the way a store would persist it.
    fn echo_purchase(order: CheckoutOrder) -> Purchase {
        let id = Uuid::new_v4();
        Purchase {
            id,
            user_id: order.user_id,
            status: PurchaseStatus::Pending,
            total: order.total,
            created_at: Utc::now(),
            items: order
                .lines
                .iter()
                .map(|line| PurchaseLineItem {
                    id: Uuid::new_v4(),
                    purchase_id: id,
                    product_id: line.product_id,
                    product_name: line.product_name.clone(),
                    quantity: line.quantity,
                    unit_price: line.unit_price,
                })
                .collect(),
        }
    }

    fn accepting_store() -> MockPurchaseStore {
        let mut purchases = MockPurchaseStore::new();
        purchases
            .expect_commit_checkout()
            .returning(|order| Ok(echo_purchase(order)));
        purchases
    }

    #[tokio::test]
    async fn checkout_prices_snapshot_and_commits_once() -> TestResult {
        let user_id = Uuid::new_v4();
        let cart = user_cart(user_id);
        let cart_id = cart.id;

        let mut carts = MockCartStore::new();
        carts
            .expect_find_cart()
            .with(eq(CartOwner::User(user_id)))
            .returning(move |_| Ok(Some(cart.clone())));
        carts
            .expect_get_cart_lines()
            .with(eq(cart_id))
            .times(1)
            .returning(|_| Ok(vec![line(10, 2), line(5, 3)]));

        let engine = CheckoutEngine::new(Arc::new(carts), Arc::new(accepting_store()));
        let purchase = engine.checkout(user_id).await?;

        assert_eq!(purchase.total, Decimal::new(35, 0));
        assert_eq!(purchase.status, PurchaseStatus::Pending);
        let prices: Vec<Decimal> = purchase.items.iter().map(|i| i.unit_price).collect();
        assert_eq!(prices, vec![Decimal::new(10, 0), Decimal::new(5, 0)]);
        Ok(())
    }

    #[tokio::test]
    async fn checkout_without_cart_is_empty_cart() {
        let mut carts = MockCartStore::new();
        carts.expect_find_cart().returning(|_| Ok(None));
        let mut purchases = MockPurchaseStore::new();
        purchases.expect_commit_checkout().never();

        let engine = CheckoutEngine::new(Arc::new(carts), Arc::new(purchases));
        let result = engine.checkout(Uuid::new_v4()).await;

        assert!(matches!(result, Err(PortError::EmptyCart)), "got {result:?}");
    }

    #[tokio::test]
    async fn checkout_of_empty_cart_creates_nothing() {
        let user_id = Uuid::new_v4();
        let cart = user_cart(user_id);

        let mut carts = MockCartStore::new();
        carts
            .expect_find_cart()
            .returning(move |_| Ok(Some(cart.clone())));
        carts.expect_get_cart_lines().returning(|_| Ok(Vec::new()));
        let mut purchases = MockPurchaseStore::new();
        purchases.expect_commit_checkout().never();

        let engine = CheckoutEngine::new(Arc::new(carts), Arc::new(purchases));
        let result = engine.checkout(user_id).await;

        assert!(matches!(result, Err(PortError::EmptyCart)), "got {result:?}");
    }

    #[tokio::test]
    async fn conflict_retakes_the_snapshot() -> TestResult {
        let user_id = Uuid::new_v4();
        let cart = user_cart(user_id);

        let mut carts = MockCartStore::new();
        carts
            .expect_find_cart()
            .returning(move |_| Ok(Some(cart.clone())));
        carts
            .expect_get_cart_lines()
            .times(2)
            .returning(|_| Ok(vec![line(4, 1)]));

        let mut purchases = MockPurchaseStore::new();
        let mut seq = mockall::Sequence::new();
        purchases
            .expect_commit_checkout()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(PortError::Conflict("quantity changed".to_string())));
        purchases
            .expect_commit_checkout()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|order| Ok(echo_purchase(order)));

        let engine = CheckoutEngine::new(Arc::new(carts), Arc::new(purchases));
        let purchase = engine.checkout(user_id).await?;

        assert_eq!(purchase.total, Decimal::new(4, 0));
        Ok(())
    }

    #[tokio::test]
    async fn persistent_conflict_is_reported() {
        let user_id = Uuid::new_v4();
        let cart = user_cart(user_id);

        let mut carts = MockCartStore::new();
        carts
            .expect_find_cart()
            .returning(move |_| Ok(Some(cart.clone())));
        carts
            .expect_get_cart_lines()
            .times(MAX_ATTEMPTS)
            .returning(|_| Ok(vec![line(4, 1)]));
        let mut purchases = MockPurchaseStore::new();
        purchases
            .expect_commit_checkout()
            .times(MAX_ATTEMPTS)
            .returning(|_| Err(PortError::Conflict("cart keeps changing".to_string())));

        let engine = CheckoutEngine::new(Arc::new(carts), Arc::new(purchases));
        let result = engine.checkout(user_id).await;

        assert!(matches!(result, Err(PortError::Conflict(_))), "got {result:?}");
    }
}
