//! crates/storefront_core/src/cart.rs
//!
//! The cart aggregate: resolves an owner's cart and manipulates its line items.

use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::{AddedItem, Cart, CartLineItem, CartOwner, CartView};
use crate::ports::{CartStore, CatalogStore, PortError, PortResult};

#[derive(Clone)]
pub struct CartService {
    carts: Arc<dyn CartStore>,
    catalog: Arc<dyn CatalogStore>,
}

impl CartService {
    pub fn new(carts: Arc<dyn CartStore>, catalog: Arc<dyn CatalogStore>) -> Self {
        Self { carts, catalog }
    }

    /// Fetches the owner's cart with its lines, creating an empty cart if needed.
    pub async fn get_or_create(&self, owner: CartOwner) -> PortResult<CartView> {
        let cart = self.carts.get_or_create_cart(owner).await?;
        self.view(cart).await
    }

    /// Fetches the owner's cart without creating one.
    pub async fn find(&self, owner: CartOwner) -> PortResult<CartView> {
        let cart = self
            .carts
            .find_cart(owner)
            .await?
            .ok_or_else(|| PortError::NotFound("cart".to_string()))?;
        self.view(cart).await
    }

    /// Adds `quantity` of a product, merging into an existing line for the same product.
    pub async fn add_item(
        &self,
        cart: &Cart,
        product_id: Uuid,
        quantity: u32,
    ) -> PortResult<AddedItem> {
        if quantity == 0 {
            return Err(PortError::InvalidArgument(
                "quantity must be greater than zero".to_string(),
            ));
        }

        match self.catalog.get_product(product_id).await {
            Ok(_) => {}
            Err(PortError::NotFound(_)) => {
                return Err(PortError::InvalidArgument(format!(
                    "unknown product {}",
                    product_id
                )))
            }
            Err(e) => return Err(e),
        }

        let added = self.carts.upsert_item(cart.id, product_id, quantity).await?;
        debug!(
            cart_id = %cart.id,
            product_id = %product_id,
            quantity = added.item.quantity,
            created = added.created,
            "cart item added"
        );
        Ok(added)
    }

    /// Sets an item's quantity. Zero removes the item and yields `None`.
    pub async fn set_item_quantity(
        &self,
        cart: &Cart,
        item_id: Uuid,
        quantity: u32,
    ) -> PortResult<Option<CartLineItem>> {
        if quantity == 0 {
            self.remove_item(cart, item_id).await?;
            return Ok(None);
        }

        self.carts
            .update_item_quantity(cart.id, item_id, quantity)
            .await?
            .map(Some)
            .ok_or_else(|| item_not_found(item_id))
    }

    pub async fn remove_item(&self, cart: &Cart, item_id: Uuid) -> PortResult<()> {
        match self.carts.delete_item(cart.id, item_id).await? {
            0 => Err(item_not_found(item_id)),
            _ => Ok(()),
        }
    }

    /// Empties the cart. The cart itself survives for reuse.
    pub async fn clear(&self, cart: &Cart) -> PortResult<u64> {
        let removed = self.carts.clear_cart(cart.id).await?;
        info!(cart_id = %cart.id, removed, "cart cleared");
        Ok(removed)
    }

    async fn view(&self, cart: Cart) -> PortResult<CartView> {
        let lines = self.carts.get_cart_lines(cart.id).await?;
        Ok(CartView { cart, lines })
    }
}

fn item_not_found(item_id: Uuid) -> PortError {
    PortError::NotFound(format!("cart item {}", item_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CartLine, Product, SessionToken};
    use crate::ports::{MockCartStore, MockCatalogStore};
    use chrono::Utc;
    use mockall::predicate::eq;
    use rust_decimal::Decimal;
    use testresult::TestResult;

    fn cart() -> Cart {
        Cart {
            id: Uuid::new_v4(),
            user_id: Some(Uuid::new_v4()),
            session_token: None,
            created_at: Utc::now(),
        }
    }

    fn product(id: Uuid) -> Product {
        Product {
            id,
            seller_id: Uuid::new_v4(),
            name: "Kettle".to_string(),
            description: None,
            price: Decimal::new(2500, 2),
            quantity_available: 10,
            category_ids: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn service(carts: MockCartStore, catalog: MockCatalogStore) -> CartService {
        CartService::new(Arc::new(carts), Arc::new(catalog))
    }

    #[tokio::test]
    async fn get_or_create_returns_cart_with_lines() -> TestResult {
        let cart = cart();
        let owner = CartOwner::Anonymous(SessionToken::generate());
        let line = CartLine {
            item_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            product_name: "Kettle".to_string(),
            quantity: 2,
            unit_price: Decimal::new(25, 0),
        };

        let mut carts = MockCartStore::new();
        let returned = cart.clone();
        carts
            .expect_get_or_create_cart()
            .with(eq(owner))
            .times(1)
            .returning(move |_| Ok(returned.clone()));
        let lines = vec![line.clone()];
        carts
            .expect_get_cart_lines()
            .with(eq(cart.id))
            .returning(move |_| Ok(lines.clone()));

        let view = service(carts, MockCatalogStore::new())
            .get_or_create(owner)
            .await?;

        assert_eq!(view.cart.id, cart.id);
        assert_eq!(view.lines, vec![line]);
        assert_eq!(view.subtotal(), Some(Decimal::new(50, 0)));
        Ok(())
    }

    #[tokio::test]
    async fn find_without_cart_is_not_found() {
        let mut carts = MockCartStore::new();
        carts.expect_find_cart().returning(|_| Ok(None));

        let result = service(carts, MockCatalogStore::new())
            .find(CartOwner::User(Uuid::new_v4()))
            .await;

        assert!(matches!(result, Err(PortError::NotFound(_))), "got {result:?}");
    }

    #[tokio::test]
    async fn add_item_rejects_zero_quantity_without_touching_the_store() {
        let result = service(MockCartStore::new(), MockCatalogStore::new())
            .add_item(&cart(), Uuid::new_v4(), 0)
            .await;

        assert!(matches!(result, Err(PortError::InvalidArgument(_))), "got {result:?}");
    }

    #[tokio::test]
    async fn add_item_rejects_unknown_product() {
        let mut catalog = MockCatalogStore::new();
        catalog
            .expect_get_product()
            .returning(|id| Err(PortError::NotFound(id.to_string())));

        let result = service(MockCartStore::new(), catalog)
            .add_item(&cart(), Uuid::new_v4(), 1)
            .await;

        assert!(matches!(result, Err(PortError::InvalidArgument(_))), "got {result:?}");
    }

    #[tokio::test]
    async fn add_item_upserts_into_cart() -> TestResult {
        let cart = cart();
        let product_id = Uuid::new_v4();

        let mut catalog = MockCatalogStore::new();
        catalog
            .expect_get_product()
            .with(eq(product_id))
            .returning(|id| Ok(product(id)));

        let mut carts = MockCartStore::new();
        let cart_id = cart.id;
        carts
            .expect_upsert_item()
            .with(eq(cart_id), eq(product_id), eq(3u32))
            .times(1)
            .returning(move |cart_id, product_id, quantity| {
                Ok(AddedItem {
                    item: CartLineItem {
                        id: Uuid::new_v4(),
                        cart_id,
                        product_id,
                        quantity: quantity + 2,
                        added_at: Utc::now(),
                    },
                    created: false,
                })
            });

        let added = service(carts, catalog).add_item(&cart, product_id, 3).await?;

        assert!(!added.created);
        assert_eq!(added.item.quantity, 5);
        Ok(())
    }

    #[tokio::test]
    async fn zero_quantity_removes_the_item() -> TestResult {
        let cart = cart();
        let item_id = Uuid::new_v4();

        let mut carts = MockCartStore::new();
        carts
            .expect_delete_item()
            .with(eq(cart.id), eq(item_id))
            .times(1)
            .returning(|_, _| Ok(1));
        carts.expect_update_item_quantity().never();

        let updated = service(carts, MockCatalogStore::new())
            .set_item_quantity(&cart, item_id, 0)
            .await?;

        assert!(updated.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn set_quantity_on_foreign_item_is_not_found() {
        let mut carts = MockCartStore::new();
        carts
            .expect_update_item_quantity()
            .returning(|_, _, _| Ok(None));

        let result = service(carts, MockCatalogStore::new())
            .set_item_quantity(&cart(), Uuid::new_v4(), 4)
            .await;

        assert!(matches!(result, Err(PortError::NotFound(_))), "got {result:?}");
    }

    #[tokio::test]
    async fn remove_missing_item_is_not_found() {
        let mut carts = MockCartStore::new();
        carts.expect_delete_item().returning(|_, _| Ok(0));

        let result = service(carts, MockCatalogStore::new())
            .remove_item(&cart(), Uuid::new_v4())
            .await;

        assert!(matches!(result, Err(PortError::NotFound(_))), "got {result:?}");
    }
}
