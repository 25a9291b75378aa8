//! crates/storefront_core/src/ports.rs
//!
//! Defines the persistence contracts (traits) for the storefront's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of the concrete store (PostgreSQL, in-memory, mocks).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    AddedItem, AuthUser, Cart, CartLine, CartLineItem, CartOwner, Category, CheckoutOrder,
    NewProduct, NewUser, Product, ProductUpdate, Purchase, PurchaseStatus, User,
    UserCredentials, UserUpdate,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// The error type for all port and core operations.
/// This abstracts away the specific errors from the underlying store.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Cart is empty or not found")]
    EmptyCart,
    #[error("Conflicting concurrent update: {0}")]
    Conflict(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Forbidden")]
    Forbidden,
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Persistence Ports (Traits)
//=========================================================================================

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CartStore: Send + Sync {
    /// Returns the owner's cart, creating an empty one if none exists.
    /// Safe against two requests racing to create the same owner's cart.
    async fn get_or_create_cart(&self, owner: CartOwner) -> PortResult<Cart>;

    async fn find_cart(&self, owner: CartOwner) -> PortResult<Option<Cart>>;

    /// The cart's items joined with current product name and price, oldest first.
    async fn get_cart_lines(&self, cart_id: Uuid) -> PortResult<Vec<CartLine>>;

    /// Inserts a line for the product, or increments the quantity of the existing one.
    /// Fails with `InvalidArgument` when the product is unknown or deleted, checked
    /// in the same transaction as the write.
    async fn upsert_item(
        &self,
        cart_id: Uuid,
        product_id: Uuid,
        quantity: u32,
    ) -> PortResult<AddedItem>;

    /// Sets the quantity of an item of this cart. `None` when the cart has no such item.
    async fn update_item_quantity(
        &self,
        cart_id: Uuid,
        item_id: Uuid,
        quantity: u32,
    ) -> PortResult<Option<CartLineItem>>;

    /// Deletes an item of this cart, returning the number of rows removed.
    async fn delete_item(&self, cart_id: Uuid, item_id: Uuid) -> PortResult<u64>;

    /// Deletes every item of the cart; the cart itself is kept.
    async fn clear_cart(&self, cart_id: Uuid) -> PortResult<u64>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Live products, newest first, optionally limited to one category.
    async fn list_products(&self, category_id: Option<Uuid>) -> PortResult<Vec<Product>>;

    /// Fails with `NotFound` for unknown or deleted products.
    async fn get_product(&self, product_id: Uuid) -> PortResult<Product>;

    async fn create_product(&self, product: NewProduct) -> PortResult<Product>;

    async fn update_product(&self, product_id: Uuid, update: ProductUpdate) -> PortResult<Product>;

    /// Soft-deletes the product and removes it from every cart.
    /// Purchase history keeps its snapshot.
    async fn delete_product(&self, product_id: Uuid) -> PortResult<()>;

    /// All categories, by name.
    async fn list_categories(&self) -> PortResult<Vec<Category>>;

    /// Fails with `Conflict` when the name is taken.
    async fn create_category(&self, name: &str) -> PortResult<Category>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PurchaseStore: Send + Sync {
    /// Atomically turns the cart snapshot into a PENDING purchase and removes the
    /// snapshotted items from the cart.
    ///
    /// Fails with `EmptyCart` if the cart was emptied in the meantime, and with
    /// `Conflict` if its items no longer match the snapshot. Nothing is written
    /// on failure.
    async fn commit_checkout(&self, order: CheckoutOrder) -> PortResult<Purchase>;

    /// The user's purchases with items, newest first.
    async fn list_purchases(
        &self,
        user_id: Uuid,
        status: Option<PurchaseStatus>,
    ) -> PortResult<Vec<Purchase>>;

    /// Fails with `NotFound` unless the purchase exists and belongs to the user.
    async fn get_purchase(&self, user_id: Uuid, purchase_id: Uuid) -> PortResult<Purchase>;

    async fn update_purchase_status(
        &self,
        purchase_id: Uuid,
        status: PurchaseStatus,
    ) -> PortResult<Purchase>;
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Fails with `Conflict` when the email is already registered.
    async fn create_user(&self, user: NewUser) -> PortResult<User>;

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials>;

    async fn get_user(&self, user_id: Uuid) -> PortResult<User>;

    /// Fails with `Conflict` when the new email is already registered.
    async fn update_user(&self, user_id: Uuid, update: UserUpdate) -> PortResult<User>;

    /// Closes the account: its sessions and cart are removed and its products are
    /// soft-deleted. Purchases are kept. The email becomes available again.
    async fn delete_user(&self, user_id: Uuid) -> PortResult<()>;

    /// Also prunes the user's expired sessions.
    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()>;

    /// Resolves a live (unexpired) session to its user. An expired session is
    /// deleted on the way out.
    async fn validate_auth_session(&self, session_id: &str) -> PortResult<AuthUser>;

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()>;
}
