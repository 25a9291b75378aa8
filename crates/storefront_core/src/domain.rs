//! crates/storefront_core/src/domain.rs
//!
//! Defines the pure, core data structures for the storefront.
//! These structs are independent of any database or serialization format.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::ports::PortError;

//=========================================================================================
// Identity
//=========================================================================================

/// Opaque key identifying an anonymous shopper's cart. Held by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionToken(Uuid);

impl SessionToken {
    /// Mints a fresh, unguessable token.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl FromStr for SessionToken {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Whoever a cart belongs to: a signed-in user or an anonymous browser session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CartOwner {
    User(Uuid),
    Anonymous(SessionToken),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Client,
    Seller,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Seller => "seller",
            Role::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = PortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "client" => Ok(Role::Client),
            "seller" => Ok(Role::Seller),
            "admin" => Ok(Role::Admin),
            other => Err(PortError::InvalidArgument(format!("unknown role '{}'", other))),
        }
    }
}

// Represents a user - used throughout app
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: Role,
}

// Only used internally for login/signup - contains sensitive data
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub hashed_password: String,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub hashed_password: String,
    pub role: Role,
}

/// The identity resolved from a valid auth session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub id: Uuid,
    pub role: Role,
}

/// Partial update of the signed-in user's account. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserUpdate {
    pub username: Option<String>,
    pub email: Option<String>,
    pub hashed_password: Option<String>,
}

impl UserUpdate {
    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.email.is_none() && self.hashed_password.is_none()
    }
}

//=========================================================================================
// Catalog
//=========================================================================================

/// Money columns hold two decimal places: prices up to 10 integer digits,
/// purchase totals up to 12.
pub const MONEY_SCALE: u32 = 2;

pub fn max_price() -> Decimal {
    Decimal::new(999_999_999_999, MONEY_SCALE)
}

pub fn max_total() -> Decimal {
    Decimal::new(99_999_999_999_999, MONEY_SCALE)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct Product {
    pub id: Uuid,
    pub seller_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub quantity_available: u32,
    /// Sorted, without duplicates.
    pub category_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewProduct {
    pub seller_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub quantity_available: u32,
    pub category_ids: Vec<Uuid>,
}

impl NewProduct {
    pub fn validate(&self) -> Result<(), PortError> {
        validate_name(&self.name)?;
        validate_price(self.price)
    }
}

/// Partial update of a product. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Decimal>,
    pub quantity_available: Option<u32>,
    /// Replaces the product's categories when set.
    pub category_ids: Option<Vec<Uuid>>,
}

impl ProductUpdate {
    pub fn validate(&self) -> Result<(), PortError> {
        if let Some(name) = &self.name {
            validate_name(name)?;
        }
        if let Some(price) = self.price {
            validate_price(price)?;
        }
        Ok(())
    }

    pub fn apply_to(&self, product: &mut Product) {
        if let Some(name) = &self.name {
            product.name = name.trim().to_string();
        }
        if let Some(description) = &self.description {
            product.description = Some(description.clone());
        }
        if let Some(price) = self.price {
            product.price = price;
        }
        if let Some(quantity) = self.quantity_available {
            product.quantity_available = quantity;
        }
        if let Some(category_ids) = &self.category_ids {
            product.category_ids = normalize_ids(category_ids);
        }
    }
}

fn validate_name(name: &str) -> Result<(), PortError> {
    if name.trim().is_empty() {
        return Err(PortError::InvalidArgument("product name is required".to_string()));
    }
    Ok(())
}

fn validate_price(price: Decimal) -> Result<(), PortError> {
    if price.is_sign_negative() {
        return Err(PortError::InvalidArgument("price must not be negative".to_string()));
    }
    if price.normalize().scale() > MONEY_SCALE {
        return Err(PortError::InvalidArgument(
            "price must have at most two decimal places".to_string(),
        ));
    }
    if price > max_price() {
        return Err(PortError::InvalidArgument(format!(
            "price must not exceed {}",
            max_price()
        )));
    }
    Ok(())
}

/// Sorts and deduplicates category ids.
pub fn normalize_ids(ids: &[Uuid]) -> Vec<Uuid> {
    let mut ids = ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    ids
}

//=========================================================================================
// Cart
//=========================================================================================

#[derive(Debug, Clone)]
pub struct Cart {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub session_token: Option<SessionToken>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CartLineItem {
    pub id: Uuid,
    pub cart_id: Uuid,
    pub product_id: Uuid,
    pub quantity: u32,
    pub added_at: DateTime<Utc>,
}

/// A cart line joined with the product's current name and price.
#[derive(Debug, Clone, PartialEq)]
pub struct CartLine {
    pub item_id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
}

impl CartLine {
    pub fn line_total(&self) -> Option<Decimal> {
        self.unit_price.checked_mul(Decimal::from(self.quantity))
    }
}

/// A cart together with its priced lines.
#[derive(Debug, Clone)]
pub struct CartView {
    pub cart: Cart,
    pub lines: Vec<CartLine>,
}

impl CartView {
    /// Sum of all line totals; `None` on decimal overflow.
    pub fn subtotal(&self) -> Option<Decimal> {
        sum_lines(&self.lines)
    }
}

/// Outcome of adding a product to a cart.
#[derive(Debug, Clone, PartialEq)]
pub struct AddedItem {
    pub item: CartLineItem,
    /// `false` when the quantity was merged into an existing line.
    pub created: bool,
}

pub(crate) fn sum_lines(lines: &[CartLine]) -> Option<Decimal> {
    lines
        .iter()
        .try_fold(Decimal::ZERO, |acc, line| acc.checked_add(line.line_total()?))
}

//=========================================================================================
// Purchase
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PurchaseStatus {
    Pending,
    Completed,
}

impl PurchaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseStatus::Pending => "PENDING",
            PurchaseStatus::Completed => "COMPLETED",
        }
    }
}

impl FromStr for PurchaseStatus {
    type Err = PortError;

    /// Case-insensitive; anything other than pending/completed is rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(PurchaseStatus::Pending),
            "COMPLETED" => Ok(PurchaseStatus::Completed),
            _ => Err(PortError::InvalidArgument(
                "Invalid status. Must be \"pending\" or \"completed\".".to_string(),
            )),
        }
    }
}

impl fmt::Display for PurchaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Purchase {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: PurchaseStatus,
    pub total: Decimal,
    pub created_at: DateTime<Utc>,
    pub items: Vec<PurchaseLineItem>,
}

/// Immutable historical record of one purchased product.
#[derive(Debug, Clone, PartialEq)]
pub struct PurchaseLineItem {
    pub id: Uuid,
    pub purchase_id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
}

/// Everything the persistence layer needs to turn a cart snapshot into a purchase.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutOrder {
    pub cart_id: Uuid,
    pub user_id: Uuid,
    pub total: Decimal,
    pub lines: Vec<CartLine>,
}

impl CheckoutOrder {
    /// Prices the snapshot. Fails on an empty snapshot or decimal overflow.
    pub fn from_snapshot(cart_id: Uuid, user_id: Uuid, lines: Vec<CartLine>) -> Result<Self, PortError> {
        if lines.is_empty() {
            return Err(PortError::EmptyCart);
        }
        let total = sum_lines(&lines)
            .filter(|total| *total <= max_total())
            .ok_or_else(|| PortError::InvalidArgument("cart total is too large".to_string()))?;
        Ok(Self {
            cart_id,
            user_id,
            total,
            lines,
        })
    }

    /// True when `current` holds exactly the snapshotted items and quantities.
    pub fn matches_items(&self, current: &[CartLineItem]) -> bool {
        if current.len() != self.lines.len() {
            return false;
        }
        self.lines.iter().all(|line| {
            current
                .iter()
                .any(|item| item.id == line.item_id && item.quantity == line.quantity)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn line(price: i64, quantity: u32) -> CartLine {
        CartLine {
            item_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            product_name: "Widget".to_string(),
            quantity,
            unit_price: Decimal::new(price, 0),
        }
    }

    #[test]
    fn status_parsing_is_case_insensitive() {
        assert_eq!("completed".parse::<PurchaseStatus>().ok(), Some(PurchaseStatus::Completed));
        assert_eq!("CoMpLeTeD".parse::<PurchaseStatus>().ok(), Some(PurchaseStatus::Completed));
        assert_eq!("Pending".parse::<PurchaseStatus>().ok(), Some(PurchaseStatus::Pending));
        assert!(matches!(
            "shipped".parse::<PurchaseStatus>(),
            Err(PortError::InvalidArgument(_))
        ));
    }

    #[test]
    fn checkout_order_totals_the_snapshot() {
        let order = CheckoutOrder::from_snapshot(
            Uuid::new_v4(),
            Uuid::new_v4(),
            vec![line(10, 2), line(5, 3)],
        )
        .expect("non-empty snapshot should price");

        assert_eq!(order.total, Decimal::new(35, 0));
    }

    #[test]
    fn checkout_order_rejects_empty_snapshot() {
        let result = CheckoutOrder::from_snapshot(Uuid::new_v4(), Uuid::new_v4(), Vec::new());
        assert!(matches!(result, Err(PortError::EmptyCart)));
    }

    #[test]
    fn checkout_order_detects_changed_quantities() {
        let cart_id = Uuid::new_v4();
        let snapshot = line(10, 2);
        let order = CheckoutOrder::from_snapshot(cart_id, Uuid::new_v4(), vec![snapshot.clone()])
            .expect("snapshot should price");

        let mut item = CartLineItem {
            id: snapshot.item_id,
            cart_id,
            product_id: snapshot.product_id,
            quantity: 2,
            added_at: Utc::now(),
        };
        assert!(order.matches_items(std::slice::from_ref(&item)));

        item.quantity = 3;
        assert!(!order.matches_items(&[item]));
        assert!(!order.matches_items(&[]));
    }

    #[test]
    fn product_validation_rejects_blank_names_and_negative_prices() {
        let mut product = NewProduct {
            seller_id: Uuid::new_v4(),
            name: "  ".to_string(),
            description: None,
            price: Decimal::new(100, 2),
            quantity_available: 1,
            category_ids: Vec::new(),
        };
        assert!(product.validate().is_err());

        product.name = "Lamp".to_string();
        assert!(product.validate().is_ok());

        let update = ProductUpdate {
            price: Some(Decimal::new(-1, 0)),
            ..ProductUpdate::default()
        };
        assert!(update.validate().is_err());
    }

    #[test]
    fn prices_must_fit_the_money_columns() {
        let price = |raw: &str| ProductUpdate {
            price: Some(raw.parse().expect("decimal literal")),
            ..ProductUpdate::default()
        };
        assert!(price("10.005").validate().is_err());
        assert!(price("10.500").validate().is_ok());
        assert!(price("100000000000").validate().is_err());
        assert!(price("9999999999.99").validate().is_ok());
    }

    #[test]
    fn checkout_order_rejects_totals_beyond_the_column() {
        let result = CheckoutOrder::from_snapshot(
            Uuid::new_v4(),
            Uuid::new_v4(),
            vec![line(1_000_000_000, 2_000_000)],
        );
        assert!(matches!(result, Err(PortError::InvalidArgument(_))), "got {result:?}");
    }

    #[test]
    fn category_updates_are_normalised() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut product = Product {
            id: Uuid::new_v4(),
            seller_id: Uuid::new_v4(),
            name: "Lamp".to_string(),
            description: None,
            price: Decimal::ONE,
            quantity_available: 0,
            category_ids: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        ProductUpdate {
            category_ids: Some(vec![b, a, b]),
            ..ProductUpdate::default()
        }
        .apply_to(&mut product);

        let mut expected = vec![a, b];
        expected.sort_unstable();
        assert_eq!(product.category_ids, expected);
    }
}
