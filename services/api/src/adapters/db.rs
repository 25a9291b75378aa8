//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the persistence ports from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.
//!
//! Every mutation of a cart starts by locking the cart row (`SELECT ... FOR UPDATE`),
//! so cart edits and checkouts of the same cart are serialised against each other.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::error::ErrorKind;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use storefront_core::domain::{
    normalize_ids, AddedItem, AuthUser, Cart, CartLine, CartLineItem, CartOwner, Category,
    CheckoutOrder, NewProduct, NewUser, Product, ProductUpdate, Purchase, PurchaseLineItem,
    PurchaseStatus, SessionToken, User, UserCredentials, UserUpdate,
};
use storefront_core::ports::{
    AccountStore, CartStore, CatalogStore, PortError, PortResult, PurchaseStore,
};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the persistence ports on PostgreSQL.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn begin(&self) -> PortResult<Transaction<'static, Postgres>> {
        self.pool.begin().await.map_err(db_error)
    }

    async fn purchase_items(
        &self,
        purchase_ids: &[Uuid],
    ) -> PortResult<HashMap<Uuid, Vec<PurchaseLineItem>>> {
        let records = sqlx::query_as::<_, PurchaseItemRecord>(
            "SELECT id, purchase_id, product_id, product_name, quantity, unit_price \
             FROM purchase_items WHERE purchase_id = ANY($1) ORDER BY purchase_id, position",
        )
        .bind(purchase_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        let mut grouped: HashMap<Uuid, Vec<PurchaseLineItem>> = HashMap::new();
        for record in records {
            let item = record.to_domain()?;
            grouped.entry(item.purchase_id).or_default().push(item);
        }
        Ok(grouped)
    }

    async fn with_items(&self, records: Vec<PurchaseRecord>) -> PortResult<Vec<Purchase>> {
        let ids: Vec<Uuid> = records.iter().map(|r| r.id).collect();
        let mut items = self.purchase_items(&ids).await?;
        records
            .into_iter()
            .map(|record| {
                let lines = items.remove(&record.id).unwrap_or_default();
                record.to_domain(lines)
            })
            .collect()
    }
}

//=========================================================================================
// Error and Value Conversion Helpers
//=========================================================================================

/// Classifies a `sqlx` error into the port error taxonomy.
fn db_error(e: sqlx::Error) -> PortError {
    match &e {
        sqlx::Error::RowNotFound => PortError::NotFound("record".to_string()),
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            PortError::StorageUnavailable(e.to_string())
        }
        sqlx::Error::Database(db) => {
            // 40001: serialization_failure, 40P01: deadlock_detected
            if matches!(db.code().as_deref(), Some("40001") | Some("40P01")) {
                return PortError::Conflict(db.message().to_string());
            }
            // 22003: numeric_value_out_of_range
            if db.code().as_deref() == Some("22003") {
                return PortError::InvalidArgument("numeric value out of range".to_string());
            }
            match db.kind() {
                ErrorKind::UniqueViolation => PortError::Conflict("record already exists".to_string()),
                ErrorKind::ForeignKeyViolation
                | ErrorKind::CheckViolation
                | ErrorKind::NotNullViolation => {
                    PortError::InvalidArgument(db.message().to_string())
                }
                _ => PortError::Unexpected(e.to_string()),
            }
        }
        _ => PortError::Unexpected(e.to_string()),
    }
}

/// Like `db_error`, with the live-email unique index reported as a taken email.
fn email_conflict(e: sqlx::Error) -> PortError {
    match db_error(e) {
        PortError::Conflict(_) => PortError::Conflict("Email already used".to_string()),
        other => other,
    }
}

fn to_db_quantity(quantity: u32) -> PortResult<i32> {
    i32::try_from(quantity)
        .map_err(|_| PortError::InvalidArgument(format!("quantity {} is too large", quantity)))
}

fn from_db_quantity(quantity: i32) -> PortResult<u32> {
    u32::try_from(quantity)
        .map_err(|_| PortError::Unexpected(format!("negative quantity {} in database", quantity)))
}

/// Locks the cart row for the rest of the transaction.
async fn lock_cart(tx: &mut Transaction<'_, Postgres>, cart_id: Uuid) -> PortResult<()> {
    sqlx::query_scalar::<_, Uuid>("SELECT id FROM carts WHERE id = $1 FOR UPDATE")
        .bind(cart_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(db_error)?
        .map(|_| ())
        .ok_or_else(|| PortError::NotFound(format!("Cart {} not found", cart_id)))
}

/// Locks a live product against deletion for the rest of the transaction.
async fn lock_live_product(
    tx: &mut Transaction<'_, Postgres>,
    product_id: Uuid,
    mode: &str,
) -> PortResult<bool> {
    let found = sqlx::query_scalar::<_, Uuid>(&format!(
        "SELECT id FROM products WHERE id = $1 AND deleted_at IS NULL FOR {}",
        mode
    ))
    .bind(product_id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(db_error)?;
    Ok(found.is_some())
}

async fn fetch_product(tx: &mut Transaction<'_, Postgres>, product_id: Uuid) -> PortResult<Product> {
    sqlx::query_as::<_, ProductRecord>(&format!(
        "SELECT {} FROM products WHERE id = $1",
        PRODUCT_COLUMNS
    ))
    .bind(product_id)
    .fetch_one(&mut **tx)
    .await
    .map_err(db_error)?
    .to_domain()
}

/// Replaces the product's category links.
async fn link_categories(
    tx: &mut Transaction<'_, Postgres>,
    product_id: Uuid,
    category_ids: &[Uuid],
) -> PortResult<()> {
    sqlx::query("DELETE FROM product_categories WHERE product_id = $1")
        .bind(product_id)
        .execute(&mut **tx)
        .await
        .map_err(db_error)?;

    let category_ids = normalize_ids(category_ids);
    if category_ids.is_empty() {
        return Ok(());
    }
    sqlx::query(
        "INSERT INTO product_categories (product_id, category_id) \
         SELECT $1, UNNEST($2::uuid[])",
    )
    .bind(product_id)
    .bind(&category_ids)
    .execute(&mut **tx)
    .await
    .map_err(|e| match db_error(e) {
        PortError::InvalidArgument(_) => {
            PortError::InvalidArgument("unknown category".to_string())
        }
        other => other,
    })?;
    Ok(())
}

async fn cart_items(
    tx: &mut Transaction<'_, Postgres>,
    cart_id: Uuid,
) -> PortResult<Vec<CartLineItem>> {
    let records = sqlx::query_as::<_, CartItemRecord>(
        "SELECT id, cart_id, product_id, quantity, added_at FROM cart_items WHERE cart_id = $1",
    )
    .bind(cart_id)
    .fetch_all(&mut **tx)
    .await
    .map_err(db_error)?;
    records.into_iter().map(CartItemRecord::to_domain).collect()
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct UserRecord {
    id: Uuid,
    username: String,
    email: String,
    role: String,
}
impl UserRecord {
    fn to_domain(self) -> PortResult<User> {
        Ok(User {
            id: self.id,
            username: self.username,
            email: self.email,
            role: self.role.parse()?,
        })
    }
}

#[derive(FromRow)]
struct CredentialsRecord {
    id: Uuid,
    username: String,
    email: String,
    role: String,
    hashed_password: String,
}
impl CredentialsRecord {
    fn to_domain(self) -> PortResult<UserCredentials> {
        Ok(UserCredentials {
            id: self.id,
            username: self.username,
            email: self.email,
            role: self.role.parse()?,
            hashed_password: self.hashed_password,
        })
    }
}

#[derive(FromRow)]
struct ProductRecord {
    id: Uuid,
    seller_id: Uuid,
    name: String,
    description: Option<String>,
    price: Decimal,
    quantity_available: i32,
    category_ids: Vec<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl ProductRecord {
    fn to_domain(self) -> PortResult<Product> {
        Ok(Product {
            id: self.id,
            seller_id: self.seller_id,
            name: self.name,
            description: self.description,
            price: self.price,
            quantity_available: from_db_quantity(self.quantity_available)?,
            category_ids: self.category_ids,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const PRODUCT_COLUMNS: &str = "id, seller_id, name, description, price, quantity_available, \
     ARRAY(SELECT pc.category_id FROM product_categories pc \
           WHERE pc.product_id = products.id ORDER BY pc.category_id) AS category_ids, \
     created_at, updated_at";

#[derive(FromRow)]
struct CategoryRecord {
    id: Uuid,
    name: String,
}
impl CategoryRecord {
    fn to_domain(self) -> Category {
        Category {
            id: self.id,
            name: self.name,
        }
    }
}

#[derive(FromRow)]
struct CartRecord {
    id: Uuid,
    user_id: Option<Uuid>,
    session_token: Option<Uuid>,
    created_at: DateTime<Utc>,
}
impl CartRecord {
    fn to_domain(self) -> Cart {
        Cart {
            id: self.id,
            user_id: self.user_id,
            session_token: self.session_token.map(SessionToken::from_uuid),
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct CartItemRecord {
    id: Uuid,
    cart_id: Uuid,
    product_id: Uuid,
    quantity: i32,
    added_at: DateTime<Utc>,
}
impl CartItemRecord {
    fn to_domain(self) -> PortResult<CartLineItem> {
        Ok(CartLineItem {
            id: self.id,
            cart_id: self.cart_id,
            product_id: self.product_id,
            quantity: from_db_quantity(self.quantity)?,
            added_at: self.added_at,
        })
    }
}

#[derive(FromRow)]
struct CartLineRecord {
    item_id: Uuid,
    product_id: Uuid,
    product_name: String,
    quantity: i32,
    unit_price: Decimal,
}
impl CartLineRecord {
    fn to_domain(self) -> PortResult<CartLine> {
        Ok(CartLine {
            item_id: self.item_id,
            product_id: self.product_id,
            product_name: self.product_name,
            quantity: from_db_quantity(self.quantity)?,
            unit_price: self.unit_price,
        })
    }
}

#[derive(FromRow)]
struct PurchaseRecord {
    id: Uuid,
    user_id: Uuid,
    status: String,
    total: Decimal,
    created_at: DateTime<Utc>,
}
impl PurchaseRecord {
    fn to_domain(self, items: Vec<PurchaseLineItem>) -> PortResult<Purchase> {
        let status = self
            .status
            .parse::<PurchaseStatus>()
            .map_err(|_| PortError::Unexpected(format!("unknown purchase status {}", self.status)))?;
        Ok(Purchase {
            id: self.id,
            user_id: self.user_id,
            status,
            total: self.total,
            created_at: self.created_at,
            items,
        })
    }
}

#[derive(FromRow)]
struct PurchaseItemRecord {
    id: Uuid,
    purchase_id: Uuid,
    product_id: Uuid,
    product_name: String,
    quantity: i32,
    unit_price: Decimal,
}
impl PurchaseItemRecord {
    fn to_domain(self) -> PortResult<PurchaseLineItem> {
        Ok(PurchaseLineItem {
            id: self.id,
            purchase_id: self.purchase_id,
            product_id: self.product_id,
            product_name: self.product_name,
            quantity: from_db_quantity(self.quantity)?,
            unit_price: self.unit_price,
        })
    }
}

//=========================================================================================
// `CartStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl CartStore for DbAdapter {
    async fn get_or_create_cart(&self, owner: CartOwner) -> PortResult<Cart> {
        let insert = match owner {
            CartOwner::User(user_id) => sqlx::query(
                "INSERT INTO carts (id, user_id) VALUES ($1, $2) ON CONFLICT (user_id) DO NOTHING",
            )
            .bind(Uuid::new_v4())
            .bind(user_id),
            CartOwner::Anonymous(token) => sqlx::query(
                "INSERT INTO carts (id, session_token) VALUES ($1, $2) \
                 ON CONFLICT (session_token) DO NOTHING",
            )
            .bind(Uuid::new_v4())
            .bind(token.as_uuid()),
        };
        insert.execute(&self.pool).await.map_err(db_error)?;

        self.find_cart(owner)
            .await?
            .ok_or_else(|| PortError::Unexpected("cart vanished after creation".to_string()))
    }

    async fn find_cart(&self, owner: CartOwner) -> PortResult<Option<Cart>> {
        let (sql, key) = match owner {
            CartOwner::User(user_id) => (
                "SELECT id, user_id, session_token, created_at FROM carts WHERE user_id = $1",
                user_id,
            ),
            CartOwner::Anonymous(token) => (
                "SELECT id, user_id, session_token, created_at FROM carts WHERE session_token = $1",
                token.as_uuid(),
            ),
        };
        let record = sqlx::query_as::<_, CartRecord>(sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(record.map(CartRecord::to_domain))
    }

    async fn get_cart_lines(&self, cart_id: Uuid) -> PortResult<Vec<CartLine>> {
        let records = sqlx::query_as::<_, CartLineRecord>(
            "SELECT ci.id AS item_id, ci.product_id, p.name AS product_name, ci.quantity, \
                    p.price AS unit_price \
             FROM cart_items ci JOIN products p ON p.id = ci.product_id \
             WHERE ci.cart_id = $1 AND p.deleted_at IS NULL \
             ORDER BY ci.added_at ASC, ci.id ASC",
        )
        .bind(cart_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        records.into_iter().map(CartLineRecord::to_domain).collect()
    }

    async fn upsert_item(
        &self,
        cart_id: Uuid,
        product_id: Uuid,
        quantity: u32,
    ) -> PortResult<AddedItem> {
        let mut tx = self.begin().await?;
        lock_cart(&mut tx, cart_id).await?;
        // Held until commit, so a concurrent delete_product waits for this line
        // and then removes it.
        if !lock_live_product(&mut tx, product_id, "SHARE").await? {
            return Err(PortError::InvalidArgument(format!(
                "unknown product {}",
                product_id
            )));
        }

        let existing = sqlx::query_as::<_, CartItemRecord>(
            "SELECT id, cart_id, product_id, quantity, added_at FROM cart_items \
             WHERE cart_id = $1 AND product_id = $2",
        )
        .bind(cart_id)
        .bind(product_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?;

        let (record, created) = match existing {
            Some(item) => {
                let merged = from_db_quantity(item.quantity)?
                    .checked_add(quantity)
                    .ok_or_else(|| PortError::InvalidArgument("quantity is too large".to_string()))?;
                let record = sqlx::query_as::<_, CartItemRecord>(
                    "UPDATE cart_items SET quantity = $2 WHERE id = $1 \
                     RETURNING id, cart_id, product_id, quantity, added_at",
                )
                .bind(item.id)
                .bind(to_db_quantity(merged)?)
                .fetch_one(&mut *tx)
                .await
                .map_err(db_error)?;
                (record, false)
            }
            None => {
                let record = sqlx::query_as::<_, CartItemRecord>(
                    "INSERT INTO cart_items (id, cart_id, product_id, quantity) \
                     VALUES ($1, $2, $3, $4) \
                     RETURNING id, cart_id, product_id, quantity, added_at",
                )
                .bind(Uuid::new_v4())
                .bind(cart_id)
                .bind(product_id)
                .bind(to_db_quantity(quantity)?)
                .fetch_one(&mut *tx)
                .await
                .map_err(db_error)?;
                (record, true)
            }
        };

        tx.commit().await.map_err(db_error)?;
        Ok(AddedItem {
            item: record.to_domain()?,
            created,
        })
    }

    async fn update_item_quantity(
        &self,
        cart_id: Uuid,
        item_id: Uuid,
        quantity: u32,
    ) -> PortResult<Option<CartLineItem>> {
        let mut tx = self.begin().await?;
        lock_cart(&mut tx, cart_id).await?;

        let record = sqlx::query_as::<_, CartItemRecord>(
            "UPDATE cart_items SET quantity = $3 WHERE id = $1 AND cart_id = $2 \
             RETURNING id, cart_id, product_id, quantity, added_at",
        )
        .bind(item_id)
        .bind(cart_id)
        .bind(to_db_quantity(quantity)?)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        record.map(CartItemRecord::to_domain).transpose()
    }

    async fn delete_item(&self, cart_id: Uuid, item_id: Uuid) -> PortResult<u64> {
        let mut tx = self.begin().await?;
        lock_cart(&mut tx, cart_id).await?;

        let rows = sqlx::query("DELETE FROM cart_items WHERE id = $1 AND cart_id = $2")
            .bind(item_id)
            .bind(cart_id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?
            .rows_affected();

        tx.commit().await.map_err(db_error)?;
        Ok(rows)
    }

    async fn clear_cart(&self, cart_id: Uuid) -> PortResult<u64> {
        let mut tx = self.begin().await?;
        lock_cart(&mut tx, cart_id).await?;

        let rows = sqlx::query("DELETE FROM cart_items WHERE cart_id = $1")
            .bind(cart_id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?
            .rows_affected();

        tx.commit().await.map_err(db_error)?;
        Ok(rows)
    }
}

//=========================================================================================
// `CatalogStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl CatalogStore for DbAdapter {
    async fn list_products(&self, category_id: Option<Uuid>) -> PortResult<Vec<Product>> {
        let records = sqlx::query_as::<_, ProductRecord>(&format!(
            "SELECT {} FROM products WHERE deleted_at IS NULL \
             AND ($1::uuid IS NULL OR EXISTS ( \
                 SELECT 1 FROM product_categories pc \
                 WHERE pc.product_id = products.id AND pc.category_id = $1)) \
             ORDER BY created_at DESC",
            PRODUCT_COLUMNS
        ))
        .bind(category_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        records.into_iter().map(ProductRecord::to_domain).collect()
    }

    async fn get_product(&self, product_id: Uuid) -> PortResult<Product> {
        sqlx::query_as::<_, ProductRecord>(&format!(
            "SELECT {} FROM products WHERE id = $1 AND deleted_at IS NULL",
            PRODUCT_COLUMNS
        ))
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?
        .ok_or_else(|| PortError::NotFound(format!("Product {} not found", product_id)))?
        .to_domain()
    }

    async fn create_product(&self, product: NewProduct) -> PortResult<Product> {
        let mut tx = self.begin().await?;
        let product_id = Uuid::new_v4();

        sqlx::query(
            "INSERT INTO products (id, seller_id, name, description, price, quantity_available) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(product_id)
        .bind(product.seller_id)
        .bind(product.name.trim())
        .bind(product.description)
        .bind(product.price)
        .bind(to_db_quantity(product.quantity_available)?)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;
        link_categories(&mut tx, product_id, &product.category_ids).await?;

        let created = fetch_product(&mut tx, product_id).await?;
        tx.commit().await.map_err(db_error)?;
        Ok(created)
    }

    async fn update_product(&self, product_id: Uuid, update: ProductUpdate) -> PortResult<Product> {
        let quantity = update.quantity_available.map(to_db_quantity).transpose()?;
        let mut tx = self.begin().await?;
        if !lock_live_product(&mut tx, product_id, "UPDATE").await? {
            return Err(PortError::NotFound(format!("Product {} not found", product_id)));
        }

        sqlx::query(
            "UPDATE products SET \
                 name = COALESCE($2, name), \
                 description = COALESCE($3, description), \
                 price = COALESCE($4, price), \
                 quantity_available = COALESCE($5, quantity_available), \
                 updated_at = now() \
             WHERE id = $1",
        )
        .bind(product_id)
        .bind(update.name.as_deref().map(str::trim))
        .bind(update.description)
        .bind(update.price)
        .bind(quantity)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;
        if let Some(category_ids) = &update.category_ids {
            link_categories(&mut tx, product_id, category_ids).await?;
        }

        let updated = fetch_product(&mut tx, product_id).await?;
        tx.commit().await.map_err(db_error)?;
        Ok(updated)
    }

    async fn delete_product(&self, product_id: Uuid) -> PortResult<()> {
        let mut tx = self.begin().await?;
        // Waits for in-flight upsert_item calls holding the product FOR SHARE.
        if !lock_live_product(&mut tx, product_id, "UPDATE").await? {
            return Err(PortError::NotFound(format!("Product {} not found", product_id)));
        }

        sqlx::query("UPDATE products SET deleted_at = now() WHERE id = $1")
            .bind(product_id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        sqlx::query("DELETE FROM cart_items WHERE product_id = $1")
            .bind(product_id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        Ok(())
    }

    async fn list_categories(&self) -> PortResult<Vec<Category>> {
        let records = sqlx::query_as::<_, CategoryRecord>(
            "SELECT id, name FROM categories ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(records.into_iter().map(CategoryRecord::to_domain).collect())
    }

    async fn create_category(&self, name: &str) -> PortResult<Category> {
        sqlx::query_as::<_, CategoryRecord>(
            "INSERT INTO categories (id, name) VALUES ($1, $2) RETURNING id, name",
        )
        .bind(Uuid::new_v4())
        .bind(name.trim())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match db_error(e) {
            PortError::Conflict(_) => PortError::Conflict("Category already exists".to_string()),
            other => other,
        })
        .map(CategoryRecord::to_domain)
    }
}

//=========================================================================================
// `PurchaseStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl PurchaseStore for DbAdapter {
    async fn commit_checkout(&self, order: CheckoutOrder) -> PortResult<Purchase> {
        let mut tx = self.begin().await?;

        // A concurrent checkout of the same cart waits here, then sees the emptied cart.
        lock_cart(&mut tx, order.cart_id).await?;
        let current = cart_items(&mut tx, order.cart_id).await?;
        if current.is_empty() {
            return Err(PortError::EmptyCart);
        }
        if !order.matches_items(&current) {
            return Err(PortError::Conflict(format!(
                "cart {} changed since it was priced",
                order.cart_id
            )));
        }

        let purchase = sqlx::query_as::<_, PurchaseRecord>(
            "INSERT INTO purchases (id, user_id, status, total) VALUES ($1, $2, $3, $4) \
             RETURNING id, user_id, status, total, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(order.user_id)
        .bind(PurchaseStatus::Pending.as_str())
        .bind(order.total)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error)?;

        let mut items = Vec::with_capacity(order.lines.len());
        for (position, line) in order.lines.iter().enumerate() {
            let position = i32::try_from(position)
                .map_err(|_| PortError::InvalidArgument("too many cart lines".to_string()))?;
            let record = sqlx::query_as::<_, PurchaseItemRecord>(
                "INSERT INTO purchase_items \
                     (id, purchase_id, position, product_id, product_name, quantity, unit_price) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7) \
                 RETURNING id, purchase_id, product_id, product_name, quantity, unit_price",
            )
            .bind(Uuid::new_v4())
            .bind(purchase.id)
            .bind(position)
            .bind(line.product_id)
            .bind(&line.product_name)
            .bind(to_db_quantity(line.quantity)?)
            .bind(line.unit_price)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_error)?;
            items.push(record.to_domain()?);
        }

        let item_ids: Vec<Uuid> = order.lines.iter().map(|line| line.item_id).collect();
        sqlx::query("DELETE FROM cart_items WHERE cart_id = $1 AND id = ANY($2)")
            .bind(order.cart_id)
            .bind(&item_ids)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        purchase.to_domain(items)
    }

    async fn list_purchases(
        &self,
        user_id: Uuid,
        status: Option<PurchaseStatus>,
    ) -> PortResult<Vec<Purchase>> {
        let records = sqlx::query_as::<_, PurchaseRecord>(
            "SELECT id, user_id, status, total, created_at FROM purchases \
             WHERE user_id = $1 AND ($2::text IS NULL OR status = $2) \
             ORDER BY created_at DESC, id DESC",
        )
        .bind(user_id)
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        self.with_items(records).await
    }

    async fn get_purchase(&self, user_id: Uuid, purchase_id: Uuid) -> PortResult<Purchase> {
        let record = sqlx::query_as::<_, PurchaseRecord>(
            "SELECT id, user_id, status, total, created_at FROM purchases \
             WHERE id = $1 AND user_id = $2",
        )
        .bind(purchase_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?
        .ok_or_else(|| PortError::NotFound(format!("Purchase {} not found", purchase_id)))?;

        let mut purchases = self.with_items(vec![record]).await?;
        purchases
            .pop()
            .ok_or_else(|| PortError::NotFound(format!("Purchase {} not found", purchase_id)))
    }

    async fn update_purchase_status(
        &self,
        purchase_id: Uuid,
        status: PurchaseStatus,
    ) -> PortResult<Purchase> {
        let record = sqlx::query_as::<_, PurchaseRecord>(
            "UPDATE purchases SET status = $2 WHERE id = $1 \
             RETURNING id, user_id, status, total, created_at",
        )
        .bind(purchase_id)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?
        .ok_or_else(|| PortError::NotFound(format!("Purchase {} not found", purchase_id)))?;

        let mut purchases = self.with_items(vec![record]).await?;
        purchases
            .pop()
            .ok_or_else(|| PortError::NotFound(format!("Purchase {} not found", purchase_id)))
    }
}

//=========================================================================================
// `AccountStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl AccountStore for DbAdapter {
    async fn create_user(&self, user: NewUser) -> PortResult<User> {
        sqlx::query_as::<_, UserRecord>(
            "INSERT INTO users (id, username, email, hashed_password, role) \
             VALUES ($1, $2, $3, $4, $5) RETURNING id, username, email, role",
        )
        .bind(Uuid::new_v4())
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.hashed_password)
        .bind(user.role.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(email_conflict)?
        .to_domain()
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        sqlx::query_as::<_, CredentialsRecord>(
            "SELECT id, username, email, role, hashed_password FROM users \
             WHERE email = $1 AND deleted_at IS NULL",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?
        .ok_or_else(|| PortError::NotFound(format!("User {} not found", email)))?
        .to_domain()
    }

    async fn get_user(&self, user_id: Uuid) -> PortResult<User> {
        sqlx::query_as::<_, UserRecord>(
            "SELECT id, username, email, role FROM users WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?
        .ok_or_else(|| PortError::NotFound(format!("User {} not found", user_id)))?
        .to_domain()
    }

    async fn update_user(&self, user_id: Uuid, update: UserUpdate) -> PortResult<User> {
        sqlx::query_as::<_, UserRecord>(
            "UPDATE users SET \
                 username = COALESCE($2, username), \
                 email = COALESCE($3, email), \
                 hashed_password = COALESCE($4, hashed_password) \
             WHERE id = $1 AND deleted_at IS NULL \
             RETURNING id, username, email, role",
        )
        .bind(user_id)
        .bind(update.username)
        .bind(update.email)
        .bind(update.hashed_password)
        .fetch_optional(&self.pool)
        .await
        .map_err(email_conflict)?
        .ok_or_else(|| PortError::NotFound(format!("User {} not found", user_id)))?
        .to_domain()
    }

    async fn delete_user(&self, user_id: Uuid) -> PortResult<()> {
        let mut tx = self.begin().await?;

        let rows = sqlx::query(
            "UPDATE users SET deleted_at = now() WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?
        .rows_affected();
        if rows == 0 {
            return Err(PortError::NotFound(format!("User {} not found", user_id)));
        }

        sqlx::query("DELETE FROM auth_sessions WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        // The cart goes before the products, matching the cart-then-product lock
        // order of upsert_item.
        sqlx::query("DELETE FROM carts WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        let product_ids = sqlx::query_scalar::<_, Uuid>(
            "UPDATE products SET deleted_at = now() \
             WHERE seller_id = $1 AND deleted_at IS NULL RETURNING id",
        )
        .bind(user_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_error)?;
        sqlx::query("DELETE FROM cart_items WHERE product_id = ANY($1)")
            .bind(&product_ids)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        Ok(())
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        sqlx::query("DELETE FROM auth_sessions WHERE user_id = $1 AND expires_at <= now()")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        sqlx::query("INSERT INTO auth_sessions (id, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(session_id)
            .bind(user_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<AuthUser> {
        let row = sqlx::query_as::<_, (Uuid, String, bool)>(
            "SELECT u.id, u.role, s.expires_at <= now() AS expired \
             FROM auth_sessions s JOIN users u ON u.id = s.user_id \
             WHERE s.id = $1 AND u.deleted_at IS NULL",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        match row {
            Some((id, role, false)) => Ok(AuthUser {
                id,
                role: role.parse()?,
            }),
            Some((_, _, true)) => {
                self.delete_auth_session(session_id).await?;
                Err(PortError::Unauthorized)
            }
            None => Err(PortError::Unauthorized),
        }
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM auth_sessions WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }
}
