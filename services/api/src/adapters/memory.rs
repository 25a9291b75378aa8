//! services/api/src/adapters/memory.rs
//!
//! An in-process implementation of the persistence ports, selected with
//! `DATABASE_URL=memory://`. All state sits behind one async mutex, so every
//! port call (checkout included) is atomic with respect to every other.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use storefront_core::domain::{
    normalize_ids, AddedItem, AuthUser, Cart, CartLine, CartLineItem, CartOwner, Category,
    CheckoutOrder, NewProduct, NewUser, Product, ProductUpdate, Purchase, PurchaseLineItem,
    PurchaseStatus, User, UserCredentials, UserUpdate,
};
use storefront_core::ports::{
    AccountStore, CartStore, CatalogStore, PortError, PortResult, PurchaseStore,
};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct State {
    users: Vec<UserCredentials>,
    sessions: HashMap<String, (Uuid, DateTime<Utc>)>,
    products: Vec<StoredProduct>,
    categories: Vec<Category>,
    carts: Vec<Cart>,
    // Insertion order doubles as "oldest first".
    cart_items: Vec<CartLineItem>,
    purchases: Vec<Purchase>,
}

struct StoredProduct {
    product: Product,
    deleted: bool,
}

impl State {
    fn live_product(&self, product_id: Uuid) -> Option<&Product> {
        self.products
            .iter()
            .find(|p| p.product.id == product_id && !p.deleted)
            .map(|p| &p.product)
    }

    fn cart_for(&self, owner: CartOwner) -> Option<&Cart> {
        self.carts.iter().find(|cart| match owner {
            CartOwner::User(user_id) => cart.user_id == Some(user_id),
            CartOwner::Anonymous(token) => cart.session_token == Some(token),
        })
    }

    fn check_categories(&self, category_ids: &[Uuid]) -> PortResult<()> {
        if category_ids
            .iter()
            .all(|id| self.categories.iter().any(|c| c.id == *id))
        {
            Ok(())
        } else {
            Err(PortError::InvalidArgument("unknown category".to_string()))
        }
    }

    /// Soft-deletes the product and takes it out of every cart.
    fn retire_product(&mut self, product_id: Uuid) {
        for stored in self.products.iter_mut().filter(|p| p.product.id == product_id) {
            stored.deleted = true;
        }
        self.cart_items.retain(|item| item.product_id != product_id);
    }

    fn ensure_cart(&self, cart_id: Uuid) -> PortResult<()> {
        if self.carts.iter().any(|cart| cart.id == cart_id) {
            Ok(())
        } else {
            Err(PortError::NotFound(format!("Cart {} not found", cart_id)))
        }
    }
}

const SEED_CATEGORIES: [&str; 5] = ["Books", "Clothing", "Electronics", "Home", "Sports"];

/// In-memory store implementing every persistence port.
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    /// An empty store with the same starter categories as the migrations.
    pub fn new() -> Self {
        let categories = SEED_CATEGORIES
            .iter()
            .map(|name| Category {
                id: Uuid::new_v4(),
                name: name.to_string(),
            })
            .collect();
        Self {
            state: Mutex::new(State {
                categories,
                ..State::default()
            }),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CartStore for InMemoryStore {
    async fn get_or_create_cart(&self, owner: CartOwner) -> PortResult<Cart> {
        let mut state = self.state.lock().await;
        if let Some(cart) = state.cart_for(owner) {
            return Ok(cart.clone());
        }

        let (user_id, session_token) = match owner {
            CartOwner::User(user_id) => (Some(user_id), None),
            CartOwner::Anonymous(token) => (None, Some(token)),
        };
        let cart = Cart {
            id: Uuid::new_v4(),
            user_id,
            session_token,
            created_at: Utc::now(),
        };
        state.carts.push(cart.clone());
        Ok(cart)
    }

    async fn find_cart(&self, owner: CartOwner) -> PortResult<Option<Cart>> {
        let state = self.state.lock().await;
        Ok(state.cart_for(owner).cloned())
    }

    async fn get_cart_lines(&self, cart_id: Uuid) -> PortResult<Vec<CartLine>> {
        let state = self.state.lock().await;
        Ok(state
            .cart_items
            .iter()
            .filter(|item| item.cart_id == cart_id)
            .filter_map(|item| {
                let product = state.live_product(item.product_id)?;
                Some(CartLine {
                    item_id: item.id,
                    product_id: item.product_id,
                    product_name: product.name.clone(),
                    quantity: item.quantity,
                    unit_price: product.price,
                })
            })
            .collect())
    }

    async fn upsert_item(
        &self,
        cart_id: Uuid,
        product_id: Uuid,
        quantity: u32,
    ) -> PortResult<AddedItem> {
        let mut state = self.state.lock().await;
        state.ensure_cart(cart_id)?;
        if state.live_product(product_id).is_none() {
            return Err(PortError::InvalidArgument(format!(
                "unknown product {}",
                product_id
            )));
        }

        if let Some(item) = state
            .cart_items
            .iter_mut()
            .find(|item| item.cart_id == cart_id && item.product_id == product_id)
        {
            item.quantity = item
                .quantity
                .checked_add(quantity)
                .ok_or_else(|| PortError::InvalidArgument("quantity is too large".to_string()))?;
            return Ok(AddedItem {
                item: item.clone(),
                created: false,
            });
        }

        let item = CartLineItem {
            id: Uuid::new_v4(),
            cart_id,
            product_id,
            quantity,
            added_at: Utc::now(),
        };
        state.cart_items.push(item.clone());
        Ok(AddedItem {
            item,
            created: true,
        })
    }

    async fn update_item_quantity(
        &self,
        cart_id: Uuid,
        item_id: Uuid,
        quantity: u32,
    ) -> PortResult<Option<CartLineItem>> {
        let mut state = self.state.lock().await;
        Ok(state
            .cart_items
            .iter_mut()
            .find(|item| item.id == item_id && item.cart_id == cart_id)
            .map(|item| {
                item.quantity = quantity;
                item.clone()
            }))
    }

    async fn delete_item(&self, cart_id: Uuid, item_id: Uuid) -> PortResult<u64> {
        let mut state = self.state.lock().await;
        let before = state.cart_items.len();
        state
            .cart_items
            .retain(|item| !(item.id == item_id && item.cart_id == cart_id));
        Ok((before - state.cart_items.len()) as u64)
    }

    async fn clear_cart(&self, cart_id: Uuid) -> PortResult<u64> {
        let mut state = self.state.lock().await;
        state.ensure_cart(cart_id)?;
        let before = state.cart_items.len();
        state.cart_items.retain(|item| item.cart_id != cart_id);
        Ok((before - state.cart_items.len()) as u64)
    }
}

#[async_trait]
impl CatalogStore for InMemoryStore {
    async fn list_products(&self, category_id: Option<Uuid>) -> PortResult<Vec<Product>> {
        let state = self.state.lock().await;
        Ok(state
            .products
            .iter()
            .rev()
            .filter(|p| !p.deleted)
            .filter(|p| category_id.map_or(true, |id| p.product.category_ids.contains(&id)))
            .map(|p| p.product.clone())
            .collect())
    }

    async fn get_product(&self, product_id: Uuid) -> PortResult<Product> {
        let state = self.state.lock().await;
        state
            .live_product(product_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Product {} not found", product_id)))
    }

    async fn create_product(&self, product: NewProduct) -> PortResult<Product> {
        product.validate()?;
        let mut state = self.state.lock().await;
        if !state.users.iter().any(|u| u.id == product.seller_id) {
            return Err(PortError::InvalidArgument("unknown seller".to_string()));
        }
        state.check_categories(&product.category_ids)?;
        let now = Utc::now();
        let created = Product {
            id: Uuid::new_v4(),
            seller_id: product.seller_id,
            name: product.name.trim().to_string(),
            description: product.description,
            price: product.price,
            quantity_available: product.quantity_available,
            category_ids: normalize_ids(&product.category_ids),
            created_at: now,
            updated_at: now,
        };
        state.products.push(StoredProduct {
            product: created.clone(),
            deleted: false,
        });
        Ok(created)
    }

    async fn update_product(&self, product_id: Uuid, update: ProductUpdate) -> PortResult<Product> {
        update.validate()?;
        let mut state = self.state.lock().await;
        if let Some(category_ids) = &update.category_ids {
            state.check_categories(category_ids)?;
        }
        let stored = state
            .products
            .iter_mut()
            .find(|p| p.product.id == product_id && !p.deleted)
            .ok_or_else(|| PortError::NotFound(format!("Product {} not found", product_id)))?;
        update.apply_to(&mut stored.product);
        stored.product.updated_at = Utc::now();
        Ok(stored.product.clone())
    }

    async fn delete_product(&self, product_id: Uuid) -> PortResult<()> {
        let mut state = self.state.lock().await;
        if state.live_product(product_id).is_none() {
            return Err(PortError::NotFound(format!("Product {} not found", product_id)));
        }
        state.retire_product(product_id);
        Ok(())
    }

    async fn list_categories(&self) -> PortResult<Vec<Category>> {
        let state = self.state.lock().await;
        let mut categories = state.categories.clone();
        categories.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(categories)
    }

    async fn create_category(&self, name: &str) -> PortResult<Category> {
        let name = name.trim();
        if name.is_empty() {
            return Err(PortError::InvalidArgument("category name is required".to_string()));
        }
        let mut state = self.state.lock().await;
        if state.categories.iter().any(|c| c.name == name) {
            return Err(PortError::Conflict("Category already exists".to_string()));
        }
        let category = Category {
            id: Uuid::new_v4(),
            name: name.to_string(),
        };
        state.categories.push(category.clone());
        Ok(category)
    }
}

#[async_trait]
impl PurchaseStore for InMemoryStore {
    async fn commit_checkout(&self, order: CheckoutOrder) -> PortResult<Purchase> {
        let mut state = self.state.lock().await;
        state.ensure_cart(order.cart_id)?;

        let current: Vec<CartLineItem> = state
            .cart_items
            .iter()
            .filter(|item| item.cart_id == order.cart_id)
            .cloned()
            .collect();
        if current.is_empty() {
            return Err(PortError::EmptyCart);
        }
        if !order.matches_items(&current) {
            return Err(PortError::Conflict(format!(
                "cart {} changed since it was priced",
                order.cart_id
            )));
        }

        let purchase_id = Uuid::new_v4();
        let purchase = Purchase {
            id: purchase_id,
            user_id: order.user_id,
            status: PurchaseStatus::Pending,
            total: order.total,
            created_at: Utc::now(),
            items: order
                .lines
                .iter()
                .map(|line| PurchaseLineItem {
                    id: Uuid::new_v4(),
                    purchase_id,
                    product_id: line.product_id,
                    product_name: line.product_name.clone(),
                    quantity: line.quantity,
                    unit_price: line.unit_price,
                })
                .collect(),
        };

        state
            .cart_items
            .retain(|item| !order.lines.iter().any(|line| line.item_id == item.id));
        state.purchases.push(purchase.clone());
        Ok(purchase)
    }

    async fn list_purchases(
        &self,
        user_id: Uuid,
        status: Option<PurchaseStatus>,
    ) -> PortResult<Vec<Purchase>> {
        let state = self.state.lock().await;
        Ok(state
            .purchases
            .iter()
            .rev()
            .filter(|p| p.user_id == user_id)
            .filter(|p| status.map_or(true, |s| p.status == s))
            .cloned()
            .collect())
    }

    async fn get_purchase(&self, user_id: Uuid, purchase_id: Uuid) -> PortResult<Purchase> {
        let state = self.state.lock().await;
        state
            .purchases
            .iter()
            .find(|p| p.id == purchase_id && p.user_id == user_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Purchase {} not found", purchase_id)))
    }

    async fn update_purchase_status(
        &self,
        purchase_id: Uuid,
        status: PurchaseStatus,
    ) -> PortResult<Purchase> {
        let mut state = self.state.lock().await;
        let purchase = state
            .purchases
            .iter_mut()
            .find(|p| p.id == purchase_id)
            .ok_or_else(|| PortError::NotFound(format!("Purchase {} not found", purchase_id)))?;
        purchase.status = status;
        Ok(purchase.clone())
    }
}

#[async_trait]
impl AccountStore for InMemoryStore {
    async fn create_user(&self, user: NewUser) -> PortResult<User> {
        let mut state = self.state.lock().await;
        if state.users.iter().any(|u| u.email == user.email) {
            return Err(PortError::Conflict("Email already used".to_string()));
        }
        let credentials = UserCredentials {
            id: Uuid::new_v4(),
            username: user.username,
            email: user.email,
            role: user.role,
            hashed_password: user.hashed_password,
        };
        state.users.push(credentials.clone());
        Ok(public_user(&credentials))
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        let state = self.state.lock().await;
        state
            .users
            .iter()
            .find(|u| u.email == email)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", email)))
    }

    async fn get_user(&self, user_id: Uuid) -> PortResult<User> {
        let state = self.state.lock().await;
        state
            .users
            .iter()
            .find(|u| u.id == user_id)
            .map(public_user)
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", user_id)))
    }

    async fn update_user(&self, user_id: Uuid, update: UserUpdate) -> PortResult<User> {
        let mut state = self.state.lock().await;
        if let Some(email) = &update.email {
            if state.users.iter().any(|u| u.id != user_id && u.email == *email) {
                return Err(PortError::Conflict("Email already used".to_string()));
            }
        }
        let user = state
            .users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", user_id)))?;
        if let Some(username) = update.username {
            user.username = username;
        }
        if let Some(email) = update.email {
            user.email = email;
        }
        if let Some(hashed_password) = update.hashed_password {
            user.hashed_password = hashed_password;
        }
        Ok(public_user(user))
    }

    async fn delete_user(&self, user_id: Uuid) -> PortResult<()> {
        let mut state = self.state.lock().await;
        let before = state.users.len();
        state.users.retain(|u| u.id != user_id);
        if state.users.len() == before {
            return Err(PortError::NotFound(format!("User {} not found", user_id)));
        }

        state.sessions.retain(|_, (owner, _)| *owner != user_id);
        if let Some(cart_id) = state.cart_for(CartOwner::User(user_id)).map(|c| c.id) {
            state.carts.retain(|cart| cart.id != cart_id);
            state.cart_items.retain(|item| item.cart_id != cart_id);
        }
        let listed: Vec<Uuid> = state
            .products
            .iter()
            .filter(|p| p.product.seller_id == user_id && !p.deleted)
            .map(|p| p.product.id)
            .collect();
        for product_id in listed {
            state.retire_product(product_id);
        }
        Ok(())
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        state
            .sessions
            .retain(|_, (owner, expiry)| *owner != user_id || *expiry > now);
        state
            .sessions
            .insert(session_id.to_string(), (user_id, expires_at));
        Ok(())
    }

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<AuthUser> {
        let mut state = self.state.lock().await;
        let (user_id, expires_at) = state
            .sessions
            .get(session_id)
            .copied()
            .ok_or(PortError::Unauthorized)?;
        if expires_at <= Utc::now() {
            state.sessions.remove(session_id);
            return Err(PortError::Unauthorized);
        }
        let user = state
            .users
            .iter()
            .find(|u| u.id == user_id)
            .ok_or(PortError::Unauthorized)?;
        Ok(AuthUser {
            id: user.id,
            role: user.role,
        })
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        let mut state = self.state.lock().await;
        state.sessions.remove(session_id);
        Ok(())
    }
}

fn public_user(credentials: &UserCredentials) -> User {
    User {
        id: credentials.id,
        username: credentials.username.clone(),
        email: credentials.email.clone(),
        role: credentials.role,
    }
}
