//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use std::sync::Arc;
use storefront_core::ports::{AccountStore, CartStore, CatalogStore, PurchaseStore};
use storefront_core::{CartService, CheckoutEngine, PurchaseHistory};

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub accounts: Arc<dyn AccountStore>,
    pub catalog: Arc<dyn CatalogStore>,
    pub carts: CartService,
    pub checkout: CheckoutEngine,
    pub purchases: PurchaseHistory,
}

impl AppState {
    /// Wires the core services on top of a single store that implements every port.
    pub fn new<S>(store: Arc<S>, config: Arc<Config>) -> Self
    where
        S: AccountStore + CartStore + CatalogStore + PurchaseStore + 'static,
    {
        let accounts: Arc<dyn AccountStore> = store.clone();
        let catalog: Arc<dyn CatalogStore> = store.clone();
        let carts: Arc<dyn CartStore> = store.clone();
        let purchases: Arc<dyn PurchaseStore> = store;

        Self {
            config,
            accounts,
            catalog: catalog.clone(),
            carts: CartService::new(carts.clone(), catalog),
            checkout: CheckoutEngine::new(carts, purchases.clone()),
            purchases: PurchaseHistory::new(purchases),
        }
    }
}
