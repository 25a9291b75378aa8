pub mod auth;
pub mod cart;
pub mod catalog;
pub mod cookies;
pub mod errors;
pub mod middleware;
pub mod purchases;
pub mod state;

use axum::{
    middleware as axum_middleware,
    routing::{get, post, put},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::web::auth::{
    delete_me_handler, login_handler, logout_handler, me_handler, signup_handler,
    update_me_handler,
};
use crate::web::cart::{
    add_item_handler, clear_cart_handler, get_cart_handler, remove_item_handler,
    update_item_handler,
};
use crate::web::catalog::{
    create_category_handler, create_product_handler, delete_product_handler, get_product_handler,
    list_categories_handler, list_products_handler, update_product_handler,
};
use crate::web::middleware::{require_auth, resolve_auth};
use crate::web::purchases::{
    complete_purchase_handler, create_purchase_handler, get_purchase_handler,
    list_purchases_by_status_handler, list_purchases_handler,
};
use crate::web::state::AppState;

/// GET /health
pub async fn health_handler() -> Json<Value> {
    Json(json!({ "health": "api is up and healthy" }))
}

/// Builds the complete HTTP router on top of the shared state.
pub fn router(state: Arc<AppState>) -> Router {
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/auth/signup", post(signup_handler))
        .route("/auth/login", post(login_handler))
        .route("/auth/logout", post(logout_handler))
        .route("/products", get(list_products_handler))
        .route("/products/{product_id}", get(get_product_handler))
        .route("/categories", get(list_categories_handler));

    // Cart routes (signed-in or anonymous)
    let cart_routes = Router::new()
        .route("/cart", get(get_cart_handler).delete(clear_cart_handler))
        .route("/cart/items", post(add_item_handler))
        .route(
            "/cart/items/{item_id}",
            put(update_item_handler).delete(remove_item_handler),
        )
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            resolve_auth,
        ));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route(
            "/auth/me",
            get(me_handler).put(update_me_handler).delete(delete_me_handler),
        )
        .route(
            "/purchase",
            post(create_purchase_handler).get(list_purchases_handler),
        )
        .route(
            "/purchase/status/{status}",
            get(list_purchases_by_status_handler),
        )
        .route("/purchase/{purchase_id}", get(get_purchase_handler))
        .route(
            "/purchase/{purchase_id}/complete",
            post(complete_purchase_handler),
        )
        .route("/products", post(create_product_handler))
        .route("/categories", post(create_category_handler))
        .route(
            "/products/{product_id}",
            put(update_product_handler).delete(delete_product_handler),
        )
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            require_auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(cart_routes)
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
