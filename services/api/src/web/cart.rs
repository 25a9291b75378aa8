//! services/api/src/web/cart.rs
//!
//! Cart endpoints. Signed-in users get their account cart; anonymous visitors get a
//! cart keyed by the `cart_session` cookie, which is issued on first use.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use storefront_core::domain::{AuthUser, CartLine, CartLineItem, CartOwner, CartView, SessionToken};
use storefront_core::ports::PortError;
use uuid::Uuid;

use crate::config::Config;
use crate::web::cookies::{build_cookie, read_cookie, CART_COOKIE};
use crate::web::errors::{bad_json, quantity_from_request, reject, HandlerError};
use crate::web::state::AppState;

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddItemRequest {
    pub product_id: Uuid,
    pub quantity: i64,
}

#[derive(Deserialize)]
pub struct UpdateQuantityRequest {
    pub quantity: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartResponse {
    pub id: Uuid,
    pub items: Vec<CartLineResponse>,
    pub subtotal: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLineResponse {
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItemResponse {
    pub id: Uuid,
    pub cart_id: Uuid,
    pub product_id: Uuid,
    pub quantity: u32,
    pub added_at: DateTime<Utc>,
}

impl From<CartLineItem> for CartItemResponse {
    fn from(item: CartLineItem) -> Self {
        Self {
            id: item.id,
            cart_id: item.cart_id,
            product_id: item.product_id,
            quantity: item.quantity,
            added_at: item.added_at,
        }
    }
}

fn too_large() -> HandlerError {
    reject(PortError::InvalidArgument("cart total is too large".to_string()))
}

fn line_response(line: CartLine) -> Result<CartLineResponse, HandlerError> {
    let line_total = line.line_total().ok_or_else(too_large)?;
    Ok(CartLineResponse {
        id: line.item_id,
        product_id: line.product_id,
        product_name: line.product_name,
        quantity: line.quantity,
        unit_price: line.unit_price,
        line_total,
    })
}

fn cart_response(view: CartView) -> Result<CartResponse, HandlerError> {
    let subtotal = view.subtotal().ok_or_else(too_large)?;
    Ok(CartResponse {
        id: view.cart.id,
        created_at: view.cart.created_at,
        items: view
            .lines
            .into_iter()
            .map(line_response)
            .collect::<Result<_, _>>()?,
        subtotal,
    })
}

//=========================================================================================
// Owner Resolution
//=========================================================================================

struct ResolvedOwner {
    owner: CartOwner,
    /// Set when the visitor had no usable `cart_session` cookie and a token was minted.
    minted: Option<SessionToken>,
}

fn resolve_owner(user: Option<AuthUser>, headers: &HeaderMap) -> ResolvedOwner {
    if let Some(user) = user {
        return ResolvedOwner {
            owner: CartOwner::User(user.id),
            minted: None,
        };
    }

    match read_cookie(headers, CART_COOKIE).and_then(|raw| raw.parse::<SessionToken>().ok()) {
        Some(token) => ResolvedOwner {
            owner: CartOwner::Anonymous(token),
            minted: None,
        },
        None => {
            let token = SessionToken::generate();
            ResolvedOwner {
                owner: CartOwner::Anonymous(token),
                minted: Some(token),
            }
        }
    }
}

/// Attaches the `cart_session` cookie when a new anonymous token was minted.
fn with_cart_cookie(mut response: Response, minted: Option<SessionToken>, config: &Config) -> Response {
    if let Some(token) = minted {
        let cookie = build_cookie(
            CART_COOKIE,
            &token.to_string(),
            Duration::days(config.auth_session_days).num_seconds(),
            config.secure_cookies,
        );
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
    }
    response
}

//=========================================================================================
// Handlers
//=========================================================================================

/// GET /cart - The caller's cart, created empty on first access
pub async fn get_cart_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<Option<AuthUser>>,
    headers: HeaderMap,
) -> Result<Response, HandlerError> {
    let resolved = resolve_owner(user, &headers);
    let view = state.carts.get_or_create(resolved.owner).await.map_err(reject)?;
    let response = Json(cart_response(view)?).into_response();
    Ok(with_cart_cookie(response, resolved.minted, &state.config))
}

/// POST /cart/items - Add a product, merging into an existing line for it
///
/// Responds 201 when a new line was created and 200 when quantities were merged.
pub async fn add_item_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<Option<AuthUser>>,
    headers: HeaderMap,
    payload: Result<Json<AddItemRequest>, JsonRejection>,
) -> Result<Response, HandlerError> {
    let Json(req) = payload.map_err(bad_json)?;
    let quantity = quantity_from_request(req.quantity)?;

    let resolved = resolve_owner(user, &headers);
    let view = state.carts.get_or_create(resolved.owner).await.map_err(reject)?;
    let added = state
        .carts
        .add_item(&view.cart, req.product_id, quantity)
        .await
        .map_err(reject)?;

    let status = if added.created { StatusCode::CREATED } else { StatusCode::OK };
    let response = (status, Json(CartItemResponse::from(added.item))).into_response();
    Ok(with_cart_cookie(response, resolved.minted, &state.config))
}

/// PUT /cart/items/{item_id} - Set an item's quantity; zero removes it (204)
pub async fn update_item_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<Option<AuthUser>>,
    Path(item_id): Path<Uuid>,
    headers: HeaderMap,
    payload: Result<Json<UpdateQuantityRequest>, JsonRejection>,
) -> Result<Response, HandlerError> {
    let Json(req) = payload.map_err(bad_json)?;
    let quantity = quantity_from_request(req.quantity)?;

    let resolved = resolve_owner(user, &headers);
    let view = state.carts.find(resolved.owner).await.map_err(reject)?;
    let updated = state
        .carts
        .set_item_quantity(&view.cart, item_id, quantity)
        .await
        .map_err(reject)?;

    Ok(match updated {
        Some(item) => Json(CartItemResponse::from(item)).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

/// DELETE /cart/items/{item_id} - Remove one line from the cart
pub async fn remove_item_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<Option<AuthUser>>,
    Path(item_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<StatusCode, HandlerError> {
    let resolved = resolve_owner(user, &headers);
    let view = state.carts.find(resolved.owner).await.map_err(reject)?;
    state
        .carts
        .remove_item(&view.cart, item_id)
        .await
        .map_err(reject)?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /cart - Remove every line; the cart itself is kept
pub async fn clear_cart_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<Option<AuthUser>>,
    headers: HeaderMap,
) -> Result<StatusCode, HandlerError> {
    let resolved = resolve_owner(user, &headers);
    let view = state.carts.find(resolved.owner).await.map_err(reject)?;
    state.carts.clear(&view.cart).await.map_err(reject)?;
    Ok(StatusCode::NO_CONTENT)
}
