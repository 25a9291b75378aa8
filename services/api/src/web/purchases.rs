//! services/api/src/web/purchases.rs
//!
//! Checkout and purchase history endpoints. Every route here requires a signed-in user.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use storefront_core::domain::{AuthUser, Purchase, PurchaseLineItem, Role};
use uuid::Uuid;

use crate::web::auth::require_role;
use crate::web::errors::{reject, HandlerError};
use crate::web::state::AppState;

//=========================================================================================
// Response Types
//=========================================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: &'static str,
    pub total: Decimal,
    pub created_at: DateTime<Utc>,
    pub items: Vec<PurchaseItemResponse>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseItemResponse {
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
}

impl From<PurchaseLineItem> for PurchaseItemResponse {
    fn from(item: PurchaseLineItem) -> Self {
        Self {
            id: item.id,
            product_id: item.product_id,
            product_name: item.product_name,
            quantity: item.quantity,
            unit_price: item.unit_price,
        }
    }
}

impl From<Purchase> for PurchaseResponse {
    fn from(p: Purchase) -> Self {
        Self {
            id: p.id,
            user_id: p.user_id,
            status: p.status.as_str(),
            total: p.total,
            created_at: p.created_at,
            items: p.items.into_iter().map(PurchaseItemResponse::from).collect(),
        }
    }
}

fn list_response(purchases: Vec<Purchase>) -> Json<Vec<PurchaseResponse>> {
    Json(purchases.into_iter().map(PurchaseResponse::from).collect())
}

//=========================================================================================
// Handlers
//=========================================================================================

/// POST /purchase - Check out the caller's whole cart
pub async fn create_purchase_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, HandlerError> {
    let purchase = state.checkout.checkout(user.id).await.map_err(reject)?;
    Ok((StatusCode::CREATED, Json(PurchaseResponse::from(purchase))))
}

/// GET /purchase - The caller's purchases, newest first
pub async fn list_purchases_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, HandlerError> {
    let purchases = state
        .purchases
        .list_by_owner(user.id)
        .await
        .map_err(reject)?;
    Ok(list_response(purchases))
}

/// GET /purchase/status/{status} - `pending` or `completed`, in any case
pub async fn list_purchases_by_status_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(status): Path<String>,
) -> Result<impl IntoResponse, HandlerError> {
    let purchases = state
        .purchases
        .list_by_owner_and_status(user.id, &status)
        .await
        .map_err(reject)?;
    Ok(list_response(purchases))
}

/// GET /purchase/{purchase_id} - Someone else's purchase reads as missing
pub async fn get_purchase_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(purchase_id): Path<Uuid>,
) -> Result<impl IntoResponse, HandlerError> {
    let purchase = state
        .purchases
        .get_by_id(user.id, purchase_id)
        .await
        .map_err(reject)?;
    Ok(Json(PurchaseResponse::from(purchase)))
}

/// POST /purchase/{purchase_id}/complete - Admin only
pub async fn complete_purchase_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(purchase_id): Path<Uuid>,
) -> Result<impl IntoResponse, HandlerError> {
    require_role(&user, &[Role::Admin])?;
    let purchase = state
        .purchases
        .mark_completed(purchase_id)
        .await
        .map_err(reject)?;
    Ok(Json(PurchaseResponse::from(purchase)))
}
