//! services/api/src/web/catalog.rs
//!
//! Product catalog endpoints. Reads are public; writes are limited to sellers (on
//! their own products) and admins.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use storefront_core::domain::{AuthUser, Category, NewProduct, Product, ProductUpdate, Role};
use storefront_core::ports::PortError;
use tracing::info;
use uuid::Uuid;

use crate::web::auth::require_role;
use crate::web::errors::{bad_json, quantity_from_request, reject, HandlerError};
use crate::web::state::AppState;

const CATALOG_WRITERS: &[Role] = &[Role::Seller, Role::Admin];

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProductRequest {
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    #[serde(default)]
    pub quantity_available: i64,
    #[serde(default)]
    pub category_ids: Vec<Uuid>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProductRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Decimal>,
    pub quantity_available: Option<i64>,
    /// Replaces the product's categories when present.
    pub category_ids: Option<Vec<Uuid>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductFilter {
    pub category_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct CreateCategoryRequest {
    pub name: String,
}

#[derive(Serialize)]
pub struct CategoryResponse {
    pub id: Uuid,
    pub name: String,
}

impl From<Category> for CategoryResponse {
    fn from(c: Category) -> Self {
        Self {
            id: c.id,
            name: c.name,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductResponse {
    pub id: Uuid,
    pub seller_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub quantity_available: u32,
    pub category_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Product> for ProductResponse {
    fn from(p: Product) -> Self {
        Self {
            id: p.id,
            seller_id: p.seller_id,
            name: p.name,
            description: p.description,
            price: p.price,
            quantity_available: p.quantity_available,
            category_ids: p.category_ids,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

//=========================================================================================
// Handlers
//=========================================================================================

/// GET /products - Optionally narrowed with `?categoryId=`
pub async fn list_products_handler(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<ProductFilter>,
) -> Result<impl IntoResponse, HandlerError> {
    let products = state
        .catalog
        .list_products(filter.category_id)
        .await
        .map_err(reject)?;
    Ok(Json(
        products
            .into_iter()
            .map(ProductResponse::from)
            .collect::<Vec<_>>(),
    ))
}

/// GET /products/{product_id}
pub async fn get_product_handler(
    State(state): State<Arc<AppState>>,
    Path(product_id): Path<Uuid>,
) -> Result<impl IntoResponse, HandlerError> {
    let product = state
        .catalog
        .get_product(product_id)
        .await
        .map_err(reject)?;
    Ok(Json(ProductResponse::from(product)))
}

/// POST /products - Seller or admin; the caller becomes the product's seller
pub async fn create_product_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<CreateProductRequest>, JsonRejection>,
) -> Result<impl IntoResponse, HandlerError> {
    require_role(&user, CATALOG_WRITERS)?;
    let Json(req) = payload.map_err(bad_json)?;

    let new_product = NewProduct {
        seller_id: user.id,
        name: req.name.trim().to_string(),
        description: req.description,
        price: req.price,
        quantity_available: quantity_from_request(req.quantity_available)?,
        category_ids: req.category_ids,
    };
    new_product.validate().map_err(reject)?;

    let product = state
        .catalog
        .create_product(new_product)
        .await
        .map_err(reject)?;
    info!(product_id = %product.id, seller_id = %user.id, "product created");

    Ok((StatusCode::CREATED, Json(ProductResponse::from(product))))
}

/// PUT /products/{product_id} - Partial update
pub async fn update_product_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(product_id): Path<Uuid>,
    payload: Result<Json<UpdateProductRequest>, JsonRejection>,
) -> Result<impl IntoResponse, HandlerError> {
    require_role(&user, CATALOG_WRITERS)?;
    let Json(req) = payload.map_err(bad_json)?;
    ensure_can_edit(&state, &user, product_id).await?;

    let update = ProductUpdate {
        name: req.name,
        description: req.description,
        price: req.price,
        quantity_available: req.quantity_available.map(quantity_from_request).transpose()?,
        category_ids: req.category_ids,
    };
    update.validate().map_err(reject)?;

    let product = state
        .catalog
        .update_product(product_id, update)
        .await
        .map_err(reject)?;
    Ok(Json(ProductResponse::from(product)))
}

/// DELETE /products/{product_id} - Removes the product from the catalog and from every cart
///
/// Past purchases keep their own copy of the name and price.
pub async fn delete_product_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(product_id): Path<Uuid>,
) -> Result<StatusCode, HandlerError> {
    require_role(&user, CATALOG_WRITERS)?;
    ensure_can_edit(&state, &user, product_id).await?;

    state
        .catalog
        .delete_product(product_id)
        .await
        .map_err(reject)?;
    info!(product_id = %product_id, user_id = %user.id, "product deleted");

    Ok(StatusCode::NO_CONTENT)
}

/// GET /categories
pub async fn list_categories_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, HandlerError> {
    let categories = state.catalog.list_categories().await.map_err(reject)?;
    Ok(Json(
        categories
            .into_iter()
            .map(CategoryResponse::from)
            .collect::<Vec<_>>(),
    ))
}

/// POST /categories - Admin only
pub async fn create_category_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<CreateCategoryRequest>, JsonRejection>,
) -> Result<impl IntoResponse, HandlerError> {
    require_role(&user, &[Role::Admin])?;
    let Json(req) = payload.map_err(bad_json)?;
    if req.name.trim().is_empty() {
        return Err(reject(PortError::InvalidArgument(
            "category name is required".to_string(),
        )));
    }

    let category = state
        .catalog
        .create_category(&req.name)
        .await
        .map_err(reject)?;
    info!(category_id = %category.id, "category created");

    Ok((StatusCode::CREATED, Json(CategoryResponse::from(category))))
}

/// Sellers may only touch their own products. Someone else's product reads as missing.
async fn ensure_can_edit(
    state: &AppState,
    user: &AuthUser,
    product_id: Uuid,
) -> Result<(), HandlerError> {
    let product = state
        .catalog
        .get_product(product_id)
        .await
        .map_err(reject)?;
    if user.role != Role::Admin && product.seller_id != user.id {
        return Err(reject(PortError::NotFound(format!(
            "Product {} not found",
            product_id
        ))));
    }
    Ok(())
}
