// src/handlers/product.rs
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use tracing::{error, info, instrument};

use crate::dtos::product::{
    CreateProductRequest, DeletedResponse, ProductListParams, ProductListResponse,
    ProductResponse, UpdateProductRequest,
};
use crate::error::AppError;
use crate::import::normalizer::{MAX_NAME_LEN, MAX_SKU_LEN};
use crate::models::product::{NewProduct, ProductChanges, ProductQuery};
use crate::state::AppState;
use crate::store::StoreError;

const MAX_PAGE_SIZE: u32 = 100;

fn required(value: &str, field: &str, max: usize) -> Result<String, AppError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::validation(format!("{field} is required")));
    }
    if value.chars().count() > max {
        return Err(AppError::validation(format!("{field} must be at most {max} characters")));
    }
    Ok(value.to_string())
}

fn optional_text(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

// GET /products - Paginated list with optional search over sku, name and description
#[instrument(skip(state))]
pub async fn get_products(
    State(state): State<AppState>,
    Query(params): Query<ProductListParams>,
) -> Result<Json<ProductListResponse>, AppError> {
    let query = ProductQuery {
        search: optional_text(params.search),
        page: params.page.unwrap_or(1).max(1),
        limit: params.limit.unwrap_or(20).clamp(1, MAX_PAGE_SIZE),
    };

    let (products, total) = state.catalog.list_products(&query).await.map_err(|e| {
        error!(?e, "Failed to fetch products");
        e
    })?;

    Ok(Json(ProductListResponse {
        data: products.into_iter().map(ProductResponse::from).collect(),
        total,
        page: query.page,
        limit: query.limit,
    }))
}

// GET /products/{id} - Get single product
#[instrument(skip(state), fields(id))]
pub async fn get_product(
    Path(id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<ProductResponse>, AppError> {
    let product = state
        .catalog
        .get_product(id)
        .await?
        .ok_or_else(|| AppError::not_found("Product not found"))?;

    Ok(Json(ProductResponse::from(product)))
}

// POST /products - Create new product
#[instrument(skip(state, payload))]
pub async fn create_product(
    State(state): State<AppState>,
    Json(payload): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<ProductResponse>), AppError> {
    let product = NewProduct {
        sku: required(&payload.sku, "sku", MAX_SKU_LEN)?,
        name: required(&payload.name, "name", MAX_NAME_LEN)?,
        description: optional_text(payload.description),
        is_active: payload.is_active,
    };

    let created = match state.catalog.create_product(&product).await {
        Ok(created) => created,
        Err(StoreError::Conflict(_)) => {
            return Err(AppError::conflict(format!(
                "Product with SKU '{}' already exists",
                product.sku
            )))
        }
        Err(e) => {
            error!(?e, "Failed to create product");
            return Err(e.into());
        }
    };

    info!(id = created.id, sku = %created.sku, "Product created");
    Ok((StatusCode::CREATED, Json(ProductResponse::from(created))))
}

// PUT /products/{id} - Update name, description or active flag
#[instrument(skip(state, payload), fields(id))]
pub async fn update_product(
    Path(id): Path<i64>,
    State(state): State<AppState>,
    Json(payload): Json<UpdateProductRequest>,
) -> Result<Json<ProductResponse>, AppError> {
    let changes = ProductChanges {
        name: payload
            .name
            .as_deref()
            .map(|name| required(name, "name", MAX_NAME_LEN))
            .transpose()?,
        description: payload.description.map(|d| d.trim().to_string()),
        is_active: payload.is_active,
    };

    let product = state
        .catalog
        .update_product(id, &changes)
        .await?
        .ok_or_else(|| AppError::not_found("Product not found"))?;

    Ok(Json(ProductResponse::from(product)))
}

// DELETE /products/{id} - Delete one product
#[instrument(skip(state), fields(id))]
pub async fn delete_product(
    Path(id): Path<i64>,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    if state.catalog.delete_product(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found("Product not found"))
    }
}

#[derive(Debug, Deserialize)]
pub struct BatchDeleteRequest {
    pub ids: Vec<i64>,
}

// POST /products/batch-delete - Delete the listed products
#[instrument(skip(state, payload))]
pub async fn batch_delete_products(
    State(state): State<AppState>,
    Json(payload): Json<BatchDeleteRequest>,
) -> Result<Json<DeletedResponse>, AppError> {
    if payload.ids.is_empty() {
        return Err(AppError::validation("No product IDs provided"));
    }

    let deleted_count = state.catalog.delete_products(&payload.ids).await?;
    info!(requested = payload.ids.len(), deleted_count, "Batch delete finished");

    Ok(Json(DeletedResponse {
        status: "success",
        deleted_count,
    }))
}

// DELETE /products - Delete every product
#[instrument(skip(state))]
pub async fn delete_all_products(
    State(state): State<AppState>,
) -> Result<Json<DeletedResponse>, AppError> {
    let deleted_count = state.catalog.delete_all_products().await?;
    info!(deleted_count, "All products deleted");

    Ok(Json(DeletedResponse {
        status: "success",
        deleted_count,
    }))
}
