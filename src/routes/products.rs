use axum::{
    routing::{get, post},
    Router,
};
use crate::handlers::product::{
    batch_delete_products, create_product, delete_all_products, delete_product, get_product,
    get_products, update_product,
};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/products", get(get_products).post(create_product).delete(delete_all_products))
        .route("/products/batch-delete", post(batch_delete_products))
        .route("/products/{id}", get(get_product).put(update_product).delete(delete_product))
}
