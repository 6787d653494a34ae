use axum::{Router, routing::get};

pub mod orders;
pub mod products;
pub mod purchase_orders;
pub mod system;

/// Router for all authenticated (tenant-scoped) endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/stream", get(system::stream))
        .nest("/products", products::router())
        .nest("/orders", orders::router())
        .nest("/purchase-orders", purchase_orders::router())
}
