use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use stockwise_catalog::{NewProduct, ProductFilter, ProductId, ProductUpdate, Sku};
use stockwise_inventory::StockAdjustment;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_product).get(list_products))
        .route("/bulk-create", post(bulk_create_products))
        .route("/low-stock", get(low_stock))
        .route("/movements", get(movements))
        .route("/stock-adjustment", post(adjust_stock))
        .route("/reconcile/:sku", get(reconcile))
        .route("/:id", get(get_product).put(update_product))
}

pub async fn create_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<NewProduct>,
) -> axum::response::Response {
    match services
        .catalog
        .create_product(tenant.tenant_id(), principal.user_id(), body)
        .await
    {
        Ok(product) => (StatusCode::CREATED, Json(product)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn bulk_create_products(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::BulkCreateProductsRequest>,
) -> axum::response::Response {
    match services
        .catalog
        .bulk_create_products(tenant.tenant_id(), principal.user_id(), body.products)
        .await
    {
        Ok(products) => (StatusCode::CREATED, Json(products)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn list_products(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Query(filter): Query<ProductFilter>,
) -> axum::response::Response {
    match services.catalog.list_products(tenant.tenant_id(), &filter).await {
        Ok(products) => Json(products).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn get_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match dto::parse_id(&id) {
        Ok(v) => ProductId::new(v),
        Err(resp) => return resp,
    };

    match services.catalog.get_product(tenant.tenant_id(), id).await {
        Ok(product) => Json(product).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn update_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<ProductUpdate>,
) -> axum::response::Response {
    let id = match dto::parse_id(&id) {
        Ok(v) => ProductId::new(v),
        Err(resp) => return resp,
    };

    match services
        .catalog
        .update_product(tenant.tenant_id(), principal.user_id(), id, body)
        .await
    {
        Ok(product) => Json(product).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn adjust_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<StockAdjustment>,
) -> axum::response::Response {
    match services
        .catalog
        .adjust_stock(tenant.tenant_id(), principal.user_id(), body)
        .await
    {
        Ok(movement) => (StatusCode::CREATED, Json(movement)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn low_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
) -> axum::response::Response {
    match services.low_stock.alerts(tenant.tenant_id()).await {
        Ok(alerts) => Json(alerts).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn movements(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Query(query): Query<dto::MovementsQuery>,
) -> axum::response::Response {
    let filter = match query.into_filter() {
        Ok(f) => f,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match services.catalog.movements(tenant.tenant_id(), &filter).await {
        Ok(movements) => Json(movements).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn reconcile(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(sku): Path<String>,
) -> axum::response::Response {
    let sku = match Sku::parse(&sku) {
        Ok(s) => s,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match services.catalog.reconcile(tenant.tenant_id(), &sku).await {
        Ok(result) => Json(result).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}
