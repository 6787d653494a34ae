use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
};

use stockwise_sales::{OrderStatus, PlaceOrder, SalesOrderId};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/", post(place_order).get(list_orders))
        .route("/:id", get(get_order))
        .route("/:id/cancel", post(cancel_order))
        .route("/:id/status", patch(update_status))
}

fn order_id(raw: &str) -> Result<SalesOrderId, axum::response::Response> {
    dto::parse_id(raw).map(SalesOrderId::new)
}

pub async fn place_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<PlaceOrder>,
) -> axum::response::Response {
    match services
        .orders
        .place_order(tenant.tenant_id(), principal.user_id(), body)
        .await
    {
        Ok(order) => (StatusCode::CREATED, Json(order)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn list_orders(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Query(query): Query<dto::StatusQuery>,
) -> axum::response::Response {
    let status = match dto::parse_optional_status::<OrderStatus>(query.status.as_deref()) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    match services.orders.list_orders(tenant.tenant_id(), status).await {
        Ok(orders) => Json(orders).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn get_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.orders.get_order(tenant.tenant_id(), id).await {
        Ok(order) => Json(order).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn cancel_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .orders
        .cancel_order(tenant.tenant_id(), principal.user_id(), id)
        .await
    {
        Ok(order) => Json(order).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn update_status(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::StatusRequest>,
) -> axum::response::Response {
    let id = match order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let status = match dto::parse_status::<OrderStatus>(&body.status) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    match services
        .orders
        .update_order_status(tenant.tenant_id(), id, status)
        .await
    {
        Ok(update) => Json(dto::StatusUpdateResponse::from(update)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}
