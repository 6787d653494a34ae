use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
};

use stockwise_purchasing::{CreatePurchaseOrder, PurchaseOrderId, PurchaseOrderStatus};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_purchase_order).get(list_purchase_orders))
        .route("/:id", get(get_purchase_order))
        .route("/:id/status", put(update_status))
        .route("/:id/receive", post(receive))
}

fn po_id(raw: &str) -> Result<PurchaseOrderId, axum::response::Response> {
    dto::parse_id(raw).map(PurchaseOrderId::new)
}

pub async fn create_purchase_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Json(body): Json<CreatePurchaseOrder>,
) -> axum::response::Response {
    match services
        .orders
        .create_purchase_order(tenant.tenant_id(), body)
        .await
    {
        Ok(po) => (StatusCode::CREATED, Json(po)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn list_purchase_orders(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Query(query): Query<dto::StatusQuery>,
) -> axum::response::Response {
    let status =
        match dto::parse_optional_status::<PurchaseOrderStatus>(query.status.as_deref()) {
            Ok(s) => s,
            Err(resp) => return resp,
        };

    match services
        .orders
        .list_purchase_orders(tenant.tenant_id(), status)
        .await
    {
        Ok(pos) => Json(pos).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn get_purchase_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match po_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.orders.get_purchase_order(tenant.tenant_id(), id).await {
        Ok(po) => Json(po).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn update_status(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::StatusRequest>,
) -> axum::response::Response {
    let id = match po_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let status = match dto::parse_status::<PurchaseOrderStatus>(&body.status) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    match services
        .orders
        .update_purchase_order_status(tenant.tenant_id(), id, status)
        .await
    {
        Ok(update) => Json(dto::StatusUpdateResponse::from(update)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn receive(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::ReceiveRequest>,
) -> axum::response::Response {
    let id = match po_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .orders
        .receive_purchase_order(tenant.tenant_id(), principal.user_id(), id, body.items)
        .await
    {
        Ok(po) => Json(po).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}
