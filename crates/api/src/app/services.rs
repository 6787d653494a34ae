//! Service wiring: one ledger store shared by the catalog, the order
//! coordinator and the low-stock projection, plus the realtime feed behind
//! `/stream`.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use tokio::sync::broadcast;
use tokio_stream::{StreamExt, wrappers::BroadcastStream};

use stockwise_core::TenantId;
use stockwise_events::{EventBus, InMemoryEventBus};
use stockwise_infra::{
    AppConfig, CatalogService, LedgerStore, LowStockProjection, NotificationEnvelope,
    OrderCoordinator, StoreError, store,
};

pub type SharedStore = Arc<dyn LedgerStore>;
pub type SharedBus = Arc<InMemoryEventBus<NotificationEnvelope>>;

/// Realtime message broadcasted via SSE.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RealtimeMessage {
    pub tenant_id: TenantId,
    pub topic: String,
    pub payload: serde_json::Value,
}

pub struct AppServices {
    pub catalog: CatalogService<SharedStore>,
    pub orders: OrderCoordinator<SharedStore, SharedBus>,
    pub low_stock: LowStockProjection<SharedStore>,
    realtime_tx: broadcast::Sender<RealtimeMessage>,
}

impl AppServices {
    pub fn realtime_tx(&self) -> &broadcast::Sender<RealtimeMessage> {
        &self.realtime_tx
    }
}

pub async fn build_services(config: &AppConfig) -> Result<AppServices, StoreError> {
    let store: SharedStore = store::open(&config.storage, config.lock_timeout).await?;
    let bus: SharedBus = Arc::new(InMemoryEventBus::new());

    // Realtime channel (SSE): lossy broadcast, tenant-filtered per connection.
    let (realtime_tx, _realtime_rx) =
        broadcast::channel::<RealtimeMessage>(config.notification_buffer);

    // Background forwarder: bus -> realtime channel. Ends when the bus is dropped.
    {
        let sub = bus.subscribe();
        let realtime_tx = realtime_tx.clone();
        tokio::task::spawn_blocking(move || {
            while let Ok(envelope) = sub.recv() {
                // No receivers is fine; nobody is streaming right now.
                let _ = realtime_tx.send(RealtimeMessage {
                    tenant_id: envelope.tenant_id(),
                    topic: envelope.event_type().to_string(),
                    payload: envelope.payload().to_json(),
                });
            }
            tracing::debug!("notification bus closed; realtime forwarder stopped");
        });
    }

    tracing::info!(
        policy = ?config.transition_policy,
        "ledger services ready"
    );

    Ok(AppServices {
        catalog: CatalogService::new(store.clone()),
        orders: OrderCoordinator::new(store.clone(), bus, config.transition_policy),
        low_stock: LowStockProjection::new(store),
        realtime_tx,
    })
}

/// Build an SSE stream for a tenant (used by `/stream`).
pub fn tenant_sse_stream(
    services: Arc<AppServices>,
    tenant_id: TenantId,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = services.realtime_tx().subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |msg| match msg {
        Ok(m) if m.tenant_id == tenant_id => {
            let data = serde_json::to_string(&m.payload).unwrap_or_else(|_| "{}".to_string());
            Some(Ok(SseEvent::default().event(m.topic).data(data)))
        }
        // Lagged receivers skip what they missed.
        _ => None,
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
