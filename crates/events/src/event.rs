use chrono::{DateTime, Utc};

/// A published fact about a committed change.
///
/// Events are immutable and carry a stable topic name consumers subscribe on.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable topic name (e.g. "order-created").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// Business time of the change the event describes.
    fn occurred_at(&self) -> DateTime<Utc>;
}
