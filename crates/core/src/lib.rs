//! `stockwise-core` — identifiers, the domain error taxonomy and status lifecycle checks.
//!
//! Pure domain primitives only; nothing in here touches storage or the network.

pub mod error;
pub mod id;
pub mod lifecycle;

pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, TenantId, UserId};
pub use lifecycle::{Lifecycle, StatusChange, TransitionPolicy, check_transition};
