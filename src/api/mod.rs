//! API layer
//!
//! HTTP handlers for:
//! - Records (owner registration and ownership-token mutations)
//! - ActivityPub (for federation)
//! - WebFinger
//! - Metrics (Prometheus)

mod activitypub;
pub mod metrics;
mod records;
mod wellknown;

pub use activitypub::activitypub_router;
pub use metrics::metrics_router;
pub use records::{EMAIL_HEADER, EntryView, SetEntryRequest, records_router};
pub use wellknown::wellknown_router;
