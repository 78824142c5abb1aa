//! HTTP surface for herald.
//!
//! - **Webhooks**: WhatsApp subscription handshake and delivery receipts,
//!   Twilio status callbacks
//! - **Campaign control**: schedule, cancel, reschedule, pause, resume
//! - **Health**: liveness probe
//!
//! Built on Axum 0.8. Layers (tracing, CORS) are added by the binary.

pub mod endpoints;
pub mod middleware;
pub mod response;
pub mod signature;

pub use endpoints::router;
pub use middleware::{AppState, WhatsAppWebhookSettings};
