//! Remote-to-local synchronisation: paginated pulls and webhook pushes.

pub mod driver;
pub mod webhook;

pub use driver::{SyncDriver, SyncReport, SyncScope};
pub use webhook::{handle_webhook, verify_signature, WebhookEvent, WebhookOutcome};
