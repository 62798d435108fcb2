//! Notification emitter interface.
//!
//! Transitions post notices through a [`NotificationSink`] after their own transaction has
//! committed. Delivery is fire-and-forget: a failing sink is logged and never turns a committed
//! transition into an error.

use crate::core::error::TechPathError;
use tracing::warn;

pub trait NotificationSink: Send + Sync {
    /// Record `message` for `recipient_id`.
    fn notify(&self, recipient_id: &str, message: &str) -> Result<(), TechPathError>;
}

/// Post a notice, swallowing and logging any sink failure.
/// Returns whether the sink accepted the notice.
pub fn emit(sink: &dyn NotificationSink, recipient_id: &str, message: &str) -> bool {
    match sink.notify(recipient_id, message) {
        Ok(()) => true,
        Err(e) => {
            warn!(recipient = recipient_id, error = %e, "notification delivery failed");
            false
        }
    }
}
