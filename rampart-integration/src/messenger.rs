//! The notification transport the core sends operator alerts through. The wire transport
//! (Telegram, email, ...) is a collaborator out of scope; this is the contract the core consumes.
use chrono::{DateTime, Utc};

/// Delivery is best-effort and must never block the caller: a failed send is logged by the
/// implementation and otherwise swallowed.
pub trait Messenger: Send + Sync {
    fn send_message(&self, at: DateTime<Utc>, message: String);
}

/// No-op [`Messenger`] used in tests and wherever alerting isn't wired up.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMessenger;

impl Messenger for NullMessenger {
    fn send_message(&self, _at: DateTime<Utc>, _message: String) {}
}
