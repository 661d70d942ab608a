//! `Order`, the client-order-id idempotency key, and the open request the Product Adapter issues
//! to the exchange client.
use chrono::{DateTime, Utc};
use rampart_instrument::point::Side;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Caller-generated UUID that is the end-to-end idempotency key for order creation. The core
/// never creates two orders with the same `ClientOrderId`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub struct ClientOrderId(pub Uuid);

impl ClientOrderId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Deterministic id derived from a job uid, its per-trader seed, and a monotonically
    /// advancing offset. Used by Limiter (§4.5) so a crash between order creation and state
    /// persistence always replays the same `ClientOrderId` on retry.
    pub fn deterministic(uid: Uuid, seed: Uuid, offset: u64) -> Self {
        let namespace = Uuid::new_v5(&uid, seed.as_bytes());
        Self(Uuid::new_v5(&namespace, &offset.to_be_bytes()))
    }
}

impl Display for ClientOrderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Exchange-assigned order identifier.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub struct OrderId(pub String);

impl Display for OrderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub enum OrderStatus {
    New,
    Partial,
    Filled,
    Canceled,
    Unknown,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Filled | Self::Canceled)
    }
}

/// A request to place a new LIMIT order, dispatched by the Product Adapter.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct CreateOrderRequest {
    pub client_id: ClientOrderId,
    pub side: Side,
    pub size: Decimal,
    pub price: Decimal,
}

/// An order placed on an exchange.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Order {
    pub server_id: OrderId,
    pub client_id: ClientOrderId,
    pub side: Side,
    pub size: Decimal,
    pub price: Decimal,
    pub status: OrderStatus,
    pub filled_size: Decimal,
    pub filled_price: Decimal,
    pub fee: Decimal,
    pub created_at: DateTime<Utc>,
    pub done_at: Option<DateTime<Utc>>,
    pub done: bool,
    pub done_reason: Option<String>,
}

impl Order {
    pub fn mark_done(&mut self, at: DateTime<Utc>, reason: impl Into<String>) {
        self.done = true;
        self.done_at = Some(at);
        self.done_reason = Some(reason.into());
    }
}
