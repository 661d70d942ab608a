//! The exchange client contract the Product Adapter is built against (§4.2). The concrete wire
//! implementation (REST/WebSocket framing, signing, per-exchange quirks) is a collaborator out of
//! this spec's core scope; only the semantic contract is specified here.
use crate::order::{ClientOrderId, CreateOrderRequest, Order, OrderId};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rampart_instrument::market::Product;
use rampart_integration::{channel::Receiver, error::Error};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct MarketStatus {
    pub product: Product,
    pub trading_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct MarketInfo {
    pub last_price: Decimal,
    pub min_amount: Decimal,
}

/// Best bid and offer: the top-of-book quote for a market.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Bbo {
    pub bid: Decimal,
    pub offer: Decimal,
    pub at: DateTime<Utc>,
}

impl Bbo {
    /// Mid price, the ticker Limiters react to.
    pub fn mid(&self) -> Decimal {
        (self.bid + self.offer) / Decimal::from(2)
    }
}

/// The exchange client contract a `ProductAdapter` is built on top of (§4.2).
///
/// Implementations own: HTTP retry policy (502 -> wait 1s and retry; 429/418 -> honor
/// `Retry-After`, default 1s), clock-skew tracking (round-trip-compensated, rejecting
/// measurements whose RTT exceeds `max_fetch_time_latency`, aborting startup if the required
/// offset exceeds `max_time_adjustment`), and propagating context cancellation through in-flight
/// requests rather than treating a rate limit as fatal.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn get_markets(&self) -> Result<Vec<MarketStatus>, Error>;
    async fn get_market(&self, product: &Product) -> Result<MarketStatus, Error>;
    async fn get_market_info(&self, product: &Product) -> Result<MarketInfo, Error>;

    /// **Idempotency is not guaranteed** by all exchanges; the `ProductAdapter` layer above
    /// provides it.
    async fn create_order(&self, product: &Product, req: CreateOrderRequest) -> Result<Order, Error>;

    async fn get_order(&self, product: &Product, server_id: &OrderId) -> Result<Order, Error>;

    async fn batch_query_orders(
        &self,
        product: &Product,
        ids: &[OrderId],
    ) -> Result<Vec<Order>, Error>;

    async fn cancel_order(&self, product: &Product, server_id: &OrderId) -> Result<Order, Error>;

    async fn cancel_order_by_client_id(
        &self,
        product: &Product,
        client_id: ClientOrderId,
    ) -> Result<Order, Error>;

    /// Lists finished and pending orders for `product` created at or after `since`, keyed by
    /// `client_id`. Used once, at `ProductAdapter` construction, to prime the in-memory dedup map
    /// across a restart (§4.3 "Recovery on start"). Not one of the steady-state operations a
    /// trader calls.
    async fn list_recent_orders(
        &self,
        product: &Product,
        since: DateTime<Utc>,
    ) -> Result<Vec<Order>, Error>;

    /// Begins streaming this market's price and order updates into the per-market topics
    /// returned by [`ExchangeClient::price_updates`] / order topic consumed internally by the
    /// `ProductAdapter`'s order-update watcher.
    async fn watch_market(&self, product: &Product) -> Result<(), Error>;
    async fn unwatch_market(&self, product: &Product) -> Result<(), Error>;

    /// Best-bid-offer stream for `product`; bufferSize=1, latest-only.
    fn price_updates(&self, product: &Product) -> Receiver<Bbo>;

    /// Server-pushed order update stream for `product`; unbounded, coalesces-on-overflow.
    fn order_updates(&self, product: &Product) -> Receiver<Order>;

    async fn close(&self) -> Result<(), Error>;
}

/// Continuously-tracked clock offset between the local clock and the exchange's remote clock,
/// measured via round-trip-latency-compensated requests.
#[derive(Debug, Clone, Copy)]
pub struct ClockSync {
    pub offset: Duration,
    pub max_fetch_time_latency: Duration,
    pub max_time_adjustment: Duration,
}

impl ClockSync {
    pub fn new(max_fetch_time_latency: Duration, max_time_adjustment: Duration) -> Self {
        Self {
            offset: Duration::zero(),
            max_fetch_time_latency,
            max_time_adjustment,
        }
    }

    /// Records one round-trip clock measurement. `sent`/`received` bound the local request;
    /// `remote` is the timestamp the exchange reported. Rejects the sample if its RTT exceeds
    /// `max_fetch_time_latency`; otherwise updates `offset` to `remote - midpoint(sent, received)`.
    pub fn record(
        &mut self,
        sent: DateTime<Utc>,
        received: DateTime<Utc>,
        remote: DateTime<Utc>,
    ) -> Result<(), Error> {
        let rtt = received - sent;
        if rtt > self.max_fetch_time_latency {
            return Err(Error::internal(format!(
                "clock sync sample rejected: rtt {rtt} exceeds max_fetch_time_latency {}",
                self.max_fetch_time_latency
            )));
        }

        let midpoint = sent + rtt / 2;
        let offset = remote - midpoint;

        if offset.abs() > self.max_time_adjustment {
            return Err(Error::internal(format!(
                "clock offset {offset} exceeds max_time_adjustment {}",
                self.max_time_adjustment
            )));
        }

        self.offset = offset;
        Ok(())
    }

    pub fn adjust(&self, local_now: DateTime<Utc>) -> DateTime<Utc> {
        local_now + self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock_sync() -> ClockSync {
        ClockSync::new(Duration::milliseconds(500), Duration::minutes(5))
    }

    #[test]
    fn record_computes_offset_from_the_rtt_midpoint() {
        let mut sync = clock_sync();
        let sent = Utc::now();
        let received = sent + Duration::milliseconds(100);
        let remote = sent + Duration::milliseconds(50) + Duration::seconds(3);

        sync.record(sent, received, remote).unwrap();

        // remote - midpoint(sent, received) = (sent + 50ms + 3s) - (sent + 50ms) = 3s.
        assert_eq!(sync.offset, Duration::seconds(3));
    }

    #[test]
    fn record_rejects_a_sample_whose_rtt_exceeds_the_latency_bound() {
        let mut sync = clock_sync();
        let sent = Utc::now();
        let received = sent + Duration::milliseconds(501);
        let remote = received;

        let before = sync.offset;
        assert!(sync.record(sent, received, remote).is_err());
        assert_eq!(sync.offset, before, "a rejected sample must not update the running offset");
    }

    #[test]
    fn record_rejects_an_offset_beyond_max_time_adjustment() {
        let mut sync = clock_sync();
        let sent = Utc::now();
        let received = sent + Duration::milliseconds(10);
        let remote = sent + Duration::minutes(10);

        assert!(sync.record(sent, received, remote).is_err());
    }

    #[test]
    fn adjust_shifts_the_local_clock_by_the_recorded_offset() {
        let mut sync = clock_sync();
        let sent = Utc::now();
        let received = sent + Duration::milliseconds(10);
        let remote = sent + Duration::seconds(2);
        sync.record(sent, received, remote).unwrap();

        let local_now = Utc::now();
        assert_eq!(sync.adjust(local_now), local_now + Duration::seconds(2));
    }
}
