//! Trader: Limiter (§4.5) — a single BUY or SELL limit point that auto-cancels its resting order
//! when the ticker leaves the activation band, and recreates it on re-entry.
use rampart_execution::{Bbo, ClientOrderId, Order, OrderStatus, ProductAdapter};
use rampart_instrument::point::Point;
use rampart_integration::{error::Error, kv::Kv};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// The persisted state at `/limiter/<uid>`.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct LimiterState {
    pub point: Point,
    pub client_id_seed: Uuid,
    pub next_offset: u64,
    pub orders: Vec<Order>,
}

impl LimiterState {
    pub fn new(point: Point, client_id_seed: Uuid) -> Self {
        Self { point, client_id_seed, next_offset: 0, orders: Vec::new() }
    }

    pub fn total_filled(&self) -> Decimal {
        self.orders.iter().map(|o| o.filled_size).sum()
    }

    fn live_order(&self) -> Option<&Order> {
        self.orders.last().filter(|o| !o.status.is_terminal())
    }

    fn key(uid: Uuid) -> Vec<u8> {
        format!("/limiter/{uid}").into_bytes()
    }

    pub fn load(kv: &Arc<dyn Kv>, uid: Uuid) -> Result<Option<Self>, Error> {
        let mut found = None;
        kv.with_reader(&mut |tx| {
            found = tx
                .get(&Self::key(uid))?
                .map(|bytes| serde_json::from_slice(&bytes).map_err(|err| Error::internal(err.to_string())))
                .transpose()?;
            Ok(())
        })?;
        Ok(found)
    }

    fn store(&self, kv: &Arc<dyn Kv>, uid: Uuid) -> Result<(), Error> {
        let bytes = serde_json::to_vec(self).map_err(|err| Error::internal(err.to_string()))?;
        kv.with_read_writer(&mut |tx| tx.set(&Self::key(uid), &bytes))
    }
}

/// Operator-tunable options; unknown keys fail. Currently exposes nothing beyond `cancel`, which
/// replaces the point's cancellation band edge for subsequent ticks.
pub fn set_option(state: &mut LimiterState, key: &str, value: &str) -> Result<(), Error> {
    match key {
        "cancel" => {
            let cancel: Decimal = value
                .parse()
                .map_err(|_| Error::invalid(format!("cancel must be a decimal, got {value}")))?;
            state.point = Point::new(state.point.size, state.point.price, cancel)?;
            Ok(())
        }
        other => Err(Error::invalid(format!("unknown Limiter option {other}"))),
    }
}

pub struct Limiter {
    pub uid: Uuid,
    pub adapter: Arc<ProductAdapter>,
    pub kv: Arc<dyn Kv>,
    pub state: LimiterState,
}

impl Limiter {
    pub fn new(uid: Uuid, adapter: Arc<ProductAdapter>, kv: Arc<dyn Kv>, point: Point) -> Result<Self, Error> {
        let state = match LimiterState::load(&kv, uid)? {
            Some(state) => state,
            None => {
                let state = LimiterState::new(point, Uuid::new_v4());
                state.store(&kv, uid)?;
                state
            }
        };
        Ok(Self { uid, adapter, kv, state })
    }

    /// Reconstructs a Limiter from a state persisted by a previous process, for the server's
    /// startup resume pass. Fails if nothing has ever been persisted at `/limiter/<uid>`.
    pub fn resume(uid: Uuid, adapter: Arc<ProductAdapter>, kv: Arc<dyn Kv>) -> Result<Self, Error> {
        let state = LimiterState::load(&kv, uid)?
            .ok_or_else(|| Error::not_exist(format!("limiter {uid} has no persisted state")))?;
        Ok(Self { uid, adapter, kv, state })
    }

    fn persist(&self) -> Result<(), Error> {
        self.state.store(&self.kv, self.uid)
    }

    /// Runs until the point's full size is filled (`Ok`) or the context is cancelled (`Ok`, with
    /// a best-effort cancel of any live order first).
    pub async fn run(mut self, cancellation: CancellationToken) -> Result<(), Error> {
        let prices = self.adapter.price_updates();
        let order_updates = self.adapter.order_updates();

        if self.state.total_filled() >= self.state.point.size {
            return Ok(());
        }

        loop {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    if let Some(live) = self.state.live_order().cloned() {
                        let _ = self.adapter.cancel(&live.server_id).await;
                    }
                    self.persist()?;
                    return Ok(());
                }
                received = prices.receive() => {
                    let Ok(bbo) = received else { return Ok(()) };
                    self.on_tick(bbo).await?;
                    if self.state.total_filled() >= self.state.point.size {
                        return Ok(());
                    }
                }
                received = order_updates.receive() => {
                    let Ok(update) = received else { continue };
                    self.apply_update(update);
                    if self.state.total_filled() >= self.state.point.size {
                        self.persist()?;
                        return Ok(());
                    }
                }
            }
        }
    }

    fn apply_update(&mut self, update: Order) {
        if let Some(existing) = self.state.orders.iter_mut().find(|o| o.server_id == update.server_id) {
            *existing = update;
        }
    }

    async fn on_tick(&mut self, bbo: Bbo) -> Result<(), Error> {
        let ticker = bbo.mid();

        if let Some(live) = self.state.live_order().cloned() {
            if !self.state.point.in_range(ticker) {
                debug!(uid = %self.uid, %ticker, "ticker left cancel band, cancelling live order");
                self.adapter.cancel(&live.server_id).await?;
            }
            return Ok(());
        }

        if self.state.point.in_range(ticker) {
            let client_id = ClientOrderId::deterministic(self.uid, self.state.client_id_seed, self.state.next_offset);
            let side = self.state.point.side();
            let result = match side {
                rampart_instrument::point::Side::Buy => {
                    self.adapter.limit_buy(client_id, self.state.point.size, self.state.point.price).await
                }
                rampart_instrument::point::Side::Sell => {
                    self.adapter.limit_sell(client_id, self.state.point.size, self.state.point.price).await
                }
            };

            match result {
                Ok(order) => {
                    info!(uid = %self.uid, %client_id, server_id = %order.server_id, "placed limit order");
                    self.state.orders.push(order);
                    self.state.next_offset += 1;
                    self.persist()?;
                }
                Err(Error::NoFund(_)) => {
                    // The adapter caches a NoFund outcome as terminal for this clientId, so the
                    // next attempt needs a fresh one or it would replay the same cached failure
                    // forever even after funds return.
                    debug!(uid = %self.uid, %client_id, "limit order rejected for insufficient funds, advancing offset for retry");
                    self.state.next_offset += 1;
                    self.persist()?;
                }
                Err(err) => return Err(err),
            }
        }

        Ok(())
    }

    pub fn status(&self) -> OrderStatus {
        self.state
            .live_order()
            .map(|o| o.status)
            .unwrap_or(OrderStatus::Unknown)
    }
}
