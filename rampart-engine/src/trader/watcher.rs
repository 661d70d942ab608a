//! Trader: Watcher (§9 Open Questions, promoted to a full module by SPEC_FULL §4.7) — a read-only
//! pair grid that shares the Waller's summary layout but never places or cancels a real order: it
//! only ever reads `priceUpdates()` and feeds ticks into the [`Simulator`], producing a `Summary`
//! from synthesized fills.
use crate::simulator::{SimulatedFill, Simulator};
use crate::trader::waller::{Period, Summary};
use chrono::{DateTime, Utc};
use rampart_execution::ProductAdapter;
use rampart_instrument::{pair::Pair, point::Side};
use rampart_integration::{error::Error, kv::Kv};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct SimulatedFillRecord {
    pub pair_index: usize,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub fee: Decimal,
    pub at: DateTime<Utc>,
}

/// The persisted state at `/watcher/<uid>`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WatcherState {
    pub pairs: Vec<Pair>,
    pub fee_pct: Decimal,
    pub fills: Vec<SimulatedFillRecord>,
}

impl WatcherState {
    fn key(uid: Uuid) -> Vec<u8> {
        format!("/watcher/{uid}").into_bytes()
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

    /// Groups `fills` by pair and folds them into a [`Summary`], applying the same unsold/
    /// oversold classification as [`crate::trader::waller::Waller::summary`].
    pub fn summary(&self, period: Option<Period>) -> Summary {
        let mut summary = Summary::zero();

        for pair_index in 0..self.pairs.len() {
            let mut bought_size = Decimal::ZERO;
            let mut bought_value = Decimal::ZERO;
            let mut bought_fees = Decimal::ZERO;
            let mut sold_size = Decimal::ZERO;
            let mut sold_value = Decimal::ZERO;
            let mut sold_fees = Decimal::ZERO;
            let mut num_buys = Decimal::ZERO;
            let mut num_sells = Decimal::ZERO;

            for fill in self.fills.iter().filter(|f| f.pair_index == pair_index) {
                if let Some(period) = period {
                    if fill.at < period.begin || fill.at > period.end {
                        continue;
                    }
                }
                let value = fill.price * fill.size;
                match fill.side {
                    Side::Buy => {
                        bought_size += fill.size;
                        bought_value += value;
                        bought_fees += fill.fee;
                        num_buys += Decimal::ONE;
                    }
                    Side::Sell => {
                        sold_size += fill.size;
                        sold_value += value;
                        sold_fees += fill.fee;
                        num_sells += Decimal::ONE;
                    }
                }
                summary.begin_at = Some(summary.begin_at.map_or(fill.at, |b: DateTime<Utc>| b.min(fill.at)));
                summary.end_at = Some(summary.end_at.map_or(fill.at, |e: DateTime<Utc>| e.max(fill.at)));
            }

            summary.num_buys += num_buys;
            summary.num_sells += num_sells;
            summary.bought_size += bought_size;
            summary.bought_value += bought_value;
            summary.bought_fees += bought_fees;
            summary.sold_size += sold_size;
            summary.sold_value += sold_value;
            summary.sold_fees += sold_fees;

            if sold_size > bought_size {
                let ratio = if sold_size == Decimal::ZERO { Decimal::ZERO } else { (sold_size - bought_size) / sold_size };
                summary.oversold_size += sold_size - bought_size;
                summary.oversold_value += sold_value * ratio;
                summary.oversold_fees += sold_fees * ratio;
            } else if bought_size > sold_size {
                let ratio = if bought_size == Decimal::ZERO { Decimal::ZERO } else { (bought_size - sold_size) / bought_size };
                summary.unsold_size += bought_size - sold_size;
                summary.unsold_value += bought_value * ratio;
                summary.unsold_fees += bought_fees * ratio;
            }
        }

        summary
    }
}

pub struct Watcher {
    pub uid: Uuid,
    pub adapter: Arc<ProductAdapter>,
    pub kv: Arc<dyn Kv>,
    pub state: WatcherState,
}

impl Watcher {
    pub fn new(uid: Uuid, adapter: Arc<ProductAdapter>, kv: Arc<dyn Kv>, pairs: Vec<Pair>, fee_pct: Decimal) -> Result<Self, Error> {
        if pairs.is_empty() {
            return Err(Error::invalid("Watcher requires at least one pair"));
        }
        let state = match WatcherState::load(&kv, uid)? {
            Some(state) => state,
            None => {
                let state = WatcherState { pairs, fee_pct, fills: Vec::new() };
                state.store(&kv, uid)?;
                state
            }
        };
        Ok(Self { uid, adapter, kv, state })
    }

    /// Reconstructs a Watcher from a state persisted by a previous process, for the server's
    /// startup resume pass. Fails if nothing has ever been persisted at `/watcher/<uid>`.
    pub fn resume(uid: Uuid, adapter: Arc<ProductAdapter>, kv: Arc<dyn Kv>) -> Result<Self, Error> {
        let state = WatcherState::load(&kv, uid)?
            .ok_or_else(|| Error::not_exist(format!("watcher {uid} has no persisted state")))?;
        Ok(Self { uid, adapter, kv, state })
    }

    fn persist(&self) -> Result<(), Error> {
        self.state.store(&self.kv, self.uid)
    }

    /// Never calls `limit_buy`/`limit_sell`/`cancel`; only reads `price_updates()` and records
    /// what the [`Simulator`] would have done.
    pub async fn run(mut self, cancellation: CancellationToken) -> Result<(), Error> {
        let mut simulator = Simulator::new(self.state.pairs.clone(), self.state.fee_pct);
        let prices = self.adapter.price_updates();

        loop {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    self.persist()?;
                    return Ok(());
                }
                received = prices.receive() => {
                    let Ok(bbo) = received else { return Ok(()) };
                    let fills = simulator.tick(bbo.mid());
                    if !fills.is_empty() {
                        let now = Utc::now();
                        self.state.fills.extend(fills.into_iter().map(|f: SimulatedFill| SimulatedFillRecord {
                            pair_index: f.pair_index,
                            side: f.side,
                            price: f.price,
                            size: f.size,
                            fee: f.fee,
                            at: now,
                        }));
                        self.persist()?;
                    }
                }
            }
        }
    }
}
