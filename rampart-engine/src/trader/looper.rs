//! Trader: Looper (§4.6) — two coupled Limiters, a BUY point followed by a SELL point, repeated
//! indefinitely.
use crate::trader::limiter::{Limiter, LimiterState};
use rampart_execution::ProductAdapter;
use rampart_instrument::point::Point;
use rampart_integration::{error::Error, kv::Kv};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// One completed buy→sell cycle, named by the uids of the Limiters that ran it so the full order
/// history stays reachable from `/limiter/<uid>` for summary accounting.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct LoopRecord {
    pub buy_limiter: Uuid,
    pub sell_limiter: Uuid,
}

/// The persisted state at `/looper/<uid>`.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct LooperState {
    pub buy_point: Point,
    pub sell_point: Point,
    pub iteration: u64,
    pub current_buy_limiter: Option<Uuid>,
    pub current_sell_limiter: Option<Uuid>,
    pub history: Vec<LoopRecord>,
}

impl LooperState {
    pub fn new(buy_point: Point, sell_point: Point) -> Self {
        Self {
            buy_point,
            sell_point,
            iteration: 0,
            current_buy_limiter: None,
            current_sell_limiter: None,
            history: Vec::new(),
        }
    }

    fn key(uid: Uuid) -> Vec<u8> {
        format!("/looper/{uid}").into_bytes()
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

/// Derives a deterministic uid for the buy or sell Limiter of a given loop iteration. Namespaced
/// on the Looper's own uid so restarting never collides with another Looper's child Limiters.
fn child_uid(looper_uid: Uuid, side: &str, iteration: u64) -> Uuid {
    let namespace = Uuid::new_v5(&looper_uid, side.as_bytes());
    Uuid::new_v5(&namespace, &iteration.to_be_bytes())
}

pub struct Looper {
    pub uid: Uuid,
    pub adapter: Arc<ProductAdapter>,
    pub kv: Arc<dyn Kv>,
    pub state: LooperState,
}

impl Looper {
    pub fn new(
        uid: Uuid,
        adapter: Arc<ProductAdapter>,
        kv: Arc<dyn Kv>,
        buy_point: Point,
        sell_point: Point,
    ) -> Result<Self, Error> {
        let state = match LooperState::load(&kv, uid)? {
            Some(state) => state,
            None => {
                let state = LooperState::new(buy_point, sell_point);
                state.store(&kv, uid)?;
                state
            }
        };
        Ok(Self { uid, adapter, kv, state })
    }

    /// Reconstructs a Looper from a state persisted by a previous process, for the server's
    /// startup resume pass. Fails if nothing has ever been persisted at `/looper/<uid>`.
    pub fn resume(uid: Uuid, adapter: Arc<ProductAdapter>, kv: Arc<dyn Kv>) -> Result<Self, Error> {
        let state = LooperState::load(&kv, uid)?
            .ok_or_else(|| Error::not_exist(format!("looper {uid} has no persisted state")))?;
        Ok(Self { uid, adapter, kv, state })
    }

    fn persist(&self) -> Result<(), Error> {
        self.state.store(&self.kv, self.uid)
    }

    /// Runs forever: buy, then sell sized to what the buy actually filled, then advance to the
    /// next iteration. Only ever one child Limiter is live at a time, so a crash mid-cycle leaves
    /// `current_buy_limiter`/`current_sell_limiter` naming exactly which side to resume.
    pub async fn run(mut self, cancellation: CancellationToken) -> Result<(), Error> {
        loop {
            let buy_uid = *self
                .state
                .current_buy_limiter
                .get_or_insert_with(|| child_uid(self.uid, "buy", self.state.iteration));
            self.persist()?;

            let buy_limiter = Limiter::new(buy_uid, Arc::clone(&self.adapter), Arc::clone(&self.kv), self.state.buy_point)?;
            buy_limiter.run(cancellation.child_token()).await?;

            if cancellation.is_cancelled() {
                return Ok(());
            }

            let filled = LimiterState::load(&self.kv, buy_uid)?
                .map(|s| s.total_filled())
                .unwrap_or(Decimal::ZERO);

            if filled == Decimal::ZERO {
                debug!(uid = %self.uid, iteration = self.state.iteration, "buy leg filled nothing, retrying same iteration");
                continue;
            }

            let sell_uid = *self
                .state
                .current_sell_limiter
                .get_or_insert_with(|| child_uid(self.uid, "sell", self.state.iteration));
            self.persist()?;

            let sell_point = Point::new(filled, self.state.sell_point.price, self.state.sell_point.cancel)?;
            let sell_limiter = Limiter::new(sell_uid, Arc::clone(&self.adapter), Arc::clone(&self.kv), sell_point)?;
            sell_limiter.run(cancellation.child_token()).await?;

            if cancellation.is_cancelled() {
                return Ok(());
            }

            info!(uid = %self.uid, iteration = self.state.iteration, %buy_uid, %sell_uid, "loop iteration complete");

            self.state.history.push(LoopRecord { buy_limiter: buy_uid, sell_limiter: sell_uid });
            self.state.iteration += 1;
            self.state.current_buy_limiter = None;
            self.state.current_sell_limiter = None;
            self.persist()?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_uid_is_deterministic_and_distinct_per_iteration_and_side() {
        let looper = Uuid::new_v4();
        let buy0 = child_uid(looper, "buy", 0);
        let buy0_again = child_uid(looper, "buy", 0);
        let buy1 = child_uid(looper, "buy", 1);
        let sell0 = child_uid(looper, "sell", 0);

        assert_eq!(buy0, buy0_again);
        assert_ne!(buy0, buy1);
        assert_ne!(buy0, sell0);
    }
}
