//! Trader: Waller (§4.7) — a grid of N Looper pairs spanning a price range, with shared budget
//! accounting and a derived, additive Summary.
use crate::trader::limiter::LimiterState;
use crate::trader::looper::{Looper, LooperState};
use chrono::{DateTime, Utc};
use rampart_execution::ProductAdapter;
use rampart_instrument::pair::Pair;
use rampart_integration::{error::Error, kv::Kv};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// A half-open `[begin, end]` window orders are restricted to by [`Waller::summary`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Period {
    pub begin: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// The design-critical derived aggregate over a Waller's order history (§4.7). Additive over
/// disjoint time windows of the same job and idempotent under recomputation from the order log.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Summary {
    pub num_buys: Decimal,
    pub num_sells: Decimal,

    pub bought_fees: Decimal,
    pub bought_size: Decimal,
    pub bought_value: Decimal,

    pub sold_fees: Decimal,
    pub sold_size: Decimal,
    pub sold_value: Decimal,

    /// Buys after the last sell in each pair: bought but not yet resold.
    pub unsold_fees: Decimal,
    pub unsold_size: Decimal,
    pub unsold_value: Decimal,

    /// Defensive accounting for sold size exceeding bought size in a pair; should be zero under
    /// normal operation (§3 invariant: sum of sell fills <= sum of buy fills per loop iteration).
    pub oversold_fees: Decimal,
    pub oversold_size: Decimal,
    pub oversold_value: Decimal,

    pub begin_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
}

impl Summary {
    pub fn zero() -> Self {
        Self {
            num_buys: Decimal::ZERO,
            num_sells: Decimal::ZERO,
            bought_fees: Decimal::ZERO,
            bought_size: Decimal::ZERO,
            bought_value: Decimal::ZERO,
            sold_fees: Decimal::ZERO,
            sold_size: Decimal::ZERO,
            sold_value: Decimal::ZERO,
            unsold_fees: Decimal::ZERO,
            unsold_size: Decimal::ZERO,
            unsold_value: Decimal::ZERO,
            oversold_fees: Decimal::ZERO,
            oversold_size: Decimal::ZERO,
            oversold_value: Decimal::ZERO,
            begin_at: None,
            end_at: None,
        }
    }

    /// Merges another disjoint-window Summary into this one. `Summary(A∪B) = Summary(A) +
    /// Summary(B)` (§8).
    pub fn merge(mut self, other: Self) -> Self {
        self.num_buys += other.num_buys;
        self.num_sells += other.num_sells;
        self.bought_fees += other.bought_fees;
        self.bought_size += other.bought_size;
        self.bought_value += other.bought_value;
        self.sold_fees += other.sold_fees;
        self.sold_size += other.sold_size;
        self.sold_value += other.sold_value;
        self.unsold_fees += other.unsold_fees;
        self.unsold_size += other.unsold_size;
        self.unsold_value += other.unsold_value;
        self.oversold_fees += other.oversold_fees;
        self.oversold_size += other.oversold_size;
        self.oversold_value += other.oversold_value;
        self.begin_at = match (self.begin_at, other.begin_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, None) => a,
            (None, b) => b,
        };
        self.end_at = match (self.end_at, other.end_at) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, None) => a,
            (None, b) => b,
        };
        self
    }

    pub fn profit(&self) -> Decimal {
        (self.sold_value - self.sold_fees)
            - (self.bought_value - self.unsold_value + self.bought_fees - self.unsold_fees)
            - self.oversold_value
            - self.oversold_fees
    }

    pub fn fee_pct(&self) -> Decimal {
        let denom = self.bought_value + self.sold_value;
        if denom == Decimal::ZERO {
            Decimal::ZERO
        } else {
            (self.bought_fees + self.sold_fees) * Decimal::from(100) / denom
        }
    }

    pub fn num_days(&self) -> Decimal {
        match (self.begin_at, self.end_at) {
            (Some(begin), Some(end)) => {
                let days = Decimal::from((end - begin).num_seconds()) / Decimal::from(86_400);
                days.max(Decimal::ONE)
            }
            _ => Decimal::ONE,
        }
    }

    pub fn profit_per_day(&self) -> Decimal {
        self.profit() / self.num_days()
    }

    pub fn return_pct(&self, budget: Decimal) -> Decimal {
        if budget == Decimal::ZERO {
            return Decimal::ZERO;
        }
        Decimal::from(100) * self.profit() / budget
    }

    pub fn annual_pct(&self, budget: Decimal) -> Decimal {
        if budget == Decimal::ZERO {
            return Decimal::ZERO;
        }
        Decimal::from(100) * self.profit_per_day() * Decimal::from(365) / budget
    }
}

/// The persisted state at `/waller/<uid>`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WallerState {
    /// Margin-adjusted pairs, sorted ascending by `buy.price`.
    pub pairs: Vec<Pair>,
    pub fee_pct: Decimal,
    pub looper_uids: Vec<Uuid>,
    /// Period-free lifetime summary cache, invalidated whenever the total order count changes.
    pub cached_summary: Option<Summary>,
    pub cached_order_count: usize,
}

impl WallerState {
    fn key(uid: Uuid) -> Vec<u8> {
        format!("/waller/{uid}").into_bytes()
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

/// `Required capital` (§4.7): the sum of every pair's buy notional.
pub fn budget(pairs: &[Pair]) -> Decimal {
    pairs.iter().map(|p| p.buy.value()).sum()
}

pub struct Waller {
    pub uid: Uuid,
    pub adapter: Arc<ProductAdapter>,
    pub kv: Arc<dyn Kv>,
    pub state: WallerState,
}

impl Waller {
    pub fn new(uid: Uuid, adapter: Arc<ProductAdapter>, kv: Arc<dyn Kv>, mut pairs: Vec<Pair>, fee_pct: Decimal) -> Result<Self, Error> {
        if pairs.is_empty() {
            return Err(Error::invalid("Waller requires at least one pair"));
        }
        pairs.sort_by(|a, b| a.buy.price.cmp(&b.buy.price));

        let state = match WallerState::load(&kv, uid)? {
            Some(state) => state,
            None => {
                let looper_uids: Vec<Uuid> = (0..pairs.len() as u64)
                    .map(|i| Uuid::new_v5(&uid, &i.to_be_bytes()))
                    .collect();
                let state = WallerState {
                    pairs,
                    fee_pct,
                    looper_uids,
                    cached_summary: None,
                    cached_order_count: 0,
                };
                state.store(&kv, uid)?;
                state
            }
        };
        Ok(Self { uid, adapter, kv, state })
    }

    /// Reconstructs a Waller from a state persisted by a previous process, for the server's
    /// startup resume pass. Fails if nothing has ever been persisted at `/waller/<uid>`.
    pub fn resume(uid: Uuid, adapter: Arc<ProductAdapter>, kv: Arc<dyn Kv>) -> Result<Self, Error> {
        let state = WallerState::load(&kv, uid)?
            .ok_or_else(|| Error::not_exist(format!("waller {uid} has no persisted state")))?;
        Ok(Self { uid, adapter, kv, state })
    }

    pub fn budget(&self) -> Decimal {
        budget(&self.state.pairs)
    }

    /// Runs every pair's Looper concurrently, sharing this Waller's product adapter and price
    /// topic, until the context is cancelled.
    pub async fn run(self, cancellation: CancellationToken) -> Result<(), Error> {
        let mut tasks = Vec::with_capacity(self.state.pairs.len());

        for (pair, looper_uid) in self.state.pairs.iter().zip(self.state.looper_uids.iter()) {
            let looper = Looper::new(*looper_uid, Arc::clone(&self.adapter), Arc::clone(&self.kv), pair.buy, pair.sell)?;
            let token = cancellation.child_token();
            tasks.push(looper.run(token));
        }

        let results = futures::future::join_all(tasks).await;
        for result in results {
            result?;
        }
        Ok(())
    }

    /// Recomputes the Summary from the order log. When `period` is `None`, uses (and maintains)
    /// the lifetime cache; a windowed query always recomputes fresh since the cache only covers
    /// the unrestricted lifetime view.
    pub fn summary(&mut self, period: Option<Period>) -> Result<Summary, Error> {
        let total_orders = count_orders(&self.kv, &self.state.looper_uids)?;

        if period.is_none() {
            if let Some(cached) = &self.state.cached_summary {
                if self.state.cached_order_count == total_orders {
                    return Ok(*cached);
                }
            }
        }

        let summary = compute_summary(&self.kv, &self.state.looper_uids, period)?;

        if period.is_none() {
            self.state.cached_summary = Some(summary);
            self.state.cached_order_count = total_orders;
            self.state.store(&self.kv, self.uid)?;
        }

        Ok(summary)
    }
}

/// Counts every order across every pair's Looper history (plus its in-flight iteration), used to
/// detect whether the lifetime summary cache is stale. Standalone (not a `Waller` method) so the
/// job-status query path can call it from a persisted `WallerState` alone, without constructing a
/// live `ProductAdapter`.
fn count_orders(kv: &Arc<dyn Kv>, looper_uids: &[Uuid]) -> Result<usize, Error> {
    let mut count = 0;
    for looper_uid in looper_uids {
        let Some(looper) = LooperState::load(kv, *looper_uid)? else { continue };
        for record in looper.history.iter().chain(current_record(&looper).iter()) {
            if let Some(state) = LimiterState::load(kv, record.buy_limiter)? {
                count += state.orders.len();
            }
            if let Some(sell_uid) = record.sell_limiter_or_none() {
                if let Some(state) = LimiterState::load(kv, sell_uid)? {
                    count += state.orders.len();
                }
            }
        }
    }
    Ok(count)
}

/// Recomputes a [`Summary`] from the order log alone; see [`count_orders`] for why this is a
/// free function rather than a `Waller` method.
pub fn compute_summary(kv: &Arc<dyn Kv>, looper_uids: &[Uuid], period: Option<Period>) -> Result<Summary, Error> {
    let mut summary = Summary::zero();

    for looper_uid in looper_uids {
        let Some(looper) = LooperState::load(kv, *looper_uid)? else { continue };

        for record in looper.history.iter().chain(current_record(&looper).iter()) {
            let buy_state = LimiterState::load(kv, record.buy_limiter)?;
            let sell_state = match record.sell_limiter_or_none() {
                Some(uid) => LimiterState::load(kv, uid)?,
                None => None,
            };

            let (bought_size, bought_value, bought_fees, touched_begin, touched_end) =
                fold_fills(buy_state.as_ref(), period);
            let (sold_size, sold_value, sold_fees, sell_begin, sell_end) = fold_fills(sell_state.as_ref(), period);

            if bought_size > Decimal::ZERO {
                summary.num_buys += Decimal::ONE;
            }
            if sold_size > Decimal::ZERO {
                summary.num_sells += Decimal::ONE;
            }

            summary.bought_size += bought_size;
            summary.bought_value += bought_value;
            summary.bought_fees += bought_fees;
            summary.sold_size += sold_size;
            summary.sold_value += sold_value;
            summary.sold_fees += sold_fees;

            if sold_size > bought_size {
                let excess_ratio = if sold_size == Decimal::ZERO {
                    Decimal::ZERO
                } else {
                    (sold_size - bought_size) / sold_size
                };
                summary.oversold_size += sold_size - bought_size;
                summary.oversold_value += sold_value * excess_ratio;
                summary.oversold_fees += sold_fees * excess_ratio;
            } else if bought_size > sold_size {
                let unsold_ratio = if bought_size == Decimal::ZERO {
                    Decimal::ZERO
                } else {
                    (bought_size - sold_size) / bought_size
                };
                summary.unsold_size += bought_size - sold_size;
                summary.unsold_value += bought_value * unsold_ratio;
                summary.unsold_fees += bought_fees * unsold_ratio;
            }

            for at in [touched_begin, touched_end, sell_begin, sell_end].into_iter().flatten() {
                summary.begin_at = Some(summary.begin_at.map_or(at, |b: DateTime<Utc>| b.min(at)));
                summary.end_at = Some(summary.end_at.map_or(at, |e: DateTime<Utc>| e.max(at)));
            }
        }
    }

    Ok(summary)
}

/// The in-flight iteration (buy started, maybe not yet matched with a sell) isn't in
/// `history` until both legs finish; surface it as a synthetic record so summaries see
/// buys-not-yet-sold as `Unsold` rather than silently dropping them.
fn current_record(looper: &LooperState) -> Option<crate::trader::looper::LoopRecord> {
    looper.current_buy_limiter.map(|buy_limiter| crate::trader::looper::LoopRecord {
        buy_limiter,
        sell_limiter: looper.current_sell_limiter.unwrap_or(buy_limiter),
    })
}

trait SellOrNone {
    fn sell_limiter_or_none(&self) -> Option<Uuid>;
}

impl SellOrNone for crate::trader::looper::LoopRecord {
    fn sell_limiter_or_none(&self) -> Option<Uuid> {
        if self.sell_limiter == self.buy_limiter {
            None
        } else {
            Some(self.sell_limiter)
        }
    }
}

/// Sums filled size/value/fee across a Limiter's order history, optionally restricted to a
/// `period`'s `[begin, end]` window, and returns the min/max `done_at` touched (for `BeginAt`/
/// `EndAt`).
fn fold_fills(
    state: Option<&LimiterState>,
    period: Option<Period>,
) -> (Decimal, Decimal, Decimal, Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    let mut size = Decimal::ZERO;
    let mut value = Decimal::ZERO;
    let mut fees = Decimal::ZERO;
    let mut begin = None;
    let mut end = None;

    let Some(state) = state else {
        return (size, value, fees, begin, end);
    };

    for order in &state.orders {
        if order.filled_size == Decimal::ZERO {
            continue;
        }
        let at = order.done_at.unwrap_or(order.created_at);
        if let Some(period) = period {
            if at < period.begin || at > period.end {
                continue;
            }
        }
        size += order.filled_size;
        value += order.filled_size * order.filled_price;
        fees += order.fee;
        begin = Some(begin.map_or(at, |b: DateTime<Utc>| b.min(at)));
        end = Some(end.map_or(at, |e: DateTime<Utc>| e.max(at)));
    }

    (size, value, fees, begin, end)
}

/// Analysis helpers over pairs alone (§4.7), used by the `query` command.
pub mod analysis {
    use super::*;

    pub fn min_loop_fee(pairs: &[Pair], fee_pct: Decimal) -> Option<Decimal> {
        pairs.iter().map(|p| p.fees_at(fee_pct)).min()
    }

    pub fn avg_loop_fee(pairs: &[Pair], fee_pct: Decimal) -> Decimal {
        if pairs.is_empty() {
            return Decimal::ZERO;
        }
        pairs.iter().map(|p| p.fees_at(fee_pct)).sum::<Decimal>() / Decimal::from(pairs.len())
    }

    pub fn max_loop_fee(pairs: &[Pair], fee_pct: Decimal) -> Option<Decimal> {
        pairs.iter().map(|p| p.fees_at(fee_pct)).max()
    }

    pub fn min_price_margin(pairs: &[Pair]) -> Option<Decimal> {
        pairs.iter().map(Pair::price_margin).min()
    }

    pub fn avg_price_margin(pairs: &[Pair]) -> Decimal {
        if pairs.is_empty() {
            return Decimal::ZERO;
        }
        pairs.iter().map(Pair::price_margin).sum::<Decimal>() / Decimal::from(pairs.len())
    }

    pub fn max_price_margin(pairs: &[Pair]) -> Option<Decimal> {
        pairs.iter().map(Pair::price_margin).max()
    }

    fn profit_margin(pair: &Pair, fee_pct: Decimal) -> Decimal {
        pair.value_margin() - pair.fees_at(fee_pct)
    }

    pub fn min_profit_margin(pairs: &[Pair], fee_pct: Decimal) -> Option<Decimal> {
        pairs.iter().map(|p| profit_margin(p, fee_pct)).min()
    }

    pub fn avg_profit_margin(pairs: &[Pair], fee_pct: Decimal) -> Decimal {
        if pairs.is_empty() {
            return Decimal::ZERO;
        }
        pairs.iter().map(|p| profit_margin(p, fee_pct)).sum::<Decimal>() / Decimal::from(pairs.len())
    }

    pub fn max_profit_margin(pairs: &[Pair], fee_pct: Decimal) -> Option<Decimal> {
        pairs.iter().map(|p| profit_margin(p, fee_pct)).max()
    }

    /// Number of full loop sells (one per pair) required per year to clear a target APR against
    /// this grid's budget.
    pub fn sells_per_year_for_target_apr(pairs: &[Pair], fee_pct: Decimal, target_apr_pct: Decimal) -> Decimal {
        let required_profit = target_apr_pct / Decimal::from(100) * budget(pairs);
        let avg_profit = avg_profit_margin(pairs, fee_pct);
        if avg_profit <= Decimal::ZERO {
            return Decimal::MAX;
        }
        required_profit / avg_profit
    }

    /// Heuristic: expected profit per day assuming the ticker crosses `volatility_crossings_per_day`
    /// pair spans per day, each completing one loop at the grid's average profit margin.
    pub fn avg_profit_at_volatility(pairs: &[Pair], fee_pct: Decimal, volatility_crossings_per_day: Decimal) -> Decimal {
        avg_profit_margin(pairs, fee_pct) * volatility_crossings_per_day
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn pair(buy_price: Decimal, sell_price: Decimal) -> Pair {
        use rampart_instrument::point::Point;
        let buy = Point::new(dec!(1), buy_price, buy_price + dec!(5)).unwrap();
        let sell = Point::new(dec!(1), sell_price, sell_price - dec!(5)).unwrap();
        Pair::new(buy, sell).unwrap()
    }

    /// Scenario 5 (§8): one pair, buy filled at 100 (fee 0.25), sell filled at 110 (fee 0.275).
    /// Profit = (110 - 0.275) - (100 + 0.25) = 9.475. ReturnPct = 9.475.
    #[test]
    fn summary_matches_worked_example() {
        let pairs = vec![pair(dec!(100), dec!(110))];

        let mut summary = Summary::zero();
        summary.bought_size = dec!(1);
        summary.bought_value = dec!(100);
        summary.bought_fees = dec!(0.25);
        summary.sold_size = dec!(1);
        summary.sold_value = dec!(110);
        summary.sold_fees = dec!(0.275);

        assert_eq!(summary.profit(), dec!(9.475));
        assert_eq!(summary.return_pct(budget(&pairs)), dec!(9.475));
    }

    #[test]
    fn summary_merge_is_additive_over_disjoint_windows() {
        let mut a = Summary::zero();
        a.bought_size = dec!(1);
        a.bought_value = dec!(100);
        a.sold_size = dec!(1);
        a.sold_value = dec!(110);

        let mut b = Summary::zero();
        b.bought_size = dec!(2);
        b.bought_value = dec!(205);
        b.sold_size = dec!(2);
        b.sold_value = dec!(230);

        let merged = a.merge(b);
        assert_eq!(merged.bought_size, dec!(3));
        assert_eq!(merged.bought_value, dec!(305));
        assert_eq!(merged.sold_size, dec!(3));
        assert_eq!(merged.sold_value, dec!(340));
    }

    #[test]
    fn budget_is_the_sum_of_buy_value_across_pairs() {
        let pairs = vec![pair(dec!(100), dec!(110)), pair(dec!(110), dec!(120))];
        assert_eq!(budget(&pairs), dec!(100) + dec!(110));
    }
}
