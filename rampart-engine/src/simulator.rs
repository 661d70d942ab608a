//! Price-replay simulator (§4.7 "Simulator"): peripheral to the product, but specified because it
//! anchors correctness of the Pair semantics independent of any real exchange. Feeds a sequence of
//! tick prices through a grid of pairs and synthesizes fills without ever touching a
//! `ProductAdapter`.
use rampart_instrument::pair::Pair;
use rust_decimal::Decimal;

/// One pair's position in the simulator: either resting a buy, holding a completed buy while
/// waiting to sell, or idle (ready to buy again for the next cycle).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum PairPhase {
    AwaitingBuy,
    AwaitingSell,
}

/// A single synthesized fill: which pair (by index into the grid), which side, and the profit it
/// realized (non-zero only on the sell leg that closes a loop).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulatedFill {
    pub pair_index: usize,
    pub side: rampart_instrument::point::Side,
    pub price: Decimal,
    pub size: Decimal,
    pub fee: Decimal,
}

#[derive(Debug)]
struct PairState {
    pair: Pair,
    phase: PairPhase,
}

/// Replays a tick sequence against a grid of pairs: buys on descending crossings of `buy.price`,
/// sells on ascending crossings of `sell.price` once that pair's buy is complete. Accumulates
/// profit as `(sell.price - buy.price) * size - buy.fee - sell.fee` per completed loop.
#[derive(Debug)]
pub struct Simulator {
    pairs: Vec<PairState>,
    fee_pct: Decimal,
    last_tick: Option<Decimal>,
    profit: Decimal,
}

impl Simulator {
    pub fn new(pairs: Vec<Pair>, fee_pct: Decimal) -> Self {
        Self {
            pairs: pairs.into_iter().map(|pair| PairState { pair, phase: PairPhase::AwaitingBuy }).collect(),
            fee_pct,
            last_tick: None,
            profit: Decimal::ZERO,
        }
    }

    pub fn profit(&self) -> Decimal {
        self.profit
    }

    /// Feeds one tick price, returning every fill it synthesized (in pair order; at most one fill
    /// per pair per tick).
    pub fn tick(&mut self, price: Decimal) -> Vec<SimulatedFill> {
        let previous = self.last_tick;
        self.last_tick = Some(price);

        let mut fills = Vec::new();

        for (index, state) in self.pairs.iter_mut().enumerate() {
            match state.phase {
                PairPhase::AwaitingBuy => {
                    let crossed = match previous {
                        Some(prev) => prev > state.pair.buy.price && price <= state.pair.buy.price,
                        None => price <= state.pair.buy.price,
                    };
                    if crossed {
                        let fee = state.pair.buy.fee_at(self.fee_pct);
                        fills.push(SimulatedFill {
                            pair_index: index,
                            side: rampart_instrument::point::Side::Buy,
                            price: state.pair.buy.price,
                            size: state.pair.buy.size,
                            fee,
                        });
                        state.phase = PairPhase::AwaitingSell;
                    }
                }
                PairPhase::AwaitingSell => {
                    let crossed = match previous {
                        Some(prev) => prev < state.pair.sell.price && price >= state.pair.sell.price,
                        None => price >= state.pair.sell.price,
                    };
                    if crossed {
                        let buy_fee = state.pair.buy.fee_at(self.fee_pct);
                        let sell_fee = state.pair.sell.fee_at(self.fee_pct);
                        let loop_profit = (state.pair.sell.price - state.pair.buy.price) * state.pair.sell.size
                            - buy_fee
                            - sell_fee;
                        self.profit += loop_profit;

                        fills.push(SimulatedFill {
                            pair_index: index,
                            side: rampart_instrument::point::Side::Sell,
                            price: state.pair.sell.price,
                            size: state.pair.sell.size,
                            fee: sell_fee,
                        });
                        state.phase = PairPhase::AwaitingBuy;
                    }
                }
            }
        }

        fills
    }

    /// Replays an entire tick sequence, returning the final accumulated profit.
    pub fn replay(pairs: Vec<Pair>, fee_pct: Decimal, ticks: impl IntoIterator<Item = Decimal>) -> Decimal {
        let mut sim = Self::new(pairs, fee_pct);
        for tick in ticks {
            sim.tick(tick);
        }
        sim.profit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rampart_instrument::point::Point;
    use rust_decimal_macros::dec;

    fn pair(buy_price: Decimal, sell_price: Decimal) -> Pair {
        let buy = Point::new(dec!(1), buy_price, buy_price + dec!(5)).unwrap();
        let sell = Point::new(dec!(1), sell_price, sell_price - dec!(5)).unwrap();
        Pair::new(buy, sell).unwrap()
    }

    #[test]
    fn single_pair_completes_one_loop_and_accrues_profit() {
        let pairs = vec![pair(dec!(100), dec!(110))];
        let mut sim = Simulator::new(pairs, Decimal::ZERO);

        assert!(sim.tick(dec!(105)).is_empty());
        let buy_fills = sim.tick(dec!(100));
        assert_eq!(buy_fills.len(), 1);
        assert_eq!(buy_fills[0].side, rampart_instrument::point::Side::Buy);

        assert!(sim.tick(dec!(105)).is_empty());
        let sell_fills = sim.tick(dec!(110));
        assert_eq!(sell_fills.len(), 1);
        assert_eq!(sell_fills[0].side, rampart_instrument::point::Side::Sell);

        assert_eq!(sim.profit(), dec!(10));
    }

    #[test]
    fn pair_does_not_sell_before_its_buy_completes() {
        let pairs = vec![pair(dec!(100), dec!(110))];
        let mut sim = Simulator::new(pairs, Decimal::ZERO);

        // Ticker rises straight to the sell price without ever touching the buy price.
        assert!(sim.tick(dec!(105)).is_empty());
        assert!(sim.tick(dec!(110)).is_empty());
        assert_eq!(sim.profit(), Decimal::ZERO);
    }

    #[test]
    fn replay_matches_manual_tick_sequence() {
        let pairs = vec![pair(dec!(100), dec!(110))];
        let profit = Simulator::replay(pairs, Decimal::ZERO, [dec!(105), dec!(100), dec!(105), dec!(110)]);
        assert_eq!(profit, dec!(10));
    }
}
