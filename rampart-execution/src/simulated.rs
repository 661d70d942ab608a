//! An in-memory [`ExchangeClient`] for tests: an exchange of one, with a settable ticker price,
//! configurable fee, and one fault-injection knob for proving the Product Adapter's failed-create
//! recovery. Grounded on the shape of `SimulatedExchange`'s order book matching in the reference
//! execution crate, adapted into a direct trait implementation since `ProductAdapter` talks to an
//! `ExchangeClient`, not an actor mailbox.
use crate::{
    client::{Bbo, ExchangeClient, MarketInfo, MarketStatus},
    order::{ClientOrderId, CreateOrderRequest, Order, OrderId, OrderStatus},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rampart_instrument::{market::Product, point::Side};
use rampart_integration::{channel::Receiver, channel::Topic, error::Error};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex as SyncMutex;

/// Decides how [`SimulatedExchangeClient::create_order`] behaves on its next call, so tests can
/// force the "unknown outcome" path the failed-create reconciler exists for.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum CreateFault {
    #[default]
    None,
    /// Returns an `Internal` error as if the create timed out, but the order was actually
    /// accepted server-side: a concurrent `cancel_order_by_client_id` call will find it.
    TimeoutButAccepted,
    /// Returns an `Internal` error and the order was never accepted: a concurrent
    /// `cancel_order_by_client_id` call will return `NotExist`.
    TimeoutAndNotAccepted,
    /// Returns a definite `NoFund` error; the order was never accepted.
    NoFund,
}

struct SimulatedOrder {
    order: Order,
}

struct State {
    next_id: u64,
    orders: Vec<SimulatedOrder>,
    ticker: Decimal,
    fee_pct: Decimal,
    fault: CreateFault,
}

/// A single-product simulated exchange. `fee_pct` is charged on the filled notional of every
/// order matched by [`SimulatedExchangeClient::set_ticker`].
pub struct SimulatedExchangeClient {
    product: Product,
    state: SyncMutex<State>,
    order_topic: Topic<Order>,
    price_topic: Topic<Bbo>,
    sequence: AtomicU64,
}

impl std::fmt::Debug for SimulatedExchangeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedExchangeClient")
            .field("product", &self.product)
            .finish()
    }
}

impl SimulatedExchangeClient {
    pub fn new(product: Product, starting_ticker: Decimal, fee_pct: Decimal) -> Self {
        Self {
            product,
            state: SyncMutex::new(State {
                next_id: 1,
                orders: Vec::new(),
                ticker: starting_ticker,
                fee_pct,
                fault: CreateFault::None,
            }),
            order_topic: Topic::new(),
            price_topic: Topic::new(),
            sequence: AtomicU64::new(0),
        }
    }

    /// Arms the fault the next `create_order` call returns; consumed on use.
    pub fn arm_fault(&self, fault: CreateFault) {
        self.state.lock().expect("state poisoned").fault = fault;
    }

    /// Moves the ticker and matches any resting orders now in range, publishing fills to
    /// `order_updates` and the new price to `price_updates`.
    pub fn set_ticker(&self, price: Decimal) {
        let fills = {
            let mut state = self.state.lock().expect("state poisoned");
            state.ticker = price;
            let fee_pct = state.fee_pct;

            let mut fills = Vec::new();
            for resting in state.orders.iter_mut() {
                if resting.order.status.is_terminal() {
                    continue;
                }
                let crosses = match resting.order.side {
                    Side::Buy => price <= resting.order.price,
                    Side::Sell => price >= resting.order.price,
                };
                if !crosses {
                    continue;
                }
                resting.order.status = OrderStatus::Filled;
                resting.order.filled_size = resting.order.size;
                resting.order.filled_price = resting.order.price;
                resting.order.fee = resting.order.size * resting.order.price * fee_pct / Decimal::from(100);
                resting.order.mark_done(Utc::now(), "filled against simulated ticker");
                fills.push(resting.order.clone());
            }
            fills
        };

        for fill in fills {
            self.order_topic.send(fill);
        }
        self.price_topic.send(Bbo {
            bid: price,
            offer: price,
            at: Utc::now(),
        });
    }
}

#[async_trait]
impl ExchangeClient for SimulatedExchangeClient {
    async fn get_markets(&self) -> Result<Vec<MarketStatus>, Error> {
        Ok(vec![MarketStatus {
            product: self.product.clone(),
            trading_enabled: true,
        }])
    }

    async fn get_market(&self, product: &Product) -> Result<MarketStatus, Error> {
        if *product != self.product {
            return Err(Error::not_exist(format!("unknown product {product}")));
        }
        Ok(MarketStatus {
            product: product.clone(),
            trading_enabled: true,
        })
    }

    async fn get_market_info(&self, product: &Product) -> Result<MarketInfo, Error> {
        if *product != self.product {
            return Err(Error::not_exist(format!("unknown product {product}")));
        }
        let state = self.state.lock().expect("state poisoned");
        Ok(MarketInfo {
            last_price: state.ticker,
            min_amount: Decimal::ZERO,
        })
    }

    async fn create_order(&self, product: &Product, req: CreateOrderRequest) -> Result<Order, Error> {
        if *product != self.product {
            return Err(Error::not_exist(format!("unknown product {product}")));
        }

        let mut state = self.state.lock().expect("state poisoned");
        let fault = std::mem::take(&mut state.fault);

        let server_id = OrderId(format!("sim-{}", state.next_id));
        state.next_id += 1;

        let order = Order {
            server_id: server_id.clone(),
            client_id: req.client_id,
            side: req.side,
            size: req.size,
            price: req.price,
            status: OrderStatus::New,
            filled_size: Decimal::ZERO,
            filled_price: Decimal::ZERO,
            fee: Decimal::ZERO,
            created_at: Utc::now(),
            done_at: None,
            done: false,
            done_reason: None,
        };

        match fault {
            CreateFault::None => {
                state.orders.push(SimulatedOrder { order: order.clone() });
                drop(state);
                self.order_topic.send(order.clone());
                Ok(order)
            }
            CreateFault::TimeoutButAccepted => {
                state.orders.push(SimulatedOrder { order: order.clone() });
                drop(state);
                Err(Error::internal("simulated timeout (order was actually accepted)"))
            }
            CreateFault::TimeoutAndNotAccepted => {
                drop(state);
                Err(Error::internal("simulated timeout (order was not accepted)"))
            }
            CreateFault::NoFund => {
                drop(state);
                Err(Error::no_fund("simulated insufficient funds"))
            }
        }
    }

    async fn get_order(&self, product: &Product, server_id: &OrderId) -> Result<Order, Error> {
        if *product != self.product {
            return Err(Error::not_exist(format!("unknown product {product}")));
        }
        let state = self.state.lock().expect("state poisoned");
        state
            .orders
            .iter()
            .find(|o| o.order.server_id == *server_id)
            .map(|o| o.order.clone())
            .ok_or_else(|| Error::not_exist(format!("order {server_id} not found")))
    }

    async fn batch_query_orders(&self, product: &Product, ids: &[OrderId]) -> Result<Vec<Order>, Error> {
        if *product != self.product {
            return Err(Error::not_exist(format!("unknown product {product}")));
        }
        let state = self.state.lock().expect("state poisoned");
        Ok(state
            .orders
            .iter()
            .filter(|o| ids.contains(&o.order.server_id))
            .map(|o| o.order.clone())
            .collect())
    }

    async fn cancel_order(&self, product: &Product, server_id: &OrderId) -> Result<Order, Error> {
        if *product != self.product {
            return Err(Error::not_exist(format!("unknown product {product}")));
        }
        let mut state = self.state.lock().expect("state poisoned");
        let found = state
            .orders
            .iter_mut()
            .find(|o| o.order.server_id == *server_id)
            .ok_or_else(|| Error::not_exist(format!("order {server_id} not found")))?;

        if !found.order.status.is_terminal() {
            found.order.status = OrderStatus::Canceled;
            found.order.mark_done(Utc::now(), "cancelled by caller");
        }
        Ok(found.order.clone())
    }

    async fn cancel_order_by_client_id(&self, product: &Product, client_id: ClientOrderId) -> Result<Order, Error> {
        if *product != self.product {
            return Err(Error::not_exist(format!("unknown product {product}")));
        }
        let mut state = self.state.lock().expect("state poisoned");
        let found = state
            .orders
            .iter_mut()
            .find(|o| o.order.client_id == client_id)
            .ok_or_else(|| Error::not_exist(format!("client_id {client_id} not found")))?;

        if !found.order.status.is_terminal() {
            found.order.status = OrderStatus::Canceled;
            found.order.mark_done(Utc::now(), "cancelled by caller");
        }
        Ok(found.order.clone())
    }

    async fn list_recent_orders(&self, product: &Product, since: DateTime<Utc>) -> Result<Vec<Order>, Error> {
        if *product != self.product {
            return Err(Error::not_exist(format!("unknown product {product}")));
        }
        let state = self.state.lock().expect("state poisoned");
        Ok(state
            .orders
            .iter()
            .filter(|o| o.order.created_at >= since)
            .map(|o| o.order.clone())
            .collect())
    }

    async fn watch_market(&self, product: &Product) -> Result<(), Error> {
        if *product != self.product {
            return Err(Error::not_exist(format!("unknown product {product}")));
        }
        self.sequence.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn unwatch_market(&self, _product: &Product) -> Result<(), Error> {
        Ok(())
    }

    fn price_updates(&self, _product: &Product) -> Receiver<Bbo> {
        self.price_topic.subscribe(1, true)
    }

    fn order_updates(&self, _product: &Product) -> Receiver<Order> {
        self.order_topic.subscribe(1024, true)
    }

    async fn close(&self) -> Result<(), Error> {
        self.order_topic.close();
        self.price_topic.close();
        Ok(())
    }
}
