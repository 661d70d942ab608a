//! The Product Adapter (§4.3): the hardest part of the core. Per `(exchange, product)` it gives
//! traders a small façade — `limit_buy`/`limit_sell`/`get`/`cancel` plus two streams — and
//! implements the recovery guarantees that let traders be durable: dedup on `ClientOrderId`,
//! recovery-on-start, the order-update watcher, the refresh reconciler, and failed-create
//! recovery.
use crate::{
    client::{Bbo, ExchangeClient},
    order::{ClientOrderId, CreateOrderRequest, Order, OrderId, OrderStatus},
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use rampart_instrument::{market::Product, point::Side};
use rampart_integration::{channel::Receiver as TopicReceiver, channel::Topic, error::Error, messenger::Messenger};
use rust_decimal::Decimal;
use std::{sync::Arc, time::Duration};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct AdapterOptions {
    /// How far back recovery-on-start looks for pre-existing orders to prime the dedup map.
    pub lookback: Duration,
    pub refresh_orders_interval: Duration,
    pub batch_query_orders_size: usize,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        Self {
            lookback: Duration::from_secs(24 * 60 * 60),
            refresh_orders_interval: Duration::from_secs(30),
            batch_query_orders_size: 25,
        }
    }
}

/// The adapter's per-`ClientOrderId` record of what it has seen or attempted. Guarded by its own
/// `tokio::sync::Mutex`, held for the full duration of a create attempt so a concurrent retry
/// observes either the in-flight attempt's conclusion or blocks until it does.
#[derive(Debug, Clone)]
struct ClientIdRecord {
    state: ClientIdState,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
enum ClientIdState {
    /// No create attempt has run yet for this `ClientOrderId`.
    Unresolved,
    /// Create failed with an unknown outcome (network/timeout); the failed-create recovery task
    /// is reconciling it. Retries observe this same error without re-attempting the create.
    Recovering(Error),
    Succeeded(Order),
    /// Create failed with a definite, non-recoverable outcome (`NoFund`/`Invalid`).
    Failed(Error),
    /// Terminal: the failed-create reconciler has concluded either that the order never existed
    /// (`order: None`) or that it existed and has since been cancelled (`order: Some`).
    Canceled { order: Option<Order> },
}

struct AdapterInner {
    exchange: String,
    product: Product,
    client: Arc<dyn ExchangeClient>,
    messenger: Arc<dyn Messenger>,
    options: AdapterOptions,
    client_ids: DashMap<ClientOrderId, Arc<AsyncMutex<ClientIdRecord>>>,
    server_to_client: DashMap<OrderId, ClientOrderId>,
    order_topic: Topic<Order>,
    price_topic: Topic<Bbo>,
    failed_creates_tx: mpsc::UnboundedSender<ClientOrderId>,
    refresh_tx: mpsc::UnboundedSender<OrderId>,
    cancellation: CancellationToken,
}

/// Per-`(exchange, product)` façade over an [`ExchangeClient`] providing at-most-once order
/// creation.
#[derive(Clone)]
pub struct ProductAdapter {
    inner: Arc<AdapterInner>,
}

impl std::fmt::Debug for ProductAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProductAdapter")
            .field("exchange", &self.inner.exchange)
            .field("product", &self.inner.product)
            .finish()
    }
}

impl ProductAdapter {
    pub async fn new(
        exchange: impl Into<String>,
        product: Product,
        client: Arc<dyn ExchangeClient>,
        messenger: Arc<dyn Messenger>,
        options: AdapterOptions,
    ) -> Result<Self, Error> {
        let exchange = exchange.into();
        client.watch_market(&product).await?;

        let (failed_creates_tx, failed_creates_rx) = mpsc::unbounded_channel();
        let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(AdapterInner {
            exchange,
            product,
            client,
            messenger,
            options,
            client_ids: DashMap::new(),
            server_to_client: DashMap::new(),
            order_topic: Topic::new(),
            price_topic: Topic::new(),
            failed_creates_tx,
            refresh_tx,
            cancellation: CancellationToken::new(),
        });

        recover_on_start(&inner).await?;

        tokio::spawn(run_order_update_watcher(Arc::clone(&inner)));
        tokio::spawn(run_refresh_reconciler(Arc::clone(&inner), refresh_rx));
        tokio::spawn(run_failed_create_recovery(Arc::clone(&inner), failed_creates_rx));
        tokio::spawn(run_price_forwarder(Arc::clone(&inner)));

        Ok(Self { inner })
    }

    pub fn product(&self) -> &Product {
        &self.inner.product
    }

    pub async fn limit_buy(&self, client_id: ClientOrderId, size: Decimal, price: Decimal) -> Result<Order, Error> {
        self.limit(Side::Buy, client_id, size, price).await
    }

    pub async fn limit_sell(&self, client_id: ClientOrderId, size: Decimal, price: Decimal) -> Result<Order, Error> {
        self.limit(Side::Sell, client_id, size, price).await
    }

    async fn limit(&self, side: Side, client_id: ClientOrderId, size: Decimal, price: Decimal) -> Result<Order, Error> {
        let entry = self
            .inner
            .client_ids
            .entry(client_id)
            .or_insert_with(|| {
                Arc::new(AsyncMutex::new(ClientIdRecord {
                    state: ClientIdState::Unresolved,
                    created_at: Utc::now(),
                }))
            })
            .clone();

        // Held for the full create attempt: a concurrent retry blocks here until this call
        // concludes, then observes the stored outcome instead of racing a second create.
        let mut record = entry.lock().await;

        match &record.state {
            ClientIdState::Succeeded(order) => return Ok(order.clone()),
            ClientIdState::Failed(err) | ClientIdState::Recovering(err) => return Err(err.clone()),
            ClientIdState::Canceled { order: Some(order) } => return Ok(order.clone()),
            ClientIdState::Canceled { order: None } => {
                return Err(Error::not_exist(format!("client_id {client_id} was cancelled before it created an order")));
            }
            ClientIdState::Unresolved => {}
        }

        let request = CreateOrderRequest { client_id, side, size, price };

        match self.inner.client.create_order(&self.inner.product, request).await {
            Ok(order) => {
                self.inner
                    .server_to_client
                    .insert(order.server_id.clone(), client_id);
                record.state = ClientIdState::Succeeded(order.clone());
                self.inner.order_topic.send(order.clone());
                Ok(order)
            }
            Err(err @ (Error::NoFund(_) | Error::Invalid(_))) => {
                record.state = ClientIdState::Failed(err.clone());
                Err(err)
            }
            Err(err) => {
                warn!(exchange = %self.inner.exchange, product = %self.inner.product, %client_id, error = %err, "create order failed with unknown outcome, queueing cancel-by-client-id recovery");
                record.state = ClientIdState::Recovering(err.clone());
                let _ = self.inner.failed_creates_tx.send(client_id);
                Err(err)
            }
        }
    }

    pub async fn get(&self, server_id: &OrderId) -> Result<Order, Error> {
        if let Some(client_id) = self.inner.server_to_client.get(server_id).map(|r| *r) {
            if let Some(entry) = self.inner.client_ids.get(&client_id) {
                let record = entry.lock().await;
                if let ClientIdState::Succeeded(order) | ClientIdState::Canceled { order: Some(order) } = &record.state {
                    return Ok(order.clone());
                }
            }
        }

        self.inner.client.get_order(&self.inner.product, server_id).await
    }

    /// Cancels the order, returning the resulting state immediately rather than requiring the
    /// caller to wait on [`ProductAdapter::order_updates`]: zero-fill cancels are known terminal
    /// as soon as the exchange acknowledges them, so there is no reason to make callers round-trip
    /// through the topic for the common case.
    pub async fn cancel(&self, server_id: &OrderId) -> Result<Order, Error> {
        let order = self.inner.client.cancel_order(&self.inner.product, server_id).await?;

        if order.filled_size == Decimal::ZERO {
            Ok(self.synthesize_canceled(order).await)
        } else {
            let _ = self.inner.refresh_tx.send(server_id.clone());
            Ok(order)
        }
    }

    async fn synthesize_canceled(&self, order: Order) -> Order {
        let client_id = order.client_id;
        self.inner
            .server_to_client
            .insert(order.server_id.clone(), client_id);

        let entry = self
            .inner
            .client_ids
            .entry(client_id)
            .or_insert_with(|| {
                Arc::new(AsyncMutex::new(ClientIdRecord {
                    state: ClientIdState::Unresolved,
                    created_at: Utc::now(),
                }))
            })
            .clone();

        let mut record = entry.lock().await;
        let mut order = order;
        order.status = OrderStatus::Canceled;
        order.mark_done(Utc::now(), "cancelled with zero fill, synthesized locally");
        record.state = ClientIdState::Succeeded(order.clone());
        self.inner.order_topic.send(order.clone());
        order
    }

    /// Unbounded, coalesces-on-overflow.
    pub fn order_updates(&self) -> TopicReceiver<Order> {
        self.inner.order_topic.subscribe(1024, true)
    }

    /// `bufferSize=1`, latest-only.
    pub fn price_updates(&self) -> TopicReceiver<Bbo> {
        self.inner.price_topic.subscribe(1, true)
    }

    pub async fn close(&self) -> Result<(), Error> {
        self.inner.cancellation.cancel();
        self.inner.order_topic.close();
        self.inner.price_topic.close();
        self.inner.client.unwatch_market(&self.inner.product).await
    }
}

/// Primes the in-memory dedup map from recently finished/pending orders so that a restart never
/// reissues a create for a `ClientOrderId` the exchange already has an order for. Values older
/// than `options.lookback` are assumed not to conflict with newly generated client ids, which are
/// UUIDs and therefore collision-free by construction.
async fn recover_on_start(inner: &Arc<AdapterInner>) -> Result<(), Error> {
    let since = Utc::now() - ChronoDuration::from_std(inner.options.lookback).unwrap_or(ChronoDuration::zero());
    let orders = inner.client.list_recent_orders(&inner.product, since).await?;

    for order in orders {
        inner
            .server_to_client
            .insert(order.server_id.clone(), order.client_id);
        inner.client_ids.insert(
            order.client_id,
            Arc::new(AsyncMutex::new(ClientIdRecord {
                state: ClientIdState::Succeeded(order.clone()),
                created_at: order.created_at,
            })),
        );
    }

    info!(
        exchange = %inner.exchange,
        product = %inner.product,
        primed = inner.client_ids.len(),
        "primed dedup map from recovery-on-start"
    );

    Ok(())
}

/// Subscribes to the exchange client's order-topic for this market and updates local status
/// under the per-`ClientOrderId` mutex whenever an update names a known `client_id`.
async fn run_order_update_watcher(inner: Arc<AdapterInner>) {
    let updates = inner.client.order_updates(&inner.product);
    loop {
        tokio::select! {
            _ = inner.cancellation.cancelled() => return,
            received = updates.receive() => {
                let Ok(update) = received else { return };
                if let Some(entry) = inner.client_ids.get(&update.client_id) {
                    let entry = entry.clone();
                    let mut record = entry.lock().await;
                    if let ClientIdState::Succeeded(order) = &mut record.state {
                        *order = update.clone();
                    }
                    inner.order_topic.send(update);
                }
            }
        }
    }
}

async fn run_price_forwarder(inner: Arc<AdapterInner>) {
    let updates = inner.client.price_updates(&inner.product);
    loop {
        tokio::select! {
            _ = inner.cancellation.cancelled() => return,
            received = updates.receive() => {
                let Ok(bbo) = received else { return };
                inner.price_topic.send(bbo);
            }
        }
    }
}

/// Every `refresh_orders_interval`, re-queries every locally tracked, non-terminal order in
/// batches of `batch_query_orders_size`; a `cancel()` whose order had a non-zero fill also kicks
/// this loop early for just that order via `refresh_rx`.
async fn run_refresh_reconciler(inner: Arc<AdapterInner>, mut refresh_rx: mpsc::UnboundedReceiver<OrderId>) {
    let mut interval = tokio::time::interval(inner.options.refresh_orders_interval);

    loop {
        tokio::select! {
            _ = inner.cancellation.cancelled() => return,
            _ = interval.tick() => reconcile_all(&inner).await,
            Some(server_id) = refresh_rx.recv() => reconcile_one(&inner, &server_id).await,
        }
    }
}

async fn reconcile_all(inner: &Arc<AdapterInner>) {
    let pending: Vec<OrderId> = inner
        .server_to_client
        .iter()
        .filter_map(|entry| {
            let client_id = *entry.value();
            let record = inner.client_ids.get(&client_id)?;
            let status = match &record.try_lock().ok()?.state {
                ClientIdState::Succeeded(order) if !order.status.is_terminal() => Some(order.server_id.clone()),
                _ => None,
            };
            status
        })
        .collect();

    for batch in pending.chunks(inner.options.batch_query_orders_size) {
        match inner.client.batch_query_orders(&inner.product, batch).await {
            Ok(orders) => {
                for order in orders {
                    apply_reconciled_order(inner, order).await;
                }
            }
            Err(err) => {
                debug!(exchange = %inner.exchange, product = %inner.product, error = %err, "refresh reconciler batch query failed, will retry next interval");
            }
        }
    }
}

async fn reconcile_one(inner: &Arc<AdapterInner>, server_id: &OrderId) {
    match inner.client.get_order(&inner.product, server_id).await {
        Ok(order) => apply_reconciled_order(inner, order).await,
        Err(Error::NotExist(_)) => mark_not_found_canceled(inner, server_id).await,
        Err(err) => {
            debug!(exchange = %inner.exchange, product = %inner.product, %server_id, error = %err, "reconciliation of single order failed, will retry on next interval");
        }
    }
}

async fn apply_reconciled_order(inner: &Arc<AdapterInner>, order: Order) {
    let Some(client_id) = inner.server_to_client.get(&order.server_id).map(|r| *r) else {
        return;
    };
    let Some(entry) = inner.client_ids.get(&client_id) else { return };
    let entry = entry.clone();
    let mut record = entry.lock().await;
    record.state = ClientIdState::Succeeded(order.clone());
    inner.order_topic.send(order);
}

/// An exchange that discards zero-filled cancelled orders is common and must be tolerated: treat
/// not-found as cancelled locally.
async fn mark_not_found_canceled(inner: &Arc<AdapterInner>, server_id: &OrderId) {
    let Some(client_id) = inner.server_to_client.get(server_id).map(|r| *r) else {
        return;
    };
    let Some(entry) = inner.client_ids.get(&client_id) else { return };
    let entry = entry.clone();
    let mut record = entry.lock().await;
    if let ClientIdState::Succeeded(order) = &mut record.state {
        order.status = OrderStatus::Canceled;
        order.mark_done(Utc::now(), "not found on reconciliation, assumed cancelled");
        inner.order_topic.send(order.clone());
    }
}

/// Drains the failed-creates queue, calling `cancel_order_by_client_id` with exponential backoff
/// (1s, 2s, 4s, ... cap 64s) until the outcome is known.
async fn run_failed_create_recovery(inner: Arc<AdapterInner>, mut rx: mpsc::UnboundedReceiver<ClientOrderId>) {
    const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
    const MAX_BACKOFF: Duration = Duration::from_secs(64);

    loop {
        let client_id = tokio::select! {
            _ = inner.cancellation.cancelled() => return,
            received = rx.recv() => match received {
                Some(client_id) => client_id,
                None => return,
            },
        };

        let mut backoff = INITIAL_BACKOFF;
        loop {
            match inner
                .client
                .cancel_order_by_client_id(&inner.product, client_id)
                .await
            {
                Ok(order) => {
                    if order.filled_size > Decimal::ZERO {
                        warn!(exchange = %inner.exchange, product = %inner.product, %client_id, filled_size = %order.filled_size, "recovered order from an unknown-outcome create had a non-zero fill");
                        inner.messenger.send_message(
                            Utc::now(),
                            format!(
                                "{} {}: client_id {client_id} recovered with non-zero fill {}",
                                inner.exchange, inner.product, order.filled_size
                            ),
                        );
                    }
                    finish_recovery(&inner, client_id, Some(order)).await;
                    break;
                }
                Err(Error::NotExist(_)) => {
                    finish_recovery(&inner, client_id, None).await;
                    break;
                }
                Err(err) => {
                    debug!(exchange = %inner.exchange, product = %inner.product, %client_id, error = %err, backoff = ?backoff, "failed-create recovery attempt failed, backing off");
                    tokio::select! {
                        _ = inner.cancellation.cancelled() => return,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }
}

async fn finish_recovery(inner: &Arc<AdapterInner>, client_id: ClientOrderId, order: Option<Order>) {
    let Some(entry) = inner.client_ids.get(&client_id) else { return };
    let entry = entry.clone();
    let mut record = entry.lock().await;

    if let Some(order) = &order {
        inner
            .server_to_client
            .insert(order.server_id.clone(), client_id);
        inner.order_topic.send(order.clone());
    }

    record.state = ClientIdState::Canceled { order };
}
