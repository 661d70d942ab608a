use rampart_execution::{AdapterOptions, CreateFault, ProductAdapter, SimulatedExchangeClient};
use rampart_instrument::market::Product;
use rampart_integration::messenger::NullMessenger;
use rust_decimal_macros::dec;
use std::{sync::Arc, time::Duration};
use uuid::Uuid;

fn product() -> Product {
    Product::new("BTC-USD")
}

/// Scenario 1 (§8): calling `limit_buy` twice with the same `client_id` returns the same order
/// both times, and the second call never reaches the exchange client.
#[tokio::test]
async fn dedup_on_create_retry() {
    let client = Arc::new(SimulatedExchangeClient::new(product(), dec!(100), dec!(0)));
    let adapter = ProductAdapter::new(
        "sim",
        product(),
        client,
        Arc::new(NullMessenger),
        AdapterOptions::default(),
    )
    .await
    .expect("adapter construction");

    let client_id = rampart_execution::ClientOrderId::random();

    let first = adapter
        .limit_buy(client_id, dec!(1), dec!(100))
        .await
        .expect("first create succeeds");
    assert_eq!(first.status, rampart_execution::OrderStatus::New);

    let second = adapter
        .limit_buy(client_id, dec!(1), dec!(100))
        .await
        .expect("second call returns the cached order");

    assert_eq!(first.server_id, second.server_id);
    assert_eq!(first.client_id, second.client_id);
}

/// Scenario 2 (§8): an unknown-outcome create is reconciled in the background via
/// `cancel_order_by_client_id`; once the exchange reports not-found, the client id converges to
/// cancelled, and a later retry with the same client id never creates a second order.
#[tokio::test(flavor = "multi_thread")]
async fn failed_create_is_reconciled_to_canceled() {
    let client = Arc::new(SimulatedExchangeClient::new(product(), dec!(100), dec!(0)));
    let adapter = ProductAdapter::new(
        "sim",
        product(),
        Arc::clone(&client) as Arc<dyn rampart_execution::ExchangeClient>,
        Arc::new(NullMessenger),
        AdapterOptions::default(),
    )
    .await
    .expect("adapter construction");

    client.arm_fault(CreateFault::TimeoutAndNotAccepted);

    let client_id = rampart_execution::ClientOrderId::random();
    let result = adapter.limit_buy(client_id, dec!(1), dec!(100)).await;
    assert!(result.is_err(), "timeout is surfaced to the caller");

    let mut canceled = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if let Err(err) = adapter.limit_buy(client_id, dec!(1), dec!(100)).await {
            if err.to_string().contains("cancelled before it created an order") {
                canceled = true;
                break;
            }
        }
    }

    assert!(canceled, "client id should converge to cancelled within the retry loop");
}

/// A deterministic client id derived from the same `(uid, seed, offset)` is always identical,
/// which is what lets a crash-then-replay reissue the same idempotency key.
#[test]
fn deterministic_client_id_is_stable() {
    let uid = Uuid::new_v4();
    let seed = Uuid::new_v4();

    let a = rampart_execution::ClientOrderId::deterministic(uid, seed, 7);
    let b = rampart_execution::ClientOrderId::deterministic(uid, seed, 7);
    let c = rampart_execution::ClientOrderId::deterministic(uid, seed, 8);

    assert_eq!(a, b);
    assert_ne!(a, c);
}
