//! End-to-end scenarios 3 and 4 (§8). Scenarios 1-2 live in `rampart-execution/tests/adapter.rs`
//! (they only exercise the adapter, not a job); scenarios 5-6 are covered as worked-example unit
//! tests in `trader/waller.rs` and `pair.rs` respectively, since they check pure accounting math
//! rather than a running job.
use rampart_engine::trader::{rebuild, Limiter, Waller};
use rampart_engine::{JobFlags, JobRunner, JobState, TraderType};
use rampart_execution::{AdapterOptions, CreateFault, ProductAdapter, SimulatedExchangeClient};
use rampart_instrument::market::Product;
use rampart_instrument::pair::Pair;
use rampart_instrument::point::Point;
use rampart_integration::{kv::Kv, kv::MemoryKv, messenger::NullMessenger};
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn product() -> Product {
    Product::new("BTC-USD")
}

async fn adapter(client: Arc<SimulatedExchangeClient>) -> Arc<ProductAdapter> {
    Arc::new(
        ProductAdapter::new(
            "sim",
            product(),
            client as Arc<dyn rampart_execution::ExchangeClient>,
            Arc::new(NullMessenger),
            AdapterOptions::default(),
        )
        .await
        .expect("adapter construction"),
    )
}

/// Scenario 4 (§8): a BUY Limiter with `{size: 1, price: 100, cancel: 110}` places at 105,
/// auto-cancels once the ticker leaves `[100, 110)` at 111, then places a fresh order (with a
/// different `ClientOrderId`, since the persisted offset only ever advances) once the ticker
/// re-enters the band at 109.
#[tokio::test(flavor = "multi_thread")]
async fn limiter_auto_cancels_outside_its_band_and_reenters_with_a_new_client_id() {
    let client = Arc::new(SimulatedExchangeClient::new(product(), dec!(100), dec!(0)));
    let adapter = adapter(Arc::clone(&client)).await;
    let kv: Arc<dyn Kv> = Arc::new(MemoryKv::new());

    let uid = Uuid::new_v4();
    let point = Point::new(dec!(1), dec!(100), dec!(110)).expect("valid point");
    let limiter = Limiter::new(uid, Arc::clone(&adapter), Arc::clone(&kv), point).expect("limiter construction");

    let cancellation = CancellationToken::new();
    let task_cancellation = cancellation.clone();
    let handle = tokio::spawn(async move { limiter.run(task_cancellation).await });

    // Enter the band: places the first order.
    client.set_ticker(dec!(105));
    tokio::time::sleep(Duration::from_millis(100)).await;

    let state = rampart_engine::trader::limiter::LimiterState::load(&kv, uid)
        .expect("load state")
        .expect("state persisted");
    assert_eq!(state.orders.len(), 1, "one order placed once the ticker entered the band");
    let first_client_id = state.orders[0].client_id;

    // Leave the band above `cancel`: the live order is cancelled.
    client.set_ticker(dec!(111));
    tokio::time::sleep(Duration::from_millis(100)).await;

    let state = rampart_engine::trader::limiter::LimiterState::load(&kv, uid)
        .expect("load state")
        .expect("state persisted");
    assert_eq!(state.orders.len(), 1, "no new order is placed while outside the band");
    assert!(
        state.orders[0].status.is_terminal(),
        "the order left resting outside the band should have been cancelled: {:?}",
        state.orders[0].status
    );

    // Re-enter the band below `cancel`: a fresh order is placed with a new client id.
    client.set_ticker(dec!(109));
    tokio::time::sleep(Duration::from_millis(100)).await;

    let state = rampart_engine::trader::limiter::LimiterState::load(&kv, uid)
        .expect("load state")
        .expect("state persisted");
    assert_eq!(state.orders.len(), 2, "re-entering the band places a second order");
    let second_client_id = state.orders[1].client_id;
    assert_ne!(
        first_client_id, second_client_id,
        "the offset-derived client id must never repeat across orders"
    );

    cancellation.cancel();
    let _ = handle.await;
}

/// A `NoFund` create result must not permanently block the point: the adapter caches the
/// rejected clientId's outcome as terminal, so the Limiter has to advance to a fresh clientId
/// before its next attempt or it would replay the same cached failure forever.
#[tokio::test(flavor = "multi_thread")]
async fn limiter_retries_with_a_fresh_client_id_after_a_no_fund_rejection() {
    let client = Arc::new(SimulatedExchangeClient::new(product(), dec!(100), dec!(0)));
    let adapter = adapter(Arc::clone(&client)).await;
    let kv: Arc<dyn Kv> = Arc::new(MemoryKv::new());

    let uid = Uuid::new_v4();
    let point = Point::new(dec!(1), dec!(100), dec!(110)).expect("valid point");
    let limiter = Limiter::new(uid, Arc::clone(&adapter), Arc::clone(&kv), point).expect("limiter construction");

    let cancellation = CancellationToken::new();
    let task_cancellation = cancellation.clone();
    let handle = tokio::spawn(async move { limiter.run(task_cancellation).await });

    client.arm_fault(CreateFault::NoFund);
    client.set_ticker(dec!(105));
    tokio::time::sleep(Duration::from_millis(100)).await;

    let state = rampart_engine::trader::limiter::LimiterState::load(&kv, uid)
        .expect("load state")
        .expect("state persisted");
    assert!(state.orders.is_empty(), "a NoFund rejection never records an order");
    assert_eq!(state.next_offset, 1, "the offset must advance so the next attempt uses a fresh clientId");

    // Funds return: the next price tick retries with the advanced offset's clientId and succeeds.
    client.set_ticker(dec!(104));
    tokio::time::sleep(Duration::from_millis(100)).await;

    let state = rampart_engine::trader::limiter::LimiterState::load(&kv, uid)
        .expect("load state")
        .expect("state persisted");
    assert_eq!(state.orders.len(), 1, "the retry places an order once funds are available");

    cancellation.cancel();
    let _ = handle.await;
}

/// Scenario 3 (§8): pausing a Waller persists `Paused` with `needsManualResume` set before
/// returning; a fresh `JobRunner` constructed over the same KV (standing in for a process
/// restart) must not auto-resume it, and only an explicit resume clears the flag and moves the
/// job back to `Running`.
#[tokio::test(flavor = "multi_thread")]
async fn waller_pause_survives_a_restart_and_only_resumes_on_explicit_request() {
    let client = Arc::new(SimulatedExchangeClient::new(product(), dec!(100), dec!(0)));
    let adapter = adapter(Arc::clone(&client)).await;
    let kv: Arc<dyn Kv> = Arc::new(MemoryKv::new());

    let uid = Uuid::new_v4();
    let pairs = vec![
        Pair::new(
            Point::new(dec!(1), dec!(100), dec!(105)).unwrap(),
            Point::new(dec!(1), dec!(110), dec!(105)).unwrap(),
        )
        .unwrap(),
        Pair::new(
            Point::new(dec!(1), dec!(90), dec!(95)).unwrap(),
            Point::new(dec!(1), dec!(100), dec!(95)).unwrap(),
        )
        .unwrap(),
    ];

    let runner = JobRunner::new(Arc::clone(&kv));
    runner.add(uid, TraderType::Waller).expect("job record created");

    let waller = Waller::new(uid, Arc::clone(&adapter), Arc::clone(&kv), pairs, dec!(0.1)).expect("waller construction");
    let parent = CancellationToken::new();
    runner
        .resume(uid, &parent, move |token| waller.run(token))
        .expect("job starts running");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(runner.get(uid).unwrap().state, JobState::Running);

    let paused_state = runner.pause(uid).await.expect("pause succeeds");
    assert_eq!(paused_state, JobState::Paused);

    let persisted = runner.get(uid).expect("job record exists");
    assert_eq!(persisted.state, JobState::Paused);
    assert!(
        persisted.flags.needs_manual_resume(),
        "an operator pause must set needsManualResume so startup never auto-resumes it"
    );

    // Simulate a restart: a brand new runner over the same durable KV.
    let restarted_runner = JobRunner::new(Arc::clone(&kv));
    let mut resumable = Vec::new();
    restarted_runner
        .scan(
            |job| !job.state.is_terminal() && !job.flags.needs_manual_resume(),
            |job| resumable.push(job.uid),
        )
        .expect("scan succeeds");
    assert!(
        resumable.is_empty(),
        "a job paused with needsManualResume must never be swept up by the startup resume pass"
    );
    assert_eq!(restarted_runner.get(uid).unwrap().state, JobState::Paused);

    // An explicit resume clears the flag and brings the job back to Running, against a fresh
    // root cancellation token, as a restarted process would create.
    let restarted_parent = CancellationToken::new();
    let rebuilt = rebuild(TraderType::Waller, uid, Arc::clone(&adapter), Arc::clone(&kv)).expect("rebuild from persisted state");
    restarted_runner
        .resume(uid, &restarted_parent, move |token| rebuilt.run(token))
        .expect("explicit resume succeeds");

    let resumed = restarted_runner.get(uid).expect("job record exists");
    assert_eq!(resumed.state, JobState::Running);
    assert!(!resumed.flags.needs_manual_resume(), "resume clears needsManualResume");

    restarted_runner.cancel(uid).await.expect("cleanup cancel succeeds");
}
