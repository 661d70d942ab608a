//! Trader dispatch (§9 "Dynamic polymorphism"): the one place a job's `uid` is resolved to a
//! concrete trader model, and the one place a job's status is read back out. Generalizes the
//! teacher's `Trader<EventTx, ...>`/`TraderLego` pattern (`barter/src/engine/trader.rs`) from "one
//! strategy behind one engine event loop" to "four fixed trader models behind one job runner".

/// Limiter: a single auto-cancelling limit point.
pub mod limiter;

/// Looper: a buy/sell pair run as a repeating cycle.
pub mod looper;

/// Waller: a grid of Loopers plus derived Summary/budget accounting.
pub mod waller;

/// Watcher: a read-only simulated pair grid.
pub mod watcher;

pub use limiter::{Limiter, LimiterState};
pub use looper::{Looper, LooperState};
pub use waller::{Period, Summary, Waller, WallerState};
pub use watcher::{Watcher, WatcherState};

use crate::job::TraderType;
use rampart_execution::ProductAdapter;
use rampart_integration::{error::Error, kv::Kv};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Unifies the four trader models behind one `run` entry point so [`crate::job::JobRunner::resume`]
/// never has to know which kind of job it is driving.
pub enum Trader {
    Limiter(Limiter),
    Looper(Looper),
    Waller(Waller),
    Watcher(Watcher),
}

impl Trader {
    pub fn typename(&self) -> TraderType {
        match self {
            Self::Limiter(_) => TraderType::Limiter,
            Self::Looper(_) => TraderType::Looper,
            Self::Waller(_) => TraderType::Waller,
            Self::Watcher(_) => TraderType::Watcher,
        }
    }

    pub async fn run(self, cancellation: CancellationToken) -> Result<(), Error> {
        match self {
            Self::Limiter(trader) => trader.run(cancellation).await,
            Self::Looper(trader) => trader.run(cancellation).await,
            Self::Waller(trader) => trader.run(cancellation).await,
            Self::Watcher(trader) => trader.run(cancellation).await,
        }
    }
}

/// Reconstructs a [`Trader`] purely from `typename` + persisted KV state, for resuming a job
/// after a restart: no fresh construction parameters (points, pairs, fee) are needed since a
/// previously-persisted job already has them.
pub fn rebuild(typename: TraderType, uid: Uuid, adapter: Arc<ProductAdapter>, kv: Arc<dyn Kv>) -> Result<Trader, Error> {
    Ok(match typename {
        TraderType::Limiter => Trader::Limiter(Limiter::resume(uid, adapter, kv)?),
        TraderType::Looper => Trader::Looper(Looper::resume(uid, adapter, kv)?),
        TraderType::Waller => Trader::Waller(Waller::resume(uid, adapter, kv)?),
        TraderType::Watcher => Trader::Watcher(Watcher::resume(uid, adapter, kv)?),
    })
}

/// The trader-specific slice of a `job query`/`job list` response.
#[derive(Debug, Clone, PartialEq)]
pub enum TraderStatus {
    Limiter { filled: Decimal, target: Decimal },
    Looper { iteration: u64 },
    Waller { summary: Summary, budget: Decimal },
    Watcher { summary: Summary },
}

/// Reads a job's trader-specific status straight from the KV, without constructing a
/// `ProductAdapter` (and therefore without a live exchange connection). Returns `None` if no
/// state has been persisted yet for `uid` under `typename`.
pub fn status(kv: &Arc<dyn Kv>, uid: Uuid, typename: TraderType) -> Result<Option<TraderStatus>, Error> {
    match typename {
        TraderType::Limiter => Ok(LimiterState::load(kv, uid)?.map(|state| TraderStatus::Limiter {
            filled: state.total_filled(),
            target: state.point.size,
        })),
        TraderType::Looper => {
            Ok(LooperState::load(kv, uid)?.map(|state| TraderStatus::Looper { iteration: state.iteration }))
        }
        TraderType::Waller => {
            let Some(state) = WallerState::load(kv, uid)? else { return Ok(None) };
            let summary = waller::compute_summary(kv, &state.looper_uids, None)?;
            let budget = waller::budget(&state.pairs);
            Ok(Some(TraderStatus::Waller { summary, budget }))
        }
        TraderType::Watcher => {
            Ok(WatcherState::load(kv, uid)?.map(|state| TraderStatus::Watcher { summary: state.summary(None) }))
        }
    }
}
