#![forbid(unsafe_code)]
#![warn(missing_debug_implementations, rust_2018_idioms)]

//! # Rampart-Engine
//! The durable Job Runner, the Naming index, and the four trader models (Limiter, Looper, Waller,
//! Watcher) that together keep a grid of order-placing loops alive across restarts.
//!
//! Grounded in the teacher's engine/system split (`barter/src/engine/mod.rs`,
//! `barter/src/system/mod.rs`): one supervisor over many independently pausable/cancelable tasks,
//! generalized here from "one engine" to "one task per job".

/// The durable job supervisor (`JobRunner`) and its persisted record (`JobData`/`JobState`).
pub mod job;

/// The operator-name ↔ `(uid, typename)` index (`Naming`).
pub mod naming;

/// The four trader models and the dispatch point that unifies them (`Trader`).
pub mod trader;

/// The price-replay simulator (`Simulator`) that anchors Pair semantics independent of any
/// real exchange.
pub mod simulator;

pub use job::{JobData, JobFlags, JobRunner, JobState, TraderType};
pub use naming::{NameEntry, Naming};
pub use simulator::{SimulatedFill, Simulator};
pub use trader::{rebuild, Trader, TraderStatus};
