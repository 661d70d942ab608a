#![forbid(unsafe_code)]
#![warn(missing_debug_implementations, rust_2018_idioms)]
#![allow(clippy::type_complexity)]

//! # Rampart-Integration
//! Low-level primitives shared across the Rampart trading daemon: the topic bus, the ordered KV
//! store contract, the error taxonomy, and the messenger contract.
//!
//! Nothing in this crate knows about exchanges, traders, or jobs — it is the glue every other
//! Rampart crate is built on top of.

/// The error taxonomy (`Error`) and cancellation cause (`CancelCause`) shared by every crate.
pub mod error;

/// The in-process publish/subscribe topic bus (`Topic`/`Receiver`).
pub mod channel;

/// `OneOrMany`, a small collection helper used throughout the core.
pub mod collection;

/// The ordered KV store contract (`Kv`) plus a durable `sled` implementation and an in-memory one
/// for tests.
pub mod kv;

/// `Snapshot<T>`, a marker wrapper for point-in-time values.
pub mod snapshot;

/// The best-effort notification transport contract (`Messenger`).
pub mod messenger;

pub use rust_decimal::Decimal;
