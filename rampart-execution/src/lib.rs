#![forbid(unsafe_code)]
#![warn(missing_debug_implementations, rust_2018_idioms)]

//! # Rampart-Execution
//! Streams prices and order updates from a venue and places orders through a client-order-id
//! dedup layer that gives traders at-most-once order creation over an unreliable network (§4.2,
//! §4.3).

/// `Order`, `ClientOrderId`, `OrderId`, `OrderStatus`, `CreateOrderRequest`.
pub mod order;

/// The `ExchangeClient` contract and `ClockSync`.
pub mod client;

/// `ProductAdapter`: dedup, recovery-on-start, the refresh reconciler, failed-create recovery.
pub mod adapter;

/// An in-memory `ExchangeClient` for tests.
pub mod simulated;

pub use adapter::{AdapterOptions, ProductAdapter};
pub use client::{Bbo, ClockSync, ExchangeClient, MarketInfo, MarketStatus};
pub use order::{ClientOrderId, CreateOrderRequest, Order, OrderId, OrderStatus};
pub use simulated::{CreateFault, SimulatedExchangeClient};
