#![forbid(unsafe_code)]
#![warn(
    unused,
    missing_debug_implementations,
    rust_2018_idioms,
    clippy::unused_self,
    clippy::useless_let_if_seq
)]
#![allow(clippy::too_many_arguments, clippy::type_complexity)]

//! # Curvestream
//! A real-time ingestion, normalisation and fan-out core for on-chain bonding-curve and AMM
//! token trading activity. It subscribes to a streaming transaction/account feed for a
//! launchpad's bonding-curve program and its companion AMM program, reconstructs a canonical
//! view of each token's lifecycle (discovery -> threshold-crossed -> graduated), persists that
//! view to a relational store in batches, and republishes it on an in-process event bus for a
//! WebSocket fan-out and enrichment services to consume.
//!
//! ## Layout
//! - [`bus`]: typed publish/subscribe linking every other component.
//! - [`stream`]: the upstream connection contract and the manager that drives reconnects,
//!   subscription merging and frame fan-out.
//! - [`parser`]: decodes raw frames into typed trade/lifecycle events.
//! - [`price`]: pure reserve-to-price-to-market-cap arithmetic.
//! - [`handler`]: turns parsed events into token/trade state, enqueues persistence.
//! - [`monitors`]: specialised watchers for pool creation and bonding-curve completion.
//! - [`db`]: the hot cache, the batching writer, and the repository façade over Postgres.
//! - [`runtime`]: wires the above into periodic tasks and a bounded graceful shutdown.
//! - [`config`]: the environment-recognised configuration surface and its defaults.
//! - [`error`]: the crate's error taxonomy and trade-handling outcome types.

pub mod bus;
pub mod config;
pub mod db;
pub mod error;
pub mod handler;
pub mod model;
pub mod monitors;
pub mod parser;
pub mod price;
pub mod runtime;
pub mod stream;

pub use bus::EventBus;
pub use config::Config;
pub use db::{BatchWriter, HotCache, PgRepository, Repository};
pub use error::CoreError;
pub use handler::{HandlerConfig, TradeHandler};
pub use stream::StreamManager;
