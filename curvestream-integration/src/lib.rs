#![warn(
    missing_debug_implementations,
    rust_2018_idioms,
    unused
)]

//! Low-level async plumbing shared by the curvestream ingestion components.
//!
//! This crate deliberately knows nothing about Solana, bonding curves or AMMs - it provides the
//! generic building blocks (`Tx` channels, reconnect backoff, rate limiting) that
//! `curvestream-core` assembles into the stream manager, event bus and batch writer.

pub mod channel;
pub mod error;
pub mod rate_limit;
pub mod reconnect;
