//! In-process publish/subscribe linking every other component.
//!
//! Each topic is promoted to its own typed channel, so the parser -> handler -> fan-out wiring
//! is checked by the compiler instead of by topic-name string matching. Dispatch is synchronous
//! and runs on the publisher's task: `emit_*` calls every registered subscriber in registration
//! order before returning. A subscriber that returns an error is logged and does not stop
//! dispatch to the remaining subscribers.

use crate::model::{AccountState, MintAddress, PoolAddress, PriceSnapshot, Signature, Token, Trade};
use chrono::{DateTime, Utc};
use std::fmt;
use tracing::error;

type SubscriberError = Box<dyn std::error::Error + Send + Sync>;
type SubscriberFn<T> = Box<dyn Fn(&T) -> Result<(), SubscriberError> + Send + Sync>;

/// A single typed topic: a list of subscribers invoked in registration order.
pub struct Topic<T> {
    name: &'static str,
    subscribers: Vec<SubscriberFn<T>>,
}

impl<T> Topic<T> {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            subscribers: Vec::new(),
        }
    }

    pub fn subscribe<F, E>(&mut self, handler: F)
    where
        F: Fn(&T) -> Result<(), E> + Send + Sync + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.subscribers
            .push(Box::new(move |event| handler(event).map_err(|e| Box::new(e) as SubscriberError)));
    }

    pub fn emit(&self, event: T) {
        for subscriber in &self.subscribers {
            if let Err(error) = subscriber(&event) {
                error!(topic = self.name, %error, "subscriber failed, continuing dispatch");
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl<T> fmt::Debug for Topic<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Topic")
            .field("name", &self.name)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

/// Raw upstream frame envelope republished by the stream manager.
#[derive(Debug, Clone)]
pub struct StreamDataEvent {
    pub connection_id: u32,
    pub frame: crate::stream::client::RawFrame,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TradeParsedEvent {
    pub trade: Trade,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgramTradeEvent {
    pub trade: Trade,
    pub token: Token,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TokenDiscoveredEvent {
    pub token: Token,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TokenThresholdCrossedEvent {
    pub mint_address: MintAddress,
    pub market_cap_usd: f64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum GraduationMethod {
    PoolCreation,
    BondingCurveComplete,
    AmmTrade,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TokenGraduatedEvent {
    pub mint_address: MintAddress,
    pub pool_address: PoolAddress,
    pub signature: Option<Signature>,
    pub method: GraduationMethod,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BondingCurveProgressEvent {
    pub mint_address: MintAddress,
    pub progress: f64,
    pub complete: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PriceUpdatedEvent {
    pub mint_address: MintAddress,
    pub price_sol: f64,
    pub price_usd: f64,
    pub market_cap_usd: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PriceSnapshotEvent {
    pub snapshot: PriceSnapshot,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccountStateEvent {
    pub account_state: AccountState,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone)]
pub struct LogEvent {
    pub level: LogLevel,
    pub message: String,
}

/// The closed set of topics the core publishes and consumes.
pub struct EventBus {
    pub stream_data: Topic<StreamDataEvent>,
    pub trade_parsed: Topic<TradeParsedEvent>,
    pub bc_trade: Topic<ProgramTradeEvent>,
    pub amm_trade: Topic<ProgramTradeEvent>,
    pub token_discovered: Topic<TokenDiscoveredEvent>,
    pub token_threshold_crossed: Topic<TokenThresholdCrossedEvent>,
    pub token_graduated: Topic<TokenGraduatedEvent>,
    pub bonding_curve_progress: Topic<BondingCurveProgressEvent>,
    pub price_updated: Topic<PriceUpdatedEvent>,
    pub log: Topic<LogEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self {
            stream_data: Topic::new("stream.data"),
            trade_parsed: Topic::new("trade.parsed"),
            bc_trade: Topic::new("bc.trade"),
            amm_trade: Topic::new("amm.trade"),
            token_discovered: Topic::new("token.discovered"),
            token_threshold_crossed: Topic::new("token.thresholdCrossed"),
            token_graduated: Topic::new("token.graduated"),
            bonding_curve_progress: Topic::new("bondingCurve.progress"),
            price_updated: Topic::new("price.updated"),
            log: Topic::new("log"),
        }
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("stream_data", &self.stream_data.subscriber_count())
            .field("trade_parsed", &self.trade_parsed.subscriber_count())
            .field("bc_trade", &self.bc_trade.subscriber_count())
            .field("amm_trade", &self.amm_trade.subscriber_count())
            .field("token_discovered", &self.token_discovered.subscriber_count())
            .field("token_graduated", &self.token_graduated.subscriber_count())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn dispatches_to_subscribers_in_registration_order() {
        let mut topic: Topic<u32> = Topic::new("test");
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let o1 = order.clone();
        topic.subscribe(move |_: &u32| -> Result<(), Infallible> {
            o1.lock().push(1);
            Ok(())
        });
        let o2 = order.clone();
        topic.subscribe(move |_: &u32| -> Result<(), Infallible> {
            o2.lock().push(2);
            Ok(())
        });

        topic.emit(7);

        assert_eq!(*order.lock(), vec![1, 2]);
    }

    #[test]
    fn a_failing_subscriber_does_not_stop_dispatch_to_the_rest() {
        let mut topic: Topic<u32> = Topic::new("test");
        let calls = Arc::new(AtomicUsize::new(0));

        topic.subscribe(|_: &u32| -> Result<(), std::io::Error> {
            Err(std::io::Error::other("boom"))
        });
        let c = calls.clone();
        topic.subscribe(move |_: &u32| -> Result<(), Infallible> {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        topic.emit(1);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
