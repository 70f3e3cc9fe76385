//! Watches for AMM `create_pool` instructions and routes them to the handler's second
//! graduation path, independent of whether a BCTrade for the same mint was ever observed.

use super::SeenWithTtl;
use crate::db::Repository;
use crate::handler::TradeHandler;
use crate::parser::{parse, Event};
use crate::stream::client::RawFrame;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

const DEDUP_TTL: Duration = Duration::from_secs(120);

pub struct PoolCreationMonitor<R: Repository> {
    handler: Arc<TradeHandler<R>>,
    seen: SeenWithTtl,
}

impl<R: Repository> PoolCreationMonitor<R> {
    pub fn new(handler: Arc<TradeHandler<R>>) -> Self {
        Self {
            handler,
            seen: SeenWithTtl::new(DEDUP_TTL),
        }
    }

    /// Feed one raw frame from the `stream.data` topic. Frames other than a `create_pool`
    /// transaction are ignored.
    pub async fn on_frame(&self, frame: &RawFrame) {
        for event in parse(frame) {
            if let Event::PoolCreated(pool_created) = event {
                if !self.seen.insert(pool_created.pool_address.0.clone()) {
                    continue;
                }
                if let Err(err) = self.handler.handle_pool_created(pool_created).await {
                    error!(%err, "failed to handle pool creation event");
                }
            }
        }
    }
}
