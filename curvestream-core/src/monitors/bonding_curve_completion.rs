//! Watches bonding-curve accounts directly for the on-chain `complete` flag flipping true,
//! rather than waiting to infer completion from trade instructions.

use super::SeenWithTtl;
use crate::db::Repository;
use crate::handler::TradeHandler;
use crate::parser::bonding_curve::{BONDING_CURVE_PROGRAM_ID, COMPLETE_FIELD_OFFSET};
use crate::parser::{parse, Event};
use crate::stream::client::{RawFrame, SubscriptionRequest};
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

const DEDUP_TTL: Duration = Duration::from_secs(120);

/// The subscription filter a bonding-curve completion monitor registers with the stream
/// manager: accounts owned by the bonding-curve program whose byte at
/// [`COMPLETE_FIELD_OFFSET`] equals `1`.
pub fn subscription(name: impl Into<String>) -> SubscriptionRequest {
    SubscriptionRequest {
        name: name.into(),
        account_include: vec![],
        account_owner: vec![BONDING_CURVE_PROGRAM_ID.to_string()],
        memcmp_offset: Some(COMPLETE_FIELD_OFFSET),
        memcmp_bytes: Some(vec![1]),
    }
}

pub struct BondingCurveCompletionMonitor<R: Repository> {
    handler: Arc<TradeHandler<R>>,
    seen: SeenWithTtl,
}

impl<R: Repository> BondingCurveCompletionMonitor<R> {
    pub fn new(handler: Arc<TradeHandler<R>>) -> Self {
        Self {
            handler,
            seen: SeenWithTtl::new(DEDUP_TTL),
        }
    }

    pub async fn on_frame(&self, frame: &RawFrame) {
        for event in parse(frame) {
            if let Event::BcAccountUpdate(update) = event {
                if !update.complete {
                    continue;
                }
                if !self.seen.insert(update.bonding_curve_key.clone()) {
                    continue;
                }
                if let Err(err) = self.handler.handle_bc_account_complete(update).await {
                    error!(%err, "failed to handle bonding curve completion");
                }
            }
        }
    }
}
