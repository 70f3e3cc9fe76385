//! TradeHandler: the orchestrator sitting between the parser and
//! persistence. Turns a parsed trade into a priced `Trade` row, resolves the token it belongs
//! to (cache, then repository, then creation), decides whether it clears the save threshold,
//! and fans the result back out onto the event bus.

use crate::bus::{
    EventBus, GraduationMethod, PriceUpdatedEvent, ProgramTradeEvent, TokenDiscoveredEvent,
    TokenGraduatedEvent, TokenThresholdCrossedEvent, TradeParsedEvent,
};
use crate::db::{BatchWriter, HotCache, QueueItem, Repository};
use crate::error::{HandleOutcome, SkipReason};
use crate::model::{
    MintAddress, PoolAddress, PriceSnapshot, Program, ReserveInfo, Signature, Token, TokenMetadata,
    Trade, BONDING_CURVE_TOTAL_SUPPLY,
};
use crate::bus::BondingCurveProgressEvent;
use crate::parser::{AmmTradeEvent, BcAccountUpdateEvent, PoolCreatedEvent, TradeEvent};
use crate::price::{self, CirculatingSupply};
use chrono::Utc;
use fnv::FnvHashSet;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Default token decimals assumed for the bonding-curve fixed-supply convention when the parser
/// has not observed an explicit decimals field (most launches on this platform use 6).
const DEFAULT_TOKEN_DECIMALS: u8 = 6;

/// How many recent signatures the in-memory dedup window remembers before evicting the oldest.
/// Bounds memory; the database's `ON CONFLICT (signature) DO NOTHING` is the real backstop, this
/// is purely an optimisation to avoid enqueuing an obvious duplicate before it reaches the batch
/// writer.
const DEDUP_WINDOW: usize = 50_000;

#[derive(Debug, Clone, Copy)]
pub struct HandlerConfig {
    pub bc_save_threshold_usd: f64,
    pub amm_save_threshold_usd: f64,
    pub save_all_tokens: bool,
}

struct SeenSignatures {
    set: FnvHashSet<Signature>,
    order: VecDeque<Signature>,
}

impl SeenSignatures {
    fn new() -> Self {
        Self {
            set: FnvHashSet::default(),
            order: VecDeque::new(),
        }
    }

    /// Returns `true` if this is the first time the signature has been observed.
    fn insert(&mut self, signature: Signature) -> bool {
        if self.set.contains(&signature) {
            return false;
        }
        self.order.push_back(signature.clone());
        self.set.insert(signature);
        if self.order.len() > DEDUP_WINDOW {
            if let Some(oldest) = self.order.pop_front() {
                self.set.remove(&oldest);
            }
        }
        true
    }
}

pub struct TradeHandler<R: Repository> {
    bus: Arc<EventBus>,
    repository: Arc<R>,
    cache: Arc<HotCache>,
    batch_writer: Arc<BatchWriter>,
    config: HandlerConfig,
    sol_price_usd: std::sync::atomic::AtomicU64,
    pending_trades: parking_lot::Mutex<VecDeque<Trade>>,
    seen_signatures: parking_lot::Mutex<SeenSignatures>,
}

/// Bit-for-bit `f64` stored in an `AtomicU64` so the live SOL price can be updated without
/// locking on the hot trade path.
fn load_price(cell: &AtomicU64) -> f64 {
    f64::from_bits(cell.load(Ordering::Relaxed))
}

fn store_price(cell: &AtomicU64, price: f64) {
    cell.store(price.to_bits(), Ordering::Relaxed);
}

impl<R: Repository> TradeHandler<R> {
    pub fn new(
        bus: Arc<EventBus>,
        repository: Arc<R>,
        cache: Arc<HotCache>,
        batch_writer: Arc<BatchWriter>,
        config: HandlerConfig,
        initial_sol_price_usd: f64,
    ) -> Self {
        Self {
            bus,
            repository,
            cache,
            batch_writer,
            config,
            sol_price_usd: AtomicU64::new(initial_sol_price_usd.to_bits()),
            pending_trades: parking_lot::Mutex::new(VecDeque::new()),
            seen_signatures: parking_lot::Mutex::new(SeenSignatures::new()),
        }
    }

    pub fn update_sol_price(&self, price_usd: f64) {
        store_price(&self.sol_price_usd, price_usd);
    }

    fn save_threshold(&self, program: Program) -> f64 {
        match program {
            Program::BondingCurve => self.config.bc_save_threshold_usd,
            Program::AmmPool => self.config.amm_save_threshold_usd,
        }
    }

    pub async fn handle_bc_trade(&self, event: TradeEvent) -> Result<HandleOutcome, HandlerError> {
        let reserves = ReserveInfo::new(event.virtual_sol_reserves, event.virtual_token_reserves, true);
        let supply = CirculatingSupply::BondingCurveFixedSupply {
            total_supply: BONDING_CURVE_TOTAL_SUPPLY * 10u64.pow(DEFAULT_TOKEN_DECIMALS as u32),
            decimals: DEFAULT_TOKEN_DECIMALS,
        };
        let bonding_curve_key = event.bonding_curve_key.clone();
        self.process(
            event.signature.clone(),
            event.mint_address.clone(),
            Program::BondingCurve,
            event.slot,
            reserves,
            supply,
            Trade {
                signature: event.signature,
                mint_address: event.mint_address,
                program: Program::BondingCurve,
                trade_type: event.trade_type,
                user_address: event.user_address,
                sol_amount: event.sol_amount,
                token_amount: event.token_amount,
                price_sol: 0.0,
                price_usd: 0.0,
                market_cap_usd: 0.0,
                volume_usd: 0.0,
                virtual_sol_reserves: event.virtual_sol_reserves,
                virtual_token_reserves: event.virtual_token_reserves,
                bonding_curve_progress: None,
                slot: event.slot,
                block_time: event.block_time,
            },
            false,
            bonding_curve_key,
        )
        .await
    }

    pub async fn handle_amm_trade(&self, event: AmmTradeEvent) -> Result<HandleOutcome, HandlerError> {
        let reserves = ReserveInfo::new(event.trade.virtual_sol_reserves, event.trade.virtual_token_reserves, false);
        let supply = CirculatingSupply::AmmPoolReserve { token_reserve: event.trade.virtual_token_reserves };
        let trade = Trade {
            signature: event.trade.signature.clone(),
            mint_address: event.trade.mint_address.clone(),
            program: Program::AmmPool,
            trade_type: event.trade.trade_type,
            user_address: event.trade.user_address.clone(),
            sol_amount: event.trade.sol_amount,
            token_amount: event.trade.token_amount,
            price_sol: 0.0,
            price_usd: 0.0,
            market_cap_usd: 0.0,
            volume_usd: 0.0,
            virtual_sol_reserves: event.trade.virtual_sol_reserves,
            virtual_token_reserves: event.trade.virtual_token_reserves,
            bonding_curve_progress: None,
            slot: event.trade.slot,
            block_time: event.trade.block_time,
        };
        self.process(
            event.trade.signature,
            event.trade.mint_address,
            Program::AmmPool,
            event.trade.slot,
            reserves,
            supply,
            trade,
            true,
            None,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn process(
        &self,
        signature: Signature,
        mint_address: MintAddress,
        program: Program,
        slot: u64,
        reserves: ReserveInfo,
        supply: CirculatingSupply,
        mut trade: Trade,
        is_amm: bool,
        bonding_curve_key: Option<String>,
    ) -> Result<HandleOutcome, HandlerError> {
        if !self.seen_signatures.lock().insert(signature) {
            return Ok(HandleOutcome::Skipped(SkipReason::DuplicateSignature));
        }

        let sol_price = load_price(&self.sol_price_usd);
        let price_info = price::calculate_price(reserves, sol_price, supply);
        trade.price_sol = price_info.price_in_sol;
        trade.price_usd = price_info.price_in_usd;
        trade.market_cap_usd = price_info.market_cap_usd;
        trade.volume_usd = (trade.sol_amount as f64 / crate::model::LAMPORTS_PER_SOL as f64) * sol_price;

        let threshold = self.save_threshold(program);
        let should_save = self.config.save_all_tokens || price_info.market_cap_usd >= threshold;

        let existing = self.lookup_token(&mint_address).await?;
        let is_new = existing.is_none();

        let token = match existing {
            None => {
                if !should_save {
                    return Ok(HandleOutcome::Skipped(SkipReason::BelowSaveThreshold));
                }
                let now = Utc::now();
                let crossed = price_info.market_cap_usd >= self.config.bc_save_threshold_usd;
                let progress = if is_amm {
                    0.0
                } else {
                    price::bonding_curve_progress(
                        price::sol_in_curve_lamports(None, reserves.sol_reserves, reserves.sol_reserves),
                        false,
                    )
                };
                trade.bonding_curve_progress = (!is_amm).then_some(progress);
                if crossed {
                    self.bus.token_threshold_crossed.emit(TokenThresholdCrossedEvent {
                        mint_address: mint_address.clone(),
                        market_cap_usd: price_info.market_cap_usd,
                        at: trade.block_time,
                    });
                }
                Token {
                    mint_address: mint_address.clone(),
                    metadata: TokenMetadata::default(),
                    total_supply: BONDING_CURVE_TOTAL_SUPPLY,
                    bonding_curve_key,
                    first_program: program,
                    first_seen_slot: slot,
                    first_price_sol: price_info.price_in_sol,
                    first_price_usd: price_info.price_in_usd,
                    first_market_cap_usd: price_info.market_cap_usd,
                    latest_price_sol: price_info.price_in_sol,
                    latest_price_usd: price_info.price_in_usd,
                    latest_market_cap_usd: price_info.market_cap_usd,
                    latest_virtual_sol_reserves: reserves.sol_reserves,
                    latest_virtual_token_reserves: reserves.token_reserves,
                    first_virtual_sol_reserves: reserves.sol_reserves,
                    latest_bonding_curve_progress: progress,
                    current_program: program,
                    graduated_to_amm: is_amm,
                    amm_pool_address: None,
                    graduation_signature: None,
                    threshold_crossed_at: crossed.then_some(trade.block_time),
                    graduation_at: None,
                    last_trade_at: Some(now),
                    latest_update_slot: slot,
                    created_at: now,
                    updated_at: now,
                }
            }
            Some(mut token) => {
                if !token.admit_slot(slot) {
                    return Ok(HandleOutcome::Skipped(SkipReason::StaleSlot));
                }
                if token.bonding_curve_key.is_none() {
                    token.bonding_curve_key = bonding_curve_key;
                }
                token.latest_price_sol = price_info.price_in_sol;
                token.latest_price_usd = price_info.price_in_usd;
                token.latest_market_cap_usd = price_info.market_cap_usd;
                token.latest_virtual_sol_reserves = reserves.sol_reserves;
                token.latest_virtual_token_reserves = reserves.token_reserves;
                if !is_amm {
                    let progress = price::bonding_curve_progress(
                        price::sol_in_curve_lamports(None, reserves.sol_reserves, token.first_virtual_sol_reserves),
                        false,
                    );
                    token.latest_bonding_curve_progress = progress;
                    trade.bonding_curve_progress = Some(progress);
                }
                token.last_trade_at = Some(Utc::now());
                token.updated_at = Utc::now();

                if token.threshold_crossed_at.is_none() && price_info.market_cap_usd >= self.config.bc_save_threshold_usd {
                    token.threshold_crossed_at = Some(trade.block_time);
                    self.bus.token_threshold_crossed.emit(TokenThresholdCrossedEvent {
                        mint_address: mint_address.clone(),
                        market_cap_usd: price_info.market_cap_usd,
                        at: trade.block_time,
                    });
                }
                if is_amm && !token.graduated_to_amm {
                    token.graduated_to_amm = true;
                    token.current_program = Program::AmmPool;
                    token.graduation_at.get_or_insert(Utc::now());
                    self.bus.token_graduated.emit(TokenGraduatedEvent {
                        mint_address: mint_address.clone(),
                        pool_address: token.amm_pool_address.clone().unwrap_or_else(|| PoolAddress::new(String::new())),
                        signature: None,
                        method: GraduationMethod::AmmTrade,
                        at: Utc::now(),
                    });
                }
                token
            }
        };

        self.cache.insert(
            mint_address.clone(),
            crate::db::CacheEntry {
                tracked: true,
                first_seen: token.created_at,
                threshold_crossed: token.threshold_crossed_at.is_some(),
            },
        );
        if is_new {
            self.bus.token_discovered.emit(TokenDiscoveredEvent { token: token.clone() });
        }

        self.enqueue_trade(trade.clone());
        self.batch_writer.enqueue(QueueItem::Token(token.clone()));
        self.maybe_sample_price_snapshot(&token, &trade);

        self.bus.trade_parsed.emit(TradeParsedEvent { trade: trade.clone() });
        self.bus.price_updated.emit(PriceUpdatedEvent {
            mint_address: mint_address.clone(),
            price_sol: price_info.price_in_sol,
            price_usd: price_info.price_in_usd,
            market_cap_usd: price_info.market_cap_usd,
        });

        let topic_event = ProgramTradeEvent { trade, token };
        if is_amm {
            self.bus.amm_trade.emit(topic_event);
        } else {
            self.bus.bc_trade.emit(topic_event);
        }

        Ok(HandleOutcome::Saved)
    }

    async fn lookup_token(&self, mint: &MintAddress) -> Result<Option<Token>, HandlerError> {
        if let Some(entry) = self.cache.get(mint) {
            if entry.tracked {
                return self.repository.find_token_by_mint(mint).await.map_err(HandlerError::Core);
            }
        }
        self.repository.find_token_by_mint(mint).await.map_err(HandlerError::Core)
    }

    /// Sampling rule applied before enqueuing a price snapshot: always at >$100k market
    /// cap, 50% at >$50k, 20% at >$20k, else 10%.
    fn maybe_sample_price_snapshot(&self, token: &Token, trade: &Trade) {
        let rate = if token.latest_market_cap_usd > 100_000.0 {
            1.0
        } else if token.latest_market_cap_usd > 50_000.0 {
            0.5
        } else if token.latest_market_cap_usd > 20_000.0 {
            0.2
        } else {
            0.1
        };

        if rand::random::<f64>() < rate {
            self.batch_writer.enqueue(QueueItem::PriceSnapshot(PriceSnapshot {
                mint_address: token.mint_address.clone(),
                slot: trade.slot,
                price_sol: trade.price_sol,
                price_usd: trade.price_usd,
                market_cap_usd: trade.market_cap_usd,
                virtual_sol_reserves: trade.virtual_sol_reserves,
                virtual_token_reserves: trade.virtual_token_reserves,
                bonding_curve_progress: trade.bonding_curve_progress,
                recorded_at: Utc::now(),
            }));
        }
    }

    fn enqueue_trade(&self, trade: Trade) {
        self.pending_trades.lock().push_back(trade);
    }

    /// Drain the pending-trades buffer into the batch writer. Run on the 1 s tick; at shutdown
    /// it is called once more for the final drain.
    pub fn flush_pending_trades(&self) -> usize {
        let drained: Vec<Trade> = self.pending_trades.lock().drain(..).collect();
        let n = drained.len();
        for trade in drained {
            self.batch_writer.enqueue(QueueItem::Trade(trade));
        }
        n
    }

    /// Second event path for AMM pool creation: upserts the token even if it was never seen as a
    /// bonding-curve trade, so a pool that appears with no prior BC history is still captured.
    pub async fn handle_pool_created(&self, event: PoolCreatedEvent) -> Result<HandleOutcome, HandlerError> {
        let mint = event.base_mint.clone();
        let now = Utc::now();
        let mut token = match self.lookup_token(&mint).await? {
            Some(token) => token,
            None => Token {
                mint_address: mint.clone(),
                metadata: TokenMetadata {
                    creator: event.creator.clone(),
                    ..TokenMetadata::default()
                },
                total_supply: BONDING_CURVE_TOTAL_SUPPLY,
                bonding_curve_key: None,
                first_program: Program::AmmPool,
                first_seen_slot: event.slot,
                first_price_sol: 0.0,
                first_price_usd: 0.0,
                first_market_cap_usd: 0.0,
                latest_price_sol: 0.0,
                latest_price_usd: 0.0,
                latest_market_cap_usd: 0.0,
                latest_virtual_sol_reserves: 0,
                latest_virtual_token_reserves: 0,
                first_virtual_sol_reserves: 0,
                latest_bonding_curve_progress: 0.0,
                current_program: Program::AmmPool,
                graduated_to_amm: true,
                amm_pool_address: None,
                graduation_signature: None,
                threshold_crossed_at: None,
                graduation_at: None,
                last_trade_at: None,
                latest_update_slot: event.slot,
                created_at: now,
                updated_at: now,
            },
        };

        token.mark_graduated(event.pool_address.clone(), Some(event.signature.clone()), now);
        if token.metadata.creator.is_none() {
            token.metadata.creator = event.creator.clone();
        }

        self.batch_writer.enqueue(QueueItem::Token(token.clone()));
        self.bus.token_graduated.emit(TokenGraduatedEvent {
            mint_address: mint,
            pool_address: event.pool_address,
            signature: Some(event.signature),
            method: GraduationMethod::PoolCreation,
            at: now,
        });

        Ok(HandleOutcome::Saved)
    }

    /// Bonding-curve completion monitor path: the on-chain `complete` flag is
    /// authoritative, so progress is clamped to 100 and the token graduates regardless of what
    /// the virtual-reserves ratio would otherwise compute.
    pub async fn handle_bc_account_complete(&self, update: BcAccountUpdateEvent) -> Result<HandleOutcome, HandlerError> {
        if !update.complete {
            return Ok(HandleOutcome::Skipped(SkipReason::BelowSaveThreshold));
        }

        let existing = self
            .repository
            .find_token_by_bonding_curve_key(&update.bonding_curve_key)
            .await
            .map_err(HandlerError::Core)?;

        let Some(mut token) = existing else {
            return Ok(HandleOutcome::Skipped(SkipReason::BelowSaveThreshold));
        };

        if !token.admit_slot(update.slot) {
            return Ok(HandleOutcome::Skipped(SkipReason::StaleSlot));
        }

        token.latest_bonding_curve_progress = 100.0;
        token.latest_virtual_sol_reserves = update.virtual_sol_reserves;
        token.latest_virtual_token_reserves = update.virtual_token_reserves;
        token.updated_at = Utc::now();
        let graduating = !token.graduated_to_amm;
        if graduating {
            token.graduated_to_amm = true;
            token.current_program = Program::AmmPool;
            token.graduation_at.get_or_insert(Utc::now());
        }

        self.batch_writer.enqueue(QueueItem::Token(token.clone()));
        self.bus.bonding_curve_progress.emit(BondingCurveProgressEvent {
            mint_address: token.mint_address.clone(),
            progress: 100.0,
            complete: true,
        });
        if graduating {
            self.bus.token_graduated.emit(TokenGraduatedEvent {
                mint_address: token.mint_address.clone(),
                pool_address: token.amm_pool_address.clone().unwrap_or_else(|| PoolAddress::new(String::new())),
                signature: None,
                method: GraduationMethod::BondingCurveComplete,
                at: Utc::now(),
            });
        }

        Ok(HandleOutcome::Saved)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error(transparent)]
    Core(#[from] crate::error::CoreError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Repository, TokenFilter, TokenStatistics, TraderVolume};
    use crate::model::{AccountState, PoolAddress as PoolAddr, TradeType};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use sqlx::PgPool;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct InMemoryRepo {
        tokens: StdMutex<std::collections::HashMap<MintAddress, Token>>,
    }

    #[async_trait]
    impl Repository for InMemoryRepo {
        async fn find_token_by_mint(&self, mint: &MintAddress) -> Result<Option<Token>, crate::error::CoreError> {
            Ok(self.tokens.lock().unwrap().get(mint).cloned())
        }
        async fn find_token_by_bonding_curve_key(&self, key: &str) -> Result<Option<Token>, crate::error::CoreError> {
            Ok(self.tokens.lock().unwrap().values().find(|t| t.bonding_curve_key.as_deref() == Some(key)).cloned())
        }
        async fn find_tokens(&self, _filter: &TokenFilter) -> Result<Vec<Token>, crate::error::CoreError> {
            Ok(vec![])
        }
        async fn save_token(&self, token: &Token) -> Result<(), crate::error::CoreError> {
            self.tokens.lock().unwrap().insert(token.mint_address.clone(), token.clone());
            Ok(())
        }
        async fn batch_save_tokens(&self, tokens: &[Token]) -> Result<(), crate::error::CoreError> {
            for t in tokens {
                self.save_token(t).await?;
            }
            Ok(())
        }
        async fn update_token_price(&self, _: &MintAddress, _: f64, _: f64, _: f64) -> Result<(), crate::error::CoreError> {
            Ok(())
        }
        async fn mark_token_graduated(
            &self,
            _: &MintAddress,
            _: &PoolAddr,
            _: Option<&Signature>,
            _: chrono::DateTime<Utc>,
        ) -> Result<(), crate::error::CoreError> {
            Ok(())
        }
        async fn get_token_statistics(&self, _: &MintAddress) -> Result<Option<TokenStatistics>, crate::error::CoreError> {
            Ok(None)
        }
        async fn find_tokens_created_since(&self, since: chrono::DateTime<Utc>) -> Result<Vec<Token>, crate::error::CoreError> {
            Ok(self.tokens.lock().unwrap().values().filter(|t| t.created_at >= since).cloned().collect())
        }
        async fn batch_save_trades(&self, _: &[Trade]) -> Result<(), crate::error::CoreError> {
            Ok(())
        }
        async fn get_recent_trades(&self, _: i64) -> Result<Vec<Trade>, crate::error::CoreError> {
            Ok(vec![])
        }
        async fn get_trades_for_token(&self, _: &MintAddress, _: i64) -> Result<Vec<Trade>, crate::error::CoreError> {
            Ok(vec![])
        }
        async fn get_high_value_trades(&self, _: f64, _: i64) -> Result<Vec<Trade>, crate::error::CoreError> {
            Ok(vec![])
        }
        async fn get_volume_by_period(&self, _: &MintAddress, _: chrono::DateTime<Utc>) -> Result<f64, crate::error::CoreError> {
            Ok(0.0)
        }
        async fn get_top_traders(&self, _: &MintAddress, _: i64) -> Result<Vec<TraderVolume>, crate::error::CoreError> {
            Ok(vec![])
        }
        async fn batch_save_price_snapshots(&self, _: &[PriceSnapshot]) -> Result<(), crate::error::CoreError> {
            Ok(())
        }
        async fn batch_save_account_states(&self, _: &[AccountState]) -> Result<(), crate::error::CoreError> {
            Ok(())
        }
        async fn update_stats(&self, _: &MintAddress) -> Result<(), crate::error::CoreError> {
            Ok(())
        }
    }

    fn handler(repo: Arc<InMemoryRepo>) -> TradeHandler<InMemoryRepo> {
        let bus = Arc::new(EventBus::new());
        let cache = Arc::new(HotCache::new());
        // A lazily-connected pool is fine: these tests never flush the writer.
        let pool = PgPool::connect_lazy("postgres://localhost/test").unwrap();
        let batch_writer = Arc::new(BatchWriter::new(pool, 50));
        TradeHandler::new(
            bus,
            repo,
            cache,
            batch_writer,
            HandlerConfig {
                bc_save_threshold_usd: 8_888.0,
                amm_save_threshold_usd: 1_000.0,
                save_all_tokens: false,
            },
            150.0,
        )
    }

    fn bc_trade_event(signature: &str, sol: u64, token: u64, slot: u64) -> TradeEvent {
        TradeEvent {
            signature: Signature::new(signature.into()),
            mint_address: MintAddress::new("Mint1".into()),
            user_address: crate::model::UserAddress::new("Trader1".into()),
            trade_type: TradeType::Buy,
            sol_amount: sol,
            token_amount: token,
            virtual_sol_reserves: 60 * crate::model::LAMPORTS_PER_SOL,
            virtual_token_reserves: 200_000_000 * 1_000_000,
            slot,
            block_time: Utc::now(),
            bonding_curve_key: Some("Curve1".into()),
        }
    }

    #[tokio::test]
    async fn below_threshold_trade_on_a_new_token_is_skipped() {
        let repo = Arc::new(InMemoryRepo::default());
        let h = handler(repo);
        let outcome = h.handle_bc_trade(bc_trade_event("sig1", 1_000_000, 1_000_000, 1)).await.unwrap();
        assert_eq!(outcome, HandleOutcome::Skipped(SkipReason::BelowSaveThreshold));
    }

    #[tokio::test]
    async fn duplicate_signature_is_skipped_without_touching_the_token() {
        let repo = Arc::new(InMemoryRepo::default());
        let h = handler(repo);
        let ev = bc_trade_event("sig-dup", 50 * crate::model::LAMPORTS_PER_SOL, 1_000_000, 1);
        let first = h.handle_bc_trade(ev.clone()).await.unwrap();
        assert_eq!(first, HandleOutcome::Saved);
        let second = h.handle_bc_trade(ev).await.unwrap();
        assert_eq!(second, HandleOutcome::Skipped(SkipReason::DuplicateSignature));
    }

    #[tokio::test]
    async fn stale_slot_is_rejected_after_a_newer_update_was_applied() {
        let repo = Arc::new(InMemoryRepo::default());
        let h = handler(repo.clone());
        h.handle_bc_trade(bc_trade_event("sig-a", 50 * crate::model::LAMPORTS_PER_SOL, 1_000_000, 100))
            .await
            .unwrap();
        let outcome = h
            .handle_bc_trade(bc_trade_event("sig-b", 50 * crate::model::LAMPORTS_PER_SOL, 1_000_000, 50))
            .await
            .unwrap();
        assert_eq!(outcome, HandleOutcome::Skipped(SkipReason::StaleSlot));
    }

    #[tokio::test]
    async fn discovery_trade_crossing_threshold_emits_threshold_crossed_once() {
        let repo = Arc::new(InMemoryRepo::default());
        let mut bus = EventBus::new();
        let crossed = Arc::new(AtomicUsize::new(0));
        let c = crossed.clone();
        bus.token_threshold_crossed
            .subscribe(move |_: &TokenThresholdCrossedEvent| -> Result<(), std::convert::Infallible> {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        let discovered = Arc::new(AtomicUsize::new(0));
        let d = discovered.clone();
        bus.token_discovered
            .subscribe(move |_: &TokenDiscoveredEvent| -> Result<(), std::convert::Infallible> {
                d.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        let bus = Arc::new(bus);
        let cache = Arc::new(HotCache::new());
        let pool = PgPool::connect_lazy("postgres://localhost/test").unwrap();
        let batch_writer = Arc::new(BatchWriter::new(pool, 50));
        let h = TradeHandler::new(
            bus,
            repo,
            cache,
            batch_writer,
            HandlerConfig {
                bc_save_threshold_usd: 8_888.0,
                amm_save_threshold_usd: 1_000.0,
                save_all_tokens: false,
            },
            150.0,
        );

        let outcome = h
            .handle_bc_trade(bc_trade_event("sig-first", 50 * crate::model::LAMPORTS_PER_SOL, 1_000_000, 1))
            .await
            .unwrap();

        assert_eq!(outcome, HandleOutcome::Saved);
        assert_eq!(discovered.load(Ordering::SeqCst), 1);
        assert_eq!(crossed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn threshold_crossed_at_uses_the_trade_block_time_not_processing_time() {
        let repo = Arc::new(InMemoryRepo::default());
        let h = handler(repo.clone());
        let block_time = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut event = bc_trade_event("sig-block-time", 50 * crate::model::LAMPORTS_PER_SOL, 1_000_000, 1);
        event.block_time = block_time;

        h.handle_bc_trade(event).await.unwrap();

        let token = repo.tokens.lock().unwrap().get(&MintAddress::new("Mint1".into())).cloned().unwrap();
        assert_eq!(token.threshold_crossed_at, Some(block_time));
    }
}
