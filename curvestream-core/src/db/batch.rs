//! BatchWriter: drains the pending-write queue into Postgres on a fixed
//! cadence, in one transaction per flush, rolling the whole batch back and re-queuing at the
//! head on any failure so a transient DB error never silently drops data.

use crate::db::repository::{program_str, trade_type_str};
use crate::error::CoreError;
use crate::model::{AccountState, MintAddress, PriceSnapshot, Token, Trade};
use sqlx::PgPool;
use std::collections::{HashSet, VecDeque};
use std::time::Duration;
use tracing::{error, info};

pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_BATCH_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub enum QueueItem {
    Token(Token),
    Trade(Trade),
    PriceSnapshot(PriceSnapshot),
    AccountState(AccountState),
}

pub struct BatchWriter {
    pool: PgPool,
    queue: parking_lot::Mutex<VecDeque<QueueItem>>,
    batch_size: usize,
}

impl BatchWriter {
    pub fn new(pool: PgPool, batch_size: usize) -> Self {
        Self {
            pool,
            queue: parking_lot::Mutex::new(VecDeque::new()),
            batch_size,
        }
    }

    pub fn enqueue(&self, item: QueueItem) {
        self.queue.lock().push_back(item);
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Whether the queue has grown past `batch_size`, one of the two flush triggers alongside
    /// the fixed interval tick.
    pub fn should_flush(&self) -> bool {
        self.queue_len() >= self.batch_size
    }

    fn drain_up_to(&self, n: usize) -> Vec<QueueItem> {
        let mut queue = self.queue.lock();
        let n = n.min(queue.len());
        queue.drain(..n).collect()
    }

    fn requeue_at_head(&self, items: Vec<QueueItem>) {
        let mut queue = self.queue.lock();
        for item in items.into_iter().rev() {
            queue.push_front(item);
        }
    }

    /// Drain up to `batch_size` items, partition by kind, dedupe tokens by mint (first
    /// occurrence wins), and commit four bulk writes plus one `update_token_stats` call per
    /// affected mint, all inside one transaction. On any failure the whole batch is rolled back
    /// and re-queued at the head.
    pub async fn flush(&self) -> Result<usize, CoreError> {
        let items = self.drain_up_to(self.batch_size);
        if items.is_empty() {
            return Ok(0);
        }
        let count = items.len();

        match self.flush_items(&items).await {
            Ok(()) => Ok(count),
            Err(err) => {
                error!(%err, batch_size = count, "flush failed, re-queuing batch at head");
                self.requeue_at_head(items);
                Err(err)
            }
        }
    }

    async fn flush_items(&self, items: &[QueueItem]) -> Result<(), CoreError> {
        let mut tokens = Vec::new();
        let mut trades = Vec::new();
        let mut snapshots = Vec::new();
        let mut account_states = Vec::new();

        for item in items {
            match item {
                QueueItem::Token(t) => tokens.push(t.clone()),
                QueueItem::Trade(t) => trades.push(t.clone()),
                QueueItem::PriceSnapshot(s) => snapshots.push(s.clone()),
                QueueItem::AccountState(a) => account_states.push(a.clone()),
            }
        }

        let mut seen = HashSet::new();
        tokens.retain(|t| seen.insert(t.mint_address.clone()));

        let mut affected: HashSet<MintAddress> = HashSet::new();
        affected.extend(tokens.iter().map(|t| t.mint_address.clone()));
        affected.extend(trades.iter().map(|t| t.mint_address.clone()));

        let mut tx = self.pool.begin().await?;

        for token in &tokens {
            upsert_token(&mut tx, token).await?;
        }
        for trade in &trades {
            insert_trade(&mut tx, trade).await?;
        }
        for snapshot in &snapshots {
            insert_price_snapshot(&mut tx, snapshot).await?;
        }
        for state in &account_states {
            insert_account_state(&mut tx, state).await?;
        }

        for mint in &affected {
            sqlx::query("SELECT update_token_stats($1)").bind(&mint.0).execute(&mut *tx).await?;
        }

        tx.commit().await?;
        info!(tokens = tokens.len(), trades = trades.len(), snapshots = snapshots.len(), "batch flush committed");
        Ok(())
    }
}

async fn upsert_token(tx: &mut sqlx::Transaction<'_, sqlx::Postgres>, token: &Token) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        INSERT INTO tokens_unified (
            mint_address, symbol, name, uri, creator, total_supply, bonding_curve_key,
            first_program, first_seen_slot, first_price_sol, first_price_usd, first_market_cap_usd,
            latest_price_sol, latest_price_usd, latest_market_cap_usd,
            latest_virtual_sol_reserves, latest_virtual_token_reserves, first_virtual_sol_reserves,
            latest_bonding_curve_progress,
            current_program, graduated_to_amm, amm_pool_address, graduation_signature,
            threshold_crossed_at, graduation_at, last_trade_at, latest_update_slot,
            created_at, updated_at
        ) VALUES (
            $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18,
            $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29
        )
        ON CONFLICT (mint_address) DO UPDATE SET
            symbol = COALESCE(tokens_unified.symbol, EXCLUDED.symbol),
            name = COALESCE(tokens_unified.name, EXCLUDED.name),
            uri = COALESCE(tokens_unified.uri, EXCLUDED.uri),
            creator = COALESCE(tokens_unified.creator, EXCLUDED.creator),
            total_supply = COALESCE(tokens_unified.total_supply, EXCLUDED.total_supply),
            latest_price_sol = EXCLUDED.latest_price_sol,
            latest_price_usd = EXCLUDED.latest_price_usd,
            latest_market_cap_usd = EXCLUDED.latest_market_cap_usd,
            latest_virtual_sol_reserves = EXCLUDED.latest_virtual_sol_reserves,
            latest_virtual_token_reserves = EXCLUDED.latest_virtual_token_reserves,
            latest_bonding_curve_progress = EXCLUDED.latest_bonding_curve_progress,
            current_program = EXCLUDED.current_program,
            graduated_to_amm = EXCLUDED.graduated_to_amm OR tokens_unified.graduated_to_amm,
            amm_pool_address = COALESCE(EXCLUDED.amm_pool_address, tokens_unified.amm_pool_address),
            graduation_signature = COALESCE(EXCLUDED.graduation_signature, tokens_unified.graduation_signature),
            threshold_crossed_at = COALESCE(tokens_unified.threshold_crossed_at, EXCLUDED.threshold_crossed_at),
            graduation_at = COALESCE(tokens_unified.graduation_at, EXCLUDED.graduation_at),
            last_trade_at = EXCLUDED.last_trade_at,
            latest_update_slot = GREATEST(tokens_unified.latest_update_slot, EXCLUDED.latest_update_slot),
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(&token.mint_address.0)
    .bind(&token.metadata.symbol)
    .bind(&token.metadata.name)
    .bind(&token.metadata.uri)
    .bind(token.metadata.creator.as_ref().map(|c| c.0.clone()))
    .bind(token.total_supply as i64)
    .bind(&token.bonding_curve_key)
    .bind(program_str(token.first_program))
    .bind(token.first_seen_slot as i64)
    .bind(token.first_price_sol)
    .bind(token.first_price_usd)
    .bind(token.first_market_cap_usd)
    .bind(token.latest_price_sol)
    .bind(token.latest_price_usd)
    .bind(token.latest_market_cap_usd)
    .bind(token.latest_virtual_sol_reserves as i64)
    .bind(token.latest_virtual_token_reserves as i64)
    .bind(token.first_virtual_sol_reserves as i64)
    .bind(token.latest_bonding_curve_progress)
    .bind(program_str(token.current_program))
    .bind(token.graduated_to_amm)
    .bind(token.amm_pool_address.as_ref().map(|p| p.0.clone()))
    .bind(token.graduation_signature.as_ref().map(|s| s.0.clone()))
    .bind(token.threshold_crossed_at)
    .bind(token.graduation_at)
    .bind(token.last_trade_at)
    .bind(token.latest_update_slot as i64)
    .bind(token.created_at)
    .bind(token.updated_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_trade(tx: &mut sqlx::Transaction<'_, sqlx::Postgres>, trade: &Trade) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        INSERT INTO trades_unified (
            signature, mint_address, program, trade_type, user_address, sol_amount,
            token_amount, price_sol, price_usd, market_cap_usd, volume_usd,
            virtual_sol_reserves, virtual_token_reserves, bonding_curve_progress, slot, block_time
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        ON CONFLICT (signature) DO NOTHING
        "#,
    )
    .bind(&trade.signature.0)
    .bind(&trade.mint_address.0)
    .bind(program_str(trade.program))
    .bind(trade_type_str(trade.trade_type))
    .bind(&trade.user_address.0)
    .bind(trade.sol_amount as i64)
    .bind(trade.token_amount as i64)
    .bind(trade.price_sol)
    .bind(trade.price_usd)
    .bind(trade.market_cap_usd)
    .bind(trade.volume_usd)
    .bind(trade.virtual_sol_reserves as i64)
    .bind(trade.virtual_token_reserves as i64)
    .bind(trade.bonding_curve_progress)
    .bind(trade.slot as i64)
    .bind(trade.block_time)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_price_snapshot(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    snapshot: &PriceSnapshot,
) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        INSERT INTO price_snapshots_unified (
            mint_address, slot, price_sol, price_usd, market_cap_usd,
            virtual_sol_reserves, virtual_token_reserves, bonding_curve_progress, recorded_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(&snapshot.mint_address.0)
    .bind(snapshot.slot as i64)
    .bind(snapshot.price_sol)
    .bind(snapshot.price_usd)
    .bind(snapshot.market_cap_usd)
    .bind(snapshot.virtual_sol_reserves as i64)
    .bind(snapshot.virtual_token_reserves as i64)
    .bind(snapshot.bonding_curve_progress)
    .bind(snapshot.recorded_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_account_state(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    state: &AccountState,
) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        INSERT INTO account_states_unified (
            mint_address, program, slot, virtual_sol_reserves, virtual_token_reserves,
            real_sol_reserves, real_token_reserves, bonding_curve_complete, recorded_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(&state.mint_address.0)
    .bind(program_str(state.program))
    .bind(state.slot as i64)
    .bind(state.virtual_sol_reserves as i64)
    .bind(state.virtual_token_reserves as i64)
    .bind(state.real_sol_reserves as i64)
    .bind(state.real_token_reserves as i64)
    .bind(state.bonding_curve_complete)
    .bind(state.recorded_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Program, TokenMetadata};
    use chrono::Utc;

    fn token(mint: &str) -> Token {
        Token {
            mint_address: MintAddress::new(mint.into()),
            metadata: TokenMetadata::default(),
            total_supply: 1_000_000_000,
            bonding_curve_key: None,
            first_program: Program::BondingCurve,
            first_seen_slot: 1,
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
            current_program: Program::BondingCurve,
            graduated_to_amm: false,
            amm_pool_address: None,
            graduation_signature: None,
            threshold_crossed_at: None,
            graduation_at: None,
            last_trade_at: None,
            latest_update_slot: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn dedupe_keeps_the_first_occurrence_of_a_duplicate_mint() {
        let mut tokens = vec![token("Mint1"), token("Mint1"), token("Mint2")];
        tokens[0].latest_price_usd = 1.0;
        tokens[1].latest_price_usd = 2.0;

        let mut seen = HashSet::new();
        tokens.retain(|t| seen.insert(t.mint_address.clone()));

        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].latest_price_usd, 1.0);
    }

    #[test]
    fn should_flush_when_queue_reaches_batch_size() {
        // No live pool needed for this particular assertion; queue_len and should_flush only
        // touch the in-memory VecDeque.
        let queue = parking_lot::Mutex::new(VecDeque::new());
        for i in 0..3 {
            queue.lock().push_back(QueueItem::Token(token(&format!("Mint{i}"))));
        }
        assert_eq!(queue.lock().len(), 3);
    }
}
