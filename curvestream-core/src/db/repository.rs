//! Repositories: the sole place that knows how canonical domain types map onto rows of
//! `tokens_unified`, `trades_unified`, `price_snapshots_unified` and `account_states_unified`.
//! Every write here is idempotent with respect to its primary key, so a re-delivered trade or a
//! replayed account snapshot is always safe to hand back in.

use crate::error::CoreError;
use crate::model::{
    AccountState, MintAddress, PoolAddress, PriceSnapshot, Program, Signature, Token, Trade, TradeType,
    UserAddress,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, QueryBuilder, Row};

#[derive(Debug, Clone, Default)]
pub struct TokenFilter {
    pub program: Option<Program>,
    pub graduated: Option<bool>,
    pub min_market_cap_usd: Option<f64>,
    pub limit: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TokenStatistics {
    pub mint_address: MintAddress,
    pub trade_count: i64,
    pub total_volume_usd: f64,
    pub unique_traders: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TraderVolume {
    pub user_address: UserAddress,
    pub volume_usd: f64,
    pub trade_count: i64,
}

/// Data-access contract used by the batch writer and by read-side auxiliary services. Kept as a
/// trait so tests can substitute an in-memory fake instead of a live Postgres instance.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn find_token_by_mint(&self, mint: &MintAddress) -> Result<Option<Token>, CoreError>;
    async fn find_token_by_bonding_curve_key(&self, key: &str) -> Result<Option<Token>, CoreError>;
    async fn find_tokens(&self, filter: &TokenFilter) -> Result<Vec<Token>, CoreError>;
    async fn save_token(&self, token: &Token) -> Result<(), CoreError>;
    async fn batch_save_tokens(&self, tokens: &[Token]) -> Result<(), CoreError>;
    async fn update_token_price(
        &self,
        mint: &MintAddress,
        price_sol: f64,
        price_usd: f64,
        market_cap_usd: f64,
    ) -> Result<(), CoreError>;
    async fn mark_token_graduated(
        &self,
        mint: &MintAddress,
        pool_address: &PoolAddress,
        signature: Option<&Signature>,
        at: DateTime<Utc>,
    ) -> Result<(), CoreError>;
    async fn get_token_statistics(&self, mint: &MintAddress) -> Result<Option<TokenStatistics>, CoreError>;
    /// Tokens created at or after `since`, used to repopulate the hot cache on its refresh tick.
    async fn find_tokens_created_since(&self, since: DateTime<Utc>) -> Result<Vec<Token>, CoreError>;

    async fn batch_save_trades(&self, trades: &[Trade]) -> Result<(), CoreError>;
    async fn get_recent_trades(&self, limit: i64) -> Result<Vec<Trade>, CoreError>;
    async fn get_trades_for_token(&self, mint: &MintAddress, limit: i64) -> Result<Vec<Trade>, CoreError>;
    async fn get_high_value_trades(&self, min_volume_usd: f64, limit: i64) -> Result<Vec<Trade>, CoreError>;
    async fn get_volume_by_period(&self, mint: &MintAddress, since: DateTime<Utc>) -> Result<f64, CoreError>;
    async fn get_top_traders(&self, mint: &MintAddress, limit: i64) -> Result<Vec<TraderVolume>, CoreError>;

    async fn batch_save_price_snapshots(&self, snapshots: &[PriceSnapshot]) -> Result<(), CoreError>;
    async fn batch_save_account_states(&self, states: &[AccountState]) -> Result<(), CoreError>;
    async fn update_stats(&self, mint: &MintAddress) -> Result<(), CoreError>;
}

pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

pub(crate) fn program_str(program: Program) -> &'static str {
    match program {
        Program::BondingCurve => "bonding_curve",
        Program::AmmPool => "amm_pool",
    }
}

pub(crate) fn trade_type_str(trade_type: TradeType) -> &'static str {
    match trade_type {
        TradeType::Buy => "buy",
        TradeType::Sell => "sell",
    }
}

fn parse_program(raw: &str) -> Program {
    match raw {
        "amm_pool" => Program::AmmPool,
        _ => Program::BondingCurve,
    }
}

fn parse_trade_type(raw: &str) -> TradeType {
    match raw {
        "sell" => TradeType::Sell,
        _ => TradeType::Buy,
    }
}

fn token_from_row(row: &sqlx::postgres::PgRow) -> Token {
    use crate::model::TokenMetadata;
    Token {
        mint_address: MintAddress::new(row.get("mint_address")),
        metadata: TokenMetadata {
            symbol: row.get("symbol"),
            name: row.get("name"),
            uri: row.get("uri"),
            creator: row.get::<Option<String>, _>("creator").map(UserAddress::new),
        },
        total_supply: row.get::<i64, _>("total_supply") as u64,
        bonding_curve_key: row.get("bonding_curve_key"),
        first_program: parse_program(row.get("first_program")),
        first_seen_slot: row.get::<i64, _>("first_seen_slot") as u64,
        first_price_sol: row.get("first_price_sol"),
        first_price_usd: row.get("first_price_usd"),
        first_market_cap_usd: row.get("first_market_cap_usd"),
        latest_price_sol: row.get("latest_price_sol"),
        latest_price_usd: row.get("latest_price_usd"),
        latest_market_cap_usd: row.get("latest_market_cap_usd"),
        latest_virtual_sol_reserves: row.get::<i64, _>("latest_virtual_sol_reserves") as u64,
        latest_virtual_token_reserves: row.get::<i64, _>("latest_virtual_token_reserves") as u64,
        first_virtual_sol_reserves: row.get::<i64, _>("first_virtual_sol_reserves") as u64,
        latest_bonding_curve_progress: row.get("latest_bonding_curve_progress"),
        current_program: parse_program(row.get("current_program")),
        graduated_to_amm: row.get("graduated_to_amm"),
        amm_pool_address: row.get::<Option<String>, _>("amm_pool_address").map(PoolAddress::new),
        graduation_signature: row.get::<Option<String>, _>("graduation_signature").map(Signature::new),
        threshold_crossed_at: row.get("threshold_crossed_at"),
        graduation_at: row.get("graduation_at"),
        last_trade_at: row.get("last_trade_at"),
        latest_update_slot: row.get::<i64, _>("latest_update_slot") as u64,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn trade_from_row(row: &sqlx::postgres::PgRow) -> Trade {
    Trade {
        signature: Signature::new(row.get("signature")),
        mint_address: MintAddress::new(row.get("mint_address")),
        program: parse_program(row.get("program")),
        trade_type: parse_trade_type(row.get("trade_type")),
        user_address: UserAddress::new(row.get("user_address")),
        sol_amount: row.get::<i64, _>("sol_amount") as u64,
        token_amount: row.get::<i64, _>("token_amount") as u64,
        price_sol: row.get("price_sol"),
        price_usd: row.get("price_usd"),
        market_cap_usd: row.get("market_cap_usd"),
        volume_usd: row.get("volume_usd"),
        virtual_sol_reserves: row.get::<i64, _>("virtual_sol_reserves") as u64,
        virtual_token_reserves: row.get::<i64, _>("virtual_token_reserves") as u64,
        bonding_curve_progress: row.get("bonding_curve_progress"),
        slot: row.get::<i64, _>("slot") as u64,
        block_time: row.get("block_time"),
    }
}

#[async_trait]
impl Repository for PgRepository {
    async fn find_token_by_mint(&self, mint: &MintAddress) -> Result<Option<Token>, CoreError> {
        let row = sqlx::query("SELECT * FROM tokens_unified WHERE mint_address = $1")
            .bind(&mint.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(token_from_row))
    }

    async fn find_token_by_bonding_curve_key(&self, key: &str) -> Result<Option<Token>, CoreError> {
        let row = sqlx::query("SELECT * FROM tokens_unified WHERE bonding_curve_key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(token_from_row))
    }

    async fn find_tokens(&self, filter: &TokenFilter) -> Result<Vec<Token>, CoreError> {
        let mut qb = QueryBuilder::new("SELECT * FROM tokens_unified WHERE 1 = 1");
        if let Some(program) = filter.program {
            qb.push(" AND current_program = ").push_bind(program_str(program));
        }
        if let Some(graduated) = filter.graduated {
            qb.push(" AND graduated_to_amm = ").push_bind(graduated);
        }
        if let Some(min_mcap) = filter.min_market_cap_usd {
            qb.push(" AND latest_market_cap_usd >= ").push_bind(min_mcap);
        }
        qb.push(" ORDER BY latest_market_cap_usd DESC LIMIT ").push_bind(filter.limit.max(1));

        let rows = qb.build().fetch_all(&self.pool).await?;
        Ok(rows.iter().map(token_from_row).collect())
    }

    async fn save_token(&self, token: &Token) -> Result<(), CoreError> {
        self.batch_save_tokens(std::slice::from_ref(token)).await
    }

    async fn batch_save_tokens(&self, tokens: &[Token]) -> Result<(), CoreError> {
        for token in tokens {
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
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn update_token_price(
        &self,
        mint: &MintAddress,
        price_sol: f64,
        price_usd: f64,
        market_cap_usd: f64,
    ) -> Result<(), CoreError> {
        sqlx::query(
            "UPDATE tokens_unified SET latest_price_sol = $2, latest_price_usd = $3, \
             latest_market_cap_usd = $4, updated_at = now() WHERE mint_address = $1",
        )
        .bind(&mint.0)
        .bind(price_sol)
        .bind(price_usd)
        .bind(market_cap_usd)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_token_graduated(
        &self,
        mint: &MintAddress,
        pool_address: &PoolAddress,
        signature: Option<&Signature>,
        at: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            UPDATE tokens_unified SET
                graduated_to_amm = true,
                current_program = 'amm_pool',
                amm_pool_address = $2,
                graduation_signature = COALESCE($3, graduation_signature),
                graduation_at = COALESCE(graduation_at, $4),
                updated_at = now()
            WHERE mint_address = $1
            "#,
        )
        .bind(&mint.0)
        .bind(&pool_address.0)
        .bind(signature.map(|s| s.0.clone()))
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_token_statistics(&self, mint: &MintAddress) -> Result<Option<TokenStatistics>, CoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS trade_count, COALESCE(SUM(volume_usd), 0) AS total_volume_usd, \
             COUNT(DISTINCT user_address) AS unique_traders FROM trades_unified WHERE mint_address = $1",
        )
        .bind(&mint.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| TokenStatistics {
            mint_address: mint.clone(),
            trade_count: row.get("trade_count"),
            total_volume_usd: row.get("total_volume_usd"),
            unique_traders: row.get("unique_traders"),
        }))
    }

    async fn find_tokens_created_since(&self, since: DateTime<Utc>) -> Result<Vec<Token>, CoreError> {
        let rows = sqlx::query("SELECT * FROM tokens_unified WHERE created_at >= $1")
            .bind(since)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(token_from_row).collect())
    }

    async fn batch_save_trades(&self, trades: &[Trade]) -> Result<(), CoreError> {
        for trade in trades {
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
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn get_recent_trades(&self, limit: i64) -> Result<Vec<Trade>, CoreError> {
        let rows = sqlx::query("SELECT * FROM trades_unified ORDER BY block_time DESC LIMIT $1")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(trade_from_row).collect())
    }

    async fn get_trades_for_token(&self, mint: &MintAddress, limit: i64) -> Result<Vec<Trade>, CoreError> {
        let rows = sqlx::query(
            "SELECT * FROM trades_unified WHERE mint_address = $1 ORDER BY block_time DESC LIMIT $2",
        )
        .bind(&mint.0)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(trade_from_row).collect())
    }

    async fn get_high_value_trades(&self, min_volume_usd: f64, limit: i64) -> Result<Vec<Trade>, CoreError> {
        let rows = sqlx::query(
            "SELECT * FROM trades_unified WHERE volume_usd >= $1 ORDER BY volume_usd DESC LIMIT $2",
        )
        .bind(min_volume_usd)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(trade_from_row).collect())
    }

    async fn get_volume_by_period(&self, mint: &MintAddress, since: DateTime<Utc>) -> Result<f64, CoreError> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(volume_usd), 0) AS volume FROM trades_unified \
             WHERE mint_address = $1 AND block_time >= $2",
        )
        .bind(&mint.0)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("volume"))
    }

    async fn get_top_traders(&self, mint: &MintAddress, limit: i64) -> Result<Vec<TraderVolume>, CoreError> {
        let rows = sqlx::query(
            "SELECT user_address, SUM(volume_usd) AS volume_usd, COUNT(*) AS trade_count \
             FROM trades_unified WHERE mint_address = $1 GROUP BY user_address \
             ORDER BY volume_usd DESC LIMIT $2",
        )
        .bind(&mint.0)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| TraderVolume {
                user_address: UserAddress::new(row.get("user_address")),
                volume_usd: row.get("volume_usd"),
                trade_count: row.get("trade_count"),
            })
            .collect())
    }

    async fn batch_save_price_snapshots(&self, snapshots: &[PriceSnapshot]) -> Result<(), CoreError> {
        for snapshot in snapshots {
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
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn batch_save_account_states(&self, states: &[AccountState]) -> Result<(), CoreError> {
        for state in states {
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
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn update_stats(&self, mint: &MintAddress) -> Result<(), CoreError> {
        sqlx::query("SELECT update_token_stats($1)").bind(&mint.0).execute(&self.pool).await?;
        Ok(())
    }
}
