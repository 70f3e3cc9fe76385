//! Canonical domain types shared across the ingestion core.
//!
//! These are semantic types, not storage types - `crate::db::repository` maps them onto rows of
//! `tokens_unified` / `trades_unified` / `price_snapshots_unified` / `account_states_unified`.

use chrono::{DateTime, Utc};
use derive_more::{Constructor, Display, From};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed convention of the platform: bonding-curve tokens mint 1e9 tokens scaled by decimals.
/// AMM tokens use the pool-side reserve as circulating supply instead - see [`crate::price`].
pub const BONDING_CURVE_TOTAL_SUPPLY: u64 = 1_000_000_000;

/// SOL target a bonding curve must accumulate before it is considered fully progressed.
/// Treated as a named constant, following the on-chain lamport-balance path, so a future
/// on-chain-constant confirmation only touches one place.
pub const BONDING_CURVE_GRADUATION_SOL: f64 = 84.0;

pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Base58-encoded 32 byte account identifier. Newtype rather than a bare `String` so that a
/// mint address can never be accidentally compared against a signature or pool address.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, From, Constructor)]
pub struct MintAddress(pub String);

impl fmt::Display for MintAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque transaction identifier, unique per on-chain transaction.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, From, Constructor)]
pub struct Signature(pub String);

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, From, Constructor)]
pub struct UserAddress(pub String);

#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, From, Constructor)]
pub struct PoolAddress(pub String);

/// Which of the two on-chain programs an event or token state originates from.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum Program {
    #[display("bonding_curve")]
    BondingCurve,
    #[display("amm_pool")]
    AmmPool,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum TradeType {
    #[display("buy")]
    Buy,
    #[display("sell")]
    Sell,
}

/// The bonding-curve's notional (or an AMM pool's real) reserves used for pricing.
#[derive(Debug, Copy, Clone, PartialEq, Deserialize, Serialize, Constructor)]
pub struct ReserveInfo {
    pub sol_reserves: u64,
    pub token_reserves: u64,
    pub is_virtual: bool,
}

/// Output of [`crate::price::PriceCalculator`] - kept separate from `Trade`/`Token` so the pure
/// calculation has no knowledge of persistence.
#[derive(Debug, Copy, Clone, PartialEq, Deserialize, Serialize, Constructor)]
pub struct PriceInfo {
    pub price_in_sol: f64,
    pub price_in_usd: f64,
    pub market_cap_usd: f64,
}

/// Human metadata for a token, enriched asynchronously by an external collaborator; absent at
/// discovery time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TokenMetadata {
    pub symbol: Option<String>,
    pub name: Option<String>,
    pub uri: Option<String>,
    pub creator: Option<UserAddress>,
}

/// Canonical view of a token's lifecycle: discovery, price trajectory, bonding-curve progress,
/// graduation, and subsequent AMM trading.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Token {
    pub mint_address: MintAddress,
    pub metadata: TokenMetadata,
    pub total_supply: u64,
    pub bonding_curve_key: Option<String>,
    pub first_program: Program,
    pub first_seen_slot: u64,
    pub first_price_sol: f64,
    pub first_price_usd: f64,
    pub first_market_cap_usd: f64,
    pub latest_price_sol: f64,
    pub latest_price_usd: f64,
    pub latest_market_cap_usd: f64,
    pub latest_virtual_sol_reserves: u64,
    pub latest_virtual_token_reserves: u64,
    /// Virtual SOL reserves at the first trade observed for this token. Baseline for the
    /// virtual-reserve-delta fallback in [`crate::price::sol_in_curve_lamports`] when no real
    /// account balance has been observed yet.
    pub first_virtual_sol_reserves: u64,
    pub latest_bonding_curve_progress: f64,
    pub current_program: Program,
    pub graduated_to_amm: bool,
    pub amm_pool_address: Option<PoolAddress>,
    pub graduation_signature: Option<Signature>,
    pub threshold_crossed_at: Option<DateTime<Utc>>,
    pub graduation_at: Option<DateTime<Utc>>,
    pub last_trade_at: Option<DateTime<Utc>>,
    /// Highest slot any trade/account-update has been applied from. Used to reject
    /// out-of-order updates - never decreases.
    pub latest_update_slot: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Token {
    /// Apply a newly observed slot, rejecting the update if it is stale relative to what has
    /// already been applied to this token. Returns `false` when the update was ignored.
    pub fn admit_slot(&mut self, slot: u64) -> bool {
        if slot < self.latest_update_slot {
            return false;
        }
        self.latest_update_slot = slot;
        true
    }

    pub fn mark_graduated(
        &mut self,
        pool_address: PoolAddress,
        graduation_signature: Option<Signature>,
        at: DateTime<Utc>,
    ) {
        self.graduated_to_amm = true;
        self.current_program = Program::AmmPool;
        self.amm_pool_address = Some(pool_address);
        if graduation_signature.is_some() {
            self.graduation_signature = graduation_signature;
        }
        self.graduation_at.get_or_insert(at);
    }
}

/// Append-only record of a single trade. `signature` is unique - a second trade with the same
/// signature is a duplicate delivery and must be a no-op.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Trade {
    pub signature: Signature,
    pub mint_address: MintAddress,
    pub program: Program,
    pub trade_type: TradeType,
    pub user_address: UserAddress,
    pub sol_amount: u64,
    pub token_amount: u64,
    pub price_sol: f64,
    pub price_usd: f64,
    pub market_cap_usd: f64,
    pub volume_usd: f64,
    pub virtual_sol_reserves: u64,
    pub virtual_token_reserves: u64,
    pub bonding_curve_progress: Option<f64>,
    pub slot: u64,
    pub block_time: DateTime<Utc>,
}

/// Probabilistically-sampled `(mintAddress, slot)` price sample, see [`crate::handler`] for the
/// sampling thresholds.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PriceSnapshot {
    pub mint_address: MintAddress,
    pub slot: u64,
    pub price_sol: f64,
    pub price_usd: f64,
    pub market_cap_usd: f64,
    pub virtual_sol_reserves: u64,
    pub virtual_token_reserves: u64,
    pub bonding_curve_progress: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

/// `(mintAddress, program, slot)` snapshot of on-chain account reserves.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AccountState {
    pub mint_address: MintAddress,
    pub program: Program,
    pub slot: u64,
    pub virtual_sol_reserves: u64,
    pub virtual_token_reserves: u64,
    pub real_sol_reserves: u64,
    pub real_token_reserves: u64,
    pub bonding_curve_complete: bool,
    pub recorded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(slot: u64) -> Token {
        Token {
            mint_address: MintAddress::new("Token111".into()),
            metadata: TokenMetadata::default(),
            total_supply: BONDING_CURVE_TOTAL_SUPPLY,
            bonding_curve_key: None,
            first_program: Program::BondingCurve,
            first_seen_slot: slot,
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
            latest_update_slot: slot,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn admit_slot_rejects_stale_updates() {
        let mut t = token(100);
        assert!(!t.admit_slot(99));
        assert_eq!(t.latest_update_slot, 100);
        assert!(t.admit_slot(100));
        assert!(t.admit_slot(150));
        assert_eq!(t.latest_update_slot, 150);
    }

    #[test]
    fn mark_graduated_sets_graduation_at_once() {
        let mut t = token(1);
        let first = Utc::now();
        t.mark_graduated(PoolAddress::new("Pool1".into()), Some(Signature::new("sig1".into())), first);
        assert!(t.graduated_to_amm);
        assert_eq!(t.current_program, Program::AmmPool);
        assert_eq!(t.graduation_at, Some(first));

        let later = first + chrono::Duration::seconds(10);
        t.mark_graduated(PoolAddress::new("Pool2".into()), None, later);
        assert_eq!(t.graduation_at, Some(first), "graduation_at is set at most once");
        assert_eq!(t.amm_pool_address, Some(PoolAddress::new("Pool2".into())), "pool address still updates");
    }
}
