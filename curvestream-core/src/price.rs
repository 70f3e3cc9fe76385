//! Pure price and bonding-curve progress arithmetic.
//!
//! Every function here is deterministic and allocation-free: no I/O, no clock, no RNG. Reserves
//! stay in `u64` for as long as possible; only the final ratio and USD multiplication touch
//! floating point, per the precision rule in the design.

use crate::model::{PriceInfo, ReserveInfo, BONDING_CURVE_GRADUATION_SOL};

/// Circulating supply convention to apply when computing market cap. Bonding-curve tokens use
/// the platform's fixed 1e9 mint convention; AMM tokens use the pool-side token reserve instead
/// of mint supply, which would otherwise inflate market cap 3x-10x.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CirculatingSupply {
    BondingCurveFixedSupply { total_supply: u64, decimals: u8 },
    AmmPoolReserve { token_reserve: u64 },
}

impl CirculatingSupply {
    fn as_f64(self) -> f64 {
        match self {
            CirculatingSupply::BondingCurveFixedSupply { total_supply, decimals } => {
                total_supply as f64 / 10f64.powi(decimals as i32)
            }
            CirculatingSupply::AmmPoolReserve { token_reserve } => token_reserve as f64,
        }
    }
}

/// `priceInSol = solReserves / tokenReserves`, `priceInUsd = priceInSol * solPriceUsd`,
/// `marketCapUsd = priceInUsd * circulatingSupply`. Division by zero yields zero price and zero
/// market cap rather than `NaN`/`inf`.
pub fn calculate_price(reserves: ReserveInfo, sol_price_usd: f64, circulating_supply: CirculatingSupply) -> PriceInfo {
    if reserves.token_reserves == 0 {
        return PriceInfo::new(0.0, 0.0, 0.0);
    }

    let price_in_sol = reserves.sol_reserves as f64 / reserves.token_reserves as f64;
    let price_in_usd = price_in_sol * sol_price_usd;
    let market_cap_usd = price_in_usd * circulating_supply.as_f64();

    PriceInfo::new(price_in_sol, price_in_usd, market_cap_usd)
}

/// `min(100, 100 * solInCurve / 84)`, clamped to 100 whenever the on-chain `complete` flag is
/// set regardless of the computed ratio.
pub fn bonding_curve_progress(sol_in_curve_lamports: u64, complete: bool) -> f64 {
    if complete {
        return 100.0;
    }
    let sol_in_curve = sol_in_curve_lamports as f64 / crate::model::LAMPORTS_PER_SOL as f64;
    (100.0 * sol_in_curve / BONDING_CURVE_GRADUATION_SOL).min(100.0)
}

/// `solInCurve` preference order: the account's real lamport balance when available, otherwise
/// the delta between the current and at-creation virtual SOL reserves.
pub fn sol_in_curve_lamports(real_sol_balance: Option<u64>, virtual_sol_reserves: u64, virtual_sol_reserves_at_creation: u64) -> u64 {
    real_sol_balance.unwrap_or_else(|| virtual_sol_reserves.saturating_sub(virtual_sol_reserves_at_creation))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn division_by_zero_token_reserves_yields_zero() {
        let reserves = ReserveInfo::new(1_000, 0, true);
        let info = calculate_price(reserves, 150.0, CirculatingSupply::AmmPoolReserve { token_reserve: 1 });
        assert_eq!(info.price_in_sol, 0.0);
        assert_eq!(info.market_cap_usd, 0.0);
    }

    #[test]
    fn bonding_curve_market_cap_uses_fixed_supply_convention() {
        // 30 SOL / 800,000,000 tokens virtual reserves, SOL at $150.
        let reserves = ReserveInfo::new(30 * crate::model::LAMPORTS_PER_SOL, 800_000_000 * 1_000_000, true);
        let supply = CirculatingSupply::BondingCurveFixedSupply {
            total_supply: crate::model::BONDING_CURVE_TOTAL_SUPPLY * 1_000_000,
            decimals: 6,
        };
        let info = calculate_price(reserves, 150.0, supply);
        assert!((info.price_in_sol - 30.0 / 800_000_000.0).abs() < 1e-12);
        let expected_mcap = info.price_in_usd * 1_000_000_000.0;
        assert!((info.market_cap_usd - expected_mcap).abs() < 1e-6);
    }

    #[test]
    fn amm_market_cap_uses_pool_reserve_not_mint_supply() {
        // Regression for the "3x-10x too high" failure mode: using mint supply instead of the
        // pool-side reserve should NOT be what this function computes.
        let reserves = ReserveInfo::new(500 * crate::model::LAMPORTS_PER_SOL, 200_000_000, false);
        let pool_reserve_supply = CirculatingSupply::AmmPoolReserve { token_reserve: 200_000_000 };
        let info = calculate_price(reserves, 150.0, pool_reserve_supply);
        let price_usd = (500.0 / 200_000_000.0) * 150.0;
        let expected_mcap = price_usd * 200_000_000.0;
        assert!((info.market_cap_usd - expected_mcap).abs() < 1e-3);
    }

    #[test]
    fn progress_clamps_to_100_when_complete_flag_set_even_if_ratio_says_otherwise() {
        assert_eq!(bonding_curve_progress(1, true), 100.0);
    }

    #[test]
    fn progress_is_a_simple_ratio_against_the_84_sol_target() {
        let lamports = 42 * crate::model::LAMPORTS_PER_SOL;
        assert!((bonding_curve_progress(lamports, false) - 50.0).abs() < 1e-9);
    }

    #[test]
    fn progress_never_exceeds_100_even_past_the_target() {
        let lamports = 200 * crate::model::LAMPORTS_PER_SOL;
        assert_eq!(bonding_curve_progress(lamports, false), 100.0);
    }

    #[test]
    fn sol_in_curve_prefers_real_balance_over_virtual_delta() {
        assert_eq!(sol_in_curve_lamports(Some(10), 999, 1), 10);
        assert_eq!(sol_in_curve_lamports(None, 999, 1), 998);
    }
}
