//! AMM program decoding: swaps (amounts reconstructed from inner transfers) and pool creation.

use super::{AmmTradeEvent, PoolCreatedEvent, TradeEvent};
use crate::model::{MintAddress, PoolAddress, Signature, TradeType, UserAddress};
use crate::stream::client::{DecodedInstruction, InstructionKind, TokenTransfer, TransactionFrame};

/// Wrapped SOL mint - conventionally the "quote" side of every pool this system tracks. Used to
/// tell a buy (SOL in) from a sell (SOL out) without a dedicated direction flag in the decoded
/// instruction.
pub const WRAPPED_SOL_MINT: &str = "So11111111111111111111111111111111111111112";

const TRADER_ACCOUNT_INDEX: usize = 0;
const POOL_ACCOUNT_INDEX: usize = 1;
const INPUT_MINT_ACCOUNT_INDEX: usize = 2;
const OUTPUT_MINT_ACCOUNT_INDEX: usize = 3;
const BASE_MINT_ACCOUNT_INDEX: usize = 1;
const QUOTE_MINT_ACCOUNT_INDEX: usize = 2;

/// Reconstruct the actual swapped amounts from the transaction's inner `transferChecked`
/// instructions, since the swap instruction's own data only carries slippage bounds.
pub fn parse_trade(tx: &TransactionFrame, ix: &DecodedInstruction) -> Option<AmmTradeEvent> {
    if ix.kind != InstructionKind::AmmSwap {
        return None;
    }

    let pool_address = ix.accounts.get(POOL_ACCOUNT_INDEX)?.clone();
    let input_mint = ix.accounts.get(INPUT_MINT_ACCOUNT_INDEX)?.clone();
    let output_mint = ix.accounts.get(OUTPUT_MINT_ACCOUNT_INDEX)?.clone();
    let trader = ix.accounts.get(TRADER_ACCOUNT_INDEX).unwrap_or(&tx.fee_payer).clone();

    let [a, b] = two_transfer_amounts(&ix.inner_token_transfers)?;
    let is_buy = input_mint == WRAPPED_SOL_MINT;

    let (sol_amount, token_amount) = if is_buy {
        (a.min(b), a.max(b))
    } else {
        let token_amount = ix.args.amount_in?;
        let sol_amount = if a == token_amount { b } else { a };
        (sol_amount, token_amount)
    };

    let (in_amount, out_amount) = if is_buy {
        (sol_amount, token_amount)
    } else {
        (token_amount, sol_amount)
    };

    let trade = TradeEvent {
        signature: Signature::new(tx.signature.clone()),
        mint_address: MintAddress::new(if is_buy { output_mint.clone() } else { input_mint.clone() }),
        user_address: UserAddress::new(trader),
        trade_type: if is_buy { TradeType::Buy } else { TradeType::Sell },
        sol_amount,
        token_amount,
        virtual_sol_reserves: ix.args.virtual_sol_reserves.unwrap_or(0),
        virtual_token_reserves: ix.args.virtual_token_reserves.unwrap_or(0),
        slot: tx.slot,
        block_time: super::block_time_of(tx.block_time),
        bonding_curve_key: None,
    };

    Some(AmmTradeEvent {
        trade,
        pool_address: PoolAddress::new(pool_address),
        input_mint: MintAddress::new(input_mint),
        output_mint: MintAddress::new(output_mint),
        in_amount,
        out_amount,
    })
}

fn two_transfer_amounts(transfers: &[TokenTransfer]) -> Option<[u64; 2]> {
    match transfers {
        [t0, t1] => Some([t0.amount, t1.amount]),
        _ => None,
    }
}

pub fn parse_pool_created(tx: &TransactionFrame, ix: &DecodedInstruction) -> Option<PoolCreatedEvent> {
    if ix.kind != InstructionKind::AmmCreatePool {
        return None;
    }

    let pool_address = ix.accounts.get(POOL_ACCOUNT_INDEX)?.clone();
    let base_mint = ix.accounts.get(BASE_MINT_ACCOUNT_INDEX)?.clone();
    let quote_mint = ix.accounts.get(QUOTE_MINT_ACCOUNT_INDEX)?.clone();
    let creator = ix.accounts.get(TRADER_ACCOUNT_INDEX).cloned().map(UserAddress::new);

    Some(PoolCreatedEvent {
        pool_address: PoolAddress::new(pool_address),
        base_mint: MintAddress::new(base_mint),
        quote_mint: MintAddress::new(quote_mint),
        signature: Signature::new(tx.signature.clone()),
        slot: tx.slot,
        creator,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::client::InstructionArgs;

    fn tx() -> TransactionFrame {
        TransactionFrame {
            signature: "sig-amm".into(),
            slot: 99,
            block_time: None,
            fee_payer: "Trader1".into(),
            instructions: vec![],
        }
    }

    #[test]
    fn buy_amounts_are_reconstructed_from_inner_transfers_min_is_sol() {
        let ix = DecodedInstruction {
            program_id: "AmmProgram".into(),
            kind: InstructionKind::AmmSwap,
            accounts: vec!["Trader1".into(), "Pool1".into(), WRAPPED_SOL_MINT.into(), "Mint1".into()],
            args: InstructionArgs {
                minimum_amount_out: Some(40_000_000_000),
                ..Default::default()
            },
            inner_token_transfers: vec![
                TokenTransfer { mint: WRAPPED_SOL_MINT.into(), source: "a".into(), destination: "b".into(), amount: 1_850_000_000 },
                TokenTransfer { mint: "Mint1".into(), source: "c".into(), destination: "d".into(), amount: 42_000_000_000 },
            ],
        };
        let event = parse_trade(&tx(), &ix).unwrap();
        assert_eq!(event.trade.sol_amount, 1_850_000_000);
        assert_eq!(event.trade.token_amount, 42_000_000_000);
        assert_eq!(event.trade.trade_type, TradeType::Buy);
    }

    #[test]
    fn sell_uses_amount_in_for_token_leg_and_the_other_transfer_for_sol() {
        let ix = DecodedInstruction {
            program_id: "AmmProgram".into(),
            kind: InstructionKind::AmmSwap,
            accounts: vec!["Trader1".into(), "Pool1".into(), "Mint1".into(), WRAPPED_SOL_MINT.into()],
            args: InstructionArgs {
                amount_in: Some(10_000_000_000),
                ..Default::default()
            },
            inner_token_transfers: vec![
                TokenTransfer { mint: "Mint1".into(), source: "a".into(), destination: "b".into(), amount: 10_000_000_000 },
                TokenTransfer { mint: WRAPPED_SOL_MINT.into(), source: "c".into(), destination: "d".into(), amount: 430_000_000 },
            ],
        };
        let event = parse_trade(&tx(), &ix).unwrap();
        assert_eq!(event.trade.token_amount, 10_000_000_000);
        assert_eq!(event.trade.sol_amount, 430_000_000);
        assert_eq!(event.trade.trade_type, TradeType::Sell);
    }

    #[test]
    fn pool_creation_captures_creator_from_the_first_account() {
        let ix = DecodedInstruction {
            program_id: "AmmProgram".into(),
            kind: InstructionKind::AmmCreatePool,
            accounts: vec!["Creator1".into(), "Pool1".into(), "Mint1".into(), WRAPPED_SOL_MINT.into()],
            args: InstructionArgs::default(),
            inner_token_transfers: vec![],
        };
        let event = parse_pool_created(&tx(), &ix).unwrap();
        assert_eq!(event.creator, Some(UserAddress::new("Creator1".into())));
        assert_eq!(event.base_mint, MintAddress::new("Mint1".into()));
    }
}
