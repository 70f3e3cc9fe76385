//! Bonding-curve program decoding: trade instructions and account snapshots.

use super::{BcAccountUpdateEvent, TradeEvent};
use crate::model::{MintAddress, Signature, TradeType, UserAddress};
use crate::stream::client::{AccountFrame, DecodedInstruction, InstructionKind, TransactionFrame};
use chrono::{DateTime, Utc};

/// Publicly documented program id of the bonding-curve launchpad this system tracks.
pub const BONDING_CURVE_PROGRAM_ID: &str = "6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P";

/// Byte offset of the `complete` boolean within a bonding-curve account's data, matching the
/// layout `discriminator(8) | virtualTokenReserves(8) | virtualSolReserves(8) |
/// realTokenReserves(8) | realSolReserves(8) | tokenTotalSupply(8) | complete(1)`. Used both
/// here and by the bonding-curve completion monitor's memcmp filter.
pub const COMPLETE_FIELD_OFFSET: usize = 48;

const DISCRIMINATOR_LEN: usize = 8;

/// Accounts conventionally named `[trader, mint, bondingCurve, ...]` by the upstream decoder for
/// buy/sell instructions. Indexing errors are treated as malformed frames (yield nothing).
const MINT_ACCOUNT_INDEX: usize = 1;
const TRADER_ACCOUNT_INDEX: usize = 0;
const BONDING_CURVE_ACCOUNT_INDEX: usize = 2;

pub fn parse_trade(tx: &TransactionFrame, ix: &DecodedInstruction, block_time: DateTime<Utc>) -> Option<TradeEvent> {
    let trade_type = match ix.kind {
        InstructionKind::BondingCurveBuy => TradeType::Buy,
        InstructionKind::BondingCurveSell => TradeType::Sell,
        _ => return None,
    };

    let mint = ix.accounts.get(MINT_ACCOUNT_INDEX)?;
    let trader = ix.accounts.get(TRADER_ACCOUNT_INDEX).unwrap_or(&tx.fee_payer);
    let bonding_curve_key = ix.accounts.get(BONDING_CURVE_ACCOUNT_INDEX).cloned();

    let amount_in = ix.args.amount_in?;
    let amount_out = ix.args.minimum_amount_out?;
    let (sol_amount, token_amount) = match trade_type {
        TradeType::Buy => (amount_in, amount_out),
        TradeType::Sell => (amount_out, amount_in),
    };

    Some(TradeEvent {
        signature: Signature::new(tx.signature.clone()),
        mint_address: MintAddress::new(mint.clone()),
        user_address: UserAddress::new(trader.clone()),
        trade_type,
        sol_amount,
        token_amount,
        virtual_sol_reserves: ix.args.virtual_sol_reserves.unwrap_or(0),
        virtual_token_reserves: ix.args.virtual_token_reserves.unwrap_or(0),
        slot: tx.slot,
        block_time,
        bonding_curve_key,
    })
}

/// Decode a bonding-curve account snapshot. Returns `None` for accounts not owned by the
/// bonding-curve program or whose data is too short to contain the fixed-layout fields.
pub fn parse_account(account: &AccountFrame) -> Option<super::Event> {
    if account.owner != BONDING_CURVE_PROGRAM_ID {
        return None;
    }
    decode_bonding_curve_data(&account.data).map(|mut update| {
        update.bonding_curve_key = account.pubkey.clone();
        update.slot = account.slot;
        super::Event::BcAccountUpdate(update)
    })
}

fn decode_bonding_curve_data(data: &[u8]) -> Option<BcAccountUpdateEvent> {
    if data.len() < COMPLETE_FIELD_OFFSET + 1 {
        return None;
    }

    let read_u64 = |offset: usize| -> u64 {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&data[offset..offset + 8]);
        u64::from_le_bytes(bytes)
    };

    let virtual_token_reserves = read_u64(DISCRIMINATOR_LEN);
    let virtual_sol_reserves = read_u64(DISCRIMINATOR_LEN + 8);
    let real_token_reserves = read_u64(DISCRIMINATOR_LEN + 16);
    let real_sol_reserves = read_u64(DISCRIMINATOR_LEN + 24);
    let token_total_supply = read_u64(DISCRIMINATOR_LEN + 32);
    let complete = data[COMPLETE_FIELD_OFFSET] != 0;

    Some(BcAccountUpdateEvent {
        bonding_curve_key: String::new(),
        mint_address: None,
        slot: 0,
        virtual_sol_reserves,
        virtual_token_reserves,
        real_sol_reserves,
        real_token_reserves,
        token_total_supply,
        complete,
        creator: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::client::InstructionArgs;

    fn tx(ix: DecodedInstruction) -> TransactionFrame {
        TransactionFrame {
            signature: "sig1".into(),
            slot: 10,
            block_time: Some(1_700_000_000),
            fee_payer: "Trader1".into(),
            instructions: vec![ix],
        }
    }

    #[test]
    fn buy_maps_amount_in_to_sol_and_minimum_out_to_tokens() {
        let ix = DecodedInstruction {
            program_id: BONDING_CURVE_PROGRAM_ID.into(),
            kind: InstructionKind::BondingCurveBuy,
            accounts: vec!["Trader1".into(), "Mint1".into(), "Curve1".into()],
            args: InstructionArgs {
                amount_in: Some(1_000_000_000),
                minimum_amount_out: Some(5_000_000),
                virtual_sol_reserves: Some(31_000_000_000),
                virtual_token_reserves: Some(795_000_000_000),
                ..Default::default()
            },
            inner_token_transfers: vec![],
        };
        let tx = tx(ix.clone());
        let event = parse_trade(&tx, &ix, Utc::now()).unwrap();
        assert_eq!(event.trade_type, TradeType::Buy);
        assert_eq!(event.sol_amount, 1_000_000_000);
        assert_eq!(event.token_amount, 5_000_000);
        assert_eq!(event.mint_address, MintAddress::new("Mint1".into()));
        assert_eq!(event.bonding_curve_key.as_deref(), Some("Curve1"));
    }

    #[test]
    fn missing_amount_fields_yield_no_event() {
        let ix = DecodedInstruction {
            program_id: BONDING_CURVE_PROGRAM_ID.into(),
            kind: InstructionKind::BondingCurveBuy,
            accounts: vec!["Trader1".into(), "Mint1".into()],
            args: InstructionArgs::default(),
            inner_token_transfers: vec![],
        };
        let tx = tx(ix.clone());
        assert!(parse_trade(&tx, &ix, Utc::now()).is_none());
    }

    #[test]
    fn decodes_account_snapshot_and_reads_complete_flag() {
        let mut data = vec![0u8; COMPLETE_FIELD_OFFSET + 1];
        data[DISCRIMINATOR_LEN..DISCRIMINATOR_LEN + 8].copy_from_slice(&700_000_000u64.to_le_bytes());
        data[COMPLETE_FIELD_OFFSET] = 1;
        let account = AccountFrame {
            pubkey: "Curve1".into(),
            owner: BONDING_CURVE_PROGRAM_ID.into(),
            slot: 42,
            lamports: 0,
            data,
        };
        let event = parse_account(&account).unwrap();
        match event {
            super::super::Event::BcAccountUpdate(update) => {
                assert_eq!(update.virtual_token_reserves, 700_000_000);
                assert!(update.complete);
                assert_eq!(update.bonding_curve_key, "Curve1");
                assert_eq!(update.slot, 42);
            }
            _ => panic!("expected BcAccountUpdate"),
        }
    }

    #[test]
    fn accounts_not_owned_by_the_bonding_curve_program_are_ignored() {
        let account = AccountFrame {
            pubkey: "Other".into(),
            owner: "SomeOtherProgram".into(),
            slot: 1,
            lamports: 0,
            data: vec![0u8; 64],
        };
        assert!(parse_account(&account).is_none());
    }
}
