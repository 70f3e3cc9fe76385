//! Decodes a raw upstream frame into zero-or-more typed domain events.
//!
//! `parse` is deterministic and side-effect-free: no I/O, no clock, no RNG, no counters touched
//! by this module itself (callers own observability). Frames it does not recognise, or that are
//! malformed at the partially-decoded layer it operates on, simply yield no events.

pub mod amm;
pub mod bonding_curve;

use crate::model::{MintAddress, PoolAddress, Program, Signature, TradeType, UserAddress};
use crate::stream::client::{DecodedInstruction, InstructionKind, RawFrame, TransactionFrame};
use chrono::{DateTime, TimeZone, Utc};

#[derive(Debug, Clone, PartialEq)]
pub struct TradeEvent {
    pub signature: Signature,
    pub mint_address: MintAddress,
    pub user_address: UserAddress,
    pub trade_type: TradeType,
    pub sol_amount: u64,
    pub token_amount: u64,
    pub virtual_sol_reserves: u64,
    pub virtual_token_reserves: u64,
    pub slot: u64,
    pub block_time: DateTime<Utc>,
    /// The bonding-curve PDA address this trade was routed through. `None` for AMM trades, which
    /// have no bonding-curve account at all.
    pub bonding_curve_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AmmTradeEvent {
    pub trade: TradeEvent,
    pub pool_address: PoolAddress,
    pub input_mint: MintAddress,
    pub output_mint: MintAddress,
    pub in_amount: u64,
    pub out_amount: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BcAccountUpdateEvent {
    pub bonding_curve_key: String,
    pub mint_address: Option<MintAddress>,
    pub slot: u64,
    pub virtual_sol_reserves: u64,
    pub virtual_token_reserves: u64,
    pub real_sol_reserves: u64,
    pub real_token_reserves: u64,
    pub token_total_supply: u64,
    pub complete: bool,
    pub creator: Option<UserAddress>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PoolCreatedEvent {
    pub pool_address: PoolAddress,
    pub base_mint: MintAddress,
    pub quote_mint: MintAddress,
    pub signature: Signature,
    pub slot: u64,
    pub creator: Option<UserAddress>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    BcTrade(TradeEvent),
    AmmTrade(AmmTradeEvent),
    BcAccountUpdate(BcAccountUpdateEvent),
    PoolCreated(PoolCreatedEvent),
}

fn block_time_of(seconds: Option<i64>) -> DateTime<Utc> {
    seconds
        .and_then(|s| Utc.timestamp_opt(s, 0).single())
        .unwrap_or_else(Utc::now)
}

/// Decode one upstream frame into every event it yields. Unknown instruction kinds and
/// unrecognised account owners contribute nothing - they are not an error, just noise the caller
/// filters by subscribing narrowly in the first place.
pub fn parse(frame: &RawFrame) -> Vec<Event> {
    match frame {
        RawFrame::Transaction(tx) => parse_transaction(tx),
        RawFrame::Account(account) => bonding_curve::parse_account(account).into_iter().collect(),
        RawFrame::Slot(_) | RawFrame::Ping => Vec::new(),
    }
}

fn parse_transaction(tx: &TransactionFrame) -> Vec<Event> {
    let block_time = block_time_of(tx.block_time);
    tx.instructions
        .iter()
        .filter_map(|ix| parse_instruction(tx, ix, block_time))
        .collect()
}

fn parse_instruction(tx: &TransactionFrame, ix: &DecodedInstruction, block_time: DateTime<Utc>) -> Option<Event> {
    match ix.kind {
        InstructionKind::BondingCurveBuy | InstructionKind::BondingCurveSell => {
            bonding_curve::parse_trade(tx, ix, block_time).map(Event::BcTrade)
        }
        InstructionKind::AmmSwap => amm::parse_trade(tx, ix).map(Event::AmmTrade),
        InstructionKind::AmmCreatePool => amm::parse_pool_created(tx, ix).map(Event::PoolCreated),
        InstructionKind::BondingCurveCreate | InstructionKind::Unknown => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_instruction_kind_yields_no_event() {
        let tx = TransactionFrame {
            signature: "sig".into(),
            slot: 1,
            block_time: None,
            fee_payer: "payer".into(),
            instructions: vec![DecodedInstruction {
                program_id: "SomeOtherProgram".into(),
                kind: InstructionKind::Unknown,
                accounts: vec![],
                args: Default::default(),
                inner_token_transfers: vec![],
            }],
        };
        assert!(parse(&RawFrame::Transaction(tx)).is_empty());
    }

    #[test]
    fn slot_and_ping_frames_yield_no_events() {
        assert!(parse(&RawFrame::Slot(crate::stream::client::SlotFrame { slot: 1, parent: None })).is_empty());
        assert!(parse(&RawFrame::Ping).is_empty());
    }
}
