//! The external streaming collaborator's contract.
//!
//! The concrete gRPC transport, subscription wire format and the on-chain binary layouts are
//! treated as an opaque decoder boundary - this crate only defines what a conforming upstream
//! client hands back once a frame has been decoded far enough to expose accounts, instruction
//! discriminants and inner token transfers. Swapping the transport (a different streaming
//! provider, a local replay fixture) only requires a new [`StreamClient`] impl.

use async_trait::async_trait;
use curvestream_integration::error::StreamError;
use serde::{Deserialize, Serialize};

/// A partially decoded instruction invocation lifted out of a transaction frame. "Partially"
/// because the raw instruction-account-index/data bytes have already been resolved against the
/// transaction's account keys and inner instructions by the upstream collaborator; this crate
/// only ever reasons about program ids, discriminants, named accounts and transfers.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DecodedInstruction {
    pub program_id: String,
    pub kind: InstructionKind,
    pub accounts: Vec<String>,
    pub args: InstructionArgs,
    pub inner_token_transfers: Vec<TokenTransfer>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub enum InstructionKind {
    BondingCurveBuy,
    BondingCurveSell,
    BondingCurveCreate,
    AmmSwap,
    AmmCreatePool,
    Unknown,
}

/// Instruction-specific arguments that survived decoding. Fields are optional because different
/// instruction kinds populate different subsets and a frame from an unrecognised program variant
/// may carry none at all.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct InstructionArgs {
    pub amount_in: Option<u64>,
    pub minimum_amount_out: Option<u64>,
    pub virtual_sol_reserves: Option<u64>,
    pub virtual_token_reserves: Option<u64>,
    pub real_sol_reserves: Option<u64>,
    pub real_token_reserves: Option<u64>,
    pub bonding_curve_complete: Option<bool>,
    pub token_name: Option<String>,
    pub token_symbol: Option<String>,
    pub token_uri: Option<String>,
}

/// An SPL `transferChecked` observed in a transaction's inner instructions. The AMM parser
/// reconstructs trade amounts from a pair of these rather than trusting instruction args, since
/// the swap instruction itself only carries a minimum-out bound.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TokenTransfer {
    pub mint: String,
    pub source: String,
    pub destination: String,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TransactionFrame {
    pub signature: String,
    pub slot: u64,
    pub block_time: Option<i64>,
    pub fee_payer: String,
    pub instructions: Vec<DecodedInstruction>,
}

/// A snapshot of a single account's data, used to watch bonding-curve and pool accounts directly
/// rather than relying solely on instruction parsing.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AccountFrame {
    pub pubkey: String,
    pub owner: String,
    pub slot: u64,
    pub lamports: u64,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SlotFrame {
    pub slot: u64,
    pub parent: Option<u64>,
}

/// Everything the upstream collaborator can hand back for one subscription message.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum RawFrame {
    Transaction(TransactionFrame),
    Account(AccountFrame),
    Slot(SlotFrame),
    Ping,
}

/// A single subscription request: a caller-chosen name plus the account/program filters that
/// name maps to. Re-subscribing under the same name replaces the previous filter set rather than
/// adding a second one.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SubscriptionRequest {
    pub name: String,
    pub account_include: Vec<String>,
    pub account_owner: Vec<String>,
    pub memcmp_offset: Option<usize>,
    pub memcmp_bytes: Option<Vec<u8>>,
}

/// The contract a conforming upstream streaming collaborator must satisfy. The production
/// implementation wraps a Yellowstone-style gRPC subscription; tests substitute an in-memory
/// fixture that replays a fixed sequence of [`RawFrame`]s.
#[async_trait]
pub trait StreamClient: Send + Sync {
    /// Open the subscription stream. Returns a receiver of frames plus a sender the caller can
    /// use to push subscription updates onto the same connection.
    async fn connect(&self) -> Result<(), StreamError>;

    /// Send (or replace) a named subscription filter on the live connection.
    async fn subscribe(&self, request: SubscriptionRequest) -> Result<(), StreamError>;

    /// Pull the next frame, or `Ok(None)` if the connection closed cleanly.
    async fn next_frame(&self) -> Result<Option<RawFrame>, StreamError>;

    async fn disconnect(&self);
}
