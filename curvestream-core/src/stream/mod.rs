//! Upstream connection lifecycle: the [`client`] contract an upstream collaborator implements,
//! and the [`manager`] that drives it (reconnects, subscription bookkeeping, fan-out onto the
//! event bus).

pub mod client;
pub mod manager;

pub use client::{
    AccountFrame, DecodedInstruction, InstructionArgs, InstructionKind, RawFrame, SlotFrame,
    StreamClient, SubscriptionRequest, TokenTransfer, TransactionFrame,
};
pub use manager::StreamManager;
