//! Typed client events.
//!
//! Subscribers receive every event over a broadcast channel and match on
//! the tag; there is no dynamic listener registry.

use quorus_crypto::hash::Hash;

use crate::transfer::TransferSummary;

/// Computer-state progress attached to [`ClientEvent::Info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComputerStateInfo {
    /// 0 on desync, then 1..=3 as matching peer responses accumulate.
    pub status: usize,
    pub epoch: u16,
    pub tick: u32,
}

#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A peer socket finished connecting.
    Open { slot: usize, peer: String },

    /// A peer socket closed; the engine is already reconnecting.
    Close { slot: usize, peer: String },

    /// A non-fatal failure the embedder may want to surface.
    Error(String),

    /// Committee state progress plus the current peer set.
    Info {
        computer_state: ComputerStateInfo,
        peers: Vec<String>,
    },

    /// A transfer was persisted and broadcast.
    Transfer(TransferSummary),

    /// A transfer settled with a processed receipt.
    Receipt {
        hash: Hash<32>,
        receipt: Vec<u8>,
        receipt_base64: String,
    },

    /// The local energy balance changed.
    Energy(u64),

    /// Aggregate status counts for a polled transfer.
    TransferStatus {
        hash: Hash<32>,
        unseen: usize,
        seen: usize,
        processed: usize,
        epoch: u16,
        tick: u32,
    },
}
