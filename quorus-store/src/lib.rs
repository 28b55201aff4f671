//! Durable, tamper-evident storage for a single identity.
//!
//! The ledger is an ordered key-value store where every record is
//! individually stream-encrypted and the whole state (counter, energy
//! balance, record hashes) is sealed by an identity signature over its
//! "essence". Writes are staged into one atomic batch so readers never
//! observe a half-updated state.

pub mod kvtable;
pub mod ledger;

pub use ledger::{Ledger, LedgerRecord, ReplayOutcome, ReplayVerdict};
