//! The quorus client.
//!
//! One local identity observing a committee-operated energy ledger: it
//! derives its key pair from a seed, replays its encrypted local ledger
//! at launch, keeps three peer sockets running through the quorum
//! engine, and moves energy with signed, receipt-confirmed transfers.

use thiserror::Error;

pub mod client;
pub mod config;
pub mod events;
pub mod identity;
pub mod receipt;
pub mod timestamp;
pub mod transfer;

pub use client::Client;
pub use config::Config;
pub use events::{ClientEvent, ComputerStateInfo};
pub use transfer::TransferSummary;

#[derive(Debug, Error)]
pub enum Error {
    /// An identity string fails its checksum recomputation.
    #[error("invalid checksum for identity {0}")]
    InvalidChecksum(String),

    /// A malformed argument, named by field.
    #[error("illegal argument: {0}")]
    IllegalArgument(&'static str),

    /// An attempted transfer exceeds the current local energy.
    #[error("transfer exceeds the available energy")]
    InsufficientEnergy,

    /// The quorum engine collected three responses with no matching pair.
    #[error("collected responses with no matching pair")]
    InvalidResponses,

    /// An atomic persistence batch was refused; in-memory state was
    /// reverted.
    #[error("atomic persistence batch refused")]
    PersistenceFailed(#[from] quorus_store::ledger::Error),

    /// A persisted record or the ledger essence did not verify.
    #[error("signature verification failed on persisted state")]
    SignatureVerificationFailed,

    /// An imported receipt did not verify.
    #[error("receipt rejected")]
    InvalidReceipt(#[from] quorus_network::protocol::status_verify::ReceiptError),

    /// The operation needs [`Client::launch`] first.
    #[error("client is not launched")]
    NotLaunched,

    /// [`Client::launch`] was already called.
    #[error("client is already launched")]
    AlreadyLaunched,

    /// The client core has terminated.
    #[error("client has terminated")]
    Terminated,
}

impl From<identity::IdentityError> for Error {
    fn from(value: identity::IdentityError) -> Self {
        match value {
            identity::IdentityError::MalformedSeed => Error::IllegalArgument("seed"),
            identity::IdentityError::MalformedIdentity(_) => Error::IllegalArgument("identity"),
            identity::IdentityError::InvalidChecksum(text) => Error::InvalidChecksum(text),
        }
    }
}
