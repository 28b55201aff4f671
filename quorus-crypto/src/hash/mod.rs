//! Extendable-output cryptographic hashing.
//!
//! Two helper objects:
//!
//! * [`Hasher`] to stream bytes into the hash function and produce a
//!   digest of a caller-chosen byte length
//! * [`struct@Hash`] a conveniently strongly typed byte array
//!
//! The algorithm is `Blake2b` with a variable digest size. The protocol
//! uses digests of 2 bytes (seed checksums), 3 bytes (identity
//! checksums), 16 bytes (the ledger stream key) and 32 bytes (signing
//! digests and record hashes).

#[allow(clippy::module_inception)]
mod hash;
mod hasher;

pub use self::{hash::Hash, hasher::Hasher};
