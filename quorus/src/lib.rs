//! Rust-native client for a quorum-voted energy ledger
//!
//! Quorus is a collection of crates that let one local identity observe
//! a committee-operated ledger, submit signed transfers of energy, and
//! hold cryptographically verifiable receipts of their outcome. This
//! crate doesn't provide any particular application, it bundles the
//! member crates under one namespace for embedders.

#[doc(inline)]
pub use quorus_client as client;

#[doc(inline)]
pub use quorus_codec as codec;

#[doc(inline)]
pub use quorus_crypto as crypto;

#[doc(inline)]
pub use quorus_network as network;

#[doc(inline)]
pub use quorus_store as store;

#[doc(inline)]
pub use quorus_client::{Client, ClientEvent, Config};
