//! Asymmetric keys for identity signatures.

pub mod ed25519;
