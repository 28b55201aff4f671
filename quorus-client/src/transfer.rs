//! Building, signing and summarising transfers.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use quorus_codec::transfer::{TransferRecord, UnsignedTransfer};
use quorus_crypto::hash::{Hash, Hasher};
use quorus_crypto::key::ed25519::{PublicKey, Signature};

use crate::identity::{self, Identity};

/// The smallest transferable amount.
pub const MIN_ENERGY_AMOUNT: u64 = 1_000_000;

/// Sign and pack a transfer; returns the record and its hash.
pub(crate) fn build(
    identity: &Identity,
    destination: &PublicKey,
    energy: u64,
    timestamp: u64,
) -> (TransferRecord, Hash<32>) {
    let source: [u8; 32] = (*identity.public()).into();
    let destination: [u8; 32] = (*destination).into();

    let unsigned = UnsignedTransfer::new(source, destination, timestamp, energy);

    let digest = Hasher::<32>::hash(&unsigned.signing_preimage());
    let signature: [u8; 64] = identity.secret().sign(digest).into();

    let record = unsigned.into_record(signature);
    let hash = Hasher::<32>::hash(record.as_bytes());

    (record, hash)
}

/// Verify a packed transfer against a claimed source key.
pub(crate) fn verify(record: &TransferRecord, source: &PublicKey) -> bool {
    let digest = Hasher::<32>::hash(&record.signing_preimage());
    let signature = Signature::from(*record.signature());

    source.verify(digest, &signature)
}

/// The embedder-facing view of a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSummary {
    pub hash: Hash<32>,
    pub source: String,
    pub destination: String,
    pub energy: u64,
    pub timestamp: u64,
    pub signature: String,
}

impl TransferSummary {
    pub fn from_record(record: &TransferRecord) -> Self {
        Self {
            hash: Hasher::<32>::hash(record.as_bytes()),
            source: identity::render(record.source()),
            destination: identity::render(record.destination()),
            energy: record.energy(),
            timestamp: record.timestamp(),
            signature: STANDARD.encode(record.signature()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEED: &str = "vmscmtbcqjbqyqcckegsfdsrcgjpeejobolmimgorsqwgupzhkevreu";

    #[test]
    fn built_transfers_verify_under_their_source_key() {
        let identity = Identity::derive(SEED, 0).unwrap();
        let destination = Identity::derive(SEED, 1).unwrap();

        let (record, hash) = build(&identity, destination.public(), 5_000_000, 42 * 1_000_000);

        assert!(verify(&record, identity.public()));
        assert_eq!(hash, Hasher::<32>::hash(record.as_bytes()));
    }

    #[test]
    fn tampering_with_the_energy_breaks_the_signature() {
        let identity = Identity::derive(SEED, 0).unwrap();
        let destination = Identity::derive(SEED, 1).unwrap();

        let (record, _) = build(&identity, destination.public(), 5_000_000, 42 * 1_000_000);

        let mut bytes = *record.as_bytes();
        bytes[72] ^= 1;
        let tampered = TransferRecord::from(bytes);

        assert!(!verify(&tampered, identity.public()));
    }

    #[test]
    fn the_digest_is_domain_separated() {
        let identity = Identity::derive(SEED, 0).unwrap();
        let destination = Identity::derive(SEED, 1).unwrap();

        let (record, _) = build(&identity, destination.public(), 5_000_000, 42 * 1_000_000);

        // signing the untagged prefix must not produce the same signature
        let untagged = Hasher::<32>::hash(&record.as_bytes()[..80]);
        let signature = Signature::from(*record.signature());

        assert!(!identity.public().verify(untagged, &signature));
    }

    #[test]
    fn summary_reflects_the_record() {
        let identity = Identity::derive(SEED, 0).unwrap();
        let destination = Identity::derive(SEED, 1).unwrap();

        let (record, hash) = build(&identity, destination.public(), 7_000_000, 9 * 1_000_000);
        let summary = TransferSummary::from_record(&record);

        assert_eq!(summary.hash, hash);
        assert_eq!(summary.source, identity.text());
        assert_eq!(summary.destination, destination.text());
        assert_eq!(summary.energy, 7_000_000);
        assert_eq!(summary.timestamp, 9 * 1_000_000);
        assert_eq!(
            STANDARD.decode(&summary.signature).unwrap(),
            record.signature()
        );
    }
}
