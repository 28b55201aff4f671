//! Verification of admin-signed computer-state records.

use thiserror::Error;

use quorus_codec::state::{ComputerStateRecord, ADMIN_INDEX};
use quorus_crypto::hash::Hasher;
use quorus_crypto::key::ed25519::{PublicKey, Signature};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("record was issued by computor {0}, not the admin")]
    NotAdminIssued(u16),

    #[error("admin signature does not verify")]
    BadSignature,
}

/// An admin-verified committee snapshot. Keeps the raw record bytes so
/// they can be embedded verbatim into receipts.
#[derive(Debug, Clone)]
pub struct Snapshot(ComputerStateRecord);

impl Snapshot {
    /// Accept a record only when it is admin-issued and the admin
    /// signature covers the signed region.
    pub fn verify(record: ComputerStateRecord, admin: &PublicKey) -> Result<Self, Error> {
        if record.computor_index() != ADMIN_INDEX {
            return Err(Error::NotAdminIssued(record.computor_index()));
        }

        let digest = Hasher::<32>::hash(record.signed_region());
        let signature = Signature::from(*record.signature());

        if !admin.verify(digest, &signature) {
            return Err(Error::BadSignature);
        }

        Ok(Self(record))
    }

    pub fn epoch(&self) -> u16 {
        self.0.epoch()
    }

    pub fn tick(&self) -> u32 {
        self.0.tick()
    }

    pub fn timestamp(&self) -> u64 {
        self.0.timestamp()
    }

    pub fn computor_key(&self, computor: usize) -> Option<PublicKey> {
        self.0.public_key(computor).map(|key| PublicKey::from(*key))
    }

    pub fn record(&self) -> &ComputerStateRecord {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorus_codec::state::{compose, SIGNED_REGION_LENGTH};
    use quorus_codec::NUMBER_OF_COMPUTORS;
    use quorus_crypto::key::ed25519::SecretKey;

    fn signed_record(computor_index: u16, admin: &SecretKey) -> ComputerStateRecord {
        let keys = vec![[0u8; 32]; NUMBER_OF_COMPUTORS];
        let mut bytes = compose(computor_index, 3, 60, 1_000, &keys);

        let digest = Hasher::<32>::hash(&bytes[..SIGNED_REGION_LENGTH]);
        let signature = admin.sign(digest);
        bytes[SIGNED_REGION_LENGTH..].copy_from_slice(signature.as_ref());

        ComputerStateRecord::parse(&bytes).unwrap()
    }

    #[test]
    fn accepts_a_valid_admin_record() {
        let admin = SecretKey::from([1; 32]);
        let record = signed_record(ADMIN_INDEX, &admin);

        let snapshot = Snapshot::verify(record, &admin.public_key()).unwrap();

        assert_eq!(snapshot.epoch(), 3);
        assert_eq!(snapshot.tick(), 60);
    }

    #[test]
    fn rejects_a_computor_issued_record() {
        let admin = SecretKey::from([1; 32]);
        let record = signed_record(12, &admin);

        assert_eq!(
            Snapshot::verify(record, &admin.public_key()).unwrap_err(),
            Error::NotAdminIssued(12)
        );
    }

    #[test]
    fn rejects_a_forged_signature() {
        let admin = SecretKey::from([1; 32]);
        let wrong = SecretKey::from([2; 32]);
        let record = signed_record(ADMIN_INDEX, &wrong);

        assert_eq!(
            Snapshot::verify(record, &admin.public_key()).unwrap_err(),
            Error::BadSignature
        );
    }
}
