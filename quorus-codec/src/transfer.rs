//! The packed 144-byte transfer record.
//!
//! | offset | length | field |
//! |--------|--------|-------|
//! | 0      | 32     | source public key |
//! | 32     | 32     | destination public key |
//! | 64     | 8      | timestamp |
//! | 72     | 8      | energy |
//! | 80     | 64     | signature |
//!
//! The signing digest covers the first 80 bytes with byte 0 XORed by the
//! transfer domain tag, separating transfers from other structures hashed
//! with the same function.

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

pub const RECORD_LENGTH: usize = 144;
pub const UNSIGNED_PREFIX_LENGTH: usize = 80;

const DESTINATION_OFFSET: usize = 32;
const TIMESTAMP_OFFSET: usize = 64;
const ENERGY_OFFSET: usize = 72;
const SIGNATURE_OFFSET: usize = 80;

/// XORed into byte 0 of the digest preimage.
pub const SIGNING_TAG: u8 = 1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("transfer record is {0} bytes, expected {RECORD_LENGTH}")]
    InvalidLength(usize),
}

/// An assembled transfer still missing its signature.
pub struct UnsignedTransfer([u8; UNSIGNED_PREFIX_LENGTH]);

impl UnsignedTransfer {
    pub fn new(source: [u8; 32], destination: [u8; 32], timestamp: u64, energy: u64) -> Self {
        let mut bytes = [0u8; UNSIGNED_PREFIX_LENGTH];

        bytes[..DESTINATION_OFFSET].copy_from_slice(&source);
        bytes[DESTINATION_OFFSET..TIMESTAMP_OFFSET].copy_from_slice(&destination);
        LittleEndian::write_u64(&mut bytes[TIMESTAMP_OFFSET..ENERGY_OFFSET], timestamp);
        LittleEndian::write_u64(&mut bytes[ENERGY_OFFSET..], energy);

        Self(bytes)
    }

    /// The bytes to hash when signing: the prefix with the domain tag
    /// folded into byte 0.
    pub fn signing_preimage(&self) -> [u8; UNSIGNED_PREFIX_LENGTH] {
        let mut preimage = self.0;
        preimage[0] ^= SIGNING_TAG;
        preimage
    }

    pub fn into_record(self, signature: [u8; 64]) -> TransferRecord {
        let mut bytes = [0u8; RECORD_LENGTH];
        bytes[..SIGNATURE_OFFSET].copy_from_slice(&self.0);
        bytes[SIGNATURE_OFFSET..].copy_from_slice(&signature);

        TransferRecord(bytes)
    }
}

/// A complete signed transfer record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord([u8; RECORD_LENGTH]);

impl TransferRecord {
    pub fn parse(bytes: &[u8]) -> Result<Self, Error> {
        let bytes: [u8; RECORD_LENGTH] = bytes
            .try_into()
            .map_err(|_| Error::InvalidLength(bytes.len()))?;

        Ok(Self(bytes))
    }

    pub fn source(&self) -> &[u8; 32] {
        self.0[..DESTINATION_OFFSET].try_into().unwrap()
    }

    pub fn destination(&self) -> &[u8; 32] {
        self.0[DESTINATION_OFFSET..TIMESTAMP_OFFSET]
            .try_into()
            .unwrap()
    }

    pub fn timestamp(&self) -> u64 {
        LittleEndian::read_u64(&self.0[TIMESTAMP_OFFSET..ENERGY_OFFSET])
    }

    pub fn energy(&self) -> u64 {
        LittleEndian::read_u64(&self.0[ENERGY_OFFSET..SIGNATURE_OFFSET])
    }

    pub fn signature(&self) -> &[u8; 64] {
        self.0[SIGNATURE_OFFSET..].try_into().unwrap()
    }

    /// The digest preimage used to verify the signature.
    pub fn signing_preimage(&self) -> [u8; UNSIGNED_PREFIX_LENGTH] {
        let mut preimage: [u8; UNSIGNED_PREFIX_LENGTH] =
            self.0[..UNSIGNED_PREFIX_LENGTH].try_into().unwrap();
        preimage[0] ^= SIGNING_TAG;
        preimage
    }

    pub fn as_bytes(&self) -> &[u8; RECORD_LENGTH] {
        &self.0
    }
}

impl From<[u8; RECORD_LENGTH]> for TransferRecord {
    fn from(bytes: [u8; RECORD_LENGTH]) -> Self {
        Self(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_roundtrip() {
        let unsigned = UnsignedTransfer::new([1; 32], [2; 32], 1_700_000_000_000_000, 5_000_000);
        let record = unsigned.into_record([9; 64]);

        assert_eq!(record.source(), &[1; 32]);
        assert_eq!(record.destination(), &[2; 32]);
        assert_eq!(record.timestamp(), 1_700_000_000_000_000);
        assert_eq!(record.energy(), 5_000_000);
        assert_eq!(record.signature(), &[9; 64]);

        let reparsed = TransferRecord::parse(record.as_bytes()).unwrap();
        assert_eq!(reparsed, record);
    }

    #[test]
    fn signing_preimage_flips_only_byte_zero() {
        let unsigned = UnsignedTransfer::new([4; 32], [5; 32], 77, 88);
        let preimage = unsigned.signing_preimage();

        assert_eq!(preimage[0], 4 ^ SIGNING_TAG);
        assert_eq!(preimage[1..], unsigned.0[1..]);
    }

    #[test]
    fn preimage_matches_between_unsigned_and_record() {
        let unsigned = UnsignedTransfer::new([3; 32], [6; 32], 123, 456);
        let expected = unsigned.signing_preimage();
        let record = unsigned.into_record([0; 64]);

        assert_eq!(record.signing_preimage(), expected);
    }

    #[test]
    fn rejects_wrong_length() {
        assert_eq!(TransferRecord::parse(&[0; 10]), Err(Error::InvalidLength(10)));
    }
}
