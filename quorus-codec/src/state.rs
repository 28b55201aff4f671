//! The admin-signed computer-state record.
//!
//! `u16 computor index`, `u16 epoch`, `u32 tick`, `u64 timestamp`, then
//! 676 packed 32-byte computor public keys and a 64-byte admin signature.
//! The signed region runs from the computor index through the last public
//! key. An admin-issued record is marked by `computor_index == 676`.

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use crate::NUMBER_OF_COMPUTORS;

const EPOCH_OFFSET: usize = 2;
const TICK_OFFSET: usize = 4;
const TIMESTAMP_OFFSET: usize = 8;

pub const PUBLIC_KEYS_OFFSET: usize = 16;
pub const SIGNED_REGION_LENGTH: usize = PUBLIC_KEYS_OFFSET + NUMBER_OF_COMPUTORS * 32;
pub const RECORD_LENGTH: usize = SIGNED_REGION_LENGTH + 64;

/// The computor index reserved for the admin.
pub const ADMIN_INDEX: u16 = NUMBER_OF_COMPUTORS as u16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("computer-state record is {0} bytes, expected {RECORD_LENGTH}")]
    InvalidLength(usize),
}

/// A parsed computer-state record. Owns its bytes: the raw record is kept
/// around verbatim for receipt assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputerStateRecord(Vec<u8>);

impl ComputerStateRecord {
    pub fn parse(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != RECORD_LENGTH {
            return Err(Error::InvalidLength(bytes.len()));
        }

        Ok(Self(bytes.to_vec()))
    }

    pub fn computor_index(&self) -> u16 {
        LittleEndian::read_u16(&self.0[..EPOCH_OFFSET])
    }

    pub fn epoch(&self) -> u16 {
        LittleEndian::read_u16(&self.0[EPOCH_OFFSET..TICK_OFFSET])
    }

    pub fn tick(&self) -> u32 {
        LittleEndian::read_u32(&self.0[TICK_OFFSET..TIMESTAMP_OFFSET])
    }

    pub fn timestamp(&self) -> u64 {
        LittleEndian::read_u64(&self.0[TIMESTAMP_OFFSET..PUBLIC_KEYS_OFFSET])
    }

    /// The packed public key of one computor, `None` past the committee.
    pub fn public_key(&self, computor: usize) -> Option<&[u8; 32]> {
        if computor >= NUMBER_OF_COMPUTORS {
            return None;
        }

        let start = PUBLIC_KEYS_OFFSET + computor * 32;
        Some(self.0[start..start + 32].try_into().unwrap())
    }

    pub fn signed_region(&self) -> &[u8] {
        &self.0[..SIGNED_REGION_LENGTH]
    }

    pub fn signature(&self) -> &[u8; 64] {
        self.0[SIGNED_REGION_LENGTH..].try_into().unwrap()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

/// Assemble an unsigned record (zeroed signature). The committee side of
/// the protocol signs the region in place; the client only ever parses.
pub fn compose(
    computor_index: u16,
    epoch: u16,
    tick: u32,
    timestamp: u64,
    public_keys: &[[u8; 32]],
) -> Vec<u8> {
    debug_assert_eq!(public_keys.len(), NUMBER_OF_COMPUTORS);

    let mut bytes = vec![0u8; RECORD_LENGTH];

    LittleEndian::write_u16(&mut bytes[..EPOCH_OFFSET], computor_index);
    LittleEndian::write_u16(&mut bytes[EPOCH_OFFSET..TICK_OFFSET], epoch);
    LittleEndian::write_u32(&mut bytes[TICK_OFFSET..TIMESTAMP_OFFSET], tick);
    LittleEndian::write_u64(&mut bytes[TIMESTAMP_OFFSET..PUBLIC_KEYS_OFFSET], timestamp);

    for (computor, key) in public_keys.iter().enumerate() {
        let start = PUBLIC_KEYS_OFFSET + computor * 32;
        bytes[start..start + 32].copy_from_slice(key);
    }

    bytes
}
