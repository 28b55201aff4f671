//! The per-computor transfer-status slab.
//!
//! `32-byte transfer hash`, `170-byte vote bitfield`, `u16 computor
//! index`, `u16 epoch`, `u32 tick`, `64-byte signature`. The signed
//! region covers everything before the signature, with byte 0 of the
//! hash XORed by the status domain tag.
//!
//! The bitfield packs one two-bit vote per reported computor, four votes
//! per byte, high bits first: vote `j` lives in byte `j / 4` at bit
//! offset `6 - 2 * (j % 4)`.

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use crate::NUMBER_OF_COMPUTORS;

pub const BITFIELD_OFFSET: usize = 32;
pub const BITFIELD_LENGTH: usize = 170;

const COMPUTOR_INDEX_OFFSET: usize = BITFIELD_OFFSET + BITFIELD_LENGTH;
const EPOCH_OFFSET: usize = COMPUTOR_INDEX_OFFSET + 2;
const TICK_OFFSET: usize = EPOCH_OFFSET + 2;

pub const SIGNED_REGION_LENGTH: usize = TICK_OFFSET + 4;
pub const SLAB_LENGTH: usize = SIGNED_REGION_LENGTH + 64;

/// XORed into byte 0 of the hash field when computing the digest.
pub const SIGNING_TAG: u8 = 3;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("status slab is {0} bytes, expected {SLAB_LENGTH}")]
    InvalidLength(usize),
}

/// One computor's two-bit vote on a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    Unseen,
    Seen,
    Processed,
    Reserved,
}

impl Vote {
    fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => Vote::Unseen,
            0b01 => Vote::Seen,
            0b10 => Vote::Processed,
            _ => Vote::Reserved,
        }
    }

    fn into_bits(self) -> u8 {
        match self {
            Vote::Unseen => 0b00,
            Vote::Seen => 0b01,
            Vote::Processed => 0b10,
            Vote::Reserved => 0b11,
        }
    }
}

/// A parsed status slab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSlab([u8; SLAB_LENGTH]);

impl StatusSlab {
    pub fn parse(bytes: &[u8]) -> Result<Self, Error> {
        let bytes: [u8; SLAB_LENGTH] = bytes
            .try_into()
            .map_err(|_| Error::InvalidLength(bytes.len()))?;

        Ok(Self(bytes))
    }

    pub fn transfer_hash(&self) -> &[u8; 32] {
        self.0[..BITFIELD_OFFSET].try_into().unwrap()
    }

    pub fn computor_index(&self) -> u16 {
        LittleEndian::read_u16(&self.0[COMPUTOR_INDEX_OFFSET..EPOCH_OFFSET])
    }

    pub fn epoch(&self) -> u16 {
        LittleEndian::read_u16(&self.0[EPOCH_OFFSET..TICK_OFFSET])
    }

    pub fn tick(&self) -> u32 {
        LittleEndian::read_u32(&self.0[TICK_OFFSET..SIGNED_REGION_LENGTH])
    }

    pub fn signature(&self) -> &[u8; 64] {
        self.0[SIGNED_REGION_LENGTH..].try_into().unwrap()
    }

    /// The digest preimage: the signed region with the domain tag folded
    /// into byte 0 of the hash.
    pub fn signing_preimage(&self) -> [u8; SIGNED_REGION_LENGTH] {
        let mut preimage: [u8; SIGNED_REGION_LENGTH] =
            self.0[..SIGNED_REGION_LENGTH].try_into().unwrap();
        preimage[0] ^= SIGNING_TAG;
        preimage
    }

    /// The reporter's vote on computor `reported`.
    pub fn vote(&self, reported: usize) -> Vote {
        debug_assert!(reported < NUMBER_OF_COMPUTORS);

        let byte = self.0[BITFIELD_OFFSET + reported / 4];
        let shift = 6 - 2 * (reported % 4) as u8;

        Vote::from_bits(byte >> shift)
    }

    /// Decode the whole bitfield.
    pub fn votes(&self) -> Vec<Vote> {
        (0..NUMBER_OF_COMPUTORS).map(|j| self.vote(j)).collect()
    }

    pub fn as_bytes(&self) -> &[u8; SLAB_LENGTH] {
        &self.0
    }
}

/// Pack votes into the wire bitfield.
pub fn encode_bitfield(votes: &[Vote]) -> [u8; BITFIELD_LENGTH] {
    debug_assert!(votes.len() <= NUMBER_OF_COMPUTORS);

    let mut out = [0u8; BITFIELD_LENGTH];

    for (j, vote) in votes.iter().enumerate() {
        let shift = 6 - 2 * (j % 4) as u8;
        out[j / 4] |= vote.into_bits() << shift;
    }

    out
}

/// Assemble an unsigned slab (zeroed signature), committee side.
pub fn compose(
    transfer_hash: &[u8; 32],
    votes: &[Vote],
    computor_index: u16,
    epoch: u16,
    tick: u32,
) -> [u8; SLAB_LENGTH] {
    let mut bytes = [0u8; SLAB_LENGTH];

    bytes[..BITFIELD_OFFSET].copy_from_slice(transfer_hash);
    bytes[BITFIELD_OFFSET..COMPUTOR_INDEX_OFFSET].copy_from_slice(&encode_bitfield(votes));
    LittleEndian::write_u16(&mut bytes[COMPUTOR_INDEX_OFFSET..EPOCH_OFFSET], computor_index);
    LittleEndian::write_u16(&mut bytes[EPOCH_OFFSET..TICK_OFFSET], epoch);
    LittleEndian::write_u32(&mut bytes[TICK_OFFSET..SIGNED_REGION_LENGTH], tick);

    bytes
}
