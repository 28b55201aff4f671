//! Wire framing.
//!
//! Every frame starts with `u32 size` (whole frame, header included),
//! `u16 protocol version` and `u16 request kind`. A single inbound
//! message may concatenate several frames; [`FrameIter`] walks them by
//! the size prefix.

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

pub const HEADER_LENGTH: usize = 8;

pub const PROTOCOL_VERSION: u16 = 256;

/// Request kind carrying an inner one-byte sub-kind.
pub const SUB_TYPED: u16 = 0;

/// Request kind asking a peer for gossiped public peer addresses.
pub const EXCHANGE_PUBLIC_PEERS: u16 = 1;

/// Request kind broadcasting a signed transfer record.
pub const BROADCAST_TRANSFER: u16 = 3;

/// Sub-kind of [`SUB_TYPED`]: request the admin-signed computer state.
pub const GET_COMPUTER_STATE: u8 = 1;

/// Sub-kind of [`SUB_TYPED`]: request one computor's transfer status.
pub const GET_TRANSFER_STATUS: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub size: u32,
    pub version: u16,
    pub kind: u16,
}

impl From<&[u8]> for FrameHeader {
    fn from(value: &[u8]) -> Self {
        let size = LittleEndian::read_u32(&value[0..4]);
        let version = LittleEndian::read_u16(&value[4..6]);
        let kind = LittleEndian::read_u16(&value[6..8]);

        Self {
            size,
            version,
            kind,
        }
    }
}

impl From<FrameHeader> for [u8; HEADER_LENGTH] {
    fn from(value: FrameHeader) -> Self {
        let mut out = [0u8; HEADER_LENGTH];
        LittleEndian::write_u32(&mut out[0..4], value.size);
        LittleEndian::write_u16(&mut out[4..6], value.version);
        LittleEndian::write_u16(&mut out[6..8], value.kind);

        out
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("frame declares {declared} bytes but only {available} are available")]
    Truncated { declared: usize, available: usize },

    #[error("frame size {0} is smaller than the header")]
    SizeBelowHeader(u32),

    #[error("unsupported protocol version {0}")]
    VersionMismatch(u16),
}

/// Build a full frame (header included) around `payload`.
pub fn build_frame(kind: u16, payload: &[u8]) -> Vec<u8> {
    let header = FrameHeader {
        size: (HEADER_LENGTH + payload.len()) as u32,
        version: PROTOCOL_VERSION,
        kind,
    };

    let head: [u8; HEADER_LENGTH] = header.into();

    let mut out = Vec::with_capacity(HEADER_LENGTH + payload.len());
    out.extend_from_slice(&head);
    out.extend_from_slice(payload);

    out
}

/// A parsed frame borrowing its payload from the inbound buffer.
#[derive(Debug, PartialEq, Eq)]
pub struct Frame<'a> {
    pub kind: u16,
    pub payload: &'a [u8],
}

/// Iterates the frames concatenated in one inbound message. Stops at the
/// first malformed frame; the remainder of the buffer cannot be trusted
/// once a size prefix is wrong.
pub struct FrameIter<'a> {
    buf: &'a [u8],
    poisoned: bool,
}

impl<'a> FrameIter<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            poisoned: false,
        }
    }
}

impl<'a> Iterator for FrameIter<'a> {
    type Item = Result<Frame<'a>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.poisoned || self.buf.is_empty() {
            return None;
        }

        if self.buf.len() < HEADER_LENGTH {
            self.poisoned = true;
            return Some(Err(Error::Truncated {
                declared: HEADER_LENGTH,
                available: self.buf.len(),
            }));
        }

        let header = FrameHeader::from(&self.buf[..HEADER_LENGTH]);

        if header.version != PROTOCOL_VERSION {
            self.poisoned = true;
            return Some(Err(Error::VersionMismatch(header.version)));
        }

        let size = header.size as usize;

        if size < HEADER_LENGTH {
            self.poisoned = true;
            return Some(Err(Error::SizeBelowHeader(header.size)));
        }

        if size > self.buf.len() {
            self.poisoned = true;
            return Some(Err(Error::Truncated {
                declared: size,
                available: self.buf.len(),
            }));
        }

        let payload = &self.buf[HEADER_LENGTH..size];
        self.buf = &self.buf[size..];

        Some(Ok(Frame {
            kind: header.kind,
            payload,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let header = FrameHeader {
            size: 152,
            version: PROTOCOL_VERSION,
            kind: BROADCAST_TRANSFER,
        };

        let bytes: [u8; HEADER_LENGTH] = header.into();
        assert_eq!(FrameHeader::from(&bytes[..]), header);
    }

    #[test]
    fn single_frame() {
        let frame = build_frame(EXCHANGE_PUBLIC_PEERS, &[1, 2, 3, 4]);
        let parsed: Vec<_> = FrameIter::new(&frame).collect::<Result<_, _>>().unwrap();

        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].kind, EXCHANGE_PUBLIC_PEERS);
        assert_eq!(parsed[0].payload, &[1, 2, 3, 4]);
    }

    #[test]
    fn concatenated_frames() {
        let mut buf = build_frame(SUB_TYPED, &[9; 16]);
        buf.extend(build_frame(BROADCAST_TRANSFER, &[7; 144]));

        let parsed: Vec<_> = FrameIter::new(&buf).collect::<Result<_, _>>().unwrap();

        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].kind, SUB_TYPED);
        assert_eq!(parsed[0].payload.len(), 16);
        assert_eq!(parsed[1].kind, BROADCAST_TRANSFER);
        assert_eq!(parsed[1].payload.len(), 144);
    }

    #[test]
    fn truncated_frame_poisons_the_iterator() {
        let frame = build_frame(SUB_TYPED, &[1; 32]);

        let mut iter = FrameIter::new(&frame[..20]);
        assert!(matches!(iter.next(), Some(Err(Error::Truncated { .. }))));
        assert!(iter.next().is_none());
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let mut frame = build_frame(SUB_TYPED, &[]);
        frame[4] = 0xff;
        frame[5] = 0xff;

        let mut iter = FrameIter::new(&frame);
        assert!(matches!(
            iter.next(),
            Some(Err(Error::VersionMismatch(0xffff)))
        ));
    }
}
