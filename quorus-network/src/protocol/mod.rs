//! Request building and response parsing for the wire protocol.
//!
//! Sub-typed (kind 0) requests carry a one-byte sub-kind, seven bytes of
//! padding and a `u64` request timestamp; their responses echo the
//! timestamp at payload offset 0 with the signed record behind it.

use std::net::Ipv4Addr;

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use quorus_codec::framing;
use quorus_codec::state::{self, ComputerStateRecord};
use quorus_codec::status::{self, StatusSlab};
use quorus_codec::transfer::TransferRecord;

pub mod peers;
pub mod state_verify;
pub mod status_verify;

/// Offset of the signed record inside a sub-typed response payload.
pub const RESPONSE_TIMESTAMP_LENGTH: usize = 8;

const SUB_HEADER_LENGTH: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("sub-typed payload of {0} bytes is too short")]
    ShortPayload(usize),

    #[error("unexpected record length {0} in sub-typed response")]
    UnexpectedRecordLength(usize),

    #[error("peer exchange payload of {0} bytes is not a whole number of addresses")]
    RaggedPeerList(usize),
}

/// Request the admin-signed computer state.
pub fn computer_state_request(timestamp: u64) -> Vec<u8> {
    let mut payload = [0u8; SUB_HEADER_LENGTH];
    payload[0] = framing::GET_COMPUTER_STATE;
    LittleEndian::write_u64(&mut payload[8..], timestamp);

    framing::build_frame(framing::SUB_TYPED, &payload)
}

/// Request one computor's view of a transfer's status.
pub fn transfer_status_request(timestamp: u64, hash: &[u8; 32], computor: u16) -> Vec<u8> {
    let mut payload = [0u8; SUB_HEADER_LENGTH + 32 + 2];
    payload[0] = framing::GET_TRANSFER_STATUS;
    LittleEndian::write_u64(&mut payload[8..SUB_HEADER_LENGTH], timestamp);
    payload[SUB_HEADER_LENGTH..SUB_HEADER_LENGTH + 32].copy_from_slice(hash);
    LittleEndian::write_u16(&mut payload[SUB_HEADER_LENGTH + 32..], computor);

    framing::build_frame(framing::SUB_TYPED, &payload)
}

/// Ask a peer for gossiped public peer addresses.
pub fn peer_exchange_request() -> Vec<u8> {
    framing::build_frame(framing::EXCHANGE_PUBLIC_PEERS, &[])
}

/// Broadcast a signed transfer record.
pub fn broadcast_transfer(record: &TransferRecord) -> Vec<u8> {
    framing::build_frame(framing::BROADCAST_TRANSFER, record.as_bytes())
}

/// A decoded inbound frame the engine cares about.
#[derive(Debug)]
pub enum Inbound {
    ComputerState {
        timestamp: u64,
        record: ComputerStateRecord,
    },
    TransferStatus {
        timestamp: u64,
        slab: StatusSlab,
    },
    PublicPeers(Vec<Ipv4Addr>),
}

/// Decode one inbound frame. Unknown kinds yield `Ok(None)` and are
/// ignored; malformed known kinds are an error that closes the socket.
pub fn parse_inbound(kind: u16, payload: &[u8]) -> Result<Option<Inbound>, Error> {
    match kind {
        framing::SUB_TYPED => {
            if payload.len() < RESPONSE_TIMESTAMP_LENGTH {
                return Err(Error::ShortPayload(payload.len()));
            }

            let timestamp = LittleEndian::read_u64(&payload[..RESPONSE_TIMESTAMP_LENGTH]);
            let record = &payload[RESPONSE_TIMESTAMP_LENGTH..];

            match record.len() {
                state::RECORD_LENGTH => {
                    let record = ComputerStateRecord::parse(record)
                        .map_err(|_| Error::UnexpectedRecordLength(record.len()))?;

                    Ok(Some(Inbound::ComputerState { timestamp, record }))
                }
                status::SLAB_LENGTH => {
                    let slab = StatusSlab::parse(record)
                        .map_err(|_| Error::UnexpectedRecordLength(record.len()))?;

                    Ok(Some(Inbound::TransferStatus { timestamp, slab }))
                }
                other => Err(Error::UnexpectedRecordLength(other)),
            }
        }
        framing::EXCHANGE_PUBLIC_PEERS => {
            let addresses = peers::parse(payload)?;
            Ok(Some(Inbound::PublicPeers(addresses)))
        }
        _ => Ok(None),
    }
}

/// Wrap a signed record into the response payload for `request_timestamp`.
pub fn sub_typed_response(request_timestamp: u64, record: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(RESPONSE_TIMESTAMP_LENGTH + record.len());
    payload.extend_from_slice(&request_timestamp.to_le_bytes());
    payload.extend_from_slice(record);

    framing::build_frame(framing::SUB_TYPED, &payload)
}

/// Read the timestamp and computor index out of a status request, the
/// counterpart of [`transfer_status_request`] used by responders.
pub fn parse_status_request(payload: &[u8]) -> Option<(u64, [u8; 32], u16)> {
    if payload.len() != SUB_HEADER_LENGTH + 34 || payload[0] != framing::GET_TRANSFER_STATUS {
        return None;
    }

    let timestamp = LittleEndian::read_u64(&payload[8..SUB_HEADER_LENGTH]);
    let hash: [u8; 32] = payload[SUB_HEADER_LENGTH..SUB_HEADER_LENGTH + 32]
        .try_into()
        .unwrap();
    let computor = LittleEndian::read_u16(&payload[SUB_HEADER_LENGTH + 32..]);

    Some((timestamp, hash, computor))
}

/// Read the timestamp out of a computer-state request.
pub fn parse_computer_state_request(payload: &[u8]) -> Option<u64> {
    if payload.len() != SUB_HEADER_LENGTH || payload[0] != framing::GET_COMPUTER_STATE {
        return None;
    }

    Some(LittleEndian::read_u64(&payload[8..]))
}
