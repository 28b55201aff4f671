//! Peer exchange payloads: up to four packed IPv4 addresses.

use std::net::Ipv4Addr;

use super::Error;

pub const MAX_ADDRESSES: usize = 4;

/// Decode a peer exchange response. Zeroed slots are empty and dropped.
pub fn parse(payload: &[u8]) -> Result<Vec<Ipv4Addr>, Error> {
    if payload.len() % 4 != 0 || payload.len() > MAX_ADDRESSES * 4 {
        return Err(Error::RaggedPeerList(payload.len()));
    }

    Ok(payload
        .chunks_exact(4)
        .map(|chunk| Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]))
        .filter(|addr| !addr.is_unspecified())
        .collect())
}

/// Pack addresses into a response payload, responder side.
pub fn compose(addresses: &[Ipv4Addr]) -> Vec<u8> {
    addresses
        .iter()
        .take(MAX_ADDRESSES)
        .flat_map(|addr| addr.octets())
        .collect()
}
