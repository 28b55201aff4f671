//! Packed little-endian records and string codecs for the quorus wire
//! protocol.
//!
//! Every multi-byte integer on the wire is little-endian. The record
//! layouts in [`transfer`], [`state`] and [`status`] are fixed offset
//! tables; the types here only carve bytes, signature checks live with
//! their consumers.

pub mod framing;
pub mod shifted_hex;
pub mod state;
pub mod status;
pub mod transfer;

/// Number of voting members in the committee (26 x 26).
pub const NUMBER_OF_COMPUTORS: usize = 676;

/// Number of concurrent peer connections a client maintains.
pub const NUMBER_OF_CONNECTIONS: usize = 3;

/// Votes required to settle a transfer status. A computor does not report
/// on itself, so the threshold is a supermajority of the remaining 675.
pub const QUORUM_THRESHOLD: usize = 451;
