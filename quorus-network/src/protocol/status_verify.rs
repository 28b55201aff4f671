//! Verification and aggregation of per-computor transfer-status slabs.
//!
//! Each reporting computor ships a signed slab with its view of every
//! other computor's vote on the transfer. The tracker verifies slabs
//! against the current snapshot, keeps a per-reporter agreement table
//! across the three sockets, and tallies votes over all reporter x
//! reported pairs (excluding a reporter's slot for itself). Aggregate
//! counts are the totals divided by the 675 reporting opportunities per
//! vote; a transfer concludes once any count reaches the quorum
//! threshold.

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;
use tracing::debug;

use quorus_codec::status::{StatusSlab, Vote, SLAB_LENGTH};
use quorus_codec::{state, NUMBER_OF_COMPUTORS, QUORUM_THRESHOLD};
use quorus_crypto::hash::Hasher;
use quorus_crypto::key::ed25519::{PublicKey, Signature};

use super::state_verify::{self, Snapshot};
use crate::quorum::Agreement;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("slab reports a different transfer")]
    HashMismatch,

    #[error("reporting computor {0} is out of range")]
    ReporterOutOfRange(u16),

    #[error("slab epoch {got} does not match the current epoch {current}")]
    EpochMismatch { got: u16, current: u16 },

    #[error("slab tick {got} is ahead of the current tick {current}")]
    TickFromTheFuture { got: u32, current: u32 },

    #[error("computor signature does not verify")]
    BadSignature,
}

/// Check one slab against the transfer hash and the current snapshot.
pub fn verify_slab(slab: &StatusSlab, hash: &[u8; 32], snapshot: &Snapshot) -> Result<(), Error> {
    if slab.transfer_hash() != hash {
        return Err(Error::HashMismatch);
    }

    let reporter = slab.computor_index();
    let key = snapshot
        .computor_key(reporter as usize)
        .ok_or(Error::ReporterOutOfRange(reporter))?;

    if slab.epoch() != snapshot.epoch() {
        return Err(Error::EpochMismatch {
            got: slab.epoch(),
            current: snapshot.epoch(),
        });
    }

    // a status from the future is inconsistent
    if slab.tick() > snapshot.tick() {
        return Err(Error::TickFromTheFuture {
            got: slab.tick(),
            current: snapshot.tick(),
        });
    }

    let digest = Hasher::<32>::hash(&slab.signing_preimage());
    let signature = Signature::from(*slab.signature());

    if !key.verify(digest, &signature) {
        return Err(Error::BadSignature);
    }

    Ok(())
}

/// Aggregate vote counts exposed to the embedder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusCounts {
    pub unseen: usize,
    pub seen: usize,
    pub processed: usize,
}

impl StatusCounts {
    fn concluded(&self) -> Option<Vote> {
        if self.processed >= QUORUM_THRESHOLD {
            Some(Vote::Processed)
        } else if self.seen >= QUORUM_THRESHOLD {
            Some(Vote::Seen)
        } else if self.unseen >= QUORUM_THRESHOLD {
            Some(Vote::Unseen)
        } else {
            None
        }
    }
}

/// Tracks one transfer's status poll across reporters and sockets.
pub struct StatusTracker {
    hash: [u8; 32],
    tables: HashMap<u16, Agreement>,
    decoded: HashMap<u16, Vec<Vote>>,
    slabs: BTreeMap<u16, StatusSlab>,
    counts: StatusCounts,
    concluded: Option<Vote>,
}

impl StatusTracker {
    pub fn new(hash: [u8; 32]) -> Self {
        Self {
            hash,
            tables: HashMap::new(),
            decoded: HashMap::new(),
            slabs: BTreeMap::new(),
            counts: StatusCounts::default(),
            concluded: None,
        }
    }

    pub fn hash(&self) -> &[u8; 32] {
        &self.hash
    }

    pub fn counts(&self) -> StatusCounts {
        self.counts
    }

    pub fn concluded(&self) -> Option<Vote> {
        self.concluded
    }

    pub fn is_concluded(&self) -> bool {
        self.concluded.is_some()
    }

    /// Feed one verified-on-arrival slab. Returns the new aggregate
    /// counts when this reporter's bitfield entered the tally, `None`
    /// when the slab was a repeat from another socket.
    pub fn insert(
        &mut self,
        slab: StatusSlab,
        snapshot: &Snapshot,
    ) -> Result<Option<StatusCounts>, Error> {
        verify_slab(&slab, &self.hash, snapshot)?;

        let reporter = slab.computor_index();

        let table = self.tables.entry(reporter).or_default();
        let agreement = table.insert(slab.signature().to_vec());

        if agreement >= 1 && !self.decoded.contains_key(&reporter) {
            self.decoded.insert(reporter, slab.votes());
            self.slabs.insert(reporter, slab);
            self.recount();

            debug!(
                reporter,
                processed = self.counts.processed,
                "reporter entered the tally"
            );

            return Ok(Some(self.counts));
        }

        Ok(None)
    }

    fn recount(&mut self) {
        let mut report = [0usize; 4];

        for (reporter, votes) in &self.decoded {
            for (reported, vote) in votes.iter().enumerate() {
                if reported == *reporter as usize {
                    continue;
                }

                report[match vote {
                    Vote::Unseen => 0,
                    Vote::Seen => 1,
                    Vote::Processed => 2,
                    Vote::Reserved => 3,
                }] += 1;
            }
        }

        let opportunities = NUMBER_OF_COMPUTORS - 1;

        self.counts = StatusCounts {
            unseen: report[0] / opportunities,
            seen: report[1] / opportunities,
            processed: report[2] / opportunities,
        };

        if self.concluded.is_none() {
            self.concluded = self.counts.concluded();
        }
    }

    /// Build the receipt: the snapshot bytes followed by the full slab of
    /// every reporter attesting a processed supermajority, in reporter
    /// order.
    pub fn assemble_receipt(&self, snapshot: &Snapshot) -> Vec<u8> {
        let mut out = snapshot.as_bytes().to_vec();

        for (reporter, slab) in &self.slabs {
            if reporter_attests_processed(&self.decoded[reporter], *reporter) {
                out.extend_from_slice(slab.as_bytes());
            }
        }

        out
    }
}

fn reporter_attests_processed(votes: &[Vote], reporter: u16) -> bool {
    let processed = votes
        .iter()
        .enumerate()
        .filter(|(reported, vote)| *reported != reporter as usize && **vote == Vote::Processed)
        .count();

    processed >= QUORUM_THRESHOLD
}

#[derive(Debug, Error)]
pub enum ReceiptError {
    #[error("receipt is too short or not a whole number of slabs")]
    Malformed,

    #[error("embedded computer state is invalid")]
    State(#[from] state_verify::Error),

    #[error("embedded status slab is invalid")]
    Slab(#[from] Error),

    #[error("receipt attests only {0} processed votes")]
    BelowThreshold(usize),
}

/// Verify a self-contained receipt: the embedded snapshot's admin
/// signature, every appended slab against the snapshot's computor keys,
/// and the processed-vote tally across all slabs.
pub fn verify_receipt(
    receipt: &[u8],
    hash: &[u8; 32],
    admin: &PublicKey,
) -> Result<(Snapshot, StatusCounts), ReceiptError> {
    if receipt.len() < state::RECORD_LENGTH
        || (receipt.len() - state::RECORD_LENGTH) % SLAB_LENGTH != 0
    {
        return Err(ReceiptError::Malformed);
    }

    let record = quorus_codec::state::ComputerStateRecord::parse(&receipt[..state::RECORD_LENGTH])
        .map_err(|_| ReceiptError::Malformed)?;
    let snapshot = Snapshot::verify(record, admin)?;

    let mut report = [0usize; 4];
    let mut reporters_seen = HashMap::new();

    for raw in receipt[state::RECORD_LENGTH..].chunks_exact(SLAB_LENGTH) {
        let slab = StatusSlab::parse(raw).map_err(|_| ReceiptError::Malformed)?;
        verify_slab(&slab, hash, &snapshot)?;

        let reporter = slab.computor_index();
        if reporters_seen.insert(reporter, ()).is_some() {
            // a duplicated reporter must not count twice
            continue;
        }

        for (reported, vote) in slab.votes().iter().enumerate() {
            if reported == reporter as usize {
                continue;
            }
            if *vote == Vote::Processed {
                report[2] += 1;
            }
        }
    }

    let processed = report[2] / (NUMBER_OF_COMPUTORS - 1);

    if processed < QUORUM_THRESHOLD {
        return Err(ReceiptError::BelowThreshold(processed));
    }

    let counts = StatusCounts {
        unseen: 0,
        seen: 0,
        processed,
    };

    Ok((snapshot, counts))
}
