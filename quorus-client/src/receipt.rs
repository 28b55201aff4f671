//! Receipt export and import.
//!
//! The exported form is `transfer record ‖ computer-state snapshot ‖
//! status slabs`, base64 encoded. It is self-contained: anyone holding
//! the admin public key can verify the transfer signature, the snapshot
//! and every slab, and recount the processed votes.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use quorus_codec::transfer::{TransferRecord, RECORD_LENGTH};
use quorus_crypto::hash::{Hash, Hasher};
use quorus_crypto::key::ed25519::PublicKey;
use quorus_network::protocol::status_verify::{self, StatusCounts};

use crate::{transfer, Error};

/// Base64-encode a processed transfer with its receipt.
pub fn export(record: &TransferRecord, receipt: &[u8]) -> String {
    let mut bytes = Vec::with_capacity(RECORD_LENGTH + receipt.len());
    bytes.extend_from_slice(record.as_bytes());
    bytes.extend_from_slice(receipt);

    STANDARD.encode(bytes)
}

/// A decoded, fully verified receipt.
pub struct ImportedReceipt {
    pub record: TransferRecord,
    pub hash: Hash<32>,
    pub receipt: Vec<u8>,
    pub counts: StatusCounts,
}

/// Decode an exported receipt and verify everything in it.
pub fn import(encoded: &str, admin: &PublicKey) -> Result<ImportedReceipt, Error> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|_| Error::IllegalArgument("receipt"))?;

    if bytes.len() < RECORD_LENGTH {
        return Err(Error::IllegalArgument("receipt"));
    }

    let record = TransferRecord::parse(&bytes[..RECORD_LENGTH])
        .map_err(|_| Error::IllegalArgument("receipt"))?;
    let receipt = bytes[RECORD_LENGTH..].to_vec();

    let (hash, counts) = verify_stored(&record, &receipt, admin)?;

    Ok(ImportedReceipt {
        record,
        hash,
        receipt,
        counts,
    })
}

/// Verify a processed transfer and its receipt, as stored or imported:
/// the transfer signature under the embedded source key, the snapshot's
/// admin signature, every slab signature, and the processed tally.
pub fn verify_stored(
    record: &TransferRecord,
    receipt: &[u8],
    admin: &PublicKey,
) -> Result<(Hash<32>, StatusCounts), Error> {
    let source = PublicKey::from(*record.source());

    if !transfer::verify(record, &source) {
        return Err(Error::SignatureVerificationFailed);
    }

    let hash = Hasher::<32>::hash(record.as_bytes());
    let (_, counts) = status_verify::verify_receipt(receipt, &hash, admin)?;

    Ok((hash, counts))
}
