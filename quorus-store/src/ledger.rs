//! The encrypted, identity-sealed ledger.
//!
//! Scalar keys (`counter`, `energy`, `signature`) live next to numeric
//! record keys `1..=counter`. Record values are stream-encrypted with the
//! numeric key as cipher counter and carry a one-byte tag: `0` for an
//! unprocessed transfer, `1` for a processed transfer followed by its
//! receipt. The `signature` scalar signs the digest of the *essence*
//! (`counter ‖ energy ‖ sorted record hashes`), so no field can change
//! without the identity key.

use std::collections::BTreeSet;
use std::path::Path;

use rocksdb::{Options, WriteBatch, DB};
use thiserror::Error;
use tracing::{debug, warn};

use quorus_codec::transfer::{TransferRecord, RECORD_LENGTH};
use quorus_crypto::cipher::RecordCipher;
use quorus_crypto::hash::Hasher;
use quorus_crypto::key::ed25519::{PublicKey, SecretKey, Signature};

use crate::kvtable::{self, DBBytes, DBInt, KVTable};

const COUNTER_KEY: &[u8] = b"counter";
const ENERGY_KEY: &[u8] = b"energy";
const SIGNATURE_KEY: &[u8] = b"signature";

pub const TAG_UNPROCESSED: u8 = 0;
pub const TAG_PROCESSED: u8 = 1;

#[derive(Error, Debug)]
pub enum Error {
    #[error("persistence failed")]
    PersistenceFailed,

    #[error("stored ledger value is malformed")]
    Corrupted,

    #[error("essence signature does not verify")]
    EssenceMismatch,
}

impl From<kvtable::Error> for Error {
    fn from(value: kvtable::Error) -> Self {
        match value {
            kvtable::Error::IO => Error::PersistenceFailed,
            kvtable::Error::Corrupted | kvtable::Error::NotFound => Error::Corrupted,
        }
    }
}

struct ScalarKV;

impl KVTable<DBBytes, DBBytes> for ScalarKV {
    const CF_NAME: &'static str = "ScalarKV";
}

// numeric slot => encrypted tagged record
struct RecordKV;

impl KVTable<DBInt, DBBytes> for RecordKV {
    const CF_NAME: &'static str = "RecordKV";
}

/// A decrypted ledger record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerRecord {
    Unprocessed(TransferRecord),
    Processed(TransferRecord, Vec<u8>),
}

impl LedgerRecord {
    fn parse(plain: &[u8]) -> Result<Self, Error> {
        let (tag, rest) = plain.split_first().ok_or(Error::Corrupted)?;

        match *tag {
            TAG_UNPROCESSED if rest.len() == RECORD_LENGTH => {
                let record = TransferRecord::parse(rest).map_err(|_| Error::Corrupted)?;
                Ok(Self::Unprocessed(record))
            }
            TAG_PROCESSED if rest.len() >= RECORD_LENGTH => {
                let record =
                    TransferRecord::parse(&rest[..RECORD_LENGTH]).map_err(|_| Error::Corrupted)?;
                Ok(Self::Processed(record, rest[RECORD_LENGTH..].to_vec()))
            }
            _ => Err(Error::Corrupted),
        }
    }

    fn encode(&self) -> Vec<u8> {
        match self {
            Self::Unprocessed(record) => {
                let mut out = Vec::with_capacity(1 + RECORD_LENGTH);
                out.push(TAG_UNPROCESSED);
                out.extend_from_slice(record.as_bytes());
                out
            }
            Self::Processed(record, receipt) => {
                let mut out = Vec::with_capacity(1 + RECORD_LENGTH + receipt.len());
                out.push(TAG_PROCESSED);
                out.extend_from_slice(record.as_bytes());
                out.extend_from_slice(receipt);
                out
            }
        }
    }

    pub fn transfer(&self) -> &TransferRecord {
        match self {
            Self::Unprocessed(record) => record,
            Self::Processed(record, _) => record,
        }
    }

    pub fn receipt(&self) -> Option<&[u8]> {
        match self {
            Self::Unprocessed(_) => None,
            Self::Processed(_, receipt) => Some(receipt),
        }
    }
}

/// What the replay caller decided about one record after verifying it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayVerdict {
    Keep,
    Skip,
}

/// The records replay handed back to the caller for follow-up work.
#[derive(Debug, Default)]
pub struct ReplayOutcome {
    /// Kept tag-0 records, by slot, in slot order.
    pub unprocessed: Vec<(u32, TransferRecord)>,
}

pub struct Ledger {
    db: DB,
    cipher: RecordCipher,
    secret: SecretKey,
    public: PublicKey,
    counter: u32,
    energy: u64,
    hashes: BTreeSet<[u8; 32]>,
}

impl Ledger {
    /// Open (or create) the store for one identity. The in-memory state
    /// stays zeroed until [`Ledger::replay`] has verified the stream.
    pub fn open(
        path: impl AsRef<Path>,
        secret: SecretKey,
        stream_key: [u8; 16],
    ) -> Result<Self, Error> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let db = DB::open_cf(&opts, path, [ScalarKV::CF_NAME, RecordKV::CF_NAME])
            .map_err(|_| Error::PersistenceFailed)?;

        let public = secret.public_key();

        Ok(Self {
            db,
            cipher: RecordCipher::new(stream_key),
            secret,
            public,
            counter: 0,
            energy: 0,
            hashes: BTreeSet::new(),
        })
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn energy(&self) -> u64 {
        self.energy
    }

    pub fn contains(&self, hash: &[u8; 32]) -> bool {
        self.hashes.contains(hash)
    }

    /// Walk the whole stored stream. Each decrypted record is handed to
    /// `inspect` for signature verification; skipped records stay on disk
    /// but are left out of the derived state. Once the stream is
    /// consumed the stored essence signature is verified against the
    /// identity key; on mismatch no derived state is exposed.
    pub fn replay<F>(&mut self, mut inspect: F) -> Result<ReplayOutcome, Error>
    where
        F: FnMut(u32, &LedgerRecord) -> ReplayVerdict,
    {
        let counter = match self.scalar(COUNTER_KEY)? {
            Some(raw) => u32::from_le_bytes(raw.try_into().map_err(|_| Error::Corrupted)?),
            None => 0,
        };

        let energy = match self.scalar(ENERGY_KEY)? {
            Some(raw) => u64::from_le_bytes(raw.try_into().map_err(|_| Error::Corrupted)?),
            None => 0,
        };

        let stored_signature = match self.scalar(SIGNATURE_KEY)? {
            Some(raw) => Some(Signature::try_from(&raw[..]).map_err(|_| Error::Corrupted)?),
            None => None,
        };

        let mut hashes = BTreeSet::new();
        let mut outcome = ReplayOutcome::default();

        for entry in RecordKV::iter_entries_start(&self.db) {
            let (DBInt(slot), DBBytes(sealed)) = entry?;
            let plain = self.cipher.apply(slot as u64, &sealed);

            let record = match LedgerRecord::parse(&plain) {
                Ok(record) => record,
                Err(_) => {
                    warn!(slot, "undecodable ledger record");
                    continue;
                }
            };

            match inspect(slot, &record) {
                ReplayVerdict::Keep => {
                    let hash = Hasher::<32>::hash(record.transfer().as_bytes());
                    hashes.insert(*hash);

                    if let LedgerRecord::Unprocessed(transfer) = record {
                        outcome.unprocessed.push((slot, transfer));
                    }
                }
                ReplayVerdict::Skip => {
                    debug!(slot, "record skipped during replay");
                }
            }
        }

        let fresh =
            counter == 0 && energy == 0 && hashes.is_empty() && stored_signature.is_none();

        if !fresh {
            let signature = stored_signature.ok_or(Error::EssenceMismatch)?;
            let digest = Hasher::<32>::hash(&essence(counter, energy, &hashes));

            if !self.public.verify(digest, &signature) {
                return Err(Error::EssenceMismatch);
            }
        }

        self.counter = counter;
        self.energy = energy;
        self.hashes = hashes;

        Ok(outcome)
    }

    /// Persist a freshly signed transfer before it is broadcast. Returns
    /// the slot it was stored under.
    pub fn append_unprocessed(&mut self, record: &TransferRecord) -> Result<u32, Error> {
        let counter = self.counter + 1;
        let hash = Hasher::<32>::hash(record.as_bytes());

        let mut hashes = self.hashes.clone();
        hashes.insert(*hash);

        let value = LedgerRecord::Unprocessed(record.clone()).encode();

        let mut batch = WriteBatch::default();
        self.stage_record(&mut batch, counter, &value);
        self.stage_seal(&mut batch, counter, self.energy, &hashes);

        self.db.write(batch).map_err(|_| Error::PersistenceFailed)?;

        self.counter = counter;
        self.hashes = hashes;

        Ok(counter)
    }

    /// Retire an unprocessed slot with its receipt: the record moves to a
    /// fresh slot under tag 1, the old slot is deleted and the energy
    /// balance is replaced, all in one batch.
    pub fn finalize_processed(
        &mut self,
        slot: u32,
        record: &TransferRecord,
        receipt: &[u8],
        energy: u64,
    ) -> Result<u32, Error> {
        let counter = self.counter + 1;
        let value = LedgerRecord::Processed(record.clone(), receipt.to_vec()).encode();

        let mut batch = WriteBatch::default();
        RecordKV::stage_delete(&self.db, DBInt(slot), &mut batch);
        self.stage_record(&mut batch, counter, &value);
        self.stage_seal(&mut batch, counter, energy, &self.hashes);

        self.db.write(batch).map_err(|_| Error::PersistenceFailed)?;

        self.counter = counter;
        self.energy = energy;

        Ok(counter)
    }

    /// Integrate an externally verified processed transfer that never had
    /// a provisional slot here.
    pub fn import_processed(
        &mut self,
        record: &TransferRecord,
        receipt: &[u8],
        energy: u64,
    ) -> Result<u32, Error> {
        let counter = self.counter + 1;
        let hash = Hasher::<32>::hash(record.as_bytes());

        let mut hashes = self.hashes.clone();
        hashes.insert(*hash);

        let value = LedgerRecord::Processed(record.clone(), receipt.to_vec()).encode();

        let mut batch = WriteBatch::default();
        self.stage_record(&mut batch, counter, &value);
        self.stage_seal(&mut batch, counter, energy, &hashes);

        self.db.write(batch).map_err(|_| Error::PersistenceFailed)?;

        self.counter = counter;
        self.energy = energy;
        self.hashes = hashes;

        Ok(counter)
    }

    /// Replace the energy balance. In-memory state is untouched unless
    /// the batch commits.
    pub fn set_energy(&mut self, energy: u64) -> Result<(), Error> {
        let mut batch = WriteBatch::default();
        self.stage_seal(&mut batch, self.counter, energy, &self.hashes);

        self.db.write(batch).map_err(|_| Error::PersistenceFailed)?;

        self.energy = energy;

        Ok(())
    }

    pub fn destroy(path: impl AsRef<Path>) -> Result<(), Error> {
        DB::destroy(&Options::default(), path).map_err(|_| Error::PersistenceFailed)
    }

    fn scalar(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        let value = ScalarKV::get_by_key(&self.db, DBBytes(key.to_vec()))?;
        Ok(value.map(|DBBytes(raw)| raw))
    }

    fn stage_record(&self, batch: &mut WriteBatch, slot: u32, value: &[u8]) {
        let sealed = self.cipher.apply(slot as u64, value);
        RecordKV::stage_upsert(&self.db, DBInt(slot), DBBytes(sealed), batch);
    }

    fn stage_seal(
        &self,
        batch: &mut WriteBatch,
        counter: u32,
        energy: u64,
        hashes: &BTreeSet<[u8; 32]>,
    ) {
        let digest = Hasher::<32>::hash(&essence(counter, energy, hashes));
        let signature = self.secret.sign(digest);

        ScalarKV::stage_upsert(
            &self.db,
            DBBytes(COUNTER_KEY.to_vec()),
            DBBytes(counter.to_le_bytes().to_vec()),
            batch,
        );
        ScalarKV::stage_upsert(
            &self.db,
            DBBytes(ENERGY_KEY.to_vec()),
            DBBytes(energy.to_le_bytes().to_vec()),
            batch,
        );
        ScalarKV::stage_upsert(
            &self.db,
            DBBytes(SIGNATURE_KEY.to_vec()),
            DBBytes(signature.as_ref().to_vec()),
            batch,
        );
    }
}

/// The canonical sealed representation: counter, energy, then the stored
/// record hashes in lexicographic order.
fn essence(counter: u32, energy: u64, hashes: &BTreeSet<[u8; 32]>) -> Vec<u8> {
    let mut out = Vec::with_capacity(12 + hashes.len() * 32);

    out.extend_from_slice(&counter.to_le_bytes());
    out.extend_from_slice(&energy.to_le_bytes());

    for hash in hashes {
        out.extend_from_slice(hash);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorus_codec::transfer::UnsignedTransfer;

    fn secret() -> SecretKey {
        SecretKey::from([7; 32])
    }

    fn transfer(energy: u64, timestamp: u64) -> TransferRecord {
        UnsignedTransfer::new([1; 32], [2; 32], timestamp, energy).into_record([9; 64])
    }

    fn keep_all(_: u32, _: &LedgerRecord) -> ReplayVerdict {
        ReplayVerdict::Keep
    }

    #[test]
    fn fresh_store_replays_to_zeroed_state() {
        let dir = tempfile::tempdir().unwrap();

        let mut ledger = Ledger::open(dir.path(), secret(), [3; 16]).unwrap();
        let outcome = ledger.replay(keep_all).unwrap();

        assert_eq!(ledger.counter(), 0);
        assert_eq!(ledger.energy(), 0);
        assert!(outcome.unprocessed.is_empty());
    }

    #[test]
    fn append_then_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let record = transfer(2_000_000, 1);

        {
            let mut ledger = Ledger::open(dir.path(), secret(), [3; 16]).unwrap();
            ledger.replay(keep_all).unwrap();
            assert_eq!(ledger.append_unprocessed(&record).unwrap(), 1);
        }

        let mut ledger = Ledger::open(dir.path(), secret(), [3; 16]).unwrap();
        let outcome = ledger.replay(keep_all).unwrap();

        assert_eq!(ledger.counter(), 1);
        assert_eq!(outcome.unprocessed.len(), 1);
        assert_eq!(outcome.unprocessed[0].0, 1);
        assert_eq!(outcome.unprocessed[0].1, record);

        let hash = Hasher::<32>::hash(record.as_bytes());
        assert!(ledger.contains(&hash));
    }

    #[test]
    fn finalize_moves_the_record_to_a_new_slot() {
        let dir = tempfile::tempdir().unwrap();
        let record = transfer(2_000_000, 1);

        let mut ledger = Ledger::open(dir.path(), secret(), [3; 16]).unwrap();
        ledger.replay(keep_all).unwrap();
        ledger.set_energy(10_000_000).unwrap();

        let slot = ledger.append_unprocessed(&record).unwrap();
        ledger
            .finalize_processed(slot, &record, b"receipt-bytes", 8_000_000)
            .unwrap();

        assert_eq!(ledger.counter(), 2);
        assert_eq!(ledger.energy(), 8_000_000);

        drop(ledger);

        let mut ledger = Ledger::open(dir.path(), secret(), [3; 16]).unwrap();

        let mut seen = Vec::new();
        let outcome = ledger
            .replay(|slot, record| {
                seen.push((slot, record.clone()));
                ReplayVerdict::Keep
            })
            .unwrap();

        assert!(outcome.unprocessed.is_empty());
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, 2);
        assert_eq!(seen[0].1.receipt(), Some(&b"receipt-bytes"[..]));
    }

    #[test]
    fn energy_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();

        {
            let mut ledger = Ledger::open(dir.path(), secret(), [3; 16]).unwrap();
            ledger.replay(keep_all).unwrap();
            ledger.set_energy(42).unwrap();
        }

        let mut ledger = Ledger::open(dir.path(), secret(), [3; 16]).unwrap();
        ledger.replay(keep_all).unwrap();

        assert_eq!(ledger.energy(), 42);
    }

    #[test]
    fn tampered_signature_zeroes_the_state() {
        let dir = tempfile::tempdir().unwrap();

        {
            let mut ledger = Ledger::open(dir.path(), secret(), [3; 16]).unwrap();
            ledger.replay(keep_all).unwrap();
            ledger.set_energy(42).unwrap();
        }

        {
            // forge the balance without access to the identity key
            let mut opts = Options::default();
            opts.create_missing_column_families(true);
            let db = DB::open_cf(&opts, dir.path(), [ScalarKV::CF_NAME, RecordKV::CF_NAME])
                .unwrap();
            let cf = db.cf_handle(ScalarKV::CF_NAME).unwrap();
            db.put_cf(&cf, ENERGY_KEY, 1_000_000_000u64.to_le_bytes())
                .unwrap();
        }

        let mut ledger = Ledger::open(dir.path(), secret(), [3; 16]).unwrap();

        assert!(matches!(ledger.replay(keep_all), Err(Error::EssenceMismatch)));
        assert_eq!(ledger.energy(), 0);
        assert_eq!(ledger.counter(), 0);
    }

    #[test]
    fn skipped_record_breaks_the_essence() {
        let dir = tempfile::tempdir().unwrap();

        {
            let mut ledger = Ledger::open(dir.path(), secret(), [3; 16]).unwrap();
            ledger.replay(keep_all).unwrap();
            ledger.append_unprocessed(&transfer(2_000_000, 1)).unwrap();
        }

        let mut ledger = Ledger::open(dir.path(), secret(), [3; 16]).unwrap();
        let replayed = ledger.replay(|_, _| ReplayVerdict::Skip);

        assert!(matches!(replayed, Err(Error::EssenceMismatch)));
    }
}
