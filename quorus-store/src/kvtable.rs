//! Typed access to RocksDB column families with batched writes.

use std::marker::PhantomData;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error")]
    IO,

    #[error("stored value is malformed")]
    Corrupted,

    #[error("not found")]
    NotFound,
}

/// A numeric record key, stored big-endian so the store iterates keys in
/// numeric order.
pub struct DBInt(pub u32);

impl From<DBInt> for Box<[u8]> {
    fn from(value: DBInt) -> Self {
        let b = value.0.to_be_bytes();
        Box::new(b)
    }
}

impl From<Box<[u8]>> for DBInt {
    fn from(value: Box<[u8]>) -> Self {
        let inner: [u8; 4] = value[0..4].try_into().unwrap();
        let inner = u32::from_be_bytes(inner);
        Self(inner)
    }
}

impl From<u32> for DBInt {
    fn from(value: u32) -> Self {
        DBInt(value)
    }
}

pub struct DBBytes(pub Vec<u8>);

impl From<DBBytes> for Box<[u8]> {
    fn from(value: DBBytes) -> Self {
        value.0.into()
    }
}

impl From<Box<[u8]>> for DBBytes {
    fn from(value: Box<[u8]>) -> Self {
        Self(value.into())
    }
}

type RocksIterator<'a> = rocksdb::DBIteratorWithThreadMode<'a, rocksdb::DB>;

pub struct EntryIterator<'a, K, V>(RocksIterator<'a>, PhantomData<(K, V)>);

impl<'a, K, V> EntryIterator<'a, K, V> {
    pub fn new(inner: RocksIterator<'a>) -> Self {
        Self(inner, Default::default())
    }
}

impl<'a, K, V> Iterator for EntryIterator<'a, K, V>
where
    K: From<Box<[u8]>>,
    V: From<Box<[u8]>>,
{
    type Item = Result<(K, V), Error>;

    fn next(&mut self) -> Option<Result<(K, V), Error>> {
        match self.0.next() {
            Some(Ok((key, value))) => Some(Ok((K::from(key), V::from(value)))),
            Some(Err(err)) => {
                tracing::error!(?err);
                Some(Err(Error::IO))
            }
            None => None,
        }
    }
}

pub trait KVTable<K, V>
where
    Box<[u8]>: From<K>,
    Box<[u8]>: From<V>,
    K: From<Box<[u8]>>,
    V: From<Box<[u8]>>,
{
    const CF_NAME: &'static str;

    fn cf(db: &rocksdb::DB) -> rocksdb::ColumnFamilyRef {
        db.cf_handle(Self::CF_NAME).unwrap()
    }

    fn get_by_key(db: &rocksdb::DB, k: K) -> Result<Option<V>, Error> {
        let cf = Self::cf(db);
        let raw_key = Box::<[u8]>::from(k);
        let raw_value = db
            .get_cf(&cf, raw_key)
            .map_err(|_| Error::IO)?
            .map(|x| Box::from(x.as_slice()));

        match raw_value {
            Some(x) => Ok(Some(<V>::from(x))),
            None => Ok(None),
        }
    }

    fn stage_upsert(db: &rocksdb::DB, k: K, v: V, batch: &mut rocksdb::WriteBatch) {
        let cf = Self::cf(db);

        let k_raw = Box::<[u8]>::from(k);
        let v_raw = Box::<[u8]>::from(v);

        batch.put_cf(&cf, k_raw, v_raw);
    }

    fn stage_delete(db: &rocksdb::DB, key: K, batch: &mut rocksdb::WriteBatch) {
        let cf = Self::cf(db);
        let k_raw = Box::<[u8]>::from(key);
        batch.delete_cf(&cf, k_raw);
    }

    fn iter_entries_start(db: &rocksdb::DB) -> EntryIterator<'_, K, V> {
        let cf = Self::cf(db);
        let inner = db.iterator_cf(&cf, rocksdb::IteratorMode::Start);
        EntryIterator::new(inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_keys_sort_numerically() {
        // big-endian encoding keeps numeric order under the store's
        // lexicographic iteration
        let low = Box::<[u8]>::from(DBInt(2));
        let high = Box::<[u8]>::from(DBInt(300));

        assert!(low < high);

        assert_eq!(DBInt::from(low).0, 2);
        assert_eq!(DBInt::from(high).0, 300);
    }
}
