use crate::hash::Hash;
use cryptoxide::blake2b::Blake2b;

/// handy method to create a hash of a given `BYTES` size.
///
/// The hash algorithm is `Blake2b` parameterised by its output length,
/// which gives the extendable-output behaviour the protocol relies on:
/// the same function yields 2-byte seed checksums, 3-byte identity
/// checksums, a 16-byte stream key and 32-byte digests. Output lengths
/// above 64 bytes are not supported by the algorithm.
///
/// # Generate a 32 byte digest
///
/// ```
/// # use quorus_crypto::hash::Hasher;
///
/// let mut hasher = Hasher::<32>::new();
/// hasher.input(b"My transfer");
///
/// let digest = hasher.finalize();
/// ```
pub struct Hasher<const BYTES: usize>(Blake2b);

impl<const BYTES: usize> Hasher<BYTES> {
    /// create a new [`Hasher`]
    #[inline]
    pub fn new() -> Self {
        Self(Blake2b::new(BYTES))
    }

    /// update the [`Hasher`] with the given inputs
    #[inline]
    pub fn input(&mut self, bytes: &[u8]) {
        use cryptoxide::digest::Digest as _;
        self.0.input(bytes);
    }

    /// convenient function to directly generate the hash of the given
    /// bytes without creating the intermediary [`Hasher`] and calling
    /// [`Hasher::input`].
    #[inline]
    pub fn hash(bytes: &[u8]) -> Hash<BYTES> {
        let mut hasher = Self::new();
        hasher.input(bytes);
        hasher.finalize()
    }

    /// consume the [`Hasher`] and return the computed digest
    pub fn finalize(mut self) -> Hash<BYTES> {
        use cryptoxide::digest::Digest as _;
        let mut hash = [0; BYTES];
        self.0.result(&mut hash);
        Hash::new(hash)
    }
}

impl<const BYTES: usize> Default for Hasher<BYTES> {
    fn default() -> Self {
        Self::new()
    }
}
