//! 128-bit content fingerprints built on blake3.
//!
//! A [`Fingerprint`] summarizes what a (plug, context) pair would compute to
//! without computing it. Fingerprints are composed Merkle-style: an output's
//! fingerprint mixes the fingerprints of its upstream plugs, its local
//! parameters, and the context it is evaluated in.
//!
//! # Width and collisions
//!
//! The fingerprint is the first 16 bytes of a BLAKE3 digest. With `n`
//! distinct live fingerprints the probability that any two collide is about
//! `n^2 / 2^129`; a billion cache entries gives roughly `1.5e-21`. Collisions
//! are accepted rather than eliminated: two pairs with equal fingerprints are
//! treated as interchangeable.
//!
//! # Determinism
//!
//! Every `append_*` method writes a one-byte tag before its payload, so that
//! e.g. the string `"1"` and the integer `1` never feed the same bytes.
//! Strings and byte slices are length-prefixed.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A fixed-width (128-bit) content digest.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub [u8; 16]);

impl Fingerprint {
    /// The all-zero fingerprint. Never produced by [`FingerprintHasher`] in
    /// practice; useful as a placeholder in tests.
    pub const ZERO: Fingerprint = Fingerprint([0u8; 16]);

    /// Returns the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Folds the digest down to 64 bits, e.g. for shard selection.
    pub fn low_u64(&self) -> u64 {
        let mut low = [0u8; 8];
        low.copy_from_slice(&self.0[..8]);
        u64::from_le_bytes(low)
    }

    /// Lowercase hex rendering of the full digest.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

// Payload tags. Changing any of these changes every fingerprint.
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_FLOAT: u8 = 3;
const TAG_STR: u8 = 4;
const TAG_BYTES: u8 = 5;
const TAG_FINGERPRINT: u8 = 6;
const TAG_U64: u8 = 7;
const TAG_FLOATS: u8 = 8;

/// Incremental builder for a [`Fingerprint`].
///
/// Thin wrapper over `blake3::Hasher` with typed, tagged appends.
#[derive(Clone, Default)]
pub struct FingerprintHasher {
    inner: blake3::Hasher,
}

impl FingerprintHasher {
    /// Creates an empty hasher.
    pub fn new() -> Self {
        FingerprintHasher {
            inner: blake3::Hasher::new(),
        }
    }

    /// Creates a hasher seeded with a domain string, e.g. a node type name.
    pub fn seeded(seed: &str) -> Self {
        let mut hasher = FingerprintHasher::new();
        hasher.append_str(seed);
        hasher
    }

    pub fn append_bool(&mut self, value: bool) -> &mut Self {
        self.inner.update(&[TAG_BOOL, value as u8]);
        self
    }

    pub fn append_i64(&mut self, value: i64) -> &mut Self {
        self.inner.update(&[TAG_INT]);
        self.inner.update(&value.to_le_bytes());
        self
    }

    pub fn append_u64(&mut self, value: u64) -> &mut Self {
        self.inner.update(&[TAG_U64]);
        self.inner.update(&value.to_le_bytes());
        self
    }

    /// Appends a float by bit pattern, so `0.0` and `-0.0` hash differently.
    pub fn append_f64(&mut self, value: f64) -> &mut Self {
        self.inner.update(&[TAG_FLOAT]);
        self.inner.update(&value.to_bits().to_le_bytes());
        self
    }

    pub fn append_f64_slice(&mut self, values: &[f64]) -> &mut Self {
        self.inner.update(&[TAG_FLOATS]);
        self.inner.update(&(values.len() as u64).to_le_bytes());
        for v in values {
            self.inner.update(&v.to_bits().to_le_bytes());
        }
        self
    }

    pub fn append_str(&mut self, value: &str) -> &mut Self {
        self.inner.update(&[TAG_STR]);
        self.inner.update(&(value.len() as u64).to_le_bytes());
        self.inner.update(value.as_bytes());
        self
    }

    pub fn append_bytes(&mut self, value: &[u8]) -> &mut Self {
        self.inner.update(&[TAG_BYTES]);
        self.inner.update(&(value.len() as u64).to_le_bytes());
        self.inner.update(value);
        self
    }

    pub fn append_fingerprint(&mut self, value: &Fingerprint) -> &mut Self {
        self.inner.update(&[TAG_FINGERPRINT]);
        self.inner.update(value.as_bytes());
        self
    }

    /// Finalizes into a 128-bit fingerprint (truncated BLAKE3 output).
    pub fn finish(&self) -> Fingerprint {
        let digest = self.inner.finalize();
        let mut out = [0u8; 16];
        out.copy_from_slice(&digest.as_bytes()[..16]);
        Fingerprint(out)
    }
}

impl fmt::Debug for FingerprintHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FingerprintHasher").finish_non_exhaustive()
    }
}
