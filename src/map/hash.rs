//! Seeded SipHash-2-4 over raw key bytes.

use std::hash::Hasher;

use siphasher::sip::SipHasher24;

/// The 128-bit SipHash key used by a map.
///
/// Maps never pick a seed on their own: the default is fixed so that probe
/// layout and iteration order are reproducible between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MapSeed {
    pub k0: u64,
    pub k1: u64,
}

impl MapSeed {
    /// The all-zero seed used unless the caller supplies one.
    pub const FIXED: Self = Self::new(0, 0);

    pub const fn new(k0: u64, k1: u64) -> Self {
        Self { k0, k1 }
    }

    /// Build a seed from 16 key bytes, little-endian halves.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        let mut lo = [0u8; 8];
        let mut hi = [0u8; 8];
        lo.copy_from_slice(&bytes[..8]);
        hi.copy_from_slice(&bytes[8..]);
        Self::new(u64::from_le_bytes(lo), u64::from_le_bytes(hi))
    }
}

/// SipHash-2-4 of `bytes` under `seed`.
#[inline]
pub fn sip_hash(bytes: &[u8], seed: MapSeed) -> u64 {
    let mut hasher = SipHasher24::new_with_keys(seed.k0, seed.k1);
    hasher.write(bytes);
    hasher.finish()
}
