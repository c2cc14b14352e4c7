//! Content fingerprints for schema deduplication
//!
//! A fingerprint is a 64-bit xxh3 hash of the raw schema bytes. It narrows a
//! lookup to a handful of candidates; callers must still compare name and
//! bytes exactly, since distinct schemas may share a fingerprint.

use xxhash_rust::xxh3::xxh3_64;

/// Hash function from raw schema bytes to a fingerprint
///
/// Groups take one of these so tests can force collisions.
pub type FingerprintFn = fn(&[u8]) -> u64;

/// Default fingerprint: xxh3 over the raw bytes
pub fn fingerprint(schema: &[u8]) -> u64 {
    xxh3_64(schema)
}
