//! State hashing for determinism checks.
//!
//! FNV-1a over the bincode encoding of a value. Not cryptographic; it only
//! has to be fast and identical across runs of the same build.

use serde::Serialize;

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x00000100000001B3;

pub fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, &byte| {
        (hash ^ byte as u64).wrapping_mul(FNV_PRIME)
    })
}

pub fn format_hash(hash: u64) -> String {
    format!("{:016x}", hash)
}

/// Hashes the canonical encoding of `value`
///
/// Maps inside `value` must iterate in a fixed order (`BTreeMap`, not
/// `HashMap`) or equal states can hash differently.
pub fn state_hash<T: Serialize>(value: &T) -> Result<String, bincode::Error> {
    let bytes = bincode::serialize(value)?;
    Ok(format_hash(fnv1a(&bytes)))
}
