//! Cache key derivation.
//!
//! Keys are `{table}_{sql hash}{params hash}{suffix}` where both hashes are the
//! first four hex characters of a SHA-256 digest. They are stable across
//! processes, unlike `std` hashers.

use sha2::{Digest, Sha256};

use crate::query::Query;
use crate::value::Value;

/// Suffix for content-hash fingerprint memo keys.
pub const HASH_SUFFIX: &str = "_hash";
/// Suffix for timestamp fingerprint memo keys.
pub const TIMESTAMP_SUFFIX: &str = "_ts";

/// Derive a key identifying `query` (table, SQL text and bound parameters).
pub fn query_to_key(query: &Query, suffix: &str) -> String {
    let (sql, params) = query.sql_with_params();
    let params: String = params.iter().map(Value::canonical).collect();
    format!(
        "{}_{}{}{}",
        query.base_table(),
        hash_prefix(sql.as_bytes(), 4),
        hash_prefix(params.as_bytes(), 4),
        suffix
    )
}

/// First `len` hex characters of the SHA-256 digest of `bytes`.
pub fn hash_prefix(bytes: &[u8], len: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let mut encoded = hex::encode(hasher.finalize());
    encoded.truncate(len);
    encoded
}
