//! Deterministic resource naming
//!
//! Envoy resource names are built from object identities and must stay
//! within a length limit. Names that would exceed it are shortened segment
//! by segment, each shortened segment ending in a short hash of the full
//! name so distinct inputs keep distinct names.

use sha2::{Digest, Sha256};

/// Length of the hash suffix appended to shortened segments
const SHORT_HASH_LEN: usize = 6;

/// Lowercase hex SHA-256 of `data`
pub fn hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// First `bytes` bytes of the SHA-256 of `data`, hex encoded
pub fn hash_prefix(data: &[u8], bytes: usize) -> String {
    let digest = Sha256::digest(data);
    hex::encode(&digest[..bytes.min(digest.len())])
}

/// Join `segments` with `/`, shortening the result to fewer than `limit`
/// characters when needed.
///
/// Starting from the last segment, each segment is truncated to
/// `limit / segments.len()` characters (ending in `-` plus a short hash of
/// the full joined name) until the name fits. If every segment has been
/// truncated and the name still does not fit, the hash alone is returned,
/// cut to `limit`.
pub fn hashname(limit: usize, segments: &[&str]) -> String {
    let joined = segments.join("/");
    if char_len(&joined) < limit {
        return joined;
    }

    let full_hash = hash(joined.as_bytes());
    let short_hash = &full_hash[..SHORT_HASH_LEN];
    let per_segment = limit / segments.len().max(1);

    let mut parts: Vec<String> = segments.iter().map(|s| s.to_string()).collect();
    for index in (0..parts.len()).rev() {
        parts[index] = truncate(per_segment, &parts[index], short_hash);
        let candidate = parts.join("/");
        if char_len(&candidate) < limit {
            return candidate;
        }
    }

    full_hash.chars().take(limit).collect()
}

/// Shorten `value` to `limit` characters by replacing its tail with
/// `-suffix`. A limit no longer than the suffix yields the start of the
/// suffix.
pub fn truncate(limit: usize, value: &str, suffix: &str) -> String {
    if limit >= char_len(value) {
        return value.to_string();
    }
    if limit <= char_len(suffix) {
        return suffix.chars().take(limit).collect();
    }

    let keep = limit - char_len(suffix) - 1;
    let head: String = value.chars().take(keep).collect();
    format!("{}-{}", head, suffix)
}

fn char_len(value: &str) -> usize {
    value.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn short_names_are_unchanged() {
        assert_eq!(hashname(60, &["default", "kuard", "8080", "da39a3ee5e"]), "default/kuard/8080/da39a3ee5e");
    }

    #[test]
    fn long_last_segment_is_truncated_first() {
        let long = "a".repeat(80);
        let name = hashname(60, &["default", &long]);
        assert!(name.starts_with("default/"));
        assert!(name.chars().count() < 60);
        assert!(name.ends_with(&hash(format!("default/{}", long).as_bytes())[..SHORT_HASH_LEN]));
    }

    #[test]
    fn hopeless_names_collapse_to_hash() {
        let segments: Vec<String> = (0..30).map(|i| format!("segment{}", i)).collect();
        let refs: Vec<&str> = segments.iter().map(String::as_str).collect();
        let name = hashname(20, &refs);
        assert_eq!(name.len(), 20);
        assert!(hash(refs.join("/").as_bytes()).starts_with(&name));
    }

    #[test]
    fn truncate_edges() {
        assert_eq!(truncate(10, "short", "abcdef"), "short");
        assert_eq!(truncate(4, "longer-value", "abcdef"), "abcd");
        assert_eq!(truncate(10, "longer-value", "abcdef"), "lon-abcdef");
    }

    proptest! {
        #[test]
        fn hashname_respects_limit(segments in prop::collection::vec("[a-z0-9.-]{0,40}", 1..6),
                                   limit in 16usize..80) {
            let refs: Vec<&str> = segments.iter().map(String::as_str).collect();
            let name = hashname(limit, &refs);
            prop_assert!(name.chars().count() <= limit);
            prop_assert_eq!(hashname(limit, &refs), name);
        }
    }
}
