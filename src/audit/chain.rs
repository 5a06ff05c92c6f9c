//! Hash Chain Engine
//!
//! `hash = SHA256(tag ‖ prev_hash ‖ canonical(payload) ‖ timestamp)`, where
//! every field is framed with an 8-byte big-endian length. The engine is
//! stateless and never reads the clock: the timestamp is an input.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use sha2::{Digest, Sha256};

/// Digest algorithm used for every entry hash
pub const HASH_ALGORITHM: &str = "sha256";

/// Version of the hash input layout
pub const CHAIN_VERSION: u32 = 1;

const VERSION_TAG: &[u8] = b"audit-ledger/v1";

/// `prev_hash` of the entry at sequence 0
pub const GENESIS_HASH: &str =
    "sha256:0000000000000000000000000000000000000000000000000000000000000000";

/// Compute the chain hash of an entry from its stored fields
pub fn compute_entry_hash(
    prev_hash: &str,
    canonical_payload: &[u8],
    timestamp: &DateTime<Utc>,
) -> String {
    let mut hasher = Sha256::new();
    update_framed(&mut hasher, VERSION_TAG);
    update_framed(&mut hasher, prev_hash.as_bytes());
    update_framed(&mut hasher, canonical_payload);
    update_framed(&mut hasher, format_timestamp(timestamp).as_bytes());
    format!("{}:{}", HASH_ALGORITHM, hex::encode(hasher.finalize()))
}

fn update_framed(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

/// RFC 3339 in UTC with exactly six fractional digits.
///
/// This string is part of the hash input and must never change for a
/// given chain version.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a timestamp written by `format_timestamp`
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|t| t.with_timezone(&Utc))
}

/// Drop sub-microsecond precision so the stored and hashed instants agree
pub fn truncate_timestamp(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    timestamp.trunc_subsecs(6)
}

/// Check that a stored digest has the `sha256:<64 hex>` shape
pub fn is_well_formed_hash(hash: &str) -> bool {
    match hash.strip_prefix("sha256:") {
        Some(digest) => {
            digest.len() == 64
                && digest
                    .bytes()
                    .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_hash_is_deterministic() {
        let payload = br#"{"action":"approve","resource":"r1"}"#;
        let hash1 = compute_entry_hash(GENESIS_HASH, payload, &t0());
        let hash2 = compute_entry_hash(GENESIS_HASH, payload, &t0());
        assert_eq!(hash1, hash2);
        assert!(hash1.starts_with("sha256:"));
        assert_eq!(hash1.len(), 71);
        assert!(is_well_formed_hash(&hash1));
    }

    #[test]
    fn test_every_input_affects_hash() {
        let payload = br#"{"action":"approve"}"#;
        let base = compute_entry_hash(GENESIS_HASH, payload, &t0());

        let other_prev = compute_entry_hash(&base, payload, &t0());
        let other_payload = compute_entry_hash(GENESIS_HASH, br#"{"action":"deny"}"#, &t0());
        let other_time = compute_entry_hash(
            GENESIS_HASH,
            payload,
            &(t0() + chrono::Duration::microseconds(1)),
        );

        assert_ne!(base, other_prev);
        assert_ne!(base, other_payload);
        assert_ne!(base, other_time);
    }

    #[test]
    fn test_framing_prevents_boundary_shifts() {
        // Moving bytes between prev_hash and payload must change the digest.
        let a = compute_entry_hash("ab", b"c", &t0());
        let b = compute_entry_hash("a", b"bc", &t0());
        assert_ne!(a, b);
    }

    #[test]
    fn test_timestamp_format() {
        let ts = t0() + chrono::Duration::nanoseconds(1_234_567);
        assert_eq!(format_timestamp(&ts), "2025-01-01T12:00:00.001234Z");
        assert_eq!(format_timestamp(&t0()), "2025-01-01T12:00:00.000000Z");

        let truncated = truncate_timestamp(ts);
        assert_eq!(parse_timestamp(&format_timestamp(&truncated)).unwrap(), truncated);
    }

    #[test]
    fn test_well_formed_hash() {
        assert!(is_well_formed_hash(GENESIS_HASH));
        assert!(!is_well_formed_hash("sha256:abc"));
        assert!(!is_well_formed_hash(&GENESIS_HASH.replace("sha256", "sha512")));
        assert!(!is_well_formed_hash(&GENESIS_HASH.to_uppercase()));
    }
}
