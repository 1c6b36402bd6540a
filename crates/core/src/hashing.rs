//! SHA-256 helpers and the job fingerprint.
//!
//! The fingerprint identifies "the same tuning run": same data-service
//! endpoint, same normalized profile, same UAM categorization flag. The ledger
//! refuses to queue a second in-flight job with an equal fingerprint.

use sha2::{Digest, Sha256};

use crate::profile::NormalizedProfile;

/// Compute a SHA-256 hex digest of the given bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("{hash:x}")
}

/// Stable fingerprint over a canonical JSON encoding of the job inputs.
///
/// `serde_json::Value` objects keep their keys sorted, so the encoding does
/// not depend on struct field order.
pub fn fingerprint(endpoint: &str, profile: &NormalizedProfile, uam_as_basal: bool) -> String {
    let canonical = serde_json::json!({
        "endpoint": endpoint.trim_end_matches('/'),
        "profile": profile,
        "uam_as_basal": uam_as_basal,
    });
    sha256_hex(canonical.to_string().as_bytes())
}

/// Hash of the endpoint alone, used to look up a site's job history without
/// storing the URL in the lookup key.
pub fn endpoint_hash(endpoint: &str) -> String {
    sha256_hex(endpoint.trim_end_matches('/').as_bytes())
}
