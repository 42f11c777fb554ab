//! Comparison helpers for secrets the gateway checks outside of JWTs
//! (e.g. the bearer token guarding `/metrics`).

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Compare two secrets without leaking content or length through timing.
///
/// Inputs are reduced to SHA-256 digests first so both sides are always the
/// same length, then compared with `subtle`.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let ha = Sha256::digest(a);
    let hb = Sha256::digest(b);
    ha.ct_eq(&hb).into()
}

/// Extract the token of an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header_value: &str) -> Option<&str> {
    header_value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}
