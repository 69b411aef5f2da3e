//! Suppression/dedupe key construction (C6/C7, spec §4.6/§4.7).
//!
//! `dedupe_key = hash(rule_id, token, time_bucket)`: two alerts for the
//! same rule and token within the same `suppression_duration_s` bucket
//! collapse onto the same key, so the outbox can treat the second as a
//! suppression candidate instead of a fresh delivery. Uses `rustc-hash`
//! for speed, matching the fast-hashing crate already pulled in for this
//! purpose rather than a cryptographic hash with no adversarial input here.

use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};

pub fn dedupe_key(rule_id: &str, token: &str, timestamp: i64, suppression_duration_s: u64) -> String {
    let bucket = if suppression_duration_s == 0 { timestamp } else { timestamp / suppression_duration_s as i64 };

    let mut hasher = FxHasher::default();
    rule_id.hash(&mut hasher);
    token.hash(&mut hasher);
    bucket.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}
