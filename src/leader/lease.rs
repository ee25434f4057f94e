//! The persisted leader lease.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Time-bounded claim on the station's control channel, persisted under a
/// shared storage key so every tab of the station sees the same value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderLease {
    /// Tab holding the claim.
    #[serde(rename = "tabId")]
    pub tab_id: Uuid,
    /// Wall-clock expiry in unix milliseconds.
    #[serde(rename = "expiresAt")]
    pub expires_at_ms: u64,
}

impl LeaderLease {
    /// Build a lease expiring `ttl_ms` after `now_ms`.
    pub fn claim(tab_id: Uuid, now_ms: u64, ttl_ms: u64) -> Self {
        Self {
            tab_id,
            expires_at_ms: now_ms + ttl_ms,
        }
    }

    /// Whether the claim has lapsed at `now_ms`.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms <= now_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_boundary_is_inclusive() {
        let lease = LeaderLease::claim(Uuid::new_v4(), 1_000, 3_000);
        assert_eq!(lease.expires_at_ms, 4_000);
        assert!(!lease.is_expired(3_999));
        assert!(lease.is_expired(4_000));
    }

    #[test]
    fn shared_key_shape_is_stable() {
        let lease = LeaderLease::claim(Uuid::nil(), 0, 3_000);
        let json = serde_json::to_value(lease).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "tabId": "00000000-0000-0000-0000-000000000000",
                "expiresAt": 3_000,
            })
        );
    }
}
