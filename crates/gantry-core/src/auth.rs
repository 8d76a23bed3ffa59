//! Credential verification and per-system activity tracking.
//!
//! Configured secrets are digested with a process-local keyed MAC at
//! construction and the raw material is zeroized; verification compares MAC
//! tags in constant time, and unknown systems are verified against a dummy
//! tag so their timing matches a wrong-credential check.

use ahash::AHashMap;
use chrono::{DateTime, Utc};
use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};
use std::sync::RwLock;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("failed to generate MAC key material")]
    KeyGeneration,
}

// ---------------------------------------------------------------------------
// SystemRecord
// ---------------------------------------------------------------------------

/// Bookkeeping for one authenticated system.
#[derive(Debug, Clone, Copy)]
pub struct SystemRecord {
    pub authenticated_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// AuthenticationManager
// ---------------------------------------------------------------------------

pub struct AuthenticationManager {
    mac_key: hmac::Key,
    /// MAC tag per configured system, never the raw secret.
    expected: AHashMap<String, Vec<u8>>,
    /// Verified against when the system id is unknown.
    dummy_tag: Vec<u8>,
    records: RwLock<AHashMap<String, SystemRecord>>,
}

impl AuthenticationManager {
    /// Digest the configured `(system_id, secret)` pairs. Raw secrets are
    /// zeroized before this returns.
    pub fn new(
        credentials: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self, AuthError> {
        let rng = SystemRandom::new();
        let mut key_bytes = [0u8; 32];
        rng.fill(&mut key_bytes)
            .map_err(|_| AuthError::KeyGeneration)?;
        let mac_key = hmac::Key::new(hmac::HMAC_SHA256, &key_bytes);
        key_bytes.zeroize();

        let mut expected = AHashMap::new();
        for (system_id, mut secret) in credentials {
            let tag = hmac::sign(&mac_key, secret.as_bytes());
            secret.zeroize();
            expected.insert(system_id, tag.as_ref().to_vec());
        }

        let dummy_tag = hmac::sign(&mac_key, b"gantry.dummy.credential")
            .as_ref()
            .to_vec();

        Ok(Self {
            mac_key,
            expected,
            dummy_tag,
            records: RwLock::new(AHashMap::new()),
        })
    }

    /// Verify `credentials` for `system_id`; on success record the
    /// authentication and refresh activity.
    ///
    /// Unknown ids do the same MAC + comparison work as known ones.
    pub fn authenticate(&self, system_id: &str, credentials: &str) -> bool {
        let provided = hmac::sign(&self.mac_key, credentials.as_bytes());
        let stored = self
            .expected
            .get(system_id)
            .map(Vec::as_slice)
            .unwrap_or(self.dummy_tag.as_slice());

        let known = self.expected.contains_key(system_id);
        let matches = bool::from(provided.as_ref().ct_eq(stored));
        if !(known && matches) {
            return false;
        }

        let now = Utc::now();
        if let Ok(mut records) = self.records.write() {
            records.insert(
                system_id.to_string(),
                SystemRecord {
                    authenticated_at: now,
                    last_activity: now,
                },
            );
        }
        true
    }

    pub fn is_authenticated(&self, system_id: &str) -> bool {
        self.records
            .read()
            .map(|r| r.contains_key(system_id))
            .unwrap_or(false)
    }

    /// Refresh `last_activity` after a successful send or receive.
    pub fn update_activity(&self, system_id: &str) {
        if let Ok(mut records) = self.records.write() {
            if let Some(rec) = records.get_mut(system_id) {
                rec.last_activity = Utc::now();
            }
        }
    }

    pub fn last_activity(&self, system_id: &str) -> Option<DateTime<Utc>> {
        self.records
            .read()
            .ok()
            .and_then(|r| r.get(system_id).map(|rec| rec.last_activity))
    }

    /// Drop a system's authentication record. Returns whether one existed.
    pub fn deauthenticate(&self, system_id: &str) -> bool {
        self.records
            .write()
            .map(|mut r| r.remove(system_id).is_some())
            .unwrap_or(false)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> AuthenticationManager {
        AuthenticationManager::new([
            ("crm".to_string(), "s3cret".to_string()),
            ("erp".to_string(), "hunter2".to_string()),
        ])
        .unwrap()
    }

    #[test]
    fn correct_credentials_authenticate() {
        let auth = manager();
        assert!(auth.authenticate("crm", "s3cret"));
        assert!(auth.is_authenticated("crm"));
        assert!(auth.last_activity("crm").is_some());
    }

    #[test]
    fn wrong_credentials_rejected() {
        let auth = manager();
        assert!(!auth.authenticate("crm", "wrong"));
        assert!(!auth.is_authenticated("crm"));
    }

    #[test]
    fn unknown_system_rejected() {
        let auth = manager();
        assert!(!auth.authenticate("ghost", "s3cret"));
        assert!(!auth.is_authenticated("ghost"));
    }

    #[test]
    fn credentials_are_not_interchangeable() {
        let auth = manager();
        assert!(!auth.authenticate("crm", "hunter2"));
        assert!(auth.authenticate("erp", "hunter2"));
    }

    #[test]
    fn update_activity_advances_timestamp() {
        let auth = manager();
        auth.authenticate("crm", "s3cret");
        let first = auth.last_activity("crm").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        auth.update_activity("crm");
        let second = auth.last_activity("crm").unwrap();
        assert!(second > first);
    }

    #[test]
    fn update_activity_ignores_unauthenticated() {
        let auth = manager();
        auth.update_activity("crm");
        assert!(auth.last_activity("crm").is_none());
    }

    #[test]
    fn deauthenticate_removes_record() {
        let auth = manager();
        auth.authenticate("crm", "s3cret");
        assert!(auth.deauthenticate("crm"));
        assert!(!auth.is_authenticated("crm"));
        assert!(!auth.deauthenticate("crm"));
    }

    #[test]
    fn reauthentication_resets_authenticated_at() {
        let auth = manager();
        auth.authenticate("crm", "s3cret");
        assert!(auth.deauthenticate("crm"));
        assert!(auth.authenticate("crm", "s3cret"));
        assert!(auth.is_authenticated("crm"));
    }
}
