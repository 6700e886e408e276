//! Capability tokens for the metainfo surface
//!
//! An API key is an HMAC chain: the satellite derives the base tail from the
//! project secret and the key head, and every attenuation folds one caveat
//! into the tail. Holders can only narrow a key, never widen it, and the
//! satellite verifies the whole chain with `check`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::SystemTime;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum AccessError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("invalid api key: {0}")]
    InvalidFormat(String),
}

pub type Result<T> = std::result::Result<T, AccessError>;

/// Operation class an action belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Read,
    Write,
    List,
    Delete,
}

/// A concrete request the satellite asks a key to authorize.
#[derive(Debug, Clone)]
pub struct Action {
    pub op: Operation,
    pub bucket: String,
    pub encrypted_path: String,
    pub time: SystemTime,
}

/// Path restriction inside a caveat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaveatPath {
    pub bucket: String,
    pub encrypted_path_prefix: String,
}

/// One attenuation step. Unset fields restrict nothing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Caveat {
    #[serde(default)]
    pub disallow_reads: bool,
    #[serde(default)]
    pub disallow_writes: bool,
    #[serde(default)]
    pub disallow_lists: bool,
    #[serde(default)]
    pub disallow_deletes: bool,
    /// When non-empty, the action must fall under one of these paths.
    #[serde(default)]
    pub allowed_paths: Vec<CaveatPath>,
    pub not_after: Option<SystemTime>,
    pub not_before: Option<SystemTime>,
}

impl Caveat {
    fn chain_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("caveat serialization cannot fail")
    }

    fn allows(&self, action: &Action) -> Result<()> {
        let denied = match action.op {
            Operation::Read => self.disallow_reads,
            Operation::Write => self.disallow_writes,
            Operation::List => self.disallow_lists,
            Operation::Delete => self.disallow_deletes,
        };
        if denied {
            return Err(AccessError::Unauthorized(format!(
                "operation {:?} disallowed",
                action.op
            )));
        }

        if let Some(not_after) = self.not_after {
            if action.time > not_after {
                return Err(AccessError::Unauthorized("key expired".to_string()));
            }
        }
        if let Some(not_before) = self.not_before {
            if action.time < not_before {
                return Err(AccessError::Unauthorized("key not yet valid".to_string()));
            }
        }

        if !self.allowed_paths.is_empty() {
            let permitted = self.allowed_paths.iter().any(|allowed| {
                allowed.bucket == action.bucket
                    && action
                        .encrypted_path
                        .starts_with(&allowed.encrypted_path_prefix)
            });
            if !permitted {
                return Err(AccessError::Unauthorized(format!(
                    "path {}/{} not allowed",
                    action.bucket, action.encrypted_path
                )));
            }
        }

        Ok(())
    }
}

/// An attenuable capability token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    head: Vec<u8>,
    caveats: Vec<Caveat>,
    tail: Vec<u8>,
}

impl ApiKey {
    /// Mint a fresh key from the project secret.
    pub fn new(secret: &[u8]) -> Self {
        let mut head = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut head);
        let tail = chain(secret, &head);
        Self {
            head,
            caveats: Vec::new(),
            tail,
        }
    }

    /// Lookup handle for the satellite's key store.
    pub fn head(&self) -> &[u8] {
        &self.head
    }

    /// Narrow this key with one more caveat.
    pub fn attenuate(&self, caveat: Caveat) -> ApiKey {
        let tail = chain(&self.tail, &caveat.chain_bytes());
        let mut caveats = self.caveats.clone();
        caveats.push(caveat);
        ApiKey {
            head: self.head.clone(),
            caveats,
            tail,
        }
    }

    /// Verify the HMAC chain against `secret` and evaluate every caveat.
    pub fn check(&self, secret: &[u8], action: &Action) -> Result<()> {
        let mut tail = chain(secret, &self.head);
        for caveat in &self.caveats {
            tail = chain(&tail, &caveat.chain_bytes());
        }
        if tail != self.tail {
            return Err(AccessError::Unauthorized(
                "api key signature mismatch".to_string(),
            ));
        }
        for caveat in &self.caveats {
            caveat.allows(action)?;
        }
        Ok(())
    }

    pub fn serialize(&self) -> String {
        let bytes = serde_json::to_vec(self).expect("api key serialization cannot fail");
        URL_SAFE_NO_PAD.encode(bytes)
    }

    pub fn parse(encoded: &str) -> Result<ApiKey> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|err| AccessError::InvalidFormat(err.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|err| AccessError::InvalidFormat(err.to_string()))
    }
}

fn chain(key: &[u8], message: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const SECRET: &[u8] = b"test-project-secret";

    fn action(op: Operation, bucket: &str, path: &str) -> Action {
        Action {
            op,
            bucket: bucket.to_string(),
            encrypted_path: path.to_string(),
            time: SystemTime::now(),
        }
    }

    #[test]
    fn fresh_key_allows_everything() {
        let key = ApiKey::new(SECRET);
        for op in [
            Operation::Read,
            Operation::Write,
            Operation::List,
            Operation::Delete,
        ] {
            key.check(SECRET, &action(op, "bucket", "path"))
                .expect("allowed");
        }
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let key = ApiKey::new(SECRET);
        let result = key.check(b"other-secret", &action(Operation::Read, "b", "p"));
        assert!(matches!(result, Err(AccessError::Unauthorized(_))));
    }

    #[test]
    fn disallow_writes_blocks_writes_only() {
        let key = ApiKey::new(SECRET).attenuate(Caveat {
            disallow_writes: true,
            ..Caveat::default()
        });

        key.check(SECRET, &action(Operation::Read, "b", "p"))
            .expect("reads still allowed");
        assert!(key
            .check(SECRET, &action(Operation::Write, "b", "p"))
            .is_err());
    }

    #[test]
    fn allowed_paths_restrict_bucket_and_prefix() {
        let key = ApiKey::new(SECRET).attenuate(Caveat {
            allowed_paths: vec![CaveatPath {
                bucket: "photos".to_string(),
                encrypted_path_prefix: "2026/".to_string(),
            }],
            ..Caveat::default()
        });

        key.check(SECRET, &action(Operation::Read, "photos", "2026/a.jpg"))
            .expect("allowed path");
        assert!(key
            .check(SECRET, &action(Operation::Read, "photos", "2025/a.jpg"))
            .is_err());
        assert!(key
            .check(SECRET, &action(Operation::Read, "docs", "2026/a.jpg"))
            .is_err());
    }

    #[test]
    fn time_window_enforced() {
        let now = SystemTime::now();
        let key = ApiKey::new(SECRET).attenuate(Caveat {
            not_after: Some(now - Duration::from_secs(60)),
            ..Caveat::default()
        });

        assert!(key.check(SECRET, &action(Operation::Read, "b", "p")).is_err());
    }

    #[test]
    fn forged_attenuation_removal_fails() {
        let restricted = ApiKey::new(SECRET).attenuate(Caveat {
            disallow_deletes: true,
            ..Caveat::default()
        });

        // strip the caveat but keep the attenuated tail
        let forged = ApiKey {
            head: restricted.head.clone(),
            caveats: Vec::new(),
            tail: restricted.tail.clone(),
        };
        assert!(forged
            .check(SECRET, &action(Operation::Delete, "b", "p"))
            .is_err());
    }

    #[test]
    fn serialize_round_trip() {
        let key = ApiKey::new(SECRET).attenuate(Caveat {
            disallow_lists: true,
            ..Caveat::default()
        });
        let parsed = ApiKey::parse(&key.serialize()).expect("parse");
        parsed
            .check(SECRET, &action(Operation::Read, "b", "p"))
            .expect("chain still verifies");
        assert!(parsed
            .check(SECRET, &action(Operation::List, "b", "p"))
            .is_err());
    }
}
