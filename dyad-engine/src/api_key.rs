//! The `ApiKey` record and the authentication/authorization primitives built on it.
//!
//! Keys are issued as `dyad_<base64url>`; only the hash of the remainder is ever persisted.
//! `ApiKeyStore` is the read/write seam the gateway binds to an in-memory or external store;
//! the engine itself never assumes a particular backing store, matching `ProviderRegistry`'s
//! role for provider records.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub type ApiKeyId = String;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Hash, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Chat,
    Embeddings,
    Models,
    Admin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimits {
    pub requests_per_minute: u32,
    pub requests_per_day: u32,
    pub tokens_per_minute: u32,
    pub tokens_per_day: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyUsage {
    pub requests_today: u64,
    pub tokens_today: u64,
    pub requests_this_month: u64,
    pub tokens_this_month: u64,
    pub last_reset_date: NaiveDate,
    pub last_used: Option<chrono::DateTime<Utc>>,
}

impl Default for ApiKeyUsage {
    fn default() -> Self {
        Self {
            requests_today: 0,
            tokens_today: 0,
            requests_this_month: 0,
            tokens_this_month: 0,
            last_reset_date: Utc::now().date_naive(),
            last_used: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: ApiKeyId,
    /// First 8 chars of the issued key, after the `dyad_` prefix. Used to route an incoming
    /// bearer token to candidate `ApiKey` records before hash verification.
    pub prefix: String,
    /// Salted hash of the full issued secret. Never the plaintext.
    pub hash: String,
    pub user_id: String,
    pub enabled: bool,
    pub permissions: HashSet<Permission>,
    pub allowed_models: Option<Vec<String>>,
    pub allowed_providers: Option<Vec<String>>,
    pub rate_limits: RateLimits,
    pub usage: ApiKeyUsage,
    pub expires_at: Option<chrono::DateTime<Utc>>,
}

impl ApiKey {
    pub fn is_valid_now(&self) -> bool {
        if !self.enabled {
            return false;
        }
        match self.expires_at {
            Some(exp) => exp > Utc::now(),
            None => true,
        }
    }

    pub fn has_permission(&self, perm: Permission) -> bool {
        self.permissions.contains(&perm)
    }

    pub fn may_use_model(&self, model: &str) -> bool {
        match &self.allowed_models {
            Some(list) => list.iter().any(|m| m == model),
            None => true,
        }
    }

    pub fn may_use_provider(&self, provider_id: &str) -> bool {
        match &self.allowed_providers {
            Some(list) => list.iter().any(|p| p == provider_id),
            None => true,
        }
    }
}

/// A freshly issued key, returned once by `issue_key` and never retrievable again.
pub struct IssuedKey {
    pub record: ApiKey,
    pub plaintext: String,
}

const KEY_PREFIX: &str = "dyad_";

/// Issue a new key: generate 32 random bytes, base64url-encode, salt+hash for storage.
/// The plaintext is returned to the caller exactly once.
pub fn issue_key(user_id: impl Into<String>, permissions: HashSet<Permission>, rate_limits: RateLimits) -> IssuedKey {
    use base64::Engine as _;
    use rand::RngCore;

    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let secret = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes);
    let plaintext = format!("{KEY_PREFIX}{secret}");
    let prefix = secret.chars().take(8).collect::<String>();
    let hash = hash_secret(&secret);

    IssuedKey {
        record: ApiKey {
            id: uuid::Uuid::new_v4().to_string(),
            prefix,
            hash,
            user_id: user_id.into(),
            enabled: true,
            permissions,
            allowed_models: None,
            allowed_providers: None,
            rate_limits,
            usage: ApiKeyUsage::default(),
            expires_at: None,
        },
        plaintext,
    }
}

/// Salted SHA-256 over the key secret. Not reversible; verification re-hashes the candidate
/// and compares in constant time.
fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"dyad-gateway-api-key-salt-v1:");
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Split a bearer token of the form `dyad_<base64url>` into its routing prefix and the full
/// secret, or `None` if it doesn't match the scheme.
pub fn parse_bearer_token(token: &str) -> Option<(String, String)> {
    let secret = token.strip_prefix(KEY_PREFIX)?;
    if secret.len() < 8 {
        return None;
    }
    let prefix = secret.chars().take(8).collect::<String>();
    Some((prefix, secret.to_string()))
}

/// Constant-time verification of a candidate secret against a stored hash.
pub fn verify_secret(candidate_secret: &str, stored_hash: &str) -> bool {
    let candidate_hash = hash_secret(candidate_secret);
    constant_time_eq(candidate_hash.as_bytes(), stored_hash.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    async fn find_by_prefix(&self, prefix: &str) -> Vec<ApiKey>;
    async fn get(&self, id: &ApiKeyId) -> Option<ApiKey>;
    /// Applied asynchronously by the dispatcher's accounting step; readers may observe a
    /// slightly stale value, which is acceptable per the shared-resource policy.
    async fn record_usage(&self, id: &ApiKeyId, requests: u64, tokens: u64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_key_round_trips_through_verify() {
        let issued = issue_key("u1", HashSet::from([Permission::Chat]), RateLimits {
            requests_per_minute: 60,
            requests_per_day: 10_000,
            tokens_per_minute: 100_000,
            tokens_per_day: 1_000_000,
        });
        let (prefix, secret) = parse_bearer_token(&issued.plaintext).unwrap();
        assert_eq!(prefix, issued.record.prefix);
        assert!(verify_secret(&secret, &issued.record.hash));
        assert!(!verify_secret("wrong-secret", &issued.record.hash));
    }

    #[test]
    fn expired_key_is_not_valid() {
        let mut issued = issue_key("u1", HashSet::new(), RateLimits {
            requests_per_minute: 1,
            requests_per_day: 1,
            tokens_per_minute: 1,
            tokens_per_day: 1,
        });
        issued.record.expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        assert!(!issued.record.is_valid_now());
    }

    #[test]
    fn disabled_key_is_not_valid() {
        let mut issued = issue_key("u1", HashSet::new(), RateLimits {
            requests_per_minute: 1,
            requests_per_day: 1,
            tokens_per_minute: 1,
            tokens_per_day: 1,
        });
        issued.record.enabled = false;
        assert!(!issued.record.is_valid_now());
    }

    #[test]
    fn bearer_token_without_prefix_is_rejected() {
        assert!(parse_bearer_token("sk-not-ours").is_none());
    }
}
