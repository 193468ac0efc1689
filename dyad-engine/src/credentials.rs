//! CredentialService (C2): an LRU+TTL cache in front of a `SecretsProvider`.
//!
//! Shaped after `InMemoryCache` in the teacher's cache module (`Arc<Mutex<LruCache<...>>>`),
//! keyed by secret name instead of request hash, and with an explicit `storedAt`/`ttlMs` pair
//! per entry rather than the cache's own eviction clock.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use tracing::warn;

use crate::error::SecretsError;
use crate::secrets::SecretsProvider;

struct CachedSecret {
    value: Vec<u8>,
    stored_at: Instant,
    ttl: Duration,
}

impl CachedSecret {
    fn is_expired(&self) -> bool {
        self.stored_at.elapsed() >= self.ttl
    }
}

pub struct CredentialService {
    backend: std::sync::Arc<dyn SecretsProvider>,
    cache: Mutex<LruCache<String, CachedSecret>>,
    default_ttl: Duration,
    allow_env_fallback: bool,
}

impl CredentialService {
    pub fn new(
        backend: std::sync::Arc<dyn SecretsProvider>,
        cache_size: usize,
        default_ttl: Duration,
        allow_env_fallback: bool,
    ) -> Self {
        Self {
            backend,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(cache_size.max(1)).unwrap(),
            )),
            default_ttl,
            allow_env_fallback,
        }
    }

    /// Fetch a secret by its logical name, serving from the LRU cache when unexpired.
    ///
    /// Falls back to `PROVIDER_<UPPER(PROVIDER_ID)>_<UPPER(KEY)>` only when the backend
    /// reports `Unavailable` and fallback is explicitly enabled — never on `NotFound`.
    pub async fn get(
        &self,
        name: &str,
        provider_id: &str,
        key: &str,
    ) -> Result<Vec<u8>, SecretsError> {
        if let Some(cached) = self.cache.lock().unwrap().get(name) {
            if !cached.is_expired() {
                return Ok(cached.value.clone());
            }
        }

        match self.backend.get(name).await {
            Ok(value) => {
                self.cache.lock().unwrap().put(
                    name.to_string(),
                    CachedSecret {
                        value: value.clone(),
                        stored_at: Instant::now(),
                        ttl: self.default_ttl,
                    },
                );
                Ok(value)
            }
            Err(SecretsError::Unavailable) if self.allow_env_fallback => {
                let env_name = format!(
                    "PROVIDER_{}_{}",
                    provider_id.to_uppercase().replace('-', "_"),
                    key.to_uppercase().replace('-', "_")
                );
                match std::env::var(&env_name) {
                    Ok(value) => {
                        warn!(secret = name, env = env_name, "secrets backend unavailable, using environment fallback");
                        Ok(value.into_bytes())
                    }
                    Err(_) => Err(SecretsError::Unavailable),
                }
            }
            Err(other) => Err(other),
        }
    }

    /// Store a new value and purge the cache entry BEFORE returning success, so no caller can
    /// observe a stale cached value after this call completes.
    pub async fn store(&self, name: &str, value: Vec<u8>) -> Result<u64, SecretsError> {
        self.cache.lock().unwrap().pop(name);
        self.backend.set(name, value).await
    }

    pub async fn rotate(&self, name: &str, value: Vec<u8>) -> Result<u64, SecretsError> {
        self.cache.lock().unwrap().pop(name);
        self.backend.rotate(name, value).await
    }
}
