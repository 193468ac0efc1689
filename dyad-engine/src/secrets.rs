//! SecretsProvider (C1): the sole authority over provider credentials.
//!
//! Credentials are never stored on a `Provider` record, only logical names of the shape
//! `dyad-gateway/providers/<providerId>/credentials/<key>`. This breaks the storage/crypto
//! coupling the design notes flag: nothing auto-encrypts on save or decrypts on read, because
//! nothing but `SecretsProvider` ever sees a secret's plaintext.

use std::collections::HashMap;
use std::sync::RwLock;

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use async_trait::async_trait;
use rand::RngCore;

use crate::error::SecretsError;

#[async_trait]
pub trait SecretsProvider: Send + Sync {
    async fn get(&self, name: &str) -> Result<Vec<u8>, SecretsError>;
    async fn set(&self, name: &str, value: Vec<u8>) -> Result<u64, SecretsError>;
    async fn delete(&self, name: &str) -> Result<(), SecretsError>;
    /// Returns the new version number.
    async fn rotate(&self, name: &str, value: Vec<u8>) -> Result<u64, SecretsError>;
    fn encrypt(&self, plaintext: &[u8], key_id: &str) -> Result<Vec<u8>, SecretsError>;
    fn decrypt(&self, ciphertext: &[u8], key_id: &str) -> Result<Vec<u8>, SecretsError>;
}

struct VersionedSecret {
    value: Vec<u8>,
    version: u64,
}

/// In-process development store. Plaintext held in memory only, never written to disk.
///
/// Construction fails when `production` is true: a real deployment must supply a
/// `SecretsProvider` backed by an external KMS/secrets manager, this store exists only to
/// make the gateway runnable without one in dev/test.
pub struct InMemorySecretsProvider {
    entries: RwLock<HashMap<String, VersionedSecret>>,
    encryption_keys: RwLock<HashMap<String, [u8; 32]>>,
}

impl InMemorySecretsProvider {
    pub fn new(production: bool) -> Result<Self, SecretsError> {
        if production {
            return Err(SecretsError::Unavailable);
        }
        Ok(Self {
            entries: RwLock::new(HashMap::new()),
            encryption_keys: RwLock::new(HashMap::new()),
        })
    }

    fn key_for(&self, key_id: &str) -> [u8; 32] {
        let mut keys = self.encryption_keys.write().unwrap();
        *keys.entry(key_id.to_string()).or_insert_with(|| {
            let mut k = [0u8; 32];
            rand::thread_rng().fill_bytes(&mut k);
            k
        })
    }
}

#[async_trait]
impl SecretsProvider for InMemorySecretsProvider {
    async fn get(&self, name: &str) -> Result<Vec<u8>, SecretsError> {
        self.entries
            .read()
            .unwrap()
            .get(name)
            .map(|e| e.value.clone())
            .ok_or_else(|| SecretsError::NotFound(name.to_string()))
    }

    async fn set(&self, name: &str, value: Vec<u8>) -> Result<u64, SecretsError> {
        let mut entries = self.entries.write().unwrap();
        let version = entries.get(name).map(|e| e.version + 1).unwrap_or(1);
        entries.insert(name.to_string(), VersionedSecret { value, version });
        Ok(version)
    }

    async fn delete(&self, name: &str) -> Result<(), SecretsError> {
        self.entries.write().unwrap().remove(name);
        Ok(())
    }

    async fn rotate(&self, name: &str, value: Vec<u8>) -> Result<u64, SecretsError> {
        self.set(name, value).await
    }

    /// AES-256-GCM, explicit random 96-bit nonce prepended to the ciphertext, authenticated
    /// tag included. Per spec §9, this deliberately does not reproduce the source's
    /// deprecated-cipher/CBC construction.
    fn encrypt(&self, plaintext: &[u8], key_id: &str) -> Result<Vec<u8>, SecretsError> {
        let key_bytes = self.key_for(key_id);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
        let mut nonce_bytes = [0u8; 12];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ct = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| SecretsError::IntegrityFailure(key_id.to_string()))?;
        let mut out = Vec::with_capacity(12 + ct.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ct);
        Ok(out)
    }

    fn decrypt(&self, ciphertext: &[u8], key_id: &str) -> Result<Vec<u8>, SecretsError> {
        if ciphertext.len() < 12 {
            return Err(SecretsError::IntegrityFailure(key_id.to_string()));
        }
        let (nonce_bytes, ct) = ciphertext.split_at(12);
        let key_bytes = self.key_for(key_id);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ct)
            .map_err(|_| SecretsError::IntegrityFailure(key_id.to_string()))
    }
}

/// Build the logical secret name for a provider credential.
pub fn provider_credential_name(provider_id: &str, key: &str) -> String {
    format!("dyad-gateway/providers/{provider_id}/credentials/{key}")
}
