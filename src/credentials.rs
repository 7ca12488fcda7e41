//! Portal credential hashing.
//!
//! Customers log into the portal with a password that is stored only as an
//! Argon2id PHC string. Raw passwords are never persisted or logged.

use crate::errors::AppError;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};

pub const DEFAULT_MIN_PASSWORD_LENGTH: usize = 8;
pub const MAX_PASSWORD_LENGTH: usize = 128;

#[derive(Debug, Clone)]
pub struct CredentialHasher {
    params: Params,
    min_length: usize,
}

impl Default for CredentialHasher {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_PASSWORD_LENGTH)
    }
}

impl CredentialHasher {
    /// Hasher with the argon2 crate's recommended Argon2id cost.
    pub fn new(min_length: usize) -> Self {
        Self {
            params: Params::default(),
            min_length,
        }
    }

    /// Hasher with explicit cost parameters (memory in KiB).
    pub fn with_cost(min_length: usize, memory_kib: u32, iterations: u32, parallelism: u32) -> Result<Self, AppError> {
        let params = Params::new(memory_kib, iterations, parallelism, None)
            .map_err(|e| AppError::Internal(format!("Invalid Argon2 parameters: {}", e)))?;
        Ok(Self { params, min_length })
    }

    pub fn min_length(&self) -> usize {
        self.min_length
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    pub fn check_policy(&self, raw: &str) -> Result<(), AppError> {
        let length = raw.chars().count();
        if raw.trim().is_empty() {
            return Err(AppError::Validation("Password is required".to_string()));
        }
        if length < self.min_length {
            return Err(AppError::Validation(format!(
                "Password must be at least {} characters",
                self.min_length
            )));
        }
        if length > MAX_PASSWORD_LENGTH {
            return Err(AppError::Validation(format!(
                "Password must be at most {} characters",
                MAX_PASSWORD_LENGTH
            )));
        }
        Ok(())
    }

    /// Validates `raw` against the policy and returns its PHC hash string.
    pub fn hash(&self, raw: &str) -> Result<String, AppError> {
        self.check_policy(raw)?;

        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(raw.as_bytes(), &salt)
            .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))?;

        Ok(hash.to_string())
    }

    /// Runs [`hash`](Self::hash) on the blocking pool; Argon2 is deliberately slow.
    pub async fn hash_blocking(&self, raw: String) -> Result<String, AppError> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&raw))
            .await
            .map_err(|e| AppError::Internal(format!("Password hashing task failed: {}", e)))?
    }

    pub fn verify(&self, raw: &str, stored_hash: &str) -> Result<bool, AppError> {
        let parsed = PasswordHash::new(stored_hash)
            .map_err(|e| AppError::Internal(format!("Stored credential is malformed: {}", e)))?;

        match self.argon2().verify_password(raw.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(AppError::Internal(format!("Password verification failed: {}", e))),
        }
    }

    pub async fn verify_blocking(&self, raw: String, stored_hash: String) -> Result<bool, AppError> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.verify(&raw, &stored_hash))
            .await
            .map_err(|e| AppError::Internal(format!("Password verification task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_hasher() -> CredentialHasher {
        CredentialHasher::with_cost(8, 8192, 1, 1).unwrap()
    }

    #[test]
    fn test_hash_is_not_plaintext() {
        let hasher = fast_hasher();
        let hash = hasher.hash("secret123").unwrap();

        assert_ne!(hash, "secret123");
        assert!(!hash.contains("secret123"));
        assert!(hash.starts_with("$argon2id$"));
    }

    #[test]
    fn test_verify_roundtrip() {
        let hasher = fast_hasher();
        let hash = hasher.hash("secret123").unwrap();

        assert!(hasher.verify("secret123", &hash).unwrap());
        assert!(!hasher.verify("secret124", &hash).unwrap());
    }

    #[test]
    fn test_salts_differ() {
        let hasher = fast_hasher();
        let a = hasher.hash("secret123").unwrap();
        let b = hasher.hash("secret123").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_policy_rejects_short_and_blank() {
        let hasher = fast_hasher();
        assert!(hasher.hash("short").unwrap_err().is_validation());
        assert!(hasher.hash("          ").unwrap_err().is_validation());
        assert!(hasher.hash(&"x".repeat(MAX_PASSWORD_LENGTH + 1)).unwrap_err().is_validation());
    }

    #[test]
    fn test_malformed_hash_is_internal_error() {
        let hasher = fast_hasher();
        let err = hasher.verify("secret123", "not-a-phc-string").unwrap_err();
        assert_eq!(err.kind(), "internal_error");
    }

    #[tokio::test]
    async fn test_blocking_variants() {
        let hasher = fast_hasher();
        let hash = hasher.hash_blocking("secret123".to_string()).await.unwrap();
        assert!(hasher
            .verify_blocking("secret123".to_string(), hash)
            .await
            .unwrap());
    }
}
