//! Credential Service
//!
//! Issues and verifies the two credential tiers:
//!
//! - admin tier: `admin-myc_` followed by 32 base62 characters
//! - worker tier: `sk-myc_` followed by 32 base62 characters
//!
//! Credentials are drawn from the OS CSPRNG, shown to the caller once, and
//! persisted only as an Argon2id PHC string plus a short lookup prefix (the
//! first 12 hex characters of the credential's SHA-256 digest). The prefix
//! narrows verification to a handful of candidates without a table scan.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2, Params, Version,
};
use mycelio_types::CredentialTier;
use rand::Rng;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::config::HashConfig;
use crate::error::{AuthError, AuthResult};

/// Number of random characters after the tier prefix
pub const KEY_BODY_LEN: usize = 32;

/// Hex characters of SHA-256 kept as the lookup prefix
pub const LOOKUP_PREFIX_LEN: usize = 12;

const BASE62: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// A freshly issued credential with its stored material
pub struct IssuedKey {
    /// The plaintext credential; returned to the caller once, wiped on drop
    pub credential: Zeroizing<String>,
    /// Argon2id PHC string
    pub hash: String,
    /// Lookup prefix
    pub prefix: String,
}

impl std::fmt::Debug for IssuedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedKey")
            .field("credential", &"[REDACTED]")
            .field("prefix", &self.prefix)
            .finish()
    }
}

/// Credential hashing and verification
#[derive(Clone)]
pub struct CredentialService {
    config: HashConfig,
    params: Params,
    /// Reference hash verified against when no candidate matches
    dummy_hash: String,
}

impl CredentialService {
    /// Create a credential service, validating the Argon2 parameters
    pub fn new(config: HashConfig) -> AuthResult<Self> {
        let params = Params::new(
            config.memory_cost,
            config.time_cost,
            config.parallelism,
            Some(config.hash_length as usize),
        )
        .map_err(|e| AuthError::Config(format!("Invalid Argon2 params: {}", e)))?;

        let mut service = Self {
            config,
            params,
            dummy_hash: String::new(),
        };
        let reference = Self::generate(CredentialTier::Worker);
        service.dummy_hash = service.hash(&reference)?;
        Ok(service)
    }

    /// Generate a new random credential for a tier
    pub fn generate(tier: CredentialTier) -> Zeroizing<String> {
        let mut rng = rand::rngs::OsRng;
        let mut credential = String::with_capacity(tier.key_prefix().len() + KEY_BODY_LEN);
        credential.push_str(tier.key_prefix());
        for _ in 0..KEY_BODY_LEN {
            credential.push(BASE62[rng.gen_range(0..BASE62.len())] as char);
        }
        Zeroizing::new(credential)
    }

    /// Recognise a well-formed credential and its tier
    pub fn parse_tier(credential: &str) -> Option<CredentialTier> {
        let tier = CredentialTier::from_credential(credential)?;
        let body = &credential[tier.key_prefix().len()..];
        let well_formed =
            body.len() == KEY_BODY_LEN && body.bytes().all(|b| b.is_ascii_alphanumeric());
        well_formed.then_some(tier)
    }

    /// Lookup prefix: first 12 hex chars of SHA-256 of the full credential
    pub fn lookup_prefix(credential: &str) -> String {
        let digest = Sha256::digest(credential.as_bytes());
        let mut prefix = hex::encode(digest);
        prefix.truncate(LOOKUP_PREFIX_LEN);
        prefix
    }

    fn peppered(&self, credential: &str) -> Zeroizing<String> {
        match self.config.pepper {
            Some(ref pepper) => Zeroizing::new(format!("{}{}", credential, pepper)),
            None => Zeroizing::new(credential.to_string()),
        }
    }

    /// Hash a credential using Argon2id with a fresh salt
    pub fn hash(&self, credential: &str) -> AuthResult<String> {
        let salt = SaltString::generate(&mut OsRng);
        let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, self.params.clone());

        let hash = argon2
            .hash_password(self.peppered(credential).as_bytes(), &salt)
            .map_err(|_| AuthError::HashingFailed)?;

        Ok(hash.to_string())
    }

    /// Verify a credential against a stored hash
    ///
    /// The comparison inside the verifier is constant-time.
    pub fn verify(&self, credential: &str, hash: &str) -> AuthResult<bool> {
        let parsed = PasswordHash::new(hash).map_err(|_| AuthError::HashingFailed)?;

        match Argon2::default().verify_password(self.peppered(credential).as_bytes(), &parsed) {
            Ok(_) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(_) => Err(AuthError::HashingFailed),
        }
    }

    /// Burn one verification's worth of work against the reference hash
    pub fn dummy_verify(&self, credential: &str) {
        let _ = self.verify(credential, &self.dummy_hash);
    }

    /// Generate, hash and index a new credential
    pub fn issue(&self, tier: CredentialTier) -> AuthResult<IssuedKey> {
        let credential = Self::generate(tier);
        let hash = self.hash(&credential)?;
        let prefix = Self::lookup_prefix(&credential);
        Ok(IssuedKey {
            credential,
            hash,
            prefix,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> CredentialService {
        CredentialService::new(HashConfig::fast()).unwrap()
    }

    #[test]
    fn test_generated_format() {
        let admin = CredentialService::generate(CredentialTier::Admin);
        assert!(admin.starts_with("admin-myc_"));
        assert_eq!(admin.len(), "admin-myc_".len() + KEY_BODY_LEN);
        assert_eq!(CredentialService::parse_tier(&admin), Some(CredentialTier::Admin));

        let worker = CredentialService::generate(CredentialTier::Worker);
        assert!(worker.starts_with("sk-myc_"));
        assert_eq!(CredentialService::parse_tier(&worker), Some(CredentialTier::Worker));
    }

    #[test]
    fn test_generated_keys_are_unique() {
        let a = CredentialService::generate(CredentialTier::Worker);
        let b = CredentialService::generate(CredentialTier::Worker);
        assert_ne!(*a, *b);
    }

    #[test]
    fn test_parse_tier_rejects_malformed() {
        assert_eq!(CredentialService::parse_tier("sk-myc_short"), None);
        assert_eq!(
            CredentialService::parse_tier(&format!("sk-myc_{}", "!".repeat(32))),
            None
        );
        assert_eq!(
            CredentialService::parse_tier(&format!("pk-myc_{}", "a".repeat(32))),
            None
        );
    }

    #[test]
    fn test_lookup_prefix_is_stable_hex() {
        let prefix = CredentialService::lookup_prefix("sk-myc_abc");
        assert_eq!(prefix.len(), LOOKUP_PREFIX_LEN);
        assert!(prefix.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(prefix, CredentialService::lookup_prefix("sk-myc_abc"));
        assert_ne!(prefix, CredentialService::lookup_prefix("sk-myc_abd"));
    }

    #[test]
    fn test_hash_and_verify() {
        let service = service();
        let issued = service.issue(CredentialTier::Worker).unwrap();

        assert!(issued.hash.starts_with("$argon2id$"));
        assert!(!issued.hash.contains(issued.credential.as_str()));
        assert!(service.verify(&issued.credential, &issued.hash).unwrap());
        assert!(!service.verify("sk-myc_wrong", &issued.hash).unwrap());
    }

    #[test]
    fn test_pepper_changes_verification() {
        let mut peppered = HashConfig::fast();
        peppered.pepper = Some("server-side".into());
        let with_pepper = CredentialService::new(peppered).unwrap();
        let without = service();

        let hash = with_pepper.hash("sk-myc_value").unwrap();
        assert!(with_pepper.verify("sk-myc_value", &hash).unwrap());
        assert!(!without.verify("sk-myc_value", &hash).unwrap());
    }

    #[test]
    fn test_debug_redacts_credential() {
        let issued = service().issue(CredentialTier::Admin).unwrap();
        let rendered = format!("{:?}", issued);
        assert!(!rendered.contains(issued.credential.as_str()));
    }
}
