//! Salted SHA-1 password hashes: `{SSHA}` followed by base64(SHA1(password + salt) + salt).

use base64::{Engine, engine::general_purpose::STANDARD};
use rand::RngCore;
use sha1::{Digest, Sha1};

pub const SSHA_PREFIX: &str = "{SSHA}";
pub const DEFAULT_SALT_LENGTH: usize = 8;
const DIGEST_LENGTH: usize = 20;

/// A stored hash that cannot be checked at all, as opposed to a wrong password.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum SshaError {
    #[error("hash must start with {{SSHA}}")]
    WrongPrefix,
    #[error("invalid base64 in hash: `{0}`")]
    Base64(#[from] base64::DecodeError),
    #[error("no salt in hash")]
    MissingSalt,
}

pub fn encode_password(password: &str, salt: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(password.as_bytes());
    hasher.update(salt);
    let mut raw = hasher.finalize().to_vec();
    raw.extend_from_slice(salt);
    format!("{SSHA_PREFIX}{}", STANDARD.encode(raw))
}

pub fn generate_salt() -> Vec<u8> {
    let mut salt = vec![0u8; DEFAULT_SALT_LENGTH];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

pub fn hash_password(password: &str) -> String {
    encode_password(password, &generate_salt())
}

/// Returns `Ok(false)` on a password mismatch, and an error if the hash is malformed.
pub fn validate_password(password: &str, hash: &str) -> Result<bool, SshaError> {
    let encoded = hash.strip_prefix(SSHA_PREFIX).ok_or(SshaError::WrongPrefix)?;
    let decoded = STANDARD.decode(encoded)?;
    if decoded.len() <= DIGEST_LENGTH {
        return Err(SshaError::MissingSalt);
    }
    Ok(encode_password(password, &decoded[DIGEST_LENGTH..]) == hash)
}
