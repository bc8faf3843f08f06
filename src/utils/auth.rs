//! API token utilities

use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

const TOKEN_LENGTH: usize = 36;

/// hash an api token for storage, tokens are never stored in plain text
pub fn hash_api_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.trim().as_bytes());
    hex::encode(hasher.finalize())
}

/// verify a token against a stored hash using constant-time comparison
pub fn verify_api_token(token: &str, hash: &str) -> bool {
    let computed_hash = hash_api_token(token);
    computed_hash.as_bytes().ct_eq(hash.as_bytes()).into()
}

/// generate a random string of the given length
pub fn generate_random_string(length: usize) -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();

    (0..length)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}

/// issue a new api token for the ingestion endpoints
pub fn generate_api_token() -> String {
    generate_random_string(TOKEN_LENGTH)
}

/// extract the token from `Authorization: Token <t>` (or `Bearer <t>`)
pub fn parse_authorization(header: &str) -> Option<&str> {
    let header = header.trim();
    let token = header
        .strip_prefix("Token ")
        .or_else(|| header.strip_prefix("token "))
        .or_else(|| header.strip_prefix("Bearer "))?
        .trim();

    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}
