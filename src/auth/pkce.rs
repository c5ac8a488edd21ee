use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use rand::Rng;
use sha2::{Digest, Sha256};

const STATE_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const STATE_LENGTH: usize = 16;

/// 32 random bytes, base64url without padding (43 characters).
pub fn generate_code_verifier() -> String {
    let random_bytes: [u8; 32] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(random_bytes)
}

/// `BASE64URL(SHA256(verifier))`, used with `code_challenge_method=S256`.
pub fn generate_code_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// 16 letters drawn from `[a-zA-Z]`, then base64 encoded (24 characters, padded).
pub fn generate_state() -> String {
    let mut rng = rand::rng();
    let letters: Vec<u8> = (0..STATE_LENGTH)
        .map(|_| STATE_CHARSET[rng.random_range(0..STATE_CHARSET.len())])
        .collect();
    URL_SAFE.encode(letters)
}
