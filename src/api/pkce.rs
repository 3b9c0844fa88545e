// Minimal PKCE helper for S256 challenge
use rand::{distributions::Alphanumeric, Rng};
use sha2::{Digest, Sha256};
use base64::{engine::general_purpose, Engine as _};

pub fn generate_code_verifier() -> String {
    random_token(64)
}

/// Opaque value for the OAuth `state` parameter.
pub fn generate_state() -> String {
    random_token(24)
}

fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

pub fn code_challenge_s256(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    general_purpose::URL_SAFE_NO_PAD.encode(hash)
}
