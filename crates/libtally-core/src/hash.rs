use rand::Rng;
use sha2::{Digest, Sha256};

/// Length of an author id in hex characters
pub const AUTHOR_ID_LEN: usize = 64;

/// Stable, shareable author identifier: SHA-256 over the salt followed by the
/// trimmed, lower-cased email. The raw email never leaves the machine through
/// this value.
pub fn author_id(salt: &str, email: &str) -> String {
    let normalized = email.trim().to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

/// Fresh random salt for a new installation (32 hex chars)
pub fn generate_salt() -> String {
    let bytes: [u8; 16] = rand::thread_rng().gen();
    hex::encode(bytes)
}

/// Collapse a commit message to one line.
pub fn sanitize_message(message: &str) -> String {
    message
        .split(['\r', '\n'])
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
