//! Content hashing

use sha2::{Digest, Sha256};

/// SHA-256 of `data`, lowercase hex
pub fn sha256_hex(data: impl AsRef<[u8]>) -> String {
    let digest = Sha256::digest(data.as_ref());
    hex::encode(digest)
}
