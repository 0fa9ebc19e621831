//! Content hashing

/// Compute the BLAKE3 digest of `content`.
pub fn digest(content: &[u8]) -> [u8; 32] {
    *blake3::hash(content).as_bytes()
}
