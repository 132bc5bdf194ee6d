use sha3::{Digest, Sha3_256};

/// Computes SHA3-256 hash of byte data as lowercase hex
pub fn compute_sha3_256(data: &[u8]) -> String {
    let mut hasher = Sha3_256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_sha3_256() {
        let hash = compute_sha3_256(b"");
        assert_eq!(
            hash,
            "a7ffc6f8bf1ed76651c14756a061d662f580ff4de43b49fa82d80a4b80f8434a"
        );

        let other = compute_sha3_256(b"test content");
        assert_eq!(other.len(), 64);
        assert_ne!(hash, other);
    }
}
