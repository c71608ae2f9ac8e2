use primitives::hash::{H256, H32};
use sha2::{Digest, Sha256};

/// SHA-256
#[inline]
pub fn sha256(input: &[u8]) -> H256 {
    let mut result = H256::default();
    result.copy_from_slice(&Sha256::digest(input));
    result
}

/// Data checksum: first 4 bytes of SHA-256
#[inline]
pub fn checksum(data: &[u8]) -> H32 {
    let mut result = H32::default();
    result.copy_from_slice(&sha256(data)[0..4]);
    result
}

#[cfg(test)]
mod tests {
    use super::sha256;
    use primitives::hash::H256;

    #[test]
    fn test_sha256() {
        let expected: H256 =
            "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08".into();
        assert_eq!(sha256(b"test"), expected);
    }
}
