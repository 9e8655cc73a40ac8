//! The crypto port (spec §6) and a `blake3`-backed reference implementation.

use subtle::ConstantTimeEq;

/// `hash`/`hmac`/`constantTimeEqual`, abstracted so the core never hardcodes
/// a specific hash library (spec §6 "Crypto port").
pub trait Crypto {
    /// Hashes `data` with `algorithm`, returning lowercase hex.
    fn hash(&self, algorithm: &str, data: &[u8]) -> crate::error::Result<String>;
    /// Keyed hash (HMAC or equivalent) of `data` under `key`.
    fn hmac(&self, algorithm: &str, key: &[u8], data: &[u8]) -> crate::error::Result<Vec<u8>>;
    /// Constant-time byte comparison, to avoid timing side channels on
    /// anything derived from a secret (receipts, signatures).
    fn constant_time_equal(&self, a: &[u8], b: &[u8]) -> bool;
}

/// Reference `Crypto` implementation over the `blake3` crate. `hash` and
/// `hmac` only recognize `"blake3"`; any other algorithm name is a
/// [`crate::error::GraphError::Codec`] error, not a panic.
#[derive(Clone, Copy, Debug, Default)]
pub struct Blake3Crypto;

impl Crypto for Blake3Crypto {
    fn hash(&self, algorithm: &str, data: &[u8]) -> crate::error::Result<String> {
        match algorithm {
            "blake3" => Ok(blake3::hash(data).to_hex().to_string()),
            other => Err(crate::error::GraphError::Codec {
                message: format!("unsupported hash algorithm `{other}`"),
            }),
        }
    }

    fn hmac(&self, algorithm: &str, key: &[u8], data: &[u8]) -> crate::error::Result<Vec<u8>> {
        match algorithm {
            "blake3" => {
                let mut key_bytes = [0u8; 32];
                let len = key.len().min(32);
                key_bytes[..len].copy_from_slice(&key[..len]);
                let keyed = blake3::keyed_hash(&key_bytes, data);
                Ok(keyed.as_bytes().to_vec())
            }
            other => Err(crate::error::GraphError::Codec {
                message: format!("unsupported hmac algorithm `{other}`"),
            }),
        }
    }

    fn constant_time_equal(&self, a: &[u8], b: &[u8]) -> bool {
        if a.len() != b.len() {
            return false;
        }
        a.ct_eq(b).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        let c = Blake3Crypto;
        assert_eq!(c.hash("blake3", b"x").unwrap(), c.hash("blake3", b"x").unwrap());
    }

    #[test]
    fn unknown_algorithm_is_a_codec_error() {
        let c = Blake3Crypto;
        assert!(c.hash("sha256", b"x").is_err());
    }

    #[test]
    fn constant_time_equal_rejects_different_lengths() {
        let c = Blake3Crypto;
        assert!(!c.constant_time_equal(b"abc", b"ab"));
        assert!(c.constant_time_equal(b"abc", b"abc"));
        assert!(!c.constant_time_equal(b"abc", b"abd"));
    }
}
