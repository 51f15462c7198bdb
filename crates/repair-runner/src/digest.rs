use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// Length of the digest prefix used in run directory names.
pub const RUN_HASH_PREFIX_LEN: usize = 8;

/// Hex digest identifying one tool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hex::encode(hasher.finalize()))
    }

    /// Digest of the compact JSON encoding. Object keys serialize in sorted
    /// order, so equal values always hash equally.
    pub fn of_json(value: &Value) -> Self {
        Self::of_bytes(value.to_string().as_bytes())
    }

    pub fn from_hex(hex_digest: &str) -> Result<Self, String> {
        let lowered = hex_digest.trim().to_ascii_lowercase();
        if lowered.len() < RUN_HASH_PREFIX_LEN {
            return Err(format!(
                "digest must have at least {} hex chars: {:?}",
                RUN_HASH_PREFIX_LEN, hex_digest
            ));
        }
        if !lowered.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!("digest is not hex: {:?}", hex_digest));
        }
        Ok(Self(lowered))
    }

    pub fn as_hex(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        &self.0[..RUN_HASH_PREFIX_LEN]
    }
}

impl TryFrom<String> for ContentHash {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<ContentHash> for String {
    fn from(value: ContentHash) -> Self {
        value.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `{task_identifier}-{hash8}`, the directory name of one tool run under the
/// logs, artifacts and results roots.
pub fn run_dir_name(task_identifier: &str, hash: &ContentHash) -> String {
    format!("{}-{}", task_identifier, hash.short())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn run_dir_name_uses_first_eight_hex_chars() {
        let hash = ContentHash::from_hex("a1b2c3d4e5f60718293a4b5c6d7e8f90").expect("hash");
        assert_eq!(run_dir_name("arja-e", &hash), "arja-e-a1b2c3d4");
    }

    #[test]
    fn json_digest_ignores_key_order() {
        let a = ContentHash::of_json(&json!({"tool": "arja_e", "timeout": 1}));
        let b = ContentHash::of_json(&json!({"timeout": 1, "tool": "arja_e"}));
        let c = ContentHash::of_json(&json!({"timeout": 2, "tool": "arja_e"}));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_hex().len(), 64);
    }

    #[test]
    fn from_hex_rejects_short_or_non_hex() {
        assert!(ContentHash::from_hex("abc").is_err());
        assert!(ContentHash::from_hex("zzzzzzzzzz").is_err());
        assert_eq!(
            ContentHash::from_hex("A1B2C3D4FF").expect("upper").as_hex(),
            "a1b2c3d4ff"
        );
    }
}
