use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Reference to audio (or image) bytes held by the pinning service.
///
/// The ledger only stores and echoes this value. The local pinner derives it
/// from the content with blake3, remote pinners may hand out anything else.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(blake3::hash(bytes).to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::ContentHash;

    #[test]
    fn same_bytes_give_same_hash() {
        let a = ContentHash::from_bytes(b"drum loop");
        let b = ContentHash::from_bytes(b"drum loop");
        let c = ContentHash::from_bytes(b"bass line");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 64);
    }
}
