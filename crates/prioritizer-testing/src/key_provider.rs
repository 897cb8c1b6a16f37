//! A [`KeyProvider`] double that always returns a fixed 32-byte key.

use prioritizer_core::error::Result;
use prioritizer_core::store::KeyProvider;

pub struct FixedKeyProvider {
    key: [u8; 32],
}

impl FixedKeyProvider {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }
}

impl Default for FixedKeyProvider {
    fn default() -> Self {
        Self::new([7u8; 32])
    }
}

impl KeyProvider for FixedKeyProvider {
    fn symmetric_key(&self) -> Result<[u8; 32]> {
        Ok(self.key)
    }
}
