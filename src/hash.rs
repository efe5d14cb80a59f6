//! Hash primitives behind the term encoding and the Merkle tree.
//!
//! Three primitives are exposed, matching what the circuit library provides:
//! `string_hash(bytes)`, `hash2([a, b])` and `hash4([a, b, c, d])`. Field
//! inputs are serialized as 32-byte little-endian limbs and the digest is
//! reduced modulo the field order. The suite is chosen per deployment;
//! switching it invalidates every existing commitment.

use blake2::{Blake2s256, Digest};
use serde::{Deserialize, Serialize};

use crate::field::Field;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashSuite {
    /// BLAKE3 for strings, BLAKE2s for field combination (Noir's `hash_to_field`).
    #[default]
    Blake2s,
    /// BLAKE3 for both strings and field combination.
    Blake3,
}

impl HashSuite {
    pub fn name(self) -> &'static str {
        match self {
            HashSuite::Blake2s => "blake2s",
            HashSuite::Blake3 => "blake3",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Hasher {
    suite: HashSuite,
}

impl Hasher {
    pub fn new(suite: HashSuite) -> Self {
        Self { suite }
    }

    pub fn suite(&self) -> HashSuite {
        self.suite
    }

    pub fn string_hash(&self, bytes: &[u8]) -> Field {
        let digest = blake3::hash(bytes);
        Field::from_le_bytes_mod_order(digest.as_bytes())
    }

    pub fn hash_str(&self, s: &str) -> Field {
        self.string_hash(s.as_bytes())
    }

    pub fn hash2(&self, inputs: [&Field; 2]) -> Field {
        self.combine(&inputs)
    }

    pub fn hash4(&self, inputs: [&Field; 4]) -> Field {
        self.combine(&inputs)
    }

    fn combine(&self, inputs: &[&Field]) -> Field {
        let mut data = Vec::with_capacity(inputs.len() * 32);
        for f in inputs {
            data.extend_from_slice(&f.to_le_bytes());
        }
        match self.suite {
            HashSuite::Blake2s => {
                let mut hasher = Blake2s256::new();
                hasher.update(&data);
                Field::from_le_bytes_mod_order(&hasher.finalize())
            }
            HashSuite::Blake3 => Field::from_le_bytes_mod_order(blake3::hash(&data).as_bytes()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suites_agree_on_strings_but_not_combination() {
        let a = Hasher::new(HashSuite::Blake2s);
        let b = Hasher::new(HashSuite::Blake3);
        assert_eq!(a.hash_str("x"), b.hash_str("x"));
        let one = Field::from_u64(1);
        let two = Field::from_u64(2);
        assert_ne!(a.hash2([&one, &two]), b.hash2([&one, &two]));
    }

    #[test]
    fn combination_is_order_sensitive() {
        let h = Hasher::default();
        let one = Field::from_u64(1);
        let two = Field::from_u64(2);
        assert_ne!(h.hash2([&one, &two]), h.hash2([&two, &one]));
    }
}
