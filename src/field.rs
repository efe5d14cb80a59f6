//! BN254 scalar field elements.
//!
//! Every encoded term, Merkle node and hidden input is a `Field`. Values are
//! kept fully reduced, so derived `Eq`/`Ord`/`Hash` compare field elements.
//! The textual form is lowercase `0x`-prefixed hex without leading zeros,
//! which is what the Noir toolchain accepts in `Prover.toml`.

use std::fmt;
use std::sync::OnceLock;

use num_bigint::BigUint;
use num_traits::{Num, ToPrimitive, Zero};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

// BN254 scalar field order (Noir's native `Field`).
const MODULUS_HEX: &str = "30644e72e131a029b85045b68181585d2833e84879b9709143e1f593f0000001";

pub(crate) fn modulus() -> &'static BigUint {
    static P: OnceLock<BigUint> = OnceLock::new();
    P.get_or_init(|| BigUint::from_str_radix(MODULUS_HEX, 16).expect("valid modulus"))
}

fn half_modulus() -> &'static BigUint {
    static H: OnceLock<BigUint> = OnceLock::new();
    H.get_or_init(|| modulus() >> 1)
}

#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Field(BigUint);

impl Field {
    pub fn zero() -> Self {
        Field(BigUint::zero())
    }

    pub fn from_u64(n: u64) -> Self {
        Field(BigUint::from(n) % modulus())
    }

    /// Signed integers wrap: `-n` is encoded as `p - n`.
    pub fn from_i128(n: i128) -> Self {
        let magnitude = BigUint::from(n.unsigned_abs()) % modulus();
        if n < 0 && !magnitude.is_zero() {
            Field(modulus() - magnitude)
        } else {
            Field(magnitude)
        }
    }

    pub fn from_biguint(n: BigUint) -> Self {
        Field(n % modulus())
    }

    pub fn from_le_bytes_mod_order(bytes: &[u8]) -> Self {
        Field::from_biguint(BigUint::from_bytes_le(bytes))
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let digits = s.trim().trim_start_matches("0x");
        if digits.is_empty() {
            return Ok(Field::zero());
        }
        BigUint::from_str_radix(digits, 16)
            .map(Field::from_biguint)
            .map_err(|e| Error::Parse(format!("invalid field element {s:?}: {e}")))
    }

    pub fn to_le_bytes(&self) -> [u8; 32] {
        let mut bytes = self.0.to_bytes_le();
        bytes.resize(32, 0u8);
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes[..32]);
        out
    }

    pub fn to_be_bytes(&self) -> [u8; 32] {
        let mut out = self.to_le_bytes();
        out.reverse();
        out
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", self.0.to_str_radix(16))
    }

    /// Reads the element as a two's-complement style signed integer: values
    /// above `p / 2` are negative. `None` when the magnitude exceeds `i128`.
    pub fn to_signed(&self) -> Option<i128> {
        if &self.0 <= half_modulus() {
            self.0.to_i128()
        } else {
            (modulus() - &self.0).to_i128().map(|m| -m)
        }
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl From<u64> for Field {
    fn from(n: u64) -> Self {
        Field::from_u64(n)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Field({})", self.to_hex())
    }
}

impl Serialize for Field {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Field {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Field::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
