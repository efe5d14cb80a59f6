//! Signatures over the dataset root.
//!
//! The root is signed as its 32-byte big-endian representation. The circuit
//! re-verifies the same signature in-program, so the scheme is fixed per
//! deployment just like the hash suite.

use k256::ecdsa::signature::{Signer, Verifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::{Coordinates, ToEncodedPoint};
use k256::PublicKey;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemeKind {
    #[default]
    Secp256k1Ecdsa,
}

pub trait SignatureScheme: Send + Sync {
    fn kind(&self) -> SchemeKind;

    /// Encoded public key matching the signatures produced by [`sign`](Self::sign).
    fn public_key(&self) -> Vec<u8>;

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>>;
}

/// Off-circuit verification for any supported scheme.
pub fn verify(kind: SchemeKind, public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
    match kind {
        SchemeKind::Secp256k1Ecdsa => {
            let Ok(key) = VerifyingKey::from_sec1_bytes(public_key) else {
                return false;
            };
            let Ok(sig) = Signature::from_slice(signature) else {
                return false;
            };
            key.verify(message, &sig).is_ok()
        }
    }
}

/// Affine coordinates of a public key, as the in-circuit verifier takes them.
pub fn public_key_coordinates(kind: SchemeKind, public_key: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
    match kind {
        SchemeKind::Secp256k1Ecdsa => {
            let pk = PublicKey::from_sec1_bytes(public_key)
                .map_err(|e| Error::Signature(format!("invalid public key: {e}")))?;
            let point = pk.to_encoded_point(false);
            match point.coordinates() {
                Coordinates::Uncompressed { x, y } => Ok((x.to_vec(), y.to_vec())),
                _ => Err(Error::Signature("missing coordinates".into())),
            }
        }
    }
}

/// secp256k1 ECDSA: 64-byte `r || s` signatures, SEC1-compressed keys.
pub struct Secp256k1Signer {
    key: SigningKey,
}

impl Secp256k1Signer {
    pub fn from_bytes(secret: &[u8]) -> Result<Self> {
        Ok(Self {
            key: SigningKey::from_slice(secret)?,
        })
    }

    pub fn from_hex(secret: &str) -> Result<Self> {
        Self::from_bytes(&hex::decode(secret.trim().trim_start_matches("0x"))?)
    }

    /// Deterministic key derived from a seed phrase; meant for tests and demos.
    pub fn from_seed(seed: &[u8]) -> Result<Self> {
        Self::from_bytes(blake3::hash(seed).as_bytes())
    }
}

impl SignatureScheme for Secp256k1Signer {
    fn kind(&self) -> SchemeKind {
        SchemeKind::Secp256k1Ecdsa
    }

    fn public_key(&self) -> Vec<u8> {
        self.key
            .verifying_key()
            .to_encoded_point(true)
            .as_bytes()
            .to_vec()
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        let sig: Signature = self.key.try_sign(message)?;
        Ok(sig.to_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signatures_verify_and_reject_tampering() {
        let signer = Secp256k1Signer::from_seed(b"alice").unwrap();
        let pk = signer.public_key();
        assert_eq!(pk.len(), 33);
        let sig = signer.sign(b"root").unwrap();
        assert_eq!(sig.len(), 64);
        assert!(verify(SchemeKind::Secp256k1Ecdsa, &pk, b"root", &sig));
        assert!(!verify(SchemeKind::Secp256k1Ecdsa, &pk, b"r00t", &sig));

        let other = Secp256k1Signer::from_seed(b"mallory").unwrap();
        assert!(!verify(SchemeKind::Secp256k1Ecdsa, &other.public_key(), b"root", &sig));
    }

    #[test]
    fn coordinates_are_32_bytes_each() {
        let signer = Secp256k1Signer::from_seed(b"alice").unwrap();
        let (x, y) = public_key_coordinates(signer.kind(), &signer.public_key()).unwrap();
        assert_eq!((x.len(), y.len()), (32, 32));
    }
}
