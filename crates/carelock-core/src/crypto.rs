//! Cryptographic primitives for the audit ledger.
//!
//! Ledger entries are chained with Blake3 and every audit record is signed
//! by the recorder's Ed25519 key, so a persisted ledger can be checked for
//! deletion, reordering and field edits without trusting the database.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;

/// A 32-byte Blake3 digest used to link ledger entries.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LedgerHash(pub [u8; 32]);

impl LedgerHash {
    /// Hash the given bytes.
    pub fn hash(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Hash with a domain separator so ledger digests never collide with
    /// digests computed for other purposes over the same bytes.
    pub fn hash_domain(domain: &[u8], data: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(domain);
        hasher.update(data);
        Self(*hasher.finalize().as_bytes())
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Genesis link of every principal's chain.
    pub const GENESIS: Self = Self([0u8; 32]);
}

impl fmt::Debug for LedgerHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LedgerHash({})", &self.to_hex()[..16])
    }
}

impl TryFrom<&[u8]> for LedgerHash {
    type Error = CoreError;

    fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; 32] = slice
            .try_into()
            .map_err(|_| CoreError::Malformed("ledger hash must be 32 bytes".into()))?;
        Ok(Self(arr))
    }
}

/// Public half of the recorder key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecorderPublicKey(pub [u8; 32]);

impl RecorderPublicKey {
    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Verify a recorder signature over a message.
    pub fn verify(&self, message: &[u8], signature: &RecorderSignature) -> Result<(), CoreError> {
        let verifying_key =
            VerifyingKey::from_bytes(&self.0).map_err(|_| CoreError::InvalidPublicKey)?;
        verifying_key
            .verify(message, &Signature::from_bytes(&signature.0))
            .map_err(|_| CoreError::InvalidSignature)
    }
}

impl fmt::Debug for RecorderPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecorderKey({})", &self.to_hex()[..16])
    }
}

/// A 64-byte Ed25519 signature produced by the recorder.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct RecorderSignature(pub [u8; 64]);

impl RecorderSignature {
    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

impl TryFrom<&[u8]> for RecorderSignature {
    type Error = CoreError;

    fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; 64] = slice
            .try_into()
            .map_err(|_| CoreError::Malformed("signature must be 64 bytes".into()))?;
        Ok(Self(arr))
    }
}

impl fmt::Debug for RecorderSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecorderSig({}...)", &hex::encode(self.0)[..16])
    }
}

// serde has no array impls past 32 elements, so signatures travel as byte strings.
impl Serialize for RecorderSignature {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for RecorderSignature {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes: Vec<u8> = serde::Deserialize::deserialize(deserializer)?;
        RecorderSignature::try_from(bytes.as_slice()).map_err(serde::de::Error::custom)
    }
}

/// Signing key held by the audit recorder.
#[derive(Clone)]
pub struct RecorderKeypair {
    signing_key: SigningKey,
}

impl RecorderKeypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            signing_key: SigningKey::generate(&mut rng),
        }
    }

    /// Create from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Get the public key.
    pub fn public_key(&self) -> RecorderPublicKey {
        RecorderPublicKey(self.signing_key.verifying_key().to_bytes())
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> RecorderSignature {
        RecorderSignature(self.signing_key.sign(message).to_bytes())
    }
}

impl fmt::Debug for RecorderKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecorderKeypair({:?})", self.public_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify() {
        let keypair = RecorderKeypair::generate();
        let signature = keypair.sign(b"decision");

        keypair
            .public_key()
            .verify(b"decision", &signature)
            .expect("valid signature should verify");
        assert!(keypair.public_key().verify(b"decisioN", &signature).is_err());
    }

    #[test]
    fn test_seeded_keypair_is_deterministic() {
        let a = RecorderKeypair::from_seed(&[7u8; 32]);
        let b = RecorderKeypair::from_seed(&[7u8; 32]);
        assert_eq!(a.public_key(), b.public_key());
    }

    #[test]
    fn test_domain_separation() {
        assert_ne!(
            LedgerHash::hash(b"entry"),
            LedgerHash::hash_domain(b"carelock-ledger-v0:", b"entry")
        );
    }

    #[test]
    fn test_signature_serde_roundtrip() {
        let signature = RecorderKeypair::from_seed(&[1u8; 32]).sign(b"x");
        let json = serde_json::to_string(&signature).unwrap();
        let back: RecorderSignature = serde_json::from_str(&json).unwrap();
        assert_eq!(signature, back);
    }
}
