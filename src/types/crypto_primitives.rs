/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Cryptographic primitives.
//!
//! The definitions and re-exports in this module provide two categories of cryptographic primitives:
//! 1. **Cryptographic Hashes**: provided by the [`sha2`] crate. Vertex ids and vote digests are SHA-256
//!    hashes over Borsh-serialized values.
//! 2. **Digital Signatures**: provided by the [`ed25519_dalek`] crate. Replicas sign digests and verify
//!    each other's signatures on digests.

use borsh::BorshSerialize;

use super::basic::{CryptoHash, SignatureBytes};

// re-exports below.
pub use sha2::Digest;
pub use sha2::Sha256 as CryptoHasher;

pub use ed25519_dalek::{Signature, SignatureError, Signer, SigningKey, Verifier, VerifyingKey};

/// Internal type used for serializing and deserializing values of type [`VerifyingKey`].
pub type VerifyingKeyBytes = [u8; 32];

/// A facade around [`SigningKey`] that implements a method for [`sign`](Self::sign)-ing digests as well
/// as a getter for the [`public`](Self::public) key associated with the signing key.
#[derive(Clone)]
pub struct Keypair(SigningKey);

impl Keypair {
    /// Create a `Keypair` that wraps over `signing_key`.
    pub fn new(signing_key: SigningKey) -> Keypair {
        Keypair(signing_key)
    }

    /// Sign a `digest` with the `Keypair`.
    pub fn sign(&self, digest: &CryptoHash) -> SignatureBytes {
        SignatureBytes::new(self.0.sign(&digest.bytes()).to_bytes())
    }

    /// Get the `VerifyingKey` of this `Keypair`.
    pub fn public(&self) -> VerifyingKey {
        self.0.verifying_key()
    }
}

/// Check that `signature` is `signer`'s signature over `digest`.
pub fn verify(signer: &VerifyingKey, digest: &CryptoHash, signature: &SignatureBytes) -> bool {
    let signature = Signature::from_bytes(&signature.bytes());
    signer.verify(&digest.bytes(), &signature).is_ok()
}

/// SHA-256 digest of the Borsh encoding of `value`.
pub(crate) fn hash_of<T: BorshSerialize>(value: &T) -> CryptoHash {
    let mut hasher = CryptoHasher::new();
    // Serializing into a `Vec` only fails if the value's own `serialize` implementation fails, which none
    // of the types in this crate do.
    let bytes = value.try_to_vec().unwrap_or_default();
    hasher.update(&bytes);
    CryptoHash::new(hasher.finalize().into())
}
