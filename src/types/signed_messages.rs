/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Trait for messages that carry a signature over a digest of their contents.

use super::{
    basic::{CryptoHash, SignatureBytes},
    crypto_primitives::{verify, VerifyingKey},
};

/// A message whose sender signs a digest of its contents. Implementors only need to say what the digest is
/// and which signature they carry; checking the signature is provided.
pub trait SignedMessage {
    /// The digest that the signature is over.
    fn message_digest(&self) -> CryptoHash;

    fn signature_bytes(&self) -> SignatureBytes;

    /// Checks whether the signature is `verifying_key`'s signature over the message digest.
    fn is_correct(&self, verifying_key: &VerifyingKey) -> bool {
        verify(verifying_key, &self.message_digest(), &self.signature_bytes())
    }
}
