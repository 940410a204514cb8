//! Detached payload signatures.
//!
//! A detached signature is a 96-byte blob `[verifying key (32) || signature (64)]`
//! over the payload bytes, so the signer's address can be recovered from the
//! payload and the signature alone.

use crate::types::Address;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use thiserror::Error;

/// Detached signature length: 32-byte verifying key + 64-byte Ed25519 signature.
pub const SIGNATURE_LENGTH: usize = 96;

#[derive(Error, Debug)]
pub enum SignatureError {
    #[error("Invalid signature length: expected {SIGNATURE_LENGTH} bytes, got {0}")]
    InvalidLength(usize),
    #[error("Invalid verifying key in signature")]
    InvalidKey,
    #[error("Signature verification failed")]
    VerificationFailed,
}

/// Sign payload bytes, producing a detached `[pubkey || signature]` blob.
pub fn sign_payload(data: &[u8], key: &SigningKey) -> Vec<u8> {
    let signature = key.sign(data);
    let mut blob = Vec::with_capacity(SIGNATURE_LENGTH);
    blob.extend_from_slice(key.verifying_key().as_bytes());
    blob.extend_from_slice(&signature.to_bytes());
    blob
}

/// Verify a detached signature and recover the signer's address.
pub fn recover_signer(data: &[u8], sig: &[u8]) -> Result<Address, SignatureError> {
    if sig.len() != SIGNATURE_LENGTH {
        return Err(SignatureError::InvalidLength(sig.len()));
    }

    let mut key_bytes = [0u8; 32];
    key_bytes.copy_from_slice(&sig[..32]);
    let verifying_key =
        VerifyingKey::from_bytes(&key_bytes).map_err(|_| SignatureError::InvalidKey)?;

    let mut sig_bytes = [0u8; 64];
    sig_bytes.copy_from_slice(&sig[32..]);
    let signature = Signature::from_bytes(&sig_bytes);

    verifying_key
        .verify(data, &signature)
        .map_err(|_| SignatureError::VerificationFailed)?;

    Ok(Address::from_public_key(&verifying_key))
}
