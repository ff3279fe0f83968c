//! Operator signatures over result hashes
//!
//! Recoverable secp256k1 ECDSA: a signature is 65 bytes, `r || s || v`, and
//! is checked by recovering the signer's key from the prehash and comparing
//! it with the claimed public key.

use crate::{Error, Result};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};

/// Length of a serialized signature
pub const SIGNATURE_SIZE: usize = 65;

/// Sign a 32-byte hash
pub fn sign(hash: &[u8], key: &SigningKey) -> Result<Vec<u8>> {
    let (signature, recovery_id) = key
        .sign_prehash_recoverable(hash)
        .map_err(|e| Error::Signing(e.to_string()))?;

    let mut bytes = Vec::with_capacity(SIGNATURE_SIZE);
    bytes.extend_from_slice(&signature.to_bytes());
    bytes.push(recovery_id.to_byte());
    Ok(bytes)
}

/// Verify that `signature` over `hash` was produced by `public_key`
/// (SEC1-encoded).
pub fn verify(public_key: &[u8], hash: &[u8], signature: &[u8]) -> Result<()> {
    if signature.len() != SIGNATURE_SIZE {
        return Err(Error::VerificationFailed(format!(
            "signature must be {} bytes, got {}",
            SIGNATURE_SIZE,
            signature.len()
        )));
    }

    let expected = VerifyingKey::from_sec1_bytes(public_key)
        .map_err(|e| Error::VerificationFailed(format!("invalid public key: {}", e)))?;
    let parsed = Signature::from_slice(&signature[..64])
        .map_err(|e| Error::VerificationFailed(e.to_string()))?;
    let recovery_id = RecoveryId::from_byte(signature[64])
        .ok_or_else(|| Error::VerificationFailed("invalid recovery id".into()))?;

    let recovered = VerifyingKey::recover_from_prehash(hash, &parsed, recovery_id)
        .map_err(|_| Error::InvalidSignature)?;

    if recovered != expected {
        return Err(Error::InvalidSignature);
    }
    Ok(())
}

/// Compressed SEC1 encoding of the key's public half
pub fn public_key_bytes(key: &SigningKey) -> Vec<u8> {
    key.verifying_key().to_encoded_point(true).as_bytes().to_vec()
}
