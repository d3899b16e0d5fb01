use alloy_primitives::{Address, Signature, SignatureError};
use x402_types::proto::{PaymentAuthorization, TokenExtra};

use crate::types::authorization_digest;

#[derive(Debug, thiserror::Error)]
pub enum RecoverError {
    #[error("Signature must be 64 or 65 bytes, got {0}")]
    InvalidLength(usize),
    #[error("Malformed signature: {0}")]
    Malformed(#[from] SignatureError),
}

/// Parses a 65-byte `r || s || v` or a 64-byte EIP-2098 compact signature.
///
/// High-s signatures are normalized, so both encodings of the same signature recover
/// the same address.
pub fn parse_signature(bytes: &[u8]) -> Result<Signature, RecoverError> {
    let signature = match bytes.len() {
        65 => Signature::from_raw(bytes)?,
        64 => Signature::from_erc2098(bytes),
        other => return Err(RecoverError::InvalidLength(other)),
    };
    Ok(signature.normalized_s())
}

/// Recovers the address that signed `authorization`.
///
/// The caller compares the result with `authorization.from`; a signature over any other
/// terms recovers some unrelated address rather than failing.
pub fn recover_address(
    authorization: &PaymentAuthorization,
    extra: &TokenExtra,
) -> Result<Address, RecoverError> {
    let signature = parse_signature(&authorization.signature)?;
    let digest = authorization_digest(authorization, extra);
    Ok(signature.recover_address_from_prehash(&digest)?)
}
