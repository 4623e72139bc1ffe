//! HMAC signing and constant-time verification of offer/answer session
//! descriptions exchanged through the rendezvous service.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{Result, TunnelError};

type HmacSha256 = Hmac<Sha256>;

/// Length in bytes of a v1 tunnel secret.
pub const SECRET_LEN_V1: usize = 32;

/// Signs `message` (a marshalled session description) with `secret`,
/// returning the raw signature bytes.
///
/// # Panics
///
/// Never panics: HMAC accepts keys of any length.
#[must_use]
pub fn sign_offer(message: &[u8], secret: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

/// Verifies that `signature` is the HMAC-SHA256 of `message` under
/// `secret`, in constant time with respect to the signature length.
#[must_use]
pub fn verify_offer_signature(message: &[u8], secret: &[u8], signature: &[u8]) -> bool {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(message);
    mac.verify_slice(signature).is_ok()
}

/// Base64-encodes `bytes` for transport over the rendezvous HTTP API.
#[must_use]
pub fn encode(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Base64-decodes a rendezvous payload field.
pub fn decode(encoded: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(encoded)
        .map_err(|err| TunnelError::SessionDescription(err.to_string()))
}
