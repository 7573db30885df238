use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ed25519_dalek::{Signature, VerifyingKey, PUBLIC_KEY_LENGTH};
use sha2::{Digest, Sha512};
use std::path::Path;

use super::verify::stream_into;
use crate::error::{DepotError, Result};

/// Checks detached artifact signatures
#[async_trait]
pub trait SignatureVerifier: Send + Sync {
    /// Whether `signature` is valid for the file at `path` under the key at `public_key_url`
    async fn verify(&self, path: &Path, signature: &str, public_key_url: &str) -> Result<bool>;
}

/// Ed25519ph verifier fetching raw or base64 public keys over HTTP
pub struct Ed25519Verifier {
    client: reqwest::Client,
}

impl Ed25519Verifier {
    #[must_use]
    pub const fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn fetch_key(&self, public_key_url: &str) -> Result<VerifyingKey> {
        let bytes = self
            .client
            .get(public_key_url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| DepotError::transfer(format!("Failed to fetch public key: {e}")))?
            .bytes()
            .await
            .map_err(|e| DepotError::transfer(format!("Failed to read public key: {e}")))?;
        decode_public_key(&bytes)
    }
}

#[async_trait]
impl SignatureVerifier for Ed25519Verifier {
    async fn verify(&self, path: &Path, signature: &str, public_key_url: &str) -> Result<bool> {
        let key = self.fetch_key(public_key_url).await?;
        verify_signature_with_key(path, signature, &key).await
    }
}

/// Accept a key as 32 raw bytes or as base64 text
pub fn decode_public_key(bytes: &[u8]) -> Result<VerifyingKey> {
    let raw: Vec<u8> = if bytes.len() == PUBLIC_KEY_LENGTH {
        bytes.to_vec()
    } else {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| DepotError::Other("Public key is neither raw nor base64".to_string()))?;
        BASE64
            .decode(text.trim())
            .map_err(|e| DepotError::Other(format!("Public key is not valid base64: {e}")))?
    };
    let array: [u8; PUBLIC_KEY_LENGTH] = raw.as_slice().try_into().map_err(|_| {
        DepotError::Other(format!(
            "Public key must be {PUBLIC_KEY_LENGTH} bytes, got {}",
            raw.len()
        ))
    })?;
    VerifyingKey::from_bytes(&array)
        .map_err(|e| DepotError::Other(format!("Invalid Ed25519 public key: {e}")))
}

/// Verify a base64 Ed25519ph signature over the SHA-512 prehash of `path`
///
/// A signature that cannot be decoded counts as a mismatch.
pub async fn verify_signature_with_key(
    path: &Path,
    signature_b64: &str,
    key: &VerifyingKey,
) -> Result<bool> {
    let Ok(signature_bytes) = BASE64.decode(signature_b64.trim()) else {
        return Ok(false);
    };
    let Ok(signature) = Signature::from_slice(&signature_bytes) else {
        return Ok(false);
    };

    let mut prehash = Sha512::new();
    stream_into(path, &mut prehash).await?;
    Ok(key.verify_prehashed(prehash, None, &signature).is_ok())
}
