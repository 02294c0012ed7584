//! Request signing for agent and edge environments
//!
//! Agents only accept requests signed by the management instance they were
//! paired with. Every forwarded request carries the instance's ECDSA P-256
//! public key (hex) and a fresh signature (base64) over a fixed message.

use std::path::Path;

use aws_lc_rs::rand::SystemRandom;
use aws_lc_rs::signature::{EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_ASN1_SIGNING};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use base64::{engine::general_purpose::STANDARD, Engine};
use tracing::info;

use crate::error::{Error, Result};

/// Header carrying the hex-encoded public key
pub const PUBLIC_KEY_HEADER: HeaderName = HeaderName::from_static("x-wardenagent-publickey");

/// Header carrying the base64 request signature
pub const SIGNATURE_HEADER: HeaderName = HeaderName::from_static("x-wardenagent-signature");

/// Message every signature is computed over
pub const SIGNED_MESSAGE: &[u8] = b"Warden-App";

/// Signs outbound agent requests with the instance key
pub struct SignatureService {
    key_pair: EcdsaKeyPair,
    public_key: String,
    rng: SystemRandom,
}

impl SignatureService {
    /// Load a PKCS#8 (DER) key
    pub fn from_pkcs8(der: &[u8]) -> Result<Self> {
        let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, der)
            .map_err(|e| Error::Config(format!("invalid signature key: {}", e)))?;
        Ok(Self::with_key_pair(key_pair))
    }

    /// Load a PKCS#8 (DER) key file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let der = std::fs::read(path).map_err(|e| {
            Error::Config(format!("failed to read signature key {}: {}", path.display(), e))
        })?;
        Self::from_pkcs8(&der)
    }

    /// Generate an ephemeral key
    ///
    /// Agents paired with a previous key reject requests signed with it.
    pub fn generate() -> Result<Self> {
        let key_pair = EcdsaKeyPair::generate(&ECDSA_P256_SHA256_ASN1_SIGNING)
            .map_err(|_| Error::Internal("failed to generate signature key".into()))?;
        info!("Generated ephemeral signature key");
        Ok(Self::with_key_pair(key_pair))
    }

    fn with_key_pair(key_pair: EcdsaKeyPair) -> Self {
        let public_key = hex::encode(key_pair.public_key().as_ref());
        Self {
            key_pair,
            public_key,
            rng: SystemRandom::new(),
        }
    }

    /// Hex-encoded public key
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// Fresh base64 signature over the fixed message
    pub fn sign(&self) -> Result<String> {
        let signature = self
            .key_pair
            .sign(&self.rng, SIGNED_MESSAGE)
            .map_err(|_| Error::Internal("failed to sign request".into()))?;
        Ok(STANDARD.encode(signature.as_ref()))
    }

    /// Add the public key and a fresh signature to outbound headers
    pub fn sign_headers(&self, headers: &mut HeaderMap) -> Result<()> {
        let public_key = HeaderValue::from_str(&self.public_key)
            .map_err(|e| Error::Internal(format!("invalid public key header: {}", e)))?;
        let signature = HeaderValue::from_str(&self.sign()?)
            .map_err(|e| Error::Internal(format!("invalid signature header: {}", e)))?;

        headers.insert(PUBLIC_KEY_HEADER, public_key);
        headers.insert(SIGNATURE_HEADER, signature);
        Ok(())
    }
}
