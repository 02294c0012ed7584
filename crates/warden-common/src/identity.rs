//! Platform security tokens
//!
//! Callers authenticate to the gateway with an HS256 JWT issued by the
//! platform. The token carries the user id, username and platform role; the
//! gateway never consults the store to learn whether a caller is an admin.

use std::time::Duration;

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::model::{UserId, UserRole};
use crate::{Error, Result};

/// Identity decoded from a platform token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenData {
    /// User id
    pub id: UserId,
    /// Username
    pub username: String,
    /// Platform role
    pub role: UserRole,
}

impl TokenData {
    /// Whether the caller is a platform administrator
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Administrator
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    #[serde(flatten)]
    data: TokenData,
    exp: i64,
}

/// Issues and validates platform tokens
pub struct JwtService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validity: Duration,
}

impl JwtService {
    /// Create a service from a shared secret
    pub fn new(secret: &[u8], validity: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validity,
        }
    }

    /// Issue a token for an identity
    pub fn issue(&self, data: &TokenData) -> Result<String> {
        let validity = chrono::Duration::from_std(self.validity)
            .map_err(|e| Error::credential(format!("invalid token validity: {}", e)))?;
        let claims = Claims {
            data: data.clone(),
            exp: (chrono::Utc::now() + validity).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| Error::credential(format!("failed to sign platform token: {}", e)))
    }

    /// Validate a token and return its identity
    pub fn parse(&self, token: &str) -> Result<TokenData> {
        let validation = Validation::new(Algorithm::HS256);
        decode::<Claims>(token, &self.decoding, &validation)
            .map(|decoded| decoded.claims.data)
            .map_err(|e| Error::unauthorized(format!("invalid platform token: {}", e)))
    }
}
