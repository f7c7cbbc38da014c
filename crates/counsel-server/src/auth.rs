//! Bearer token verification.
//!
//! Tokens are HS256 JWTs carrying the caller's id and role. A request without
//! a token is anonymous; actions decide whether that is acceptable. A token
//! that is present but does not verify is always rejected with 401.

use std::fmt;

use counsel_core::CoreError;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Caller role.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A client looking for counsel.
    Client,
    /// A lawyer.
    Lawyer,
    /// An administrator.
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Client => "client",
            Self::Lawyer => "lawyer",
            Self::Admin => "admin",
        })
    }
}

/// Verified token claims.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    /// Caller role.
    pub role: Role,
    /// Expiry, unix seconds.
    pub exp: u64,
}

/// Token verification failures.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The `Authorization` header is not `Bearer <token>`.
    #[error("malformed authorization header")]
    Malformed,
    /// The token did not verify.
    #[error("invalid token: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),
}

impl From<AuthError> for CoreError {
    fn from(err: AuthError) -> Self {
        CoreError::early_exit(401, Some(json!({ "error": err.to_string() })))
    }
}

/// HS256 signer and verifier.
#[derive(Clone)]
pub struct TokenVerifier {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    /// Verifier for `secret`.
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Decode and verify a raw token.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        Ok(jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)?.claims)
    }

    /// Verify an `Authorization` header value. `None` means anonymous.
    pub fn verify_header(&self, header: Option<&str>) -> Result<Option<Claims>, AuthError> {
        let Some(header) = header else {
            return Ok(None);
        };
        let token = header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::Malformed)?;
        self.verify(token).map(Some)
    }

    /// Sign `claims`.
    pub fn sign(&self, claims: &Claims) -> Result<String, AuthError> {
        Ok(jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding)?)
    }
}
