//! JWT codec for bearer credentials
//!
//! Every credential the service hands out (access, refresh, password-reset and
//! email-verification) is an HS256-signed JWT binding subject, kind, issued-at
//! and expiry. Verification fails closed: a bad signature, a foreign algorithm,
//! an unknown kind or an expiry at or before "now" is rejected outright.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JWT errors
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("Token encoding failed: {0}")]
    EncodingError(String),

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Token expired")]
    Expired,

    #[error("Malformed token")]
    Malformed,

    #[error("Unexpected token kind")]
    WrongKind,
}

impl From<jsonwebtoken::errors::Error> for JwtError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => JwtError::Expired,
            ErrorKind::InvalidSignature
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidAlgorithmName => JwtError::InvalidSignature,
            _ => JwtError::Malformed,
        }
    }
}

/// Closed set of credential kinds. Anything else fails to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TokenKind {
    Access,
    Refresh,
    ResetPassword,
    VerifyEmail,
}

impl TokenKind {
    /// Wire/storage name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
            TokenKind::ResetPassword => "resetPassword",
            TokenKind::VerifyEmail => "verifyEmail",
        }
    }

    /// Parse a stored kind name
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "access" => Some(TokenKind::Access),
            "refresh" => Some(TokenKind::Refresh),
            "resetPassword" => Some(TokenKind::ResetPassword),
            "verifyEmail" => Some(TokenKind::VerifyEmail),
            _ => None,
        }
    }

    /// Whether tokens of this kind are kept in the token store.
    /// Access tokens are self-contained and never persisted.
    pub fn is_persisted(&self) -> bool {
        !matches!(self, TokenKind::Access)
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JWT claims structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: Uuid,
    /// Credential kind
    #[serde(rename = "type")]
    pub kind: TokenKind,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Unique token id, keeps two tokens minted in the same second distinct
    pub jti: Uuid,
}

impl Claims {
    /// Expiry as a timestamp
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// A freshly signed token and its expiry
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Signs and verifies bearer credentials with a shared HMAC secret
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtService {
    /// Create a codec for the given secret
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Issue a token for `subject` valid for `lifetime` from now
    pub fn issue(
        &self,
        subject: Uuid,
        kind: TokenKind,
        lifetime: Duration,
    ) -> Result<IssuedToken, JwtError> {
        self.issue_at(subject, kind, lifetime, Utc::now())
    }

    /// Issue a token as if the clock read `now`
    pub fn issue_at(
        &self,
        subject: Uuid,
        kind: TokenKind,
        lifetime: Duration,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, JwtError> {
        let exp = now
            .checked_add_signed(lifetime)
            .ok_or_else(|| JwtError::EncodingError("expiry out of range".to_string()))?
            .timestamp();

        let claims = Claims {
            sub: subject,
            kind,
            iat: now.timestamp(),
            exp,
            jti: Uuid::new_v4(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| JwtError::EncodingError(e.to_string()))?;
        let expires_at = DateTime::from_timestamp(exp, 0)
            .ok_or_else(|| JwtError::EncodingError("expiry out of range".to_string()))?;

        Ok(IssuedToken { token, expires_at })
    }

    /// Verify signature and expiry against the current time
    pub fn verify(&self, token: &str) -> Result<Claims, JwtError> {
        self.verify_at(token, Utc::now())
    }

    /// Verify signature and expiry as if the clock read `now`
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked below against the supplied clock, with no leeway.
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let claims = decode::<Claims>(token, &self.decoding_key, &validation)?.claims;

        if now.timestamp() >= claims.exp {
            return Err(JwtError::Expired);
        }

        Ok(claims)
    }

    /// Verify and additionally require a specific kind
    pub fn verify_kind(&self, token: &str, kind: TokenKind) -> Result<Claims, JwtError> {
        let claims = self.verify(token)?;
        if claims.kind != kind {
            return Err(JwtError::WrongKind);
        }
        Ok(claims)
    }
}
