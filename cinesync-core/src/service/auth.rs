//! Bearer token issuing and validation.
//!
//! Tokens are HS256-signed and carry the user ID plus the *user version*, a
//! checksum of the stored password hash. Rotating the password changes the
//! version and every outstanding token fails verification with "expired".

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::models::User;
use crate::{Error, Result};

/// Default bearer token lifetime.
pub const DEFAULT_TOKEN_TTL_HOURS: i64 = 48;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BearerClaims {
    /// User ID.
    pub u: String,
    /// User version the token was minted against.
    pub uv: u32,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Clone)]
pub struct TokenService {
    encoding: Arc<EncodingKey>,
    decoding: Arc<DecodingKey>,
    algorithm: Algorithm,
    token_ttl_hours: i64,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("algorithm", &self.algorithm)
            .field("token_ttl_hours", &self.token_ttl_hours)
            .finish()
    }
}

fn map_jwt_error(err: &jsonwebtoken::errors::Error) -> Error {
    match err.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => Error::AuthExpired,
        jsonwebtoken::errors::ErrorKind::InvalidSignature => {
            Error::Auth("invalid token signature".to_string())
        }
        _ => Error::Auth("invalid token".to_string()),
    }
}

impl TokenService {
    pub fn new(secret: &str, token_ttl_hours: i64) -> Result<Self> {
        if secret.is_empty() {
            return Err(Error::Internal("token secret cannot be empty".to_string()));
        }
        Ok(Self {
            encoding: Arc::new(EncodingKey::from_secret(secret.as_bytes())),
            decoding: Arc::new(DecodingKey::from_secret(secret.as_bytes())),
            algorithm: Algorithm::HS256,
            token_ttl_hours,
        })
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = true;
        validation.leeway = 60;
        validation.set_required_spec_claims(&["exp"]);
        validation
    }

    /// Mint a bearer token for the user at their current version.
    pub fn sign_user(&self, user: &User) -> Result<String> {
        let now = chrono::Utc::now().timestamp();
        let claims = BearerClaims {
            u: user.id.as_str().to_string(),
            uv: user.version,
            iat: now,
            exp: now + self.token_ttl_hours * 3600,
        };
        self.sign_claims(&claims)
    }

    pub fn verify_bearer(&self, token: &str) -> Result<BearerClaims> {
        self.verify_claims(token)
    }

    /// Sign arbitrary claims (RTMP publish tokens, proxy target tokens).
    pub fn sign_claims<T: Serialize>(&self, claims: &T) -> Result<String> {
        encode(&Header::new(self.algorithm), claims, &self.encoding)
            .map_err(|e| Error::Internal(format!("failed to sign token: {e}")))
    }

    pub fn verify_claims<T: DeserializeOwned>(&self, token: &str) -> Result<T> {
        decode::<T>(token, &self.decoding, &self.validation())
            .map(|data| data.claims)
            .map_err(|e| map_jwt_error(&e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{UserId, UserRole};

    fn service() -> TokenService {
        TokenService::new("test-secret", DEFAULT_TOKEN_TTL_HOURS).unwrap()
    }

    fn user() -> User {
        User::new(UserId::new(), "alice".into(), UserRole::User, "hash".into())
    }

    #[test]
    fn test_sign_and_verify() {
        let svc = service();
        let user = user();
        let token = svc.sign_user(&user).unwrap();
        let claims = svc.verify_bearer(&token).unwrap();

        assert_eq!(claims.u, user.id.as_str());
        assert_eq!(claims.uv, user.version);
    }

    #[test]
    fn test_version_mismatch_detectable() {
        let svc = service();
        let mut user = user();
        let token = svc.sign_user(&user).unwrap();

        // Password rotation bumps the version.
        user.hashed_password = "other".into();
        user.version = User::version_of(&user.hashed_password);

        let claims = svc.verify_bearer(&token).unwrap();
        assert_ne!(claims.uv, user.version);
    }

    #[test]
    fn test_expired_token() {
        let svc = TokenService::new("test-secret", -1).unwrap();
        let token = svc.sign_user(&user()).unwrap();
        assert!(matches!(
            service().verify_bearer(&token),
            Err(Error::AuthExpired)
        ));
    }

    #[test]
    fn test_tampered_token() {
        let svc = service();
        let token = svc.sign_user(&user()).unwrap();
        let mut parts: Vec<&str> = token.split('.').collect();
        parts[1] = "dGFtcGVyZWQ";
        let tampered = parts.join(".");
        assert!(svc.verify_bearer(&tampered).is_err());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = service().sign_user(&user()).unwrap();
        let other = TokenService::new("other-secret", DEFAULT_TOKEN_TTL_HOURS).unwrap();
        assert!(other.verify_bearer(&token).is_err());
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert!(TokenService::new("", DEFAULT_TOKEN_TTL_HOURS).is_err());
    }
}
