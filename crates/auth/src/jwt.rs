//! HS256 bearer token verification.

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use thiserror::Error;
use tracing::debug;

use crate::{JwtClaims, TokenValidationError, validate_claims};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// Bad signature, wrong algorithm or undecodable claims.
    #[error("malformed token: {0}")]
    Malformed(String),

    #[error(transparent)]
    Claims(#[from] TokenValidationError),
}

/// Verifies a raw bearer token and returns its claims.
pub trait JwtValidator: Send + Sync {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, TokenError>;
}

/// Shared-secret (HMAC-SHA256) validator.
pub struct Hs256JwtValidator {
    key: DecodingKey,
    validation: Validation,
}

impl Hs256JwtValidator {
    pub fn new(secret: Vec<u8>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // The validity window lives in `issued_at`/`expires_at`, not the registered `exp`.
        validation.required_spec_claims.clear();
        validation.validate_exp = false;

        Self {
            key: DecodingKey::from_secret(&secret),
            validation,
        }
    }
}

impl JwtValidator for Hs256JwtValidator {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, TokenError> {
        let data = decode::<JwtClaims>(token, &self.key, &self.validation).map_err(|e| {
            debug!(error = %e, "token rejected");
            TokenError::Malformed(e.to_string())
        })?;
        validate_claims(&data.claims, now)?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use stockwise_core::{TenantId, UserId};

    use super::*;
    use crate::Role;

    fn mint(secret: &[u8], claims: &JwtClaims) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret),
        )
        .unwrap()
    }

    fn claims(now: DateTime<Utc>) -> JwtClaims {
        JwtClaims {
            sub: UserId::new(),
            tenant_id: TenantId::new(),
            roles: vec![Role::new("admin")],
            issued_at: now,
            expires_at: now + Duration::minutes(5),
        }
    }

    #[test]
    fn valid_token_round_trips_claims() {
        let now = Utc::now();
        let expected = claims(now);
        let validator = Hs256JwtValidator::new(b"secret".to_vec());

        let got = validator.validate(&mint(b"secret", &expected), now).unwrap();
        assert_eq!(got, expected);
    }

    #[test]
    fn wrong_secret_and_garbage_are_malformed() {
        let now = Utc::now();
        let validator = Hs256JwtValidator::new(b"secret".to_vec());

        assert!(matches!(
            validator.validate(&mint(b"other", &claims(now)), now),
            Err(TokenError::Malformed(_))
        ));
        assert!(matches!(
            validator.validate("not-a-token", now),
            Err(TokenError::Malformed(_))
        ));
    }

    #[test]
    fn expired_token_is_rejected() {
        let now = Utc::now();
        let validator = Hs256JwtValidator::new(b"secret".to_vec());
        let token = mint(b"secret", &claims(now - Duration::minutes(10)));

        assert_eq!(
            validator.validate(&token, now),
            Err(TokenError::Claims(TokenValidationError::Expired))
        );
    }
}
