//! Owner authentication via bearer tokens.
//!
//! Owner endpoints (`/plants/add`, `/plants/keysecret`, `/plants/setconfig`,
//! `/plants/delete`, `/plants/statistics`) require an
//! `Authorization: Bearer <jwt>` header issued by the sign-in service. The
//! token's `sub` claim is the owner id that plants are recorded against.
//!
//! Telemetry ingestion (`/plants/log/{apiID}`) does not use this module; field
//! loggers authenticate with their key, secret, URL id and source address.
//!
//! # Validation
//!
//! - Signature with the shared secret (`HS256`, `HS384` or `HS512`)
//! - `exp` is always required
//! - `iss` and `aud` only when configured
//!
//! Every failure is reported as a plain 401 without saying which check
//! failed; the reason is logged at debug level.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{AuthAlgorithm, AuthConfig};
use crate::error::AppError;
use crate::state::AppState;

/// Claims carried by an owner token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Owner id
    pub sub: String,
    pub exp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

impl From<AuthAlgorithm> for Algorithm {
    fn from(algorithm: AuthAlgorithm) -> Self {
        match algorithm {
            AuthAlgorithm::HS256 => Algorithm::HS256,
            AuthAlgorithm::HS384 => Algorithm::HS384,
            AuthAlgorithm::HS512 => Algorithm::HS512,
        }
    }
}

/// Token verifier built once from configuration and shared by all requests.
#[derive(Clone)]
pub struct OwnerAuth {
    key: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for OwnerAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnerAuth")
            .field("algorithms", &self.validation.algorithms)
            .finish_non_exhaustive()
    }
}

impl OwnerAuth {
    pub fn new(config: &AuthConfig) -> Self {
        let mut validation = Validation::new(config.algorithm.into());

        // A configured issuer or audience must also be present in the token.
        let mut required = vec!["exp", "sub"];

        if let Some(issuer) = &config.issuer {
            validation.set_issuer(&[issuer]);
            required.push("iss");
        }

        match &config.audience {
            Some(audience) => {
                validation.set_audience(&[audience]);
                required.push("aud");
            }
            None => validation.validate_aud = false,
        }

        validation.set_required_spec_claims(&required);

        Self {
            key: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
        }
    }

    /// Verify a raw token and return its claims.
    pub fn verify(&self, token: &str) -> Result<Claims, AppError> {
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            debug!(error = %e, "Bearer token rejected");
            AppError::Unauthorized("invalid bearer token".to_string())
        })?;

        if data.claims.sub.trim().is_empty() {
            debug!("Bearer token has an empty subject");
            return Err(AppError::Unauthorized("empty subject".to_string()));
        }

        Ok(data.claims)
    }

    /// Verify the `Authorization` header value.
    pub fn verify_header(&self, header: Option<&str>) -> Result<Claims, AppError> {
        let token = header
            .and_then(bearer_token)
            .ok_or_else(|| AppError::Unauthorized("missing bearer token".to_string()))?;
        self.verify(token)
    }
}

/// Token part of a `Bearer` authorization value. The scheme is case-insensitive.
fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Authenticated owner of the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerIdentity(pub String);

impl OwnerIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromRequestParts<AppState> for OwnerIdentity {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        let claims = state.owner_auth.verify_header(header)?;
        Ok(Self(claims.sub))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use jsonwebtoken::{EncodingKey, Header, encode};

    use super::*;

    const SECRET: &str = "test-secret-key-for-testing-only";

    fn config() -> AuthConfig {
        AuthConfig {
            secret: SECRET.to_string(),
            algorithm: AuthAlgorithm::HS256,
            issuer: None,
            audience: None,
        }
    }

    fn far_future() -> u64 {
        (chrono::Utc::now().timestamp() + 3600) as u64
    }

    fn claims(sub: &str) -> Claims {
        Claims {
            sub: sub.to_string(),
            exp: far_future(),
            iat: None,
            iss: None,
            aud: None,
        }
    }

    fn token(claims: &Claims, secret: &str, algorithm: Algorithm) -> String {
        encode(
            &Header::new(algorithm),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_valid_token_yields_subject() {
        let auth = OwnerAuth::new(&config());
        let jwt = token(&claims("owner-1"), SECRET, Algorithm::HS256);

        let claims = auth.verify_header(Some(&format!("Bearer {jwt}"))).unwrap();
        assert_eq!(claims.sub, "owner-1");
    }

    #[test]
    fn test_scheme_is_case_insensitive() {
        let auth = OwnerAuth::new(&config());
        let jwt = token(&claims("owner-1"), SECRET, Algorithm::HS256);
        assert!(auth.verify_header(Some(&format!("bearer {jwt}"))).is_ok());
    }

    #[test]
    fn test_missing_or_malformed_header() {
        let auth = OwnerAuth::new(&config());
        for header in [None, Some(""), Some("Bearer"), Some("Bearer   "), Some("Basic abc")] {
            let err = auth.verify_header(header).unwrap_err();
            assert!(matches!(err, AppError::Unauthorized(_)), "{header:?}");
        }
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let auth = OwnerAuth::new(&config());
        let jwt = token(&claims("owner-1"), "another-secret", Algorithm::HS256);
        assert!(matches!(auth.verify(&jwt), Err(AppError::Unauthorized(_))));
    }

    #[test]
    fn test_wrong_algorithm_rejected() {
        let auth = OwnerAuth::new(&config());
        let jwt = token(&claims("owner-1"), SECRET, Algorithm::HS512);
        assert!(auth.verify(&jwt).is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        let auth = OwnerAuth::new(&config());
        let mut expired = claims("owner-1");
        expired.exp = 1_000_000;
        let jwt = token(&expired, SECRET, Algorithm::HS256);
        assert!(auth.verify(&jwt).is_err());
    }

    #[test]
    fn test_empty_subject_rejected() {
        let auth = OwnerAuth::new(&config());
        let jwt = token(&claims("  "), SECRET, Algorithm::HS256);
        assert!(auth.verify(&jwt).is_err());
    }

    #[test]
    fn test_issuer_and_audience_enforced_when_configured() {
        let auth = OwnerAuth::new(&AuthConfig {
            issuer: Some("accounts".to_string()),
            audience: Some("plants".to_string()),
            ..config()
        });

        let mut good = claims("owner-1");
        good.iss = Some("accounts".to_string());
        good.aud = Some("plants".to_string());
        assert!(auth.verify(&token(&good, SECRET, Algorithm::HS256)).is_ok());

        let mut bad_issuer = good.clone();
        bad_issuer.iss = Some("elsewhere".to_string());
        assert!(auth.verify(&token(&bad_issuer, SECRET, Algorithm::HS256)).is_err());

        let mut no_issuer = good.clone();
        no_issuer.iss = None;
        assert!(auth.verify(&token(&no_issuer, SECRET, Algorithm::HS256)).is_err());

        let mut no_audience = good;
        no_audience.aud = None;
        assert!(auth.verify(&token(&no_audience, SECRET, Algorithm::HS256)).is_err());
    }

    #[test]
    fn test_issuer_and_audience_optional_when_unconfigured() {
        let auth = OwnerAuth::new(&config());

        let mut stamped = claims("owner-1");
        stamped.iss = Some("accounts".to_string());
        stamped.aud = Some("plants".to_string());

        assert!(auth.verify(&token(&claims("owner-1"), SECRET, Algorithm::HS256)).is_ok());
        assert!(auth.verify(&token(&stamped, SECRET, Algorithm::HS256)).is_ok());
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("BEARER  abc "), Some("abc"));
        assert_eq!(bearer_token("Token abc"), None);
        assert_eq!(bearer_token("Bearerabc"), None);
    }
}
