use std::sync::Arc;

use axum::http::HeaderMap;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::error::AppError;

/// Identity carried by a validated access token
#[derive(Debug, Clone)]
pub struct AuthenticatedDevice {
    pub user_id: String,
    pub device_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct AccessClaims {
    /// User identifier
    sub: String,
    /// Device identifier
    device: String,
    iat: i64,
    exp: i64,
}

/// HS256 access-token verifier for channel registration and the REST
/// surface. Tokens are minted by the login/registration layer outside this
/// core with the same shared secret.
#[derive(Clone)]
pub struct TokenVerifier {
    config: Arc<AppConfig>,
}

impl TokenVerifier {
    pub fn new(config: Arc<AppConfig>) -> Self {
        Self { config }
    }

    pub fn verify_access_token(&self, token: &str) -> Result<AuthenticatedDevice, AppError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = self.config.auth_clock_skew.as_secs();
        validation.validate_aud = false;

        let decoded = decode::<AccessClaims>(
            token,
            &DecodingKey::from_secret(self.config.auth_secret.as_bytes()),
            &validation,
        )
        .map_err(|error| AppError::unauthorized(format!("Token validation failed: {error}")))?;

        if decoded.claims.sub.trim().is_empty() {
            return Err(AppError::unauthorized("Token subject is missing"));
        }
        if decoded.claims.device.trim().is_empty() {
            return Err(AppError::unauthorized("Token device is missing"));
        }

        Ok(AuthenticatedDevice {
            user_id: decoded.claims.sub,
            device_id: decoded.claims.device,
        })
    }

    /// Mint a token for a (user, device) pair; used by operational tooling
    /// and tests
    pub fn issue_access_token(
        &self,
        user_id: &str,
        device_id: &str,
        ttl_secs: i64,
    ) -> Result<String, AppError> {
        let now = chrono::Utc::now().timestamp();
        let claims = AccessClaims {
            sub: user_id.to_string(),
            device: device_id.to_string(),
            iat: now,
            exp: now + ttl_secs,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.config.auth_secret.as_bytes()),
        )
        .map_err(|error| AppError::internal(format!("Token encoding failed: {error}")))
    }
}

pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let header = headers
        .get("authorization")
        .ok_or_else(|| AppError::unauthorized("Missing Authorization header"))?
        .to_str()
        .map_err(|_| AppError::unauthorized("Authorization header is not valid UTF-8"))?;

    let (scheme, token) = header
        .split_once(' ')
        .ok_or_else(|| AppError::unauthorized("Authorization header must be `Bearer <token>`"))?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AppError::unauthorized(
            "Authorization scheme must be `Bearer`",
        ));
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(AppError::unauthorized("Bearer token is empty"));
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier() -> TokenVerifier {
        use std::time::Duration;

        let config = AppConfig {
            bind_addr: "127.0.0.1:0".into(),
            db_path: ":memory:".into(),
            auth_secret: "a-very-long-shared-secret-for-hs256-tokens".into(),
            auth_clock_skew: Duration::from_secs(0),
            ping_interval: Duration::from_secs(30),
            inactivity_timeout: Duration::from_secs(120),
            max_sync_attempts: 3,
            sync_backoff_base: Duration::from_millis(2000),
            create_dedup_window: Duration::from_secs(30),
        };
        TokenVerifier::new(Arc::new(config))
    }

    #[test]
    fn test_token_round_trip() {
        let verifier = verifier();
        let token = verifier.issue_access_token("user-1", "device-1", 300).unwrap();
        let identity = verifier.verify_access_token(&token).unwrap();
        assert_eq!(identity.user_id, "user-1");
        assert_eq!(identity.device_id, "device-1");
    }

    #[test]
    fn test_expired_token_rejected() {
        let verifier = verifier();
        let token = verifier
            .issue_access_token("user-1", "device-1", -3600)
            .unwrap();
        assert!(verifier.verify_access_token(&token).is_err());
    }

    #[test]
    fn test_garbage_token_rejected() {
        let verifier = verifier();
        assert!(verifier.verify_access_token("not-a-token").is_err());
    }

    #[test]
    fn test_extract_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer abc123".parse().unwrap());
        assert_eq!(extract_bearer_token(&headers).unwrap(), "abc123");

        headers.insert("authorization", "Basic abc123".parse().unwrap());
        assert!(extract_bearer_token(&headers).is_err());
    }
}
