//! JWT access-token generation/validation.
//!
//! Access tokens are HS256-signed JWTs containing a [`Claims`] payload.
//! Tokens are minted by the consuming platform (e.g. an LTI tool) with a
//! shared per-consumer secret; this service only validates and reads them.

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JWT claims embedded in every access token.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject -- the requesting user's id on the consuming platform.
    pub sub: String,
    /// API consumer key the token was issued under.
    pub consumer: String,
    /// Expiration time (UTC Unix timestamp).
    pub exp: i64,
    /// Issued-at time (UTC Unix timestamp).
    pub iat: i64,
    /// Unique token identifier (UUID v4) for audit.
    pub jti: String,
    /// Operation overrides (`CAN_READ`, `CAN_UPDATE`, `CAN_DELETE`,
    /// `CAN_ADMIN`). Legacy tokens omit the claim entirely and are
    /// granted all operations unconditionally.
    #[serde(rename = "override", skip_serializing_if = "Option::is_none")]
    pub overrides: Option<Vec<String>>,
}

/// Configuration for JWT token validation.
#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// HMAC-SHA256 secret used to sign and verify tokens.
    pub secret: String,
    /// Token lifetime in minutes for locally-minted tokens (default: 60).
    pub token_expiry_mins: i64,
}

/// Default token expiry in minutes.
const DEFAULT_TOKEN_EXPIRY_MINS: i64 = 60;

impl JwtConfig {
    /// Load JWT configuration from environment variables.
    ///
    /// | Env Var                 | Required | Default |
    /// |-------------------------|----------|---------|
    /// | `JWT_SECRET`            | **yes**  | --      |
    /// | `JWT_TOKEN_EXPIRY_MINS` | no       | `60`    |
    ///
    /// # Panics
    ///
    /// Panics if `JWT_SECRET` is not set or is empty.
    pub fn from_env() -> Self {
        let secret =
            std::env::var("JWT_SECRET").expect("JWT_SECRET must be set in the environment");
        assert!(!secret.is_empty(), "JWT_SECRET must not be empty");

        let token_expiry_mins: i64 = std::env::var("JWT_TOKEN_EXPIRY_MINS")
            .unwrap_or_else(|_| DEFAULT_TOKEN_EXPIRY_MINS.to_string())
            .parse()
            .expect("JWT_TOKEN_EXPIRY_MINS must be a valid i64");

        Self {
            secret,
            token_expiry_mins,
        }
    }
}

/// Generate an HS256 token for the given user, mainly for tooling and
/// tests; production tokens come from the consuming platform.
pub fn generate_token(
    user_id: &str,
    consumer: &str,
    overrides: Option<Vec<String>>,
    config: &JwtConfig,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = chrono::Utc::now().timestamp();
    let exp = now + config.token_expiry_mins * 60;

    let claims = Claims {
        sub: user_id.to_string(),
        consumer: consumer.to_string(),
        exp,
        iat: now,
        jti: Uuid::new_v4().to_string(),
        overrides,
    };

    encode(
        &Header::default(), // HS256
        &claims,
        &EncodingKey::from_secret(config.secret.as_bytes()),
    )
}

/// Validate and decode an access token, returning the embedded [`Claims`].
///
/// Validates the signature and expiration automatically.
pub fn validate_token(
    token: &str,
    config: &JwtConfig,
) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.secret.as_bytes()),
        &Validation::default(), // HS256, validates exp
    )?;
    Ok(token_data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper to build a test config with a known secret.
    fn test_config() -> JwtConfig {
        JwtConfig {
            secret: "test-secret-that-is-long-enough-for-hmac".to_string(),
            token_expiry_mins: 60,
        }
    }

    #[test]
    fn generate_and_validate_round_trip() {
        let config = test_config();
        let token = generate_token(
            "user-42",
            "consumer-key",
            Some(vec!["CAN_READ".into()]),
            &config,
        )
        .expect("token generation should succeed");

        let claims = validate_token(&token, &config).expect("token validation should succeed");
        assert_eq!(claims.sub, "user-42");
        assert_eq!(claims.consumer, "consumer-key");
        assert_eq!(claims.overrides, Some(vec!["CAN_READ".to_string()]));
        assert!(claims.exp > claims.iat);
        assert!(!claims.jti.is_empty());
    }

    #[test]
    fn missing_override_claim_decodes_as_none() {
        let config = test_config();
        let token =
            generate_token("user-1", "consumer", None, &config).expect("generation succeeds");
        let claims = validate_token(&token, &config).expect("validation succeeds");
        assert!(claims.overrides.is_none());
    }

    #[test]
    fn expired_token_fails() {
        let config = test_config();

        // Manually create an already-expired token, well beyond the
        // default 60-second leeway.
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: "user-1".into(),
            consumer: "consumer".into(),
            exp: now - 300,
            iat: now - 600,
            jti: Uuid::new_v4().to_string(),
            overrides: None,
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(config.secret.as_bytes()),
        )
        .expect("encoding should succeed");

        let result = validate_token(&token, &config);
        assert!(result.is_err(), "expired token must fail validation");
    }

    #[test]
    fn different_secrets_fail() {
        let config_a = JwtConfig {
            secret: "secret-alpha".to_string(),
            token_expiry_mins: 60,
        };
        let config_b = JwtConfig {
            secret: "secret-bravo".to_string(),
            token_expiry_mins: 60,
        };

        let token =
            generate_token("user-1", "consumer", None, &config_a).expect("generation succeeds");

        let result = validate_token(&token, &config_b);
        assert!(
            result.is_err(),
            "token signed with a different secret must fail"
        );
    }
}
