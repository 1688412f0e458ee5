//! Bearer-token validation. Tokens are issued by the CMS; this service only
//! verifies them and reads the principal out of the claims.

use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::models::user::UserRole;

/// JWT claims carried by CMS-issued access tokens.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub user_id: i64,
    pub role: UserRole,
    pub exp: i64,
    pub iat: i64,
}

/// Validate a JWT and return the claims.
pub fn validate_token(token: &str, jwt_secret: &str) -> Result<Claims, AppError> {
    let decoding_key = DecodingKey::from_secret(jwt_secret.as_bytes());
    let validation = Validation::default();

    jsonwebtoken::decode::<Claims>(token, &decoding_key, &validation)
        .map(|data| data.claims)
        .map_err(|_| AppError::Unauthorized)
}

/// Sign an access token. Used by the seed binary and tests.
pub fn issue_token(
    username: &str,
    user_id: i64,
    role: UserRole,
    jwt_secret: &str,
    expiry_secs: i64,
) -> Result<String, AppError> {
    let now = Utc::now();
    let claims = Claims {
        sub: username.to_string(),
        user_id,
        role,
        exp: (now + Duration::seconds(expiry_secs)).timestamp(),
        iat: now.timestamp(),
    };

    jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(jwt_secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("Token generation failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trip() {
        let secret = "test-secret-key-for-jwt";
        let token = issue_token("editor1", 12, UserRole::Editor, secret, 900).unwrap();

        let claims = validate_token(&token, secret).unwrap();
        assert_eq!(claims.sub, "editor1");
        assert_eq!(claims.user_id, 12);
        assert_eq!(claims.role, UserRole::Editor);
    }

    #[test]
    fn invalid_token_rejected() {
        let result = validate_token("garbage.token.here", "secret");
        assert!(result.is_err());
    }

    #[test]
    fn wrong_secret_rejected() {
        let token = issue_token("a", 1, UserRole::Author, "one", 900).unwrap();
        assert!(validate_token(&token, "two").unwrap_err().is_unauthorized());
    }

    #[test]
    fn expired_token_rejected() {
        let secret = "test-secret";
        // Expired well beyond the 60s leeway window
        let token = issue_token("test", 1, UserRole::Author, secret, -3600).unwrap();
        assert!(validate_token(&token, secret).is_err());
    }
}
