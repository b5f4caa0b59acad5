use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Claims carried by access tokens the auth provider issues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
    /// Database role of the token (`authenticated`, `anon`, ...). Not an
    /// application role.
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub aud: Option<serde_json::Value>,
}

/// Verifies HS256 access tokens signed with the backend's shared secret.
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        // Audience differs per deployment; the signature is what matters here.
        validation.validate_aud = false;
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Validate `token` and check it was issued to `user_id`.
    pub fn verify(&self, token: &str, user_id: &str) -> Result<Claims, AuthError> {
        let data = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        if data.claims.sub != user_id {
            return Err(AuthError::InvalidToken(format!(
                "token subject {} does not match user {}",
                data.claims.sub, user_id
            )));
        }
        Ok(data.claims)
    }
}
