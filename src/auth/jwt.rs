use std::path::Path;

use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;

use crate::auth::middleware::Claims;

/// Load or generate the JWT signing key (256-bit random secret).
/// Key is stored as raw bytes in data_dir/jwt_secret and must match the
/// secret the upstream identity service signs tokens with.
pub fn load_or_generate_jwt_secret(data_dir: &str) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let key_path = Path::new(data_dir).join("jwt_secret");

    if key_path.exists() {
        let key = std::fs::read(&key_path)?;
        if key.len() == 32 {
            tracing::info!("JWT signing key loaded from {}", key_path.display());
            return Ok(key);
        }
        // Invalid key file — regenerate
        tracing::warn!("JWT key file has wrong size ({}), regenerating", key.len());
    }

    let key: [u8; 32] = rand::rng().random();
    std::fs::write(&key_path, key)?;
    tracing::info!("JWT signing key generated at {}", key_path.display());
    Ok(key.to_vec())
}

/// Sign an access token for an identity. Token issuance lives upstream in
/// production; this mirrors its claims shape for tooling and tests.
pub fn issue_access_token(
    secret: &[u8],
    identity_id: &str,
    ttl_secs: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: identity_id.to_string(),
        iat: now,
        exp: now + ttl_secs,
    };

    encode(
        &Header::default(), // HS256
        &claims,
        &EncodingKey::from_secret(secret),
    )
}

/// Validate an access token and return its claims.
pub fn validate_access_token(
    secret: &[u8],
    token: &str,
) -> Result<Claims, jsonwebtoken::errors::Error> {
    let validation = Validation::new(jsonwebtoken::Algorithm::HS256);
    let token_data = decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)?;
    Ok(token_data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_valid_token() {
        let secret = [7u8; 32];
        let token = issue_access_token(&secret, "u1", 900).unwrap();
        let claims = validate_access_token(&secret, &token).unwrap();
        assert_eq!(claims.sub, "u1");
    }

    #[test]
    fn rejects_expired_token() {
        let secret = [7u8; 32];
        let token = issue_access_token(&secret, "u1", -3600).unwrap();
        let err = validate_access_token(&secret, &token).unwrap_err();
        assert!(matches!(
            err.kind(),
            jsonwebtoken::errors::ErrorKind::ExpiredSignature
        ));
    }

    #[test]
    fn rejects_wrong_secret() {
        let token = issue_access_token(&[7u8; 32], "u1", 900).unwrap();
        assert!(validate_access_token(&[8u8; 32], &token).is_err());
    }
}
