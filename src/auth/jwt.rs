use anyhow::Result;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::models::chat::UserId;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    pub user_id: UserId,
}

pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiration_seconds: u64,
}

impl JwtManager {
    pub fn new(secret: &str, expiration_seconds: u64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expiration_seconds,
        }
    }

    pub fn generate_token(&self, user_id: UserId) -> Result<String> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs() as usize;

        let claims = Claims {
            sub: user_id.to_string(),
            exp: now + self.expiration_seconds as usize,
            user_id,
        };

        let token = encode(&Header::default(), &claims, &self.encoding_key)?;
        Ok(token)
    }

    pub fn validate_token(&self, token: &str) -> Result<Claims> {
        let token_data = decode::<Claims>(token, &self.decoding_key, &Validation::default())?;
        Ok(token_data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_token_round_trips() {
        let manager = JwtManager::new("test-secret", 3600);
        let token = manager.generate_token(42).unwrap();
        let claims = manager.validate_token(&token).unwrap();
        assert_eq!(claims.user_id, 42);
        assert_eq!(claims.sub, "42");
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let manager = JwtManager::new("test-secret", 3600);
        let other = JwtManager::new("other-secret", 3600);
        let token = other.generate_token(42).unwrap();
        assert!(manager.validate_token(&token).is_err());
    }

    #[test]
    fn garbage_token_is_rejected() {
        let manager = JwtManager::new("test-secret", 3600);
        assert!(manager.validate_token("not-a-jwt").is_err());
    }
}
