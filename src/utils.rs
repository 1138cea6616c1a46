use crate::{
    config::Config,
    errors::{AppError, AppResult},
    models::{Claims, UserId},
};
use anyhow::anyhow;
use argon2::password_hash::rand_core::OsRng;
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use chrono::{DateTime, Duration, Utc};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use std::{num::NonZeroU32, sync::Arc};

pub type KeyedRateLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Hash a plaintext password using Argon2.
///
/// # Errors
/// Returns an error if hashing fails.
pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Anyhow(anyhow!(e.to_string())))?
        .to_string();
    Ok(hash)
}

/// Verify a plaintext password against a stored hash.
///
/// # Errors
/// Returns an error if the hash format is invalid.
pub fn verify_password(password: &str, hash: &str) -> AppResult<bool> {
    let parsed_hash =
        PasswordHash::new(hash).map_err(|e| AppError::Anyhow(anyhow!(e.to_string())))?;
    let argon2 = Argon2::default();
    Ok(argon2
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// Create access and refresh JWT tokens for a user.
///
/// # Errors
/// Returns an error if token encoding fails or time conversion fails.
pub fn create_jwt_tokens(user_id: UserId, config: &Config) -> AppResult<(String, String)> {
    let key = EncodingKey::from_secret(config.jwt_secret.as_bytes());
    let now = Utc::now();
    let access_ttl = Duration::minutes(i64::from(config.access_token_ttl_minutes));
    let refresh_ttl = Duration::days(i64::from(config.refresh_token_ttl_days));

    let access = encode_token(user_id, now + access_ttl, false, &key)?;
    let refresh = encode_token(user_id, now + refresh_ttl, true, &key)?;
    Ok((access, refresh))
}

fn encode_token(
    user_id: UserId,
    expires_at: DateTime<Utc>,
    refresh: bool,
    key: &EncodingKey,
) -> AppResult<String> {
    let exp = usize::try_from(expires_at.timestamp())
        .map_err(|e| AppError::Anyhow(anyhow!(e.to_string())))?;
    let claims = Claims {
        sub: user_id,
        exp,
        refresh,
    };
    encode(&Header::default(), &claims, key).map_err(|e| AppError::Anyhow(e.into()))
}

/// Decode and validate a JWT token.
///
/// # Errors
/// Returns Unauthorized if decoding fails.
pub fn decode_jwt(token: &str, config: &Config) -> AppResult<Claims> {
    let key = DecodingKey::from_secret(config.jwt_secret.as_bytes());
    let data = decode::<Claims>(token, &key, &Validation::default())
        .map_err(|_| AppError::Unauthorized)?;
    Ok(data.claims)
}

/// Build a keyed rate limiter allowing `per_minute` requests per key.
/// A zero quota is treated as one request per minute.
#[must_use]
pub fn build_rate_limiter(per_minute: u32) -> Arc<KeyedRateLimiter> {
    let quota = Quota::per_minute(NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN));
    Arc::new(RateLimiter::keyed(quota))
}
