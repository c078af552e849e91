use std::sync::Arc;

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::db::models::User;
use crate::db::UserRepository;
use crate::error::{AppError, AppResult};
use crate::AppState;

/// State carried through the Google OAuth redirect as a signed JWT, so the
/// callback can recover which user initiated the consent flow without a
/// cookie.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarOAuthState {
    pub csrf_token: String,
    pub user_id: String,
    pub iat: usize,
    pub exp: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    pub iat: usize,
}

pub struct AuthService;

impl AuthService {
    /// Create an account. Email shape and password length are validated
    /// here; uniqueness is left to the storage layer.
    pub async fn register(
        state: &Arc<AppState>,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> AppResult<(User, String)> {
        let email = email.trim().to_lowercase();
        if !email.contains('@') || email.len() < 3 {
            return Err(AppError::Validation("A valid email is required".to_string()));
        }
        if password.len() < 8 {
            return Err(AppError::Validation(
                "Password must be at least 8 characters".to_string(),
            ));
        }
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(AppError::Validation("Display name is required".to_string()));
        }

        let password_hash = bcrypt::hash(password, bcrypt::DEFAULT_COST)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to hash password: {}", e)))?;

        let user = UserRepository::insert(&state.db, &email, &password_hash, display_name).await?;

        tracing::info!("Registered user {} ({})", user.id, user.email);

        let token = Self::create_jwt(state, &user.id)?;
        Ok((user, token))
    }

    /// Verify credentials and issue a session token. Unknown email and wrong
    /// password produce the same uniform `Unauthorized`.
    pub async fn login(
        state: &Arc<AppState>,
        email: &str,
        password: &str,
    ) -> AppResult<(User, String)> {
        let email = email.trim().to_lowercase();

        let user = UserRepository::find_by_email(&state.db, &email)
            .await?
            .ok_or(AppError::Unauthorized)?;

        let matches = bcrypt::verify(password, &user.password_hash)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to verify password: {}", e)))?;
        if !matches {
            return Err(AppError::Unauthorized);
        }

        let token = Self::create_jwt(state, &user.id)?;
        Ok((user, token))
    }

    /// Create a signed JWT for a user id
    pub fn create_jwt(state: &Arc<AppState>, user_id: &str) -> AppResult<String> {
        let now = Utc::now();
        let exp = now + Duration::hours(state.config.jwt.expiration_hours);
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now.timestamp() as usize,
            exp: exp.timestamp() as usize,
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(state.config.jwt.secret.as_bytes()),
        )?;
        Ok(token)
    }

    /// Decode and validate a JWT, returning the claims
    pub fn decode_jwt(state: &Arc<AppState>, token: &str) -> AppResult<Claims> {
        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(state.config.jwt.secret.as_bytes()),
            &Validation::default(),
        )?;
        Ok(token_data.claims)
    }

    /// Get user from JWT token
    pub async fn get_user_from_token(state: &Arc<AppState>, token: &str) -> AppResult<User> {
        let claims = Self::decode_jwt(state, token)?;
        let user = UserRepository::find_by_id(&state.db, &claims.sub)
            .await?
            .ok_or(AppError::Unauthorized)?;
        Ok(user)
    }

    /// Generate a short-lived OAuth state JWT for the calendar consent flow
    pub fn generate_calendar_oauth_state(
        state: &Arc<AppState>,
        user_id: String,
    ) -> AppResult<String> {
        let csrf_token = Self::generate_random_string(32);
        let now = Utc::now();
        let iat = now.timestamp() as usize;
        let exp = (now + Duration::minutes(10)).timestamp() as usize;

        let state_claims = CalendarOAuthState {
            csrf_token,
            user_id,
            iat,
            exp,
        };

        let state_jwt = encode(
            &Header::default(),
            &state_claims,
            &EncodingKey::from_secret(state.config.jwt.secret.as_bytes()),
        )?;

        Ok(state_jwt)
    }

    /// Decode and validate a calendar OAuth state JWT
    pub fn decode_calendar_oauth_state(
        state: &Arc<AppState>,
        state_encoded: &str,
    ) -> AppResult<CalendarOAuthState> {
        let token_data = decode::<CalendarOAuthState>(
            state_encoded,
            &DecodingKey::from_secret(state.config.jwt.secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|e| {
            tracing::error!("Failed to decode calendar OAuth state: {:?}", e);
            e
        })?;
        Ok(token_data.claims)
    }

    /// Generate random string
    pub fn generate_random_string(length: usize) -> String {
        use rand::Rng;
        const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
        let mut rng = rand::thread_rng();
        (0..length)
            .map(|_| {
                let idx = rng.gen_range(0..CHARSET.len());
                CHARSET[idx] as char
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_strings_have_requested_length() {
        let s = AuthService::generate_random_string(32);
        assert_eq!(s.len(), 32);
        assert!(s.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
