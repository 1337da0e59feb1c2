//! Session tokens and password hashing.
//!
//! Tokens are HS256 JWTs carrying only the user id; permissions are loaded
//! from the database on every request so role changes apply immediately.

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::{Rng, distr::Alphanumeric};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    config::Config,
    db::DbPool,
    error::AppError,
    models::user::{LoginRequest, LoginResponse, User},
};

const AUDIENCE: &str = "practice-ledger-api";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    pub iss: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
}

pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    ttl: Duration,
}

impl JwtService {
    pub fn new(config: &Config) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            issuer: config.jwt_issuer.clone(),
            ttl: Duration::seconds(config.jwt_ttl_secs as i64),
        }
    }

    pub fn ttl_secs(&self) -> i64 {
        self.ttl.num_seconds()
    }

    pub fn issue(&self, user_id: Uuid) -> Result<String, AppError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            iss: self.issuer.clone(),
            aud: AUDIENCE.to_string(),
            exp: (now + self.ttl).timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("token encoding failed: {e}")))
    }

    /// Validate signature, issuer, audience and expiry, returning the user id.
    pub fn verify(&self, token: &str) -> Result<Uuid, AppError> {
        let mut validation = Validation::default();
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[AUDIENCE]);

        let data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            tracing::debug!(error = %e, "rejected bearer token");
            AppError::Unauthorized
        })?;

        Uuid::parse_str(&data.claims.sub).map_err(|_| AppError::Unauthorized)
    }
}

pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("password hashing failed: {e}")))
}

pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::warn!(error = %e, "stored password hash is malformed");
            false
        }
    }
}

pub fn validate_password_policy(password: &str) -> Result<(), AppError> {
    if password.chars().count() < 10 {
        return Err(AppError::InvalidRequest(
            "Password must be at least 10 characters".to_string(),
        ));
    }
    Ok(())
}

/// 16 random alphanumeric characters, handed out once when an admin creates a user.
pub fn generate_temporary_password() -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(16)
        .map(char::from)
        .collect()
}

/// Check credentials and issue a token.
///
/// Unknown emails, wrong passwords and inactive users all produce the same
/// `Unauthorized` error.
pub async fn login(
    pool: &DbPool,
    jwt: &JwtService,
    request: LoginRequest,
) -> Result<LoginResponse, AppError> {
    let email = request.email.trim().to_lowercase();

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
        .bind(&email)
        .fetch_optional(pool)
        .await?;

    let Some(user) = user else {
        tracing::info!(%email, "login failed: unknown email");
        return Err(AppError::Unauthorized);
    };

    if !user.is_active || !verify_password(&request.password, &user.password_hash) {
        tracing::info!(user_id = %user.id, "login failed");
        return Err(AppError::Unauthorized);
    }

    let user = sqlx::query_as::<_, User>(
        "UPDATE users SET last_login_at = NOW() WHERE id = $1 RETURNING *",
    )
    .bind(user.id)
    .fetch_one(pool)
    .await?;

    let access_token = jwt.issue(user.id)?;
    tracing::info!(user_id = %user.id, "user signed in");

    Ok(LoginResponse {
        access_token,
        token_type: "Bearer",
        expires_in: jwt.ttl_secs(),
        user: user.into(),
    })
}

/// Create the first administrator when the `users` table is empty.
///
/// Returns `false` when users already exist; the credentials are then ignored.
pub async fn bootstrap_admin(pool: &DbPool, email: &str, password: &str) -> Result<bool, AppError> {
    validate_password_policy(password)?;
    let password_hash = hash_password(password)?;

    let mut tx = pool.begin().await?;
    sqlx::query("LOCK TABLE users IN EXCLUSIVE MODE")
        .execute(&mut *tx)
        .await?;

    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(&mut *tx)
        .await?;
    if existing > 0 {
        return Ok(false);
    }

    let user_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO users (email, password_hash, full_name, role_id)
        SELECT $1, $2, 'Administrator', id FROM roles WHERE name = 'admin'
        RETURNING id
        "#,
    )
    .bind(email.trim().to_lowercase())
    .bind(&password_hash)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::Internal("admin role is missing".to_string()))?;

    crate::services::audit_service::record(
        &mut *tx,
        None,
        "user.bootstrapped",
        "user",
        user_id,
        None,
    )
    .await?;

    tx.commit().await?;
    tracing::info!(%user_id, "bootstrap administrator created");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;

    #[test]
    fn issued_token_verifies() {
        let jwt = JwtService::new(&test_config());
        let user_id = Uuid::new_v4();
        let token = jwt.issue(user_id).unwrap();
        assert_eq!(jwt.verify(&token).unwrap(), user_id);
    }

    #[test]
    fn token_from_other_secret_is_rejected() {
        let jwt = JwtService::new(&test_config());
        let mut other_config = test_config();
        other_config.jwt_secret = "a-completely-different-secret-of-32-chars".to_string();
        let other = JwtService::new(&other_config);

        let token = other.issue(Uuid::new_v4()).unwrap();
        assert!(matches!(jwt.verify(&token), Err(AppError::Unauthorized)));
    }

    #[test]
    fn token_from_other_issuer_is_rejected() {
        let jwt = JwtService::new(&test_config());
        let mut other_config = test_config();
        other_config.jwt_issuer = "someone-else".to_string();
        let other = JwtService::new(&other_config);

        let token = other.issue(Uuid::new_v4()).unwrap();
        assert!(jwt.verify(&token).is_err());
    }

    #[test]
    fn garbage_token_is_rejected() {
        let jwt = JwtService::new(&test_config());
        assert!(jwt.verify("not.a.jwt").is_err());
    }

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("correct horse battery").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse battery", &hash));
        assert!(!verify_password("wrong horse battery", &hash));
        assert!(!verify_password("anything", "not-a-phc-string"));
    }

    #[test]
    fn short_passwords_fail_policy() {
        assert!(validate_password_policy("short").is_err());
        assert!(validate_password_policy("long-enough-pass").is_ok());
    }

    #[test]
    fn temporary_passwords_meet_policy() {
        let password = generate_temporary_password();
        assert_eq!(password.len(), 16);
        assert!(validate_password_policy(&password).is_ok());
    }
}
