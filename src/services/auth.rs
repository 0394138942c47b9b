//! Authentication service implementation
//!
//! This service handles password hashing, login and signup, and the session
//! cookie. The cookie carries an access token, a refresh token and the device
//! fingerprint it was issued to. A request is authenticated only when the
//! fingerprint recomputed from its headers matches both the cookie and the
//! stored session. An expired access token is replaced using the refresh
//! token, which is rotated on every use.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use axum_extra::extract::cookie::{Cookie, SameSite};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::AuthConfig;
use crate::database::DatabaseService;
use crate::models::{CreateSessionRequest, CreateUserRequest, Role, Session, User};
use crate::services::redis::RedisService;
use crate::utils::errors::{EventBuddyError, FieldErrors, Result};
use crate::utils::helpers::{generate_random_string, is_valid_email, normalize_email, sha256_hex};
use crate::utils::logging::log_auth_event;

pub const MIN_PASSWORD_LENGTH: usize = 8;
const REFRESH_TOKEN_LENGTH: usize = 48;

/// Request headers that identify the client device
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub user_agent: Option<String>,
    pub accept_language: Option<String>,
    pub ip_address: Option<String>,
}

impl ClientInfo {
    /// SHA-256 hex of `User-Agent` and `Accept-Language`
    pub fn fingerprint(&self) -> String {
        sha256_hex(&format!(
            "{}\n{}",
            self.user_agent.as_deref().unwrap_or_default(),
            self.accept_language.as_deref().unwrap_or_default()
        ))
    }
}

/// Decoded content of the session cookie
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionCookie {
    pub access_token: String,
    pub refresh_token: String,
    pub fingerprint: String,
}

impl SessionCookie {
    /// base64url(JSON)
    pub fn encode(&self) -> Result<String> {
        Ok(URL_SAFE_NO_PAD.encode(serde_json::to_vec(self)?))
    }

    pub fn decode(value: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(value.trim())
            .map_err(|_| EventBuddyError::Authentication("Malformed session cookie".to_string()))?;
        serde_json::from_slice(&bytes)
            .map_err(|_| EventBuddyError::Authentication("Malformed session cookie".to_string()))
    }
}

/// Claims of an access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: i64,
    pub sid: i64,
    pub role: Role,
    pub exp: i64,
}

/// The authenticated caller of a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub session_id: i64,
}

impl CurrentUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Cached view of a validated session
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedSession {
    user: CurrentUser,
    fingerprint: String,
    expires_at: DateTime<Utc>,
}

/// Outcome of authenticating a request
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub user: CurrentUser,
    /// New cookie value when the access token was refreshed
    pub refreshed_cookie: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub name: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Hash a password into a PHC string
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| EventBuddyError::Internal(format!("Password hashing failed: {}", e)))
}

/// Check a password against a PHC string
pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok(),
        Err(e) => {
            warn!(error = %e, "Stored password hash is malformed");
            false
        }
    }
}

/// Password rules for new accounts
pub fn check_password(password: &str, errors: &mut FieldErrors) {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        errors
            .entry("password".to_string())
            .or_default()
            .push(format!("Password must be at least {} characters", MIN_PASSWORD_LENGTH));
    }
}

/// Authentication service for sessions and credentials
#[derive(Clone)]
pub struct AuthService {
    db: DatabaseService,
    cache: Option<RedisService>,
    config: AuthConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl AuthService {
    /// Create a new AuthService instance
    pub fn new(db: DatabaseService, cache: Option<RedisService>, config: AuthConfig) -> Self {
        let secret = config.jwt_secret.as_bytes();
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            db,
            cache,
            config,
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.config.cookie_name
    }

    /// Session cookie carrying `value`
    pub fn session_cookie(&self, value: String) -> Cookie<'static> {
        Cookie::build((self.config.cookie_name.clone(), value))
            .http_only(true)
            .same_site(SameSite::Lax)
            .path("/")
            .secure(self.config.secure_cookies)
            .build()
    }

    /// Cookie that clears the session cookie
    pub fn removal_cookie(&self) -> Cookie<'static> {
        Cookie::build((self.config.cookie_name.clone(), ""))
            .path("/")
            .build()
    }

    pub fn issue_access_token(&self, user_id: i64, session_id: i64, role: Role) -> Result<String> {
        let claims = AccessClaims {
            sub: user_id,
            sid: session_id,
            role,
            exp: (Utc::now() + Duration::minutes(self.config.access_token_ttl_minutes)).timestamp(),
        };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?)
    }

    fn decode_access_token(&self, token: &str, check_expiry: bool) -> Result<AccessClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = check_expiry;
        if !check_expiry {
            validation.required_spec_claims.clear();
        }
        Ok(decode::<AccessClaims>(token, &self.decoding_key, &validation)?.claims)
    }

    /// Log in with email and password; returns the user and the cookie value
    pub async fn login(&self, request: LoginRequest, client: &ClientInfo) -> Result<(User, String)> {
        let email = normalize_email(&request.email);
        let user = self.db.users.find_by_email(&email).await?;

        let user = match user {
            Some(user) if user.is_active => match &user.password_hash {
                Some(hash) if verify_password(&request.password, hash) => user,
                _ => {
                    log_auth_event(&email, "bad_credentials", client.ip_address.as_deref());
                    return Err(EventBuddyError::Authentication("Invalid email or password".to_string()));
                }
            },
            _ => {
                log_auth_event(&email, "unknown_or_inactive", client.ip_address.as_deref());
                return Err(EventBuddyError::Authentication("Invalid email or password".to_string()));
            }
        };

        let cookie = self.start_session(&user, client).await?;
        log_auth_event(&email, "success", client.ip_address.as_deref());
        Ok((user, cookie))
    }

    /// Create an account, or claim a placeholder account created by an
    /// invitation, and log it in
    pub async fn signup(&self, request: SignupRequest, client: &ClientInfo) -> Result<(User, String)> {
        let email = normalize_email(&request.email);
        let name = request.name.trim().to_string();

        let mut errors = FieldErrors::new();
        if !is_valid_email(&email) {
            errors.entry("email".to_string()).or_default().push("Enter a valid email address".to_string());
        }
        if name.is_empty() {
            errors.entry("name".to_string()).or_default().push("Name is required".to_string());
        }
        check_password(&request.password, &mut errors);
        if !errors.is_empty() {
            return Err(EventBuddyError::Validation(errors));
        }

        let password_hash = hash_password(&request.password)?;
        let user = match self.db.users.find_by_email(&email).await? {
            Some(existing) if existing.is_placeholder() => {
                info!(user_id = existing.id, "Placeholder account claimed");
                self.db.users.set_password(existing.id, &password_hash, Some(&name)).await?
            }
            Some(_) => {
                return Err(EventBuddyError::Conflict("An account with this email already exists".to_string()));
            }
            None => {
                self.db
                    .users
                    .create(CreateUserRequest {
                        email: email.clone(),
                        name,
                        password_hash: Some(password_hash),
                        role: Role::User,
                    })
                    .await?
            }
        };

        let cookie = self.start_session(&user, client).await?;
        log_auth_event(&email, "success", client.ip_address.as_deref());
        Ok((user, cookie))
    }

    async fn start_session(&self, user: &User, client: &ClientInfo) -> Result<String> {
        let refresh_token = generate_random_string(REFRESH_TOKEN_LENGTH);
        let fingerprint = client.fingerprint();

        let session = self
            .db
            .sessions
            .create(CreateSessionRequest {
                user_id: user.id,
                refresh_token_hash: sha256_hex(&refresh_token),
                fingerprint: fingerprint.clone(),
                user_agent: client.user_agent.clone(),
                ip_address: client.ip_address.clone(),
                expires_at: Utc::now() + Duration::days(self.config.refresh_token_ttl_days),
            })
            .await?;

        let access_token = self.issue_access_token(user.id, session.id, user.role)?;
        debug!(user_id = user.id, session_id = session.id, "Session started");

        SessionCookie {
            access_token,
            refresh_token,
            fingerprint,
        }
        .encode()
    }

    /// Authenticate a request from its session cookie value and headers
    pub async fn authenticate(&self, cookie_value: &str, client: &ClientInfo) -> Result<Authenticated> {
        let cookie = SessionCookie::decode(cookie_value)?;
        let fingerprint = client.fingerprint();
        if cookie.fingerprint != fingerprint {
            warn!(ip = client.ip_address.as_deref().unwrap_or("unknown"), "Session fingerprint mismatch");
            return Err(EventBuddyError::Authentication("Session is not valid for this device".to_string()));
        }

        match self.decode_access_token(&cookie.access_token, true) {
            Ok(claims) => {
                let user = self.load_session_user(&claims, &fingerprint).await?;
                Ok(Authenticated { user, refreshed_cookie: None })
            }
            Err(EventBuddyError::Token(e)) if matches!(e.kind(), ErrorKind::ExpiredSignature) => {
                let claims = self.decode_access_token(&cookie.access_token, false)?;
                self.refresh(&claims, &cookie, &fingerprint).await
            }
            Err(_) => Err(EventBuddyError::Authentication("Invalid session".to_string())),
        }
    }

    async fn load_session_user(&self, claims: &AccessClaims, fingerprint: &str) -> Result<CurrentUser> {
        if let Some(cache) = &self.cache {
            match cache.cached_session::<CachedSession>(claims.sid).await {
                Ok(Some(cached)) if cached.fingerprint == fingerprint && cached.expires_at > Utc::now() => {
                    return Ok(cached.user);
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, session_id = claims.sid, "Session cache read failed"),
            }
        }

        let session = self.active_session(claims.sid, fingerprint).await?;
        let user = self.active_user(session.user_id).await?;
        let current = CurrentUser {
            id: user.id,
            email: user.email,
            name: user.name,
            role: user.role,
            session_id: session.id,
        };

        if let Some(cache) = &self.cache {
            let cached = CachedSession {
                user: current.clone(),
                fingerprint: session.fingerprint.clone(),
                expires_at: session.expires_at,
            };
            if let Err(e) = cache.cache_session(session.id, &cached).await {
                warn!(error = %e, session_id = session.id, "Session cache write failed");
            }
        }

        Ok(current)
    }

    async fn active_session(&self, session_id: i64, fingerprint: &str) -> Result<Session> {
        let session = self
            .db
            .sessions
            .find_by_id(session_id)
            .await?
            .ok_or_else(|| EventBuddyError::Authentication("Session not found".to_string()))?;

        if !session.is_active(Utc::now()) {
            return Err(EventBuddyError::Authentication("Session has expired".to_string()));
        }
        if session.fingerprint != fingerprint {
            warn!(session_id, "Session fingerprint mismatch");
            return Err(EventBuddyError::Authentication("Session is not valid for this device".to_string()));
        }
        Ok(session)
    }

    async fn active_user(&self, user_id: i64) -> Result<User> {
        match self.db.users.find_by_id(user_id).await? {
            Some(user) if user.is_active => Ok(user),
            _ => Err(EventBuddyError::Authentication("Account is not active".to_string())),
        }
    }

    async fn refresh(&self, claims: &AccessClaims, cookie: &SessionCookie, fingerprint: &str) -> Result<Authenticated> {
        let session = self.active_session(claims.sid, fingerprint).await?;
        let user = self.active_user(session.user_id).await?;

        let refresh_token = generate_random_string(REFRESH_TOKEN_LENGTH);
        let rotated = self
            .db
            .sessions
            .rotate(
                session.id,
                &sha256_hex(&cookie.refresh_token),
                &sha256_hex(&refresh_token),
                Utc::now() + Duration::days(self.config.refresh_token_ttl_days),
            )
            .await?
            .ok_or_else(|| EventBuddyError::Authentication("Session has expired".to_string()))?;

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.invalidate_session(rotated.id).await {
                warn!(error = %e, session_id = rotated.id, "Session cache invalidation failed");
            }
        }

        let access_token = self.issue_access_token(user.id, rotated.id, user.role)?;
        let cookie = SessionCookie {
            access_token,
            refresh_token,
            fingerprint: fingerprint.to_string(),
        }
        .encode()?;

        debug!(user_id = user.id, session_id = rotated.id, "Access token refreshed");
        Ok(Authenticated {
            user: CurrentUser {
                id: user.id,
                email: user.email,
                name: user.name,
                role: user.role,
                session_id: rotated.id,
            },
            refreshed_cookie: Some(cookie),
        })
    }

    /// Revoke the session named by a cookie. Unreadable cookies are ignored.
    pub async fn logout(&self, cookie_value: &str) -> Result<()> {
        let claims = match SessionCookie::decode(cookie_value)
            .and_then(|cookie| self.decode_access_token(&cookie.access_token, false))
        {
            Ok(claims) => claims,
            Err(_) => return Ok(()),
        };

        self.db.sessions.revoke(claims.sid).await?;
        self.forget_session(claims.sid).await;
        info!(user_id = claims.sub, session_id = claims.sid, "Logged out");
        Ok(())
    }

    /// Revoke every session of a user
    pub async fn revoke_user_sessions(&self, user_id: i64) -> Result<()> {
        let revoked = self.db.sessions.revoke_all_for_user(user_id).await?;
        for session_id in &revoked {
            self.forget_session(*session_id).await;
        }
        info!(user_id, revoked = revoked.len(), "Sessions revoked");
        Ok(())
    }

    /// Drop cached copies of a user's sessions so the next request reloads
    /// the account from the database
    pub async fn forget_user_sessions(&self, user_id: i64) -> Result<()> {
        if self.cache.is_none() {
            return Ok(());
        }
        let sessions = self.db.sessions.active_ids_for_user(user_id, Utc::now()).await?;
        for session_id in &sessions {
            self.forget_session(*session_id).await;
        }
        debug!(user_id, sessions = sessions.len(), "Cached sessions dropped");
        Ok(())
    }

    async fn forget_session(&self, session_id: i64) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.invalidate_session(session_id).await {
                warn!(error = %e, session_id, "Session cache invalidation failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use assert_matches::assert_matches;
    use sqlx::postgres::PgPoolOptions;

    fn service() -> AuthService {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgresql://test@localhost/test")
            .expect("lazy pool");
        let mut config = Settings::default().auth;
        config.jwt_secret = "0123456789abcdef0123456789abcdef".to_string();
        AuthService::new(DatabaseService::new(pool), None, config)
    }

    fn client(user_agent: &str) -> ClientInfo {
        ClientInfo {
            user_agent: Some(user_agent.to_string()),
            accept_language: Some("en-GB".to_string()),
            ip_address: Some("127.0.0.1".to_string()),
        }
    }

    #[test]
    fn test_password_hash_and_verify() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
        assert!(!verify_password("correct horse", "not-a-hash"));
    }

    #[test]
    fn test_fingerprint_depends_on_headers() {
        assert_eq!(client("Firefox").fingerprint(), client("Firefox").fingerprint());
        assert_ne!(client("Firefox").fingerprint(), client("Chrome").fingerprint());
        assert_eq!(client("Firefox").fingerprint().len(), 64);
    }

    #[test]
    fn test_session_cookie_round_trip() {
        let cookie = SessionCookie {
            access_token: "a.b.c".to_string(),
            refresh_token: "r".repeat(48),
            fingerprint: client("Firefox").fingerprint(),
        };
        let encoded = cookie.encode().unwrap();
        assert!(!encoded.contains('='));
        assert_eq!(SessionCookie::decode(&encoded).unwrap(), cookie);
        assert_matches!(SessionCookie::decode("%%%"), Err(EventBuddyError::Authentication(_)));
    }

    #[tokio::test]
    async fn test_access_token_claims() {
        let service = service();
        let token = service.issue_access_token(5, 9, Role::Organizer).unwrap();
        let claims = service.decode_access_token(&token, true).unwrap();
        assert_eq!((claims.sub, claims.sid, claims.role), (5, 9, Role::Organizer));
    }

    #[tokio::test]
    async fn test_fingerprint_mismatch_is_rejected_before_database() {
        let service = service();
        let cookie = SessionCookie {
            access_token: service.issue_access_token(5, 9, Role::User).unwrap(),
            refresh_token: "r".repeat(48),
            fingerprint: client("Firefox").fingerprint(),
        }
        .encode()
        .unwrap();

        let result = service.authenticate(&cookie, &client("Chrome")).await;
        assert_matches!(result, Err(EventBuddyError::Authentication(message)) if message.contains("device"));
    }

    #[tokio::test]
    async fn test_forged_token_is_rejected() {
        let service = service();
        let cookie = SessionCookie {
            access_token: "forged.token.value".to_string(),
            refresh_token: "r".repeat(48),
            fingerprint: client("Firefox").fingerprint(),
        }
        .encode()
        .unwrap();

        assert_matches!(
            service.authenticate(&cookie, &client("Firefox")).await,
            Err(EventBuddyError::Authentication(_))
        );
    }

    #[test]
    fn test_password_rules() {
        let mut errors = FieldErrors::new();
        check_password("short", &mut errors);
        assert!(errors.contains_key("password"));
    }

    #[tokio::test]
    async fn test_session_cookie_attributes() {
        let cookie = service().session_cookie("value".to_string());
        assert_eq!(cookie.name(), "eventbuddy_session");
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.path(), Some("/"));
    }
}
