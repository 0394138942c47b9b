//! Session repository implementation

use sqlx::PgPool;
use chrono::{DateTime, Utc};
use crate::models::session::{Session, CreateSessionRequest};
use crate::utils::errors::EventBuddyError;

const SESSION_COLUMNS: &str = "id, user_id, refresh_token_hash, fingerprint, user_agent, ip_address, expires_at, last_used_at, revoked_at, created_at";

#[derive(Debug, Clone)]
pub struct SessionRepository {
    pool: PgPool,
}

impl SessionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a new session
    pub async fn create(&self, request: CreateSessionRequest) -> Result<Session, EventBuddyError> {
        let session = sqlx::query_as::<_, Session>(&format!(
            r#"
            INSERT INTO sessions (user_id, refresh_token_hash, fingerprint, user_agent, ip_address, expires_at, last_used_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {}
            "#,
            SESSION_COLUMNS
        ))
        .bind(request.user_id)
        .bind(request.refresh_token_hash)
        .bind(request.fingerprint)
        .bind(request.user_agent)
        .bind(request.ip_address)
        .bind(request.expires_at)
        .bind(Utc::now())
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(session)
    }

    /// Find session by ID
    pub async fn find_by_id(&self, id: i64) -> Result<Option<Session>, EventBuddyError> {
        let session = sqlx::query_as::<_, Session>(&format!("SELECT {} FROM sessions WHERE id = $1", SESSION_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(session)
    }

    /// Replace the refresh token of an active session. Returns None when the
    /// session was revoked or the presented token was already rotated away.
    pub async fn rotate(
        &self,
        id: i64,
        current_hash: &str,
        new_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<Session>, EventBuddyError> {
        let session = sqlx::query_as::<_, Session>(&format!(
            r#"
            UPDATE sessions
            SET refresh_token_hash = $3, expires_at = $4, last_used_at = $5
            WHERE id = $1 AND refresh_token_hash = $2 AND revoked_at IS NULL AND expires_at > $5
            RETURNING {}
            "#,
            SESSION_COLUMNS
        ))
        .bind(id)
        .bind(current_hash)
        .bind(new_hash)
        .bind(expires_at)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }

    /// Revoke a session
    pub async fn revoke(&self, id: i64) -> Result<(), EventBuddyError> {
        sqlx::query("UPDATE sessions SET revoked_at = $2 WHERE id = $1 AND revoked_at IS NULL")
            .bind(id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Revoke every session of a user, returning the revoked ids
    pub async fn revoke_all_for_user(&self, user_id: i64) -> Result<Vec<i64>, EventBuddyError> {
        let revoked: Vec<(i64,)> = sqlx::query_as(
            "UPDATE sessions SET revoked_at = $2 WHERE user_id = $1 AND revoked_at IS NULL RETURNING id"
        )
        .bind(user_id)
        .bind(Utc::now())
        .fetch_all(&self.pool)
        .await?;

        Ok(revoked.into_iter().map(|(id,)| id).collect())
    }

    /// Ids of a user's sessions that are neither revoked nor expired
    pub async fn active_ids_for_user(&self, user_id: i64, now: DateTime<Utc>) -> Result<Vec<i64>, EventBuddyError> {
        let ids: Vec<(i64,)> = sqlx::query_as(
            "SELECT id FROM sessions WHERE user_id = $1 AND revoked_at IS NULL AND expires_at > $2"
        )
        .bind(user_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    /// Delete expired and revoked sessions
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, EventBuddyError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= $1 OR revoked_at IS NOT NULL")
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
