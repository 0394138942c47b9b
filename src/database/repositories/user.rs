//! User repository implementation

use sqlx::{PgConnection, PgPool};
use chrono::Utc;
use crate::models::user::{User, Role, CreateUserRequest, UpdateUserRequest};
use crate::utils::errors::EventBuddyError;

#[derive(Debug, Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a new user
    pub async fn create(&self, request: CreateUserRequest) -> Result<User, EventBuddyError> {
        let mut conn = self.pool.acquire().await?;
        Self::create_tx(&mut conn, request).await
    }

    /// Create a new user on an existing connection or transaction
    pub async fn create_tx(conn: &mut PgConnection, request: CreateUserRequest) -> Result<User, EventBuddyError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (email, name, password_hash, role, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, email, name, password_hash, role, is_active, created_at, updated_at
            "#
        )
        .bind(request.email)
        .bind(request.name)
        .bind(request.password_hash)
        .bind(request.role)
        .bind(Utc::now())
        .bind(Utc::now())
        .fetch_one(conn)
        .await?;

        Ok(user)
    }

    /// Find user by ID
    pub async fn find_by_id(&self, id: i64) -> Result<Option<User>, EventBuddyError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, email, name, password_hash, role, is_active, created_at, updated_at FROM users WHERE id = $1"
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    /// Find user by (normalized) email
    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>, EventBuddyError> {
        let mut conn = self.pool.acquire().await?;
        Self::find_by_email_tx(&mut conn, email).await
    }

    pub async fn find_by_email_tx(conn: &mut PgConnection, email: &str) -> Result<Option<User>, EventBuddyError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, email, name, password_hash, role, is_active, created_at, updated_at FROM users WHERE email = $1"
        )
        .bind(email)
        .fetch_optional(conn)
        .await?;

        Ok(user)
    }

    /// Find an account by email or create a passwordless placeholder for it.
    /// Returns the user and whether it was created.
    pub async fn find_or_create_placeholder_tx(conn: &mut PgConnection, email: &str) -> Result<(User, bool), EventBuddyError> {
        if let Some(user) = Self::find_by_email_tx(&mut *conn, email).await? {
            return Ok((user, false));
        }

        let name = email.split('@').next().unwrap_or(email).to_string();
        let user = Self::create_tx(conn, CreateUserRequest {
            email: email.to_string(),
            name,
            password_hash: None,
            role: Role::User,
        }).await?;

        Ok((user, true))
    }

    /// Update user
    pub async fn update(&self, id: i64, request: UpdateUserRequest) -> Result<User, EventBuddyError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET name = COALESCE($2, name),
                role = COALESCE($3, role),
                is_active = COALESCE($4, is_active),
                updated_at = $5
            WHERE id = $1
            RETURNING id, email, name, password_hash, role, is_active, created_at, updated_at
            "#
        )
        .bind(id)
        .bind(request.name)
        .bind(request.role)
        .bind(request.is_active)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(EventBuddyError::UserNotFound { user_id: id })?;

        Ok(user)
    }

    /// Set the password (and optionally the display name) of an account
    pub async fn set_password(&self, id: i64, password_hash: &str, name: Option<&str>) -> Result<User, EventBuddyError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET password_hash = $2,
                name = COALESCE($3, name),
                updated_at = $4
            WHERE id = $1
            RETURNING id, email, name, password_hash, role, is_active, created_at, updated_at
            "#
        )
        .bind(id)
        .bind(password_hash)
        .bind(name)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(EventBuddyError::UserNotFound { user_id: id })?;

        Ok(user)
    }

    /// Delete user
    pub async fn delete(&self, id: i64) -> Result<bool, EventBuddyError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// List users with pagination, optionally filtered by a name/email search
    pub async fn list(&self, search: Option<&str>, limit: i64, offset: i64) -> Result<Vec<User>, EventBuddyError> {
        let users = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, name, password_hash, role, is_active, created_at, updated_at
            FROM users
            WHERE $1::TEXT IS NULL OR name ILIKE $1 OR email ILIKE $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#
        )
        .bind(search.map(|pattern| format!("%{}%", pattern)))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }

    /// Count users, optionally filtered by a name/email search
    pub async fn count(&self, search: Option<&str>) -> Result<i64, EventBuddyError> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM users WHERE $1::TEXT IS NULL OR name ILIKE $1 OR email ILIKE $1"
        )
        .bind(search.map(|pattern| format!("%{}%", pattern)))
        .fetch_one(&self.pool)
        .await?;

        Ok(count.0)
    }
}
