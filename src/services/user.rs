//! User service implementation
//!
//! Account administration for ADMIN users and the `/api/me` profile view.
//! Deactivating an account revokes every session it holds; any other change
//! drops the account's cached sessions.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::database::DatabaseService;
use crate::models::{CreateUserRequest, Registration, Role, UpdateUserRequest, User};
use crate::services::auth::{check_password, hash_password, AuthService, CurrentUser};
use crate::utils::errors::{EventBuddyError, FieldErrors, Result};
use crate::utils::helpers::{is_valid_email, normalize_email, Page, PageQuery};
use crate::utils::logging::log_admin_action;

#[derive(Debug, Clone, Deserialize)]
pub struct AdminCreateUser {
    pub email: String,
    pub name: String,
    pub password: String,
    #[serde(default = "default_role")]
    pub role: Role,
}

fn default_role() -> Role {
    Role::User
}

/// Query string of the user listing
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserListQuery {
    pub search: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

impl UserListQuery {
    pub fn paging(&self) -> PageQuery {
        PageQuery { page: self.page, page_size: self.page_size }
    }
}

/// The caller's account with their registrations
#[derive(Debug, Clone, Serialize)]
pub struct Profile {
    pub user: User,
    pub registrations: Vec<Registration>,
}

/// User service for account administration
#[derive(Clone)]
pub struct UserService {
    db: DatabaseService,
    auth: AuthService,
}

impl UserService {
    /// Create a new UserService instance
    pub fn new(db: DatabaseService, auth: AuthService) -> Self {
        Self { db, auth }
    }

    pub async fn list(&self, query: &UserListQuery) -> Result<Page<User>> {
        let paging = query.paging();
        let search = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let users = self
            .db
            .users
            .list(search, paging.page_size(), paging.offset())
            .await?;
        let total = self.db.users.count(search).await?;
        debug!(count = users.len(), total, "Users listed");
        Ok(Page::new(users, &paging, Some(total)))
    }

    pub async fn get(&self, user_id: i64) -> Result<User> {
        self.db
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(EventBuddyError::UserNotFound { user_id })
    }

    /// Create an account with a password and any role
    pub async fn create(&self, admin: &CurrentUser, request: AdminCreateUser) -> Result<User> {
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

        if self.db.users.find_by_email(&email).await?.is_some() {
            return Err(EventBuddyError::Conflict("An account with this email already exists".to_string()));
        }

        let user = self
            .db
            .users
            .create(CreateUserRequest {
                email,
                name,
                password_hash: Some(hash_password(&request.password)?),
                role: request.role,
            })
            .await?;

        log_admin_action(admin.id, "create_user", Some(&user.email), Some(user.role.as_str()));
        Ok(user)
    }

    /// Update name, role or active flag
    pub async fn update(&self, admin: &CurrentUser, user_id: i64, request: UpdateUserRequest) -> Result<User> {
        if let Some(name) = &request.name {
            if name.trim().is_empty() {
                return Err(EventBuddyError::field("name", "Name is required"));
            }
        }
        if user_id == admin.id && (request.is_active == Some(false) || request.role.is_some_and(|r| r != Role::Admin)) {
            return Err(EventBuddyError::PermissionDenied(
                "Administrators cannot demote or deactivate themselves".to_string(),
            ));
        }

        let deactivating = request.is_active == Some(false);
        let request = UpdateUserRequest {
            name: request.name.map(|n| n.trim().to_string()),
            ..request
        };
        let user = self.db.users.update(user_id, request).await?;

        if deactivating {
            self.auth.revoke_user_sessions(user_id).await?;
        } else {
            self.auth.forget_user_sessions(user_id).await?;
        }

        log_admin_action(admin.id, "update_user", Some(&user.email), None);
        Ok(user)
    }

    pub async fn delete(&self, admin: &CurrentUser, user_id: i64) -> Result<()> {
        if user_id == admin.id {
            return Err(EventBuddyError::PermissionDenied("Administrators cannot delete themselves".to_string()));
        }

        self.auth.revoke_user_sessions(user_id).await?;
        if !self.db.users.delete(user_id).await? {
            return Err(EventBuddyError::UserNotFound { user_id });
        }

        log_admin_action(admin.id, "delete_user", Some(&user_id.to_string()), None);
        info!(user_id, "User deleted");
        Ok(())
    }

    /// The caller's account and registrations
    pub async fn profile(&self, current: &CurrentUser) -> Result<Profile> {
        let user = self.get(current.id).await?;
        let registrations = self.db.registrations.list_by_user(current.id).await?;
        Ok(Profile { user, registrations })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_request_defaults_to_user_role() {
        let request: AdminCreateUser =
            serde_json::from_str(r#"{"email":"a@example.org","name":"A","password":"secret123"}"#).unwrap();
        assert_eq!(request.role, Role::User);
    }

    #[test]
    fn test_list_query_paging() {
        let query: UserListQuery = serde_json::from_str(r#"{"search":"ada","page":2,"page_size":5}"#).unwrap();
        assert_eq!(query.search.as_deref(), Some("ada"));
        assert_eq!(query.paging().offset(), 5);
    }
}
