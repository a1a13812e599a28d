//! User repository
//!
//! Database operations for users.
//!
//! This module provides:
//! - `UserRepository` trait defining the interface for user data access
//! - `SqlxUserRepository` implementing the trait for SQLite and MySQL

use crate::db::{DynDatabasePool, InsertId};
use crate::models::{
    CreateUserInput, ListParams, UpdateProfileInput, User, UserFilter, UserRole, UserStatus,
};
use crate::with_pool;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use std::str::FromStr;
use std::sync::Arc;

const USER_COLUMNS: &str = "id, username, email, password_hash, display_name, bio, role, status, \
     is_verified, is_premium, preferred_language, last_login_at, created_at, updated_at";

macro_rules! user_from_row {
    ($row:expr) => {
        User {
            id: $row.try_get("id")?,
            username: $row.try_get("username")?,
            email: $row.try_get("email")?,
            password_hash: $row.try_get("password_hash")?,
            display_name: $row.try_get("display_name")?,
            bio: $row.try_get("bio")?,
            role: UserRole::from_str(&$row.try_get::<String, _>("role")?)?,
            status: UserStatus::from_str(&$row.try_get::<String, _>("status")?)?,
            is_verified: $row.try_get("is_verified")?,
            is_premium: $row.try_get("is_premium")?,
            preferred_language: $row.try_get("preferred_language")?,
            last_login_at: $row.try_get("last_login_at")?,
            created_at: $row.try_get("created_at")?,
            updated_at: $row.try_get("updated_at")?,
        }
    };
}

/// User repository trait
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Create a new user
    async fn create(&self, input: &CreateUserInput) -> Result<User>;

    async fn get_by_id(&self, id: i64) -> Result<Option<User>>;

    async fn get_by_username(&self, username: &str) -> Result<Option<User>>;

    async fn get_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Look a user up by username, falling back to e-mail
    async fn get_by_login(&self, username_or_email: &str) -> Result<Option<User>>;

    /// List users matching `filter`, newest first, with the total count
    async fn list(&self, filter: &UserFilter, params: &ListParams) -> Result<(Vec<User>, i64)>;

    /// Count total users
    async fn count(&self) -> Result<i64>;

    /// Count active administrators
    async fn count_active_admins(&self) -> Result<i64>;

    /// Ids of active users whose role moderates stories
    async fn staff_ids(&self) -> Result<Vec<i64>>;

    async fn update_profile(&self, id: i64, input: &UpdateProfileInput) -> Result<()>;

    async fn update_password(&self, id: i64, password_hash: &str) -> Result<()>;

    async fn update_role(&self, id: i64, role: UserRole) -> Result<()>;

    async fn update_status(&self, id: i64, status: UserStatus) -> Result<()>;

    async fn set_verified(&self, id: i64, verified: bool) -> Result<()>;

    async fn set_premium(&self, id: i64, premium: bool) -> Result<()>;

    async fn touch_last_login(&self, id: i64) -> Result<()>;

    /// Number of stories the user wrote
    async fn story_count(&self, id: i64) -> Result<i64>;

    /// Delete a user. Fails while the user still owns stories.
    async fn delete(&self, id: i64) -> Result<()>;
}

/// SQLx-based user repository implementation
///
/// Supports both SQLite and MySQL databases.
pub struct SqlxUserRepository {
    pool: DynDatabasePool,
}

impl SqlxUserRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn UserRepository> {
        Arc::new(Self::new(pool))
    }

    async fn get_where(&self, column: &str, value: &str) -> Result<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE {} = ?", USER_COLUMNS, column);
        let user = with_pool!(self.pool, pool => {
            let row = sqlx::query(&sql)
                .bind(value)
                .fetch_optional(pool)
                .await
                .with_context(|| format!("Failed to get user by {}", column))?;
            match row {
                Some(row) => Some(user_from_row!(row)),
                None => None,
            }
        });
        Ok(user)
    }

    async fn set_text(&self, id: i64, column: &str, value: String) -> Result<()> {
        let sql = format!("UPDATE users SET {} = ?, updated_at = ? WHERE id = ?", column);
        with_pool!(self.pool, pool => {
            sqlx::query(&sql)
                .bind(&value)
                .bind(Utc::now())
                .bind(id)
                .execute(pool)
                .await
                .with_context(|| format!("Failed to update user {}", column))?;
        });
        Ok(())
    }

    async fn set_flag(&self, id: i64, column: &str, value: bool) -> Result<()> {
        let sql = format!("UPDATE users SET {} = ?, updated_at = ? WHERE id = ?", column);
        with_pool!(self.pool, pool => {
            sqlx::query(&sql)
                .bind(value)
                .bind(Utc::now())
                .bind(id)
                .execute(pool)
                .await
                .with_context(|| format!("Failed to update user {}", column))?;
        });
        Ok(())
    }
}

#[async_trait]
impl UserRepository for SqlxUserRepository {
    async fn create(&self, input: &CreateUserInput) -> Result<User> {
        let now = Utc::now();
        let id = with_pool!(self.pool, pool => {
            sqlx::query(
                r#"
                INSERT INTO users (username, email, password_hash, role, status, is_verified,
                                   is_premium, preferred_language, created_at, updated_at)
                VALUES (?, ?, ?, ?, 'active', ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&input.username)
            .bind(&input.email)
            .bind(&input.password_hash)
            .bind(input.role.to_string())
            .bind(false)
            .bind(false)
            .bind(&input.preferred_language)
            .bind(now)
            .bind(now)
            .execute(pool)
            .await
            .context("Failed to create user")?
            .insert_id()
        });

        let mut user = User::new(
            input.username.clone(),
            input.email.clone(),
            input.password_hash.clone(),
            input.role,
        );
        user.id = id;
        user.preferred_language = input.preferred_language.clone();
        user.created_at = now;
        user.updated_at = now;
        Ok(user)
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS);
        let user = with_pool!(self.pool, pool => {
            let row = sqlx::query(&sql)
                .bind(id)
                .fetch_optional(pool)
                .await
                .context("Failed to get user by ID")?;
            match row {
                Some(row) => Some(user_from_row!(row)),
                None => None,
            }
        });
        Ok(user)
    }

    async fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        self.get_where("username", username).await
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        self.get_where("email", &email.to_lowercase()).await
    }

    async fn get_by_login(&self, username_or_email: &str) -> Result<Option<User>> {
        if let Some(user) = self.get_by_username(username_or_email).await? {
            return Ok(Some(user));
        }
        if username_or_email.contains('@') {
            return self.get_by_email(username_or_email).await;
        }
        Ok(None)
    }

    async fn list(&self, filter: &UserFilter, params: &ListParams) -> Result<(Vec<User>, i64)> {
        let role = filter.role.map(|r| r.to_string());
        let status = filter.status.map(|s| s.to_string());
        let search = filter
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{}%", s));

        let where_sql = "WHERE (? IS NULL OR role = ?) \
                         AND (? IS NULL OR status = ?) \
                         AND (? IS NULL OR username LIKE ? OR email LIKE ?)";
        let list_sql = format!(
            "SELECT {} FROM users {} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
            USER_COLUMNS, where_sql
        );
        let count_sql = format!("SELECT COUNT(*) FROM users {}", where_sql);

        let result = with_pool!(self.pool, pool => {
            let total: i64 = sqlx::query_scalar(&count_sql)
                .bind(&role)
                .bind(&role)
                .bind(&status)
                .bind(&status)
                .bind(&search)
                .bind(&search)
                .bind(&search)
                .fetch_one(pool)
                .await
                .context("Failed to count users")?;

            let rows = sqlx::query(&list_sql)
                .bind(&role)
                .bind(&role)
                .bind(&status)
                .bind(&status)
                .bind(&search)
                .bind(&search)
                .bind(&search)
                .bind(params.limit())
                .bind(params.offset())
                .fetch_all(pool)
                .await
                .context("Failed to list users")?;

            let mut users = Vec::with_capacity(rows.len());
            for row in rows {
                users.push(user_from_row!(row));
            }
            (users, total)
        });
        Ok(result)
    }

    async fn count(&self) -> Result<i64> {
        let count = with_pool!(self.pool, pool => {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
                .fetch_one(pool)
                .await
                .context("Failed to count users")?
        });
        Ok(count)
    }

    async fn count_active_admins(&self) -> Result<i64> {
        let count = with_pool!(self.pool, pool => {
            sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM users WHERE role = 'admin' AND status = 'active'",
            )
            .fetch_one(pool)
            .await
            .context("Failed to count admins")?
        });
        Ok(count)
    }

    async fn staff_ids(&self) -> Result<Vec<i64>> {
        let ids = with_pool!(self.pool, pool => {
            sqlx::query_scalar::<_, i64>(
                "SELECT id FROM users WHERE role IN ('admin', 'moderator') AND status = 'active' ORDER BY id",
            )
            .fetch_all(pool)
            .await
            .context("Failed to list staff")?
        });
        Ok(ids)
    }

    async fn update_profile(&self, id: i64, input: &UpdateProfileInput) -> Result<()> {
        with_pool!(self.pool, pool => {
            sqlx::query(
                r#"
                UPDATE users
                SET display_name = ?, bio = ?, preferred_language = ?, updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(&input.display_name)
            .bind(&input.bio)
            .bind(&input.preferred_language)
            .bind(Utc::now())
            .bind(id)
            .execute(pool)
            .await
            .context("Failed to update profile")?;
        });
        Ok(())
    }

    async fn update_password(&self, id: i64, password_hash: &str) -> Result<()> {
        self.set_text(id, "password_hash", password_hash.to_string())
            .await
    }

    async fn update_role(&self, id: i64, role: UserRole) -> Result<()> {
        self.set_text(id, "role", role.to_string()).await
    }

    async fn update_status(&self, id: i64, status: UserStatus) -> Result<()> {
        self.set_text(id, "status", status.to_string()).await
    }

    async fn set_verified(&self, id: i64, verified: bool) -> Result<()> {
        self.set_flag(id, "is_verified", verified).await
    }

    async fn set_premium(&self, id: i64, premium: bool) -> Result<()> {
        self.set_flag(id, "is_premium", premium).await
    }

    async fn touch_last_login(&self, id: i64) -> Result<()> {
        with_pool!(self.pool, pool => {
            sqlx::query("UPDATE users SET last_login_at = ? WHERE id = ?")
                .bind(Utc::now())
                .bind(id)
                .execute(pool)
                .await
                .context("Failed to record last login")?;
        });
        Ok(())
    }

    async fn story_count(&self, id: i64) -> Result<i64> {
        let count = with_pool!(self.pool, pool => {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM stories WHERE author_id = ?")
                .bind(id)
                .fetch_one(pool)
                .await
                .context("Failed to count user stories")?
        });
        Ok(count)
    }

    async fn delete(&self, id: i64) -> Result<()> {
        with_pool!(self.pool, pool => {
            sqlx::query("DELETE FROM users WHERE id = ?")
                .bind(id)
                .execute(pool)
                .await
                .context("Failed to delete user")?;
        });
        Ok(())
    }
}
