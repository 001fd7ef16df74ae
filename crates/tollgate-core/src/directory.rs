//! User directory
//!
//! The user-management collaborator the auth core calls into. The core reads
//! profiles and password hashes and asks the directory to create accounts;
//! everything else about users lives outside this service.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::config::DatabaseConfig;
use crate::{NewUser, UserProfile};

/// User directory errors
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Email already registered: {0}")]
    EmailTaken(String),
}

/// Operations the auth core needs from user management
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Find a user by login email
    async fn find_by_email(&self, email: &str) -> Result<Option<UserProfile>, DirectoryError>;

    /// Fetch the stored password hash for a user
    async fn password_hash(&self, user_id: i64) -> Result<Option<String>, DirectoryError>;

    /// Whether an account with this email exists
    async fn email_exists(&self, email: &str) -> Result<bool, DirectoryError> {
        Ok(self.find_by_email(email).await?.is_some())
    }

    /// Create a user record
    async fn create_user(&self, user: NewUser) -> Result<UserProfile, DirectoryError>;
}

// ============================================================================
// PostgreSQL
// ============================================================================

const USER_COLUMNS: &str = "id, name, short_name, email, age, role, organization_id";

/// PostgreSQL-backed user directory
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    /// Create a new connection pool
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, DirectoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.postgres_pool_size)
            .connect(&config.postgres_url)
            .await
            .map_err(|e| DirectoryError::Database(format!("PostgreSQL connection failed: {e}")))?;

        Ok(Self { pool })
    }

    /// Create the `users` table when it does not exist yet
    pub async fn ensure_schema(&self) -> Result<(), DirectoryError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id BIGSERIAL PRIMARY KEY,
                name VARCHAR(255) NOT NULL,
                short_name VARCHAR(100) NOT NULL,
                email VARCHAR(255) NOT NULL UNIQUE,
                age INTEGER NOT NULL,
                password_hash TEXT NOT NULL,
                role VARCHAR(50) NOT NULL DEFAULT 'user',
                organization_id BIGINT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| DirectoryError::Database(format!("Failed to create users table: {e}")))?;

        Ok(())
    }
}

/// User row from database
#[derive(Debug, FromRow)]
struct UserRow {
    id: i64,
    name: String,
    short_name: String,
    email: String,
    age: i32,
    role: String,
    organization_id: Option<i64>,
}

impl From<UserRow> for UserProfile {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            short_name: row.short_name,
            email: row.email,
            age: row.age,
            role: row.role,
            organization_id: row.organization_id,
        }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserProfile>, DirectoryError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DirectoryError::Database(format!("Failed to fetch user: {e}")))?;

        Ok(row.map(UserProfile::from))
    }

    async fn password_hash(&self, user_id: i64) -> Result<Option<String>, DirectoryError> {
        sqlx::query_scalar::<_, String>("SELECT password_hash FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DirectoryError::Database(format!("Failed to fetch password hash: {e}")))
    }

    async fn email_exists(&self, email: &str) -> Result<bool, DirectoryError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE email = $1")
            .bind(email)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DirectoryError::Database(format!("Failed to check existing user: {e}")))?;

        Ok(count > 0)
    }

    async fn create_user(&self, user: NewUser) -> Result<UserProfile, DirectoryError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (name, short_name, email, age, password_hash, role, organization_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&user.name)
        .bind(&user.short_name)
        .bind(&user.email)
        .bind(user.age)
        .bind(&user.password_hash)
        .bind(&user.role)
        .bind(user.organization_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                DirectoryError::EmailTaken(user.email.clone())
            }
            other => DirectoryError::Database(format!("Failed to create user: {other}")),
        })?;

        Ok(row.into())
    }
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Default)]
struct MemoryUsers {
    next_id: i64,
    by_id: HashMap<i64, (UserProfile, String)>,
}

/// In-memory user directory for tests and local development
#[derive(Default)]
pub struct MemoryUserDirectory {
    users: RwLock<MemoryUsers>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a user with an explicit id (fixtures)
    pub async fn insert_with_id(&self, id: i64, user: NewUser) -> UserProfile {
        let mut users = self.users.write().await;
        let profile = profile_from(id, &user);
        users
            .by_id
            .insert(id, (profile.clone(), user.password_hash));
        users.next_id = users.next_id.max(id);
        profile
    }
}

fn profile_from(id: i64, user: &NewUser) -> UserProfile {
    UserProfile {
        id,
        name: user.name.clone(),
        short_name: user.short_name.clone(),
        email: user.email.clone(),
        age: user.age,
        role: user.role.clone(),
        organization_id: user.organization_id,
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserProfile>, DirectoryError> {
        Ok(self
            .users
            .read()
            .await
            .by_id
            .values()
            .find(|(profile, _)| profile.email == email)
            .map(|(profile, _)| profile.clone()))
    }

    async fn password_hash(&self, user_id: i64) -> Result<Option<String>, DirectoryError> {
        Ok(self
            .users
            .read()
            .await
            .by_id
            .get(&user_id)
            .map(|(_, hash)| hash.clone()))
    }

    async fn create_user(&self, user: NewUser) -> Result<UserProfile, DirectoryError> {
        let mut users = self.users.write().await;
        if users.by_id.values().any(|(p, _)| p.email == user.email) {
            return Err(DirectoryError::EmailTaken(user.email));
        }

        users.next_id += 1;
        let id = users.next_id;
        let profile = profile_from(id, &user);
        users
            .by_id
            .insert(id, (profile.clone(), user.password_hash));
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            name: "Test User".to_string(),
            short_name: "Test".to_string(),
            email: email.to_string(),
            age: 30,
            password_hash: "$argon2id$stub".to_string(),
            role: crate::DEFAULT_ROLE.to_string(),
            organization_id: None,
        }
    }

    #[tokio::test]
    async fn test_memory_directory_create_and_lookup() {
        let dir = MemoryUserDirectory::new();
        let created = dir.create_user(new_user("a@example.com")).await.unwrap();
        assert_eq!(created.id, 1);

        let found = dir.find_by_email("a@example.com").await.unwrap().unwrap();
        assert_eq!(found, created);
        assert_eq!(
            dir.password_hash(created.id).await.unwrap().as_deref(),
            Some("$argon2id$stub")
        );
        assert!(dir.email_exists("a@example.com").await.unwrap());
        assert!(!dir.email_exists("b@example.com").await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_directory_rejects_duplicate_email() {
        let dir = MemoryUserDirectory::new();
        dir.create_user(new_user("dup@example.com")).await.unwrap();

        let result = dir.create_user(new_user("dup@example.com")).await;
        assert!(matches!(result, Err(DirectoryError::EmailTaken(_))));
    }

    #[tokio::test]
    async fn test_insert_with_id_advances_sequence() {
        let dir = MemoryUserDirectory::new();
        dir.insert_with_id(42, new_user("fixed@example.com")).await;

        let next = dir.create_user(new_user("next@example.com")).await.unwrap();
        assert_eq!(next.id, 43);
        assert!(dir.password_hash(42).await.unwrap().is_some());
        assert!(dir.password_hash(7).await.unwrap().is_none());
    }
}
