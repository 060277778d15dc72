//! User accounts.
//!
//! Provides user storage, password hashing, and lookups for login.

use anyhow::{Context, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

use crate::models::{CreateUserRequest, User, UserId};
use crate::{from_db_time, now, to_db_time};

const USER_COLUMNS: &str = "id, email, password_hash, name, role, created_at, updated_at";

/// User store backed by SQLite.
#[derive(Clone)]
pub struct UserStore {
    conn: Arc<Mutex<Connection>>,
}

impl UserStore {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Create a new user.
    pub fn create(&self, request: &CreateUserRequest) -> Result<User> {
        let email = request.email.trim().to_lowercase();
        if email.is_empty() || !email.contains('@') {
            anyhow::bail!("A valid email is required");
        }
        if request.password.len() < 8 {
            anyhow::bail!("Password must be at least 8 characters");
        }

        let password_hash = hash_password(&request.password)?;
        let now = now();

        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        conn.execute(
            "INSERT INTO users (email, password_hash, name, role, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![email, password_hash, request.name, request.role, to_db_time(&now)],
        )
        .with_context(|| format!("Failed to create user '{email}'"))?;

        Ok(User {
            id: conn.last_insert_rowid(),
            email,
            password_hash,
            name: request.name.clone(),
            role: request.role.clone(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Get a user by ID.
    pub fn get(&self, id: UserId) -> Result<Option<User>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
        conn.query_row(&query, params![id], row_to_user)
            .optional()
            .with_context(|| format!("Failed to get user {id}"))
    }

    /// Get a user by email (case-insensitive).
    pub fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1");
        let email = email.trim().to_lowercase();
        conn.query_row(&query, params![email], row_to_user)
            .optional()
            .with_context(|| format!("Failed to get user by email {email}"))
    }

    /// All users, by id.
    pub fn list_all(&self) -> Result<Vec<User>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        let query = format!("SELECT {USER_COLUMNS} FROM users ORDER BY id ASC");
        let mut stmt = conn.prepare(&query)?;
        let users = stmt
            .query_map([], row_to_user)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    /// Count total users.
    pub fn count(&self) -> Result<u64> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Check an email/password pair. `None` for unknown users and wrong passwords alike.
    pub fn verify_password(&self, email: &str, password: &str) -> Result<Option<User>> {
        let Some(user) = self.find_by_email(email)? else {
            return Ok(None);
        };

        if !verify_password(password, &user.password_hash)? {
            return Ok(None);
        }
        Ok(Some(user))
    }

    /// Create the administrator account if the table is empty.
    pub fn seed_admin(&self, email: &str, password: &str) -> Result<Option<User>> {
        if self.count()? > 0 {
            return Ok(None);
        }

        tracing::info!(email = %email, "Creating default admin user");
        let user = self.create(&CreateUserRequest {
            email: email.to_string(),
            password: password.to_string(),
            name: "Administrator".to_string(),
            role: ADMIN_ROLE.to_string(),
        })?;
        Ok(Some(user))
    }
}

/// Role allowed to manage accounts.
pub const ADMIN_ROLE: &str = "Business Analyst";

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    let created_at: String = row.get(5)?;
    let updated_at: String = row.get(6)?;

    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        password_hash: row.get(2)?,
        name: row.get(3)?,
        role: row.get(4)?,
        created_at: from_db_time(5, &created_at)?,
        updated_at: from_db_time(6, &updated_at)?,
    })
}

/// Hash a password using Argon2.
fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?;
    Ok(hash.to_string())
}

/// Verify a password against a hash.
fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed_hash =
        PasswordHash::new(hash).map_err(|e| anyhow::anyhow!("Invalid password hash: {}", e))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}
