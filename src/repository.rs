use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use argon2::{
    Argon2,
    password_hash::{
        self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng,
    },
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::{
    error::VerifyError,
    models::{Credentials, Subject},
};

/// SubjectVerifier
///
/// The external credential check. Given credentials, either returns the matching
/// subject record or reports why it could not. Rate limiting and lockout, if any,
/// belong to the implementation.
#[async_trait]
pub trait SubjectVerifier: Send + Sync {
    async fn verify(&self, credentials: &Credentials) -> Result<Subject, VerifyError>;
}

/// SubjectVerifierState
///
/// The concrete type used to share the subject verifier across the application state.
pub type SubjectVerifierState = Arc<dyn SubjectVerifier>;

// --- Password Hashing ---

/// Hashes a password into an Argon2 PHC string.
pub fn hash_password(password: &str) -> Result<String, password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)?
        .to_string())
}

/// Checks a password against a stored PHC string. Unparseable hashes never match.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::error!("stored password hash is malformed: {}", e);
            false
        }
    }
}

// --- Postgres Implementation ---

/// SubjectRow
///
/// The `users` table row, including the password hash that never leaves this module.
#[derive(Debug, FromRow)]
struct SubjectRow {
    id: Uuid,
    email: String,
    role: String,
    email_verified_at: Option<DateTime<Utc>>,
    password_hash: String,
}

impl From<SubjectRow> for Subject {
    fn from(row: SubjectRow) -> Self {
        Subject {
            id: row.id,
            email: row.email,
            role: row.role,
            email_verified_at: row.email_verified_at,
        }
    }
}

/// PostgresSubjectStore
///
/// Verifies credentials against the `users` table.
pub struct PostgresSubjectStore {
    pool: PgPool,
}

impl PostgresSubjectStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubjectVerifier for PostgresSubjectStore {
    /// verify
    ///
    /// Looks the subject up by exact email and checks the Argon2 hash.
    /// An unknown email and a wrong password both yield `InvalidCredentials`.
    async fn verify(&self, credentials: &Credentials) -> Result<Subject, VerifyError> {
        let row = sqlx::query_as::<_, SubjectRow>(
            r#"
            SELECT id, email, role, email_verified_at, password_hash
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(&credentials.email)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(VerifyError::InvalidCredentials)?;

        if !verify_password(&credentials.password, &row.password_hash) {
            return Err(VerifyError::InvalidCredentials);
        }

        Ok(row.into())
    }
}

// --- In-Memory Implementation ---

struct StoredSubject {
    subject: Subject,
    password_hash: String,
}

/// MemorySubjectStore
///
/// In-process subject registry keyed by email. Used by tests and local demos.
#[derive(Default)]
pub struct MemorySubjectStore {
    subjects: RwLock<HashMap<String, StoredSubject>>,
}

impl MemorySubjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// insert
    ///
    /// Registers a subject with the given raw role string. The role is stored as-is,
    /// so values outside the known set can be seeded on purpose.
    pub fn insert(
        &self,
        email: &str,
        password: &str,
        role: &str,
        verified: bool,
    ) -> Result<Subject, password_hash::Error> {
        let subject = Subject {
            id: Uuid::new_v4(),
            email: email.to_string(),
            role: role.to_string(),
            email_verified_at: verified.then(Utc::now),
        };
        let stored = StoredSubject {
            subject: subject.clone(),
            password_hash: hash_password(password)?,
        };

        self.subjects
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(email.to_string(), stored);
        Ok(subject)
    }

    /// Changes the stored role of an existing subject; returns false if unknown.
    pub fn set_role(&self, email: &str, role: &str) -> bool {
        let mut subjects = self.subjects.write().unwrap_or_else(|e| e.into_inner());
        match subjects.get_mut(email) {
            Some(stored) => {
                stored.subject.role = role.to_string();
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl SubjectVerifier for MemorySubjectStore {
    async fn verify(&self, credentials: &Credentials) -> Result<Subject, VerifyError> {
        let subjects = self.subjects.read().unwrap_or_else(|e| e.into_inner());
        let stored = subjects
            .get(&credentials.email)
            .ok_or(VerifyError::InvalidCredentials)?;

        if !verify_password(&credentials.password, &stored.password_hash) {
            return Err(VerifyError::InvalidCredentials);
        }

        Ok(stored.subject.clone())
    }
}
