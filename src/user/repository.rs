//! Handle database requests.

use async_trait::async_trait;
use sqlx::{Pool, Postgres};

use crate::error::{Result, ServerError};
use crate::user::User;

/// Port for user persistence.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Every user owning `username` or `email`.
    async fn find_by_username_or_email(
        &self,
        username: &str,
        email: &str,
    ) -> Result<Vec<User>>;

    /// Insert [`User`] into database.
    ///
    /// A taken username or email is reported as [`ServerError::Conflict`].
    async fn insert(&self, user: &User) -> Result<()>;

    /// List every user.
    async fn list(&self) -> Result<Vec<User>>;

    /// Check the store answers.
    async fn ping(&self) -> Result<()>;
}

/// PostgreSQL user repository.
#[derive(Clone)]
pub struct UserRepository {
    pool: Pool<Postgres>,
}

impl UserRepository {
    /// Create a new [`UserRepository`].
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for UserRepository {
    async fn find_by_username_or_email(
        &self,
        username: &str,
        email: &str,
    ) -> Result<Vec<User>> {
        let users = sqlx::query_as::<_, User>(
            r#"SELECT username, email, photo_path FROM users
                WHERE username = $1 OR email = $2"#,
        )
        .bind(username)
        .bind(email)
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }

    async fn insert(&self, user: &User) -> Result<()> {
        let result = sqlx::query(
            r#"INSERT INTO users (username, email, photo_path)
                VALUES ($1, $2, $3)"#,
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.photo_path)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(err)) if err.is_unique_violation() => {
                Err(ServerError::Conflict)
            },
            Err(err) => Err(err.into()),
        }
    }

    async fn list(&self) -> Result<Vec<User>> {
        let users = sqlx::query_as::<_, User>(
            "SELECT username, email, photo_path FROM users ORDER BY username",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// In-memory store with the same uniqueness rules as the `users` table.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryUserStore {
    users: std::sync::Mutex<Vec<User>>,
    calls: std::sync::atomic::AtomicUsize,
    broken_insert: bool,
    stalled_insert: bool,
}

#[cfg(test)]
impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose inserts always fail.
    pub fn with_broken_insert() -> Self {
        Self {
            broken_insert: true,
            ..Self::default()
        }
    }

    /// Store whose inserts never complete.
    pub fn with_stalled_insert() -> Self {
        Self {
            stalled_insert: true,
            ..Self::default()
        }
    }

    pub fn with_users(users: Vec<User>) -> Self {
        Self {
            users: std::sync::Mutex::new(users),
            ..Self::default()
        }
    }

    pub fn users(&self) -> Vec<User> {
        self.users.lock().unwrap().clone()
    }

    /// Number of requests received.
    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn called(&self) {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_username_or_email(
        &self,
        username: &str,
        email: &str,
    ) -> Result<Vec<User>> {
        self.called();
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .filter(|user| user.username == username || user.email == email)
            .cloned()
            .collect())
    }

    async fn insert(&self, user: &User) -> Result<()> {
        self.called();
        if self.broken_insert {
            return Err(ServerError::Internal {
                details: "connection reset".into(),
                source: None,
            });
        }
        if self.stalled_insert {
            std::future::pending::<()>().await;
        }

        let mut users = self.users.lock().unwrap();
        if users
            .iter()
            .any(|u| u.username == user.username || u.email == user.email)
        {
            return Err(ServerError::Conflict);
        }
        users.push(user.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<User>> {
        self.called();
        let mut users = self.users();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(users)
    }

    async fn ping(&self) -> Result<()> {
        self.called();
        Ok(())
    }
}
