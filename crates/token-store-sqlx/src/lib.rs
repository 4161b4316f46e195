use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Sqlite};
use std::borrow::Cow;
use std::path::PathBuf;

use token_store_core::{
    AccessToken, AuthorizationCode, Client, EntityKind, RefreshToken, Relation, Scope, Session,
    StorageError,
};
use token_store_ports::{
    AccessTokenStorage, AuthCodeStorage, ClientStorage, RefreshTokenStorage, RelationStorage,
    ScopeStorage, SessionStorage, Storage,
};

#[derive(Clone, Debug)]
enum DatabasePool {
    Sqlite(Pool<Sqlite>),
    Postgres(Pool<Postgres>),
}

/// SQL-backed storage implementation (SQLite/Postgres) using SQLx.
///
/// All single-winner operations (auth-code consumption, refresh rotation) are
/// conditional UPDATEs checked via `rows_affected`, or transactions; the
/// database is the single source of truth and nothing is cached in process.
pub struct SqlxStorage {
    pool: DatabasePool,
}

impl SqlxStorage {
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = if database_url.starts_with("postgres") {
            DatabasePool::Postgres(Pool::<Postgres>::connect(database_url).await?)
        } else {
            // A common local/dev failure mode is that the directory for the
            // sqlite DB file doesn't exist or the file can't be auto-created.
            // Best-effort: pre-create both and let sqlx surface real errors.
            if let Some(path) = sqlite_db_path(database_url) {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        let _ = std::fs::create_dir_all(parent);
                    }
                }

                if !path.as_os_str().is_empty() && !path.exists() {
                    let _ = std::fs::File::create(&path);
                }
            }

            let connect_url = sqlite_url_with_create_mode(database_url);
            DatabasePool::Sqlite(Pool::<Sqlite>::connect(connect_url.as_ref()).await?)
        };

        Ok(Self { pool })
    }

    async fn init_sqlx(&self) -> Result<(), sqlx::Error> {
        match &self.pool {
            DatabasePool::Sqlite(pool) => {
                self.bootstrap_sqlite_schema(pool).await?;
                sqlx::query("SELECT 1").execute(pool).await?;
            }
            DatabasePool::Postgres(pool) => {
                self.bootstrap_postgres_schema(pool).await?;
                sqlx::query("SELECT 1").execute(pool).await?;
            }
        }

        Ok(())
    }

    async fn bootstrap_sqlite_schema(&self, pool: &Pool<Sqlite>) -> Result<(), sqlx::Error> {
        // Idempotent and cheap for SQLite; safe to run on every startup.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS clients (
                id TEXT PRIMARY KEY,
                client_id TEXT NOT NULL UNIQUE,
                client_secret_hash TEXT NOT NULL,
                redirect_uri TEXT NOT NULL,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scopes (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                description TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                client_id TEXT NOT NULL,
                owner_type TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_sessions_client_id ON sessions(client_id);"#)
            .execute(pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS authorization_codes (
                id TEXT PRIMARY KEY,
                code TEXT NOT NULL UNIQUE,
                session_id TEXT NOT NULL,
                redirect_uri TEXT NOT NULL,
                scope TEXT NOT NULL,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                used INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (session_id) REFERENCES sessions(id)
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"CREATE INDEX IF NOT EXISTS idx_authorization_codes_session_id ON authorization_codes(session_id);"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS access_tokens (
                id TEXT PRIMARY KEY,
                access_token TEXT NOT NULL UNIQUE,
                session_id TEXT NOT NULL,
                scope TEXT NOT NULL,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                revoked INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (session_id) REFERENCES sessions(id)
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"CREATE INDEX IF NOT EXISTS idx_access_tokens_session_id ON access_tokens(session_id);"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS refresh_tokens (
                id TEXT PRIMARY KEY,
                refresh_token TEXT NOT NULL UNIQUE,
                access_token_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                revoked INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (access_token_id) REFERENCES access_tokens(id)
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"CREATE INDEX IF NOT EXISTS idx_refresh_tokens_access_token_id ON refresh_tokens(access_token_id);"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS relations (
                a_kind TEXT NOT NULL,
                a_id TEXT NOT NULL,
                b_kind TEXT NOT NULL,
                b_id TEXT NOT NULL,
                PRIMARY KEY (a_kind, a_id, b_kind, b_id)
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_relations_b ON relations(b_kind, b_id);"#)
            .execute(pool)
            .await?;

        Ok(())
    }

    async fn bootstrap_postgres_schema(&self, pool: &Pool<Postgres>) -> Result<(), sqlx::Error> {
        // Mirrors the SQLite schema with native Postgres types so small
        // deployments work without an external migration step.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS clients (
                id TEXT PRIMARY KEY,
                client_id TEXT NOT NULL UNIQUE,
                client_secret_hash TEXT NOT NULL,
                redirect_uri TEXT NOT NULL,
                name TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scopes (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                description TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                client_id TEXT NOT NULL,
                owner_type TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_sessions_client_id ON sessions(client_id);"#)
            .execute(pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS authorization_codes (
                id TEXT PRIMARY KEY,
                code TEXT NOT NULL UNIQUE,
                session_id TEXT NOT NULL,
                redirect_uri TEXT NOT NULL,
                scope TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL,
                used BOOLEAN NOT NULL DEFAULT FALSE
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"CREATE INDEX IF NOT EXISTS idx_authorization_codes_session_id ON authorization_codes(session_id);"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS access_tokens (
                id TEXT PRIMARY KEY,
                access_token TEXT NOT NULL UNIQUE,
                session_id TEXT NOT NULL,
                scope TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL,
                revoked BOOLEAN NOT NULL DEFAULT FALSE
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"CREATE INDEX IF NOT EXISTS idx_access_tokens_session_id ON access_tokens(session_id);"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS refresh_tokens (
                id TEXT PRIMARY KEY,
                refresh_token TEXT NOT NULL UNIQUE,
                access_token_id TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL,
                revoked BOOLEAN NOT NULL DEFAULT FALSE
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"CREATE INDEX IF NOT EXISTS idx_refresh_tokens_access_token_id ON refresh_tokens(access_token_id);"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS relations (
                a_kind TEXT NOT NULL,
                a_id TEXT NOT NULL,
                b_kind TEXT NOT NULL,
                b_id TEXT NOT NULL,
                PRIMARY KEY (a_kind, a_id, b_kind, b_id)
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_relations_b ON relations(b_kind, b_id);"#)
            .execute(pool)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl ClientStorage for SqlxStorage {
    async fn create_client(&self, client: &Client) -> Result<(), StorageError> {
        match &self.pool {
            DatabasePool::Sqlite(pool) => {
                sqlx::query(
                    r#"
                    INSERT INTO clients (id, client_id, client_secret_hash, redirect_uri, name, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&client.id)
                .bind(&client.client_id)
                .bind(&client.client_secret_hash)
                .bind(&client.redirect_uri)
                .bind(&client.name)
                .bind(client.created_at)
                .bind(client.updated_at)
                .execute(pool)
                .await?;
            }
            DatabasePool::Postgres(pool) => {
                sqlx::query(
                    r#"
                    INSERT INTO clients (id, client_id, client_secret_hash, redirect_uri, name, created_at, updated_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    "#,
                )
                .bind(&client.id)
                .bind(&client.client_id)
                .bind(&client.client_secret_hash)
                .bind(&client.redirect_uri)
                .bind(&client.name)
                .bind(client.created_at)
                .bind(client.updated_at)
                .execute(pool)
                .await?;
            }
        }

        Ok(())
    }

    async fn get_client(&self, client_id: &str) -> Result<Option<Client>, StorageError> {
        let client = match &self.pool {
            DatabasePool::Sqlite(pool) => {
                sqlx::query_as::<_, Client>("SELECT * FROM clients WHERE client_id = ?")
                    .bind(client_id)
                    .fetch_optional(pool)
                    .await?
            }
            DatabasePool::Postgres(pool) => {
                sqlx::query_as::<_, Client>("SELECT * FROM clients WHERE client_id = $1")
                    .bind(client_id)
                    .fetch_optional(pool)
                    .await?
            }
        };

        Ok(client)
    }

    async fn update_client(&self, client: &Client) -> Result<(), StorageError> {
        let updated = match &self.pool {
            DatabasePool::Sqlite(pool) => {
                sqlx::query(
                    r#"
                    UPDATE clients
                    SET client_secret_hash = ?, redirect_uri = ?, name = ?, updated_at = ?
                    WHERE client_id = ?
                    "#,
                )
                .bind(&client.client_secret_hash)
                .bind(&client.redirect_uri)
                .bind(&client.name)
                .bind(client.updated_at)
                .bind(&client.client_id)
                .execute(pool)
                .await?
                .rows_affected()
            }
            DatabasePool::Postgres(pool) => {
                sqlx::query(
                    r#"
                    UPDATE clients
                    SET client_secret_hash = $1, redirect_uri = $2, name = $3, updated_at = $4
                    WHERE client_id = $5
                    "#,
                )
                .bind(&client.client_secret_hash)
                .bind(&client.redirect_uri)
                .bind(&client.name)
                .bind(client.updated_at)
                .bind(&client.client_id)
                .execute(pool)
                .await?
                .rows_affected()
            }
        };

        if updated == 0 {
            return Err(StorageError::not_found("client"));
        }

        Ok(())
    }

    async fn delete_client(&self, client_id: &str) -> Result<(), StorageError> {
        match &self.pool {
            DatabasePool::Sqlite(pool) => {
                let mut tx = pool.begin().await?;
                sqlx::query(
                    "DELETE FROM relations WHERE (a_kind = 'client' AND a_id = ?) OR (b_kind = 'client' AND b_id = ?)",
                )
                .bind(client_id)
                .bind(client_id)
                .execute(&mut *tx)
                .await?;
                sqlx::query("DELETE FROM clients WHERE client_id = ?")
                    .bind(client_id)
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;
            }
            DatabasePool::Postgres(pool) => {
                let mut tx = pool.begin().await?;
                sqlx::query(
                    "DELETE FROM relations WHERE (a_kind = 'client' AND a_id = $1) OR (b_kind = 'client' AND b_id = $2)",
                )
                .bind(client_id)
                .bind(client_id)
                .execute(&mut *tx)
                .await?;
                sqlx::query("DELETE FROM clients WHERE client_id = $1")
                    .bind(client_id)
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;
            }
        }

        Ok(())
    }

    async fn list_clients(&self, limit: u32, offset: u32) -> Result<Vec<Client>, StorageError> {
        let clients = match &self.pool {
            DatabasePool::Sqlite(pool) => {
                sqlx::query_as::<_, Client>(
                    "SELECT * FROM clients ORDER BY client_id LIMIT ? OFFSET ?",
                )
                .bind(i64::from(limit))
                .bind(i64::from(offset))
                .fetch_all(pool)
                .await?
            }
            DatabasePool::Postgres(pool) => {
                sqlx::query_as::<_, Client>(
                    "SELECT * FROM clients ORDER BY client_id LIMIT $1 OFFSET $2",
                )
                .bind(i64::from(limit))
                .bind(i64::from(offset))
                .fetch_all(pool)
                .await?
            }
        };

        Ok(clients)
    }
}

#[async_trait]
impl ScopeStorage for SqlxStorage {
    async fn create_scope(&self, scope: &Scope) -> Result<(), StorageError> {
        match &self.pool {
            DatabasePool::Sqlite(pool) => {
                sqlx::query(
                    r#"
                    INSERT INTO scopes (id, name, description, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&scope.id)
                .bind(&scope.name)
                .bind(&scope.description)
                .bind(scope.created_at)
                .bind(scope.updated_at)
                .execute(pool)
                .await?;
            }
            DatabasePool::Postgres(pool) => {
                sqlx::query(
                    r#"
                    INSERT INTO scopes (id, name, description, created_at, updated_at)
                    VALUES ($1, $2, $3, $4, $5)
                    "#,
                )
                .bind(&scope.id)
                .bind(&scope.name)
                .bind(&scope.description)
                .bind(scope.created_at)
                .bind(scope.updated_at)
                .execute(pool)
                .await?;
            }
        }

        Ok(())
    }

    async fn get_scope(&self, name: &str) -> Result<Option<Scope>, StorageError> {
        let scope = match &self.pool {
            DatabasePool::Sqlite(pool) => {
                sqlx::query_as::<_, Scope>("SELECT * FROM scopes WHERE name = ?")
                    .bind(name)
                    .fetch_optional(pool)
                    .await?
            }
            DatabasePool::Postgres(pool) => {
                sqlx::query_as::<_, Scope>("SELECT * FROM scopes WHERE name = $1")
                    .bind(name)
                    .fetch_optional(pool)
                    .await?
            }
        };

        Ok(scope)
    }

    async fn update_scope(&self, scope: &Scope) -> Result<(), StorageError> {
        let updated = match &self.pool {
            DatabasePool::Sqlite(pool) => {
                sqlx::query("UPDATE scopes SET description = ?, updated_at = ? WHERE name = ?")
                    .bind(&scope.description)
                    .bind(scope.updated_at)
                    .bind(&scope.name)
                    .execute(pool)
                    .await?
                    .rows_affected()
            }
            DatabasePool::Postgres(pool) => {
                sqlx::query("UPDATE scopes SET description = $1, updated_at = $2 WHERE name = $3")
                    .bind(&scope.description)
                    .bind(scope.updated_at)
                    .bind(&scope.name)
                    .execute(pool)
                    .await?
                    .rows_affected()
            }
        };

        if updated == 0 {
            return Err(StorageError::not_found("scope"));
        }

        Ok(())
    }

    async fn delete_scope(&self, name: &str) -> Result<(), StorageError> {
        match &self.pool {
            DatabasePool::Sqlite(pool) => {
                let mut tx = pool.begin().await?;
                sqlx::query(
                    "DELETE FROM relations WHERE (a_kind = 'scope' AND a_id = ?) OR (b_kind = 'scope' AND b_id = ?)",
                )
                .bind(name)
                .bind(name)
                .execute(&mut *tx)
                .await?;
                sqlx::query("DELETE FROM scopes WHERE name = ?")
                    .bind(name)
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;
            }
            DatabasePool::Postgres(pool) => {
                let mut tx = pool.begin().await?;
                sqlx::query(
                    "DELETE FROM relations WHERE (a_kind = 'scope' AND a_id = $1) OR (b_kind = 'scope' AND b_id = $2)",
                )
                .bind(name)
                .bind(name)
                .execute(&mut *tx)
                .await?;
                sqlx::query("DELETE FROM scopes WHERE name = $1")
                    .bind(name)
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;
            }
        }

        Ok(())
    }

    async fn list_scopes(&self, limit: u32, offset: u32) -> Result<Vec<Scope>, StorageError> {
        let scopes = match &self.pool {
            DatabasePool::Sqlite(pool) => {
                sqlx::query_as::<_, Scope>("SELECT * FROM scopes ORDER BY name LIMIT ? OFFSET ?")
                    .bind(i64::from(limit))
                    .bind(i64::from(offset))
                    .fetch_all(pool)
                    .await?
            }
            DatabasePool::Postgres(pool) => {
                sqlx::query_as::<_, Scope>("SELECT * FROM scopes ORDER BY name LIMIT $1 OFFSET $2")
                    .bind(i64::from(limit))
                    .bind(i64::from(offset))
                    .fetch_all(pool)
                    .await?
            }
        };

        Ok(scopes)
    }
}

#[async_trait]
impl SessionStorage for SqlxStorage {
    async fn create_session(&self, session: &Session) -> Result<(), StorageError> {
        match &self.pool {
            DatabasePool::Sqlite(pool) => {
                sqlx::query(
                    r#"
                    INSERT INTO sessions (id, client_id, owner_type, owner_id, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&session.id)
                .bind(&session.client_id)
                .bind(&session.owner_type)
                .bind(&session.owner_id)
                .bind(session.created_at)
                .bind(session.updated_at)
                .execute(pool)
                .await?;
            }
            DatabasePool::Postgres(pool) => {
                sqlx::query(
                    r#"
                    INSERT INTO sessions (id, client_id, owner_type, owner_id, created_at, updated_at)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    "#,
                )
                .bind(&session.id)
                .bind(&session.client_id)
                .bind(&session.owner_type)
                .bind(&session.owner_id)
                .bind(session.created_at)
                .bind(session.updated_at)
                .execute(pool)
                .await?;
            }
        }

        Ok(())
    }

    async fn get_session(&self, id: &str) -> Result<Option<Session>, StorageError> {
        let session = match &self.pool {
            DatabasePool::Sqlite(pool) => {
                sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE id = ?")
                    .bind(id)
                    .fetch_optional(pool)
                    .await?
            }
            DatabasePool::Postgres(pool) => {
                sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE id = $1")
                    .bind(id)
                    .fetch_optional(pool)
                    .await?
            }
        };

        Ok(session)
    }

    async fn update_session(&self, session: &Session) -> Result<(), StorageError> {
        let updated = match &self.pool {
            DatabasePool::Sqlite(pool) => {
                sqlx::query(
                    "UPDATE sessions SET owner_type = ?, owner_id = ?, updated_at = ? WHERE id = ?",
                )
                .bind(&session.owner_type)
                .bind(&session.owner_id)
                .bind(session.updated_at)
                .bind(&session.id)
                .execute(pool)
                .await?
                .rows_affected()
            }
            DatabasePool::Postgres(pool) => {
                sqlx::query(
                    "UPDATE sessions SET owner_type = $1, owner_id = $2, updated_at = $3 WHERE id = $4",
                )
                .bind(&session.owner_type)
                .bind(&session.owner_id)
                .bind(session.updated_at)
                .bind(&session.id)
                .execute(pool)
                .await?
                .rows_affected()
            }
        };

        if updated == 0 {
            return Err(StorageError::not_found("session"));
        }

        Ok(())
    }

    async fn delete_session(&self, id: &str) -> Result<(), StorageError> {
        // Session owns its children by lifetime: codes, tokens, and the
        // session's scope associations go with it in one transaction.
        match &self.pool {
            DatabasePool::Sqlite(pool) => {
                let mut tx = pool.begin().await?;
                sqlx::query(
                    "DELETE FROM refresh_tokens WHERE access_token_id IN (SELECT id FROM access_tokens WHERE session_id = ?)",
                )
                .bind(id)
                .execute(&mut *tx)
                .await?;
                sqlx::query("DELETE FROM access_tokens WHERE session_id = ?")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query("DELETE FROM authorization_codes WHERE session_id = ?")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query(
                    "DELETE FROM relations WHERE (a_kind = 'session' AND a_id = ?) OR (b_kind = 'session' AND b_id = ?)",
                )
                .bind(id)
                .bind(id)
                .execute(&mut *tx)
                .await?;
                sqlx::query("DELETE FROM sessions WHERE id = ?")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;
            }
            DatabasePool::Postgres(pool) => {
                let mut tx = pool.begin().await?;
                sqlx::query(
                    "DELETE FROM refresh_tokens WHERE access_token_id IN (SELECT id FROM access_tokens WHERE session_id = $1)",
                )
                .bind(id)
                .execute(&mut *tx)
                .await?;
                sqlx::query("DELETE FROM access_tokens WHERE session_id = $1")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query("DELETE FROM authorization_codes WHERE session_id = $1")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query(
                    "DELETE FROM relations WHERE (a_kind = 'session' AND a_id = $1) OR (b_kind = 'session' AND b_id = $2)",
                )
                .bind(id)
                .bind(id)
                .execute(&mut *tx)
                .await?;
                sqlx::query("DELETE FROM sessions WHERE id = $1")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;
            }
        }

        Ok(())
    }

    async fn list_client_sessions(&self, client_id: &str) -> Result<Vec<Session>, StorageError> {
        let sessions = match &self.pool {
            DatabasePool::Sqlite(pool) => {
                sqlx::query_as::<_, Session>(
                    "SELECT * FROM sessions WHERE client_id = ? ORDER BY created_at",
                )
                .bind(client_id)
                .fetch_all(pool)
                .await?
            }
            DatabasePool::Postgres(pool) => {
                sqlx::query_as::<_, Session>(
                    "SELECT * FROM sessions WHERE client_id = $1 ORDER BY created_at",
                )
                .bind(client_id)
                .fetch_all(pool)
                .await?
            }
        };

        Ok(sessions)
    }
}

#[async_trait]
impl AuthCodeStorage for SqlxStorage {
    async fn create_authorization_code(
        &self,
        auth_code: &AuthorizationCode,
    ) -> Result<(), StorageError> {
        match &self.pool {
            DatabasePool::Sqlite(pool) => {
                sqlx::query(
                    r#"
                    INSERT INTO authorization_codes (id, code, session_id, redirect_uri, scope, created_at, expires_at, used)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&auth_code.id)
                .bind(&auth_code.code)
                .bind(&auth_code.session_id)
                .bind(&auth_code.redirect_uri)
                .bind(&auth_code.scope)
                .bind(auth_code.created_at)
                .bind(auth_code.expires_at)
                .bind(auth_code.used)
                .execute(pool)
                .await?;
            }
            DatabasePool::Postgres(pool) => {
                sqlx::query(
                    r#"
                    INSERT INTO authorization_codes (id, code, session_id, redirect_uri, scope, created_at, expires_at, used)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    "#,
                )
                .bind(&auth_code.id)
                .bind(&auth_code.code)
                .bind(&auth_code.session_id)
                .bind(&auth_code.redirect_uri)
                .bind(&auth_code.scope)
                .bind(auth_code.created_at)
                .bind(auth_code.expires_at)
                .bind(auth_code.used)
                .execute(pool)
                .await?;
            }
        }

        Ok(())
    }

    async fn get_authorization_code(
        &self,
        code: &str,
    ) -> Result<Option<AuthorizationCode>, StorageError> {
        let auth_code = match &self.pool {
            DatabasePool::Sqlite(pool) => {
                sqlx::query_as::<_, AuthorizationCode>(
                    "SELECT * FROM authorization_codes WHERE code = ?",
                )
                .bind(code)
                .fetch_optional(pool)
                .await?
            }
            DatabasePool::Postgres(pool) => {
                sqlx::query_as::<_, AuthorizationCode>(
                    "SELECT * FROM authorization_codes WHERE code = $1",
                )
                .bind(code)
                .fetch_optional(pool)
                .await?
            }
        };

        Ok(auth_code)
    }

    async fn consume_authorization_code(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthorizationCode>, StorageError> {
        // The conditional UPDATE is the single-use gate: under concurrent
        // exchanges of the same code, exactly one caller flips `used`.
        let consumed = match &self.pool {
            DatabasePool::Sqlite(pool) => {
                sqlx::query(
                    "UPDATE authorization_codes SET used = 1 WHERE code = ? AND used = 0 AND expires_at > ?",
                )
                .bind(code)
                .bind(now)
                .execute(pool)
                .await?
                .rows_affected()
            }
            DatabasePool::Postgres(pool) => {
                sqlx::query(
                    "UPDATE authorization_codes SET used = TRUE WHERE code = $1 AND used = FALSE AND expires_at > $2",
                )
                .bind(code)
                .bind(now)
                .execute(pool)
                .await?
                .rows_affected()
            }
        };

        if consumed == 0 {
            return Ok(None);
        }

        self.get_authorization_code(code).await
    }

    async fn delete_authorization_code(&self, code: &str) -> Result<(), StorageError> {
        match &self.pool {
            DatabasePool::Sqlite(pool) => {
                sqlx::query("DELETE FROM authorization_codes WHERE code = ?")
                    .bind(code)
                    .execute(pool)
                    .await?;
            }
            DatabasePool::Postgres(pool) => {
                sqlx::query("DELETE FROM authorization_codes WHERE code = $1")
                    .bind(code)
                    .execute(pool)
                    .await?;
            }
        }

        Ok(())
    }

    async fn purge_expired_codes(&self, now: DateTime<Utc>) -> Result<u64, StorageError> {
        let purged = match &self.pool {
            DatabasePool::Sqlite(pool) => {
                sqlx::query("DELETE FROM authorization_codes WHERE expires_at <= ?")
                    .bind(now)
                    .execute(pool)
                    .await?
                    .rows_affected()
            }
            DatabasePool::Postgres(pool) => {
                sqlx::query("DELETE FROM authorization_codes WHERE expires_at <= $1")
                    .bind(now)
                    .execute(pool)
                    .await?
                    .rows_affected()
            }
        };

        Ok(purged)
    }
}

#[async_trait]
impl AccessTokenStorage for SqlxStorage {
    async fn create_access_token(&self, token: &AccessToken) -> Result<(), StorageError> {
        match &self.pool {
            DatabasePool::Sqlite(pool) => {
                sqlx::query(
                    r#"
                    INSERT INTO access_tokens (id, access_token, session_id, scope, created_at, expires_at, revoked)
                    VALUES (?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&token.id)
                .bind(&token.access_token)
                .bind(&token.session_id)
                .bind(&token.scope)
                .bind(token.created_at)
                .bind(token.expires_at)
                .bind(token.revoked)
                .execute(pool)
                .await?;
            }
            DatabasePool::Postgres(pool) => {
                sqlx::query(
                    r#"
                    INSERT INTO access_tokens (id, access_token, session_id, scope, created_at, expires_at, revoked)
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    "#,
                )
                .bind(&token.id)
                .bind(&token.access_token)
                .bind(&token.session_id)
                .bind(&token.scope)
                .bind(token.created_at)
                .bind(token.expires_at)
                .bind(token.revoked)
                .execute(pool)
                .await?;
            }
        }

        Ok(())
    }

    async fn get_access_token(
        &self,
        access_token: &str,
    ) -> Result<Option<AccessToken>, StorageError> {
        let token = match &self.pool {
            DatabasePool::Sqlite(pool) => {
                sqlx::query_as::<_, AccessToken>(
                    "SELECT * FROM access_tokens WHERE access_token = ?",
                )
                .bind(access_token)
                .fetch_optional(pool)
                .await?
            }
            DatabasePool::Postgres(pool) => {
                sqlx::query_as::<_, AccessToken>(
                    "SELECT * FROM access_tokens WHERE access_token = $1",
                )
                .bind(access_token)
                .fetch_optional(pool)
                .await?
            }
        };

        Ok(token)
    }

    async fn get_access_token_by_id(&self, id: &str) -> Result<Option<AccessToken>, StorageError> {
        let token = match &self.pool {
            DatabasePool::Sqlite(pool) => {
                sqlx::query_as::<_, AccessToken>("SELECT * FROM access_tokens WHERE id = ?")
                    .bind(id)
                    .fetch_optional(pool)
                    .await?
            }
            DatabasePool::Postgres(pool) => {
                sqlx::query_as::<_, AccessToken>("SELECT * FROM access_tokens WHERE id = $1")
                    .bind(id)
                    .fetch_optional(pool)
                    .await?
            }
        };

        Ok(token)
    }

    async fn delete_access_token(&self, access_token: &str) -> Result<(), StorageError> {
        match &self.pool {
            DatabasePool::Sqlite(pool) => {
                let mut tx = pool.begin().await?;
                sqlx::query(
                    "DELETE FROM refresh_tokens WHERE access_token_id IN (SELECT id FROM access_tokens WHERE access_token = ?)",
                )
                .bind(access_token)
                .execute(&mut *tx)
                .await?;
                sqlx::query("DELETE FROM access_tokens WHERE access_token = ?")
                    .bind(access_token)
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;
            }
            DatabasePool::Postgres(pool) => {
                let mut tx = pool.begin().await?;
                sqlx::query(
                    "DELETE FROM refresh_tokens WHERE access_token_id IN (SELECT id FROM access_tokens WHERE access_token = $1)",
                )
                .bind(access_token)
                .execute(&mut *tx)
                .await?;
                sqlx::query("DELETE FROM access_tokens WHERE access_token = $1")
                    .bind(access_token)
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;
            }
        }

        Ok(())
    }

    async fn purge_expired_tokens(&self, now: DateTime<Utc>) -> Result<u64, StorageError> {
        let purged = match &self.pool {
            DatabasePool::Sqlite(pool) => {
                let mut tx = pool.begin().await?;
                let refresh = sqlx::query(
                    "DELETE FROM refresh_tokens WHERE expires_at <= ? OR access_token_id IN (SELECT id FROM access_tokens WHERE expires_at <= ?)",
                )
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await?
                .rows_affected();
                let access = sqlx::query("DELETE FROM access_tokens WHERE expires_at <= ?")
                    .bind(now)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();
                tx.commit().await?;
                refresh + access
            }
            DatabasePool::Postgres(pool) => {
                let mut tx = pool.begin().await?;
                let refresh = sqlx::query(
                    "DELETE FROM refresh_tokens WHERE expires_at <= $1 OR access_token_id IN (SELECT id FROM access_tokens WHERE expires_at <= $2)",
                )
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await?
                .rows_affected();
                let access = sqlx::query("DELETE FROM access_tokens WHERE expires_at <= $1")
                    .bind(now)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();
                tx.commit().await?;
                refresh + access
            }
        };

        Ok(purged)
    }
}

#[async_trait]
impl RefreshTokenStorage for SqlxStorage {
    async fn create_refresh_token(&self, token: &RefreshToken) -> Result<(), StorageError> {
        match &self.pool {
            DatabasePool::Sqlite(pool) => {
                sqlx::query(
                    r#"
                    INSERT INTO refresh_tokens (id, refresh_token, access_token_id, created_at, expires_at, revoked)
                    VALUES (?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&token.id)
                .bind(&token.refresh_token)
                .bind(&token.access_token_id)
                .bind(token.created_at)
                .bind(token.expires_at)
                .bind(token.revoked)
                .execute(pool)
                .await?;
            }
            DatabasePool::Postgres(pool) => {
                sqlx::query(
                    r#"
                    INSERT INTO refresh_tokens (id, refresh_token, access_token_id, created_at, expires_at, revoked)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    "#,
                )
                .bind(&token.id)
                .bind(&token.refresh_token)
                .bind(&token.access_token_id)
                .bind(token.created_at)
                .bind(token.expires_at)
                .bind(token.revoked)
                .execute(pool)
                .await?;
            }
        }

        Ok(())
    }

    async fn get_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<Option<RefreshToken>, StorageError> {
        let token = match &self.pool {
            DatabasePool::Sqlite(pool) => {
                sqlx::query_as::<_, RefreshToken>(
                    "SELECT * FROM refresh_tokens WHERE refresh_token = ?",
                )
                .bind(refresh_token)
                .fetch_optional(pool)
                .await?
            }
            DatabasePool::Postgres(pool) => {
                sqlx::query_as::<_, RefreshToken>(
                    "SELECT * FROM refresh_tokens WHERE refresh_token = $1",
                )
                .bind(refresh_token)
                .fetch_optional(pool)
                .await?
            }
        };

        Ok(token)
    }

    async fn rotate_refresh_token(
        &self,
        old_refresh_token: &str,
        now: DateTime<Utc>,
        new_access: &AccessToken,
        new_refresh: &RefreshToken,
    ) -> Result<bool, StorageError> {
        // Consume-then-insert inside one transaction. The conditional UPDATE
        // makes concurrent rotations of the same token single-winner; the
        // losers roll back with nothing written.
        match &self.pool {
            DatabasePool::Sqlite(pool) => {
                let mut tx = pool.begin().await?;
                let consumed = sqlx::query(
                    "UPDATE refresh_tokens SET revoked = 1 WHERE refresh_token = ? AND revoked = 0 AND expires_at > ?",
                )
                .bind(old_refresh_token)
                .bind(now)
                .execute(&mut *tx)
                .await?
                .rows_affected();

                if consumed == 0 {
                    tx.rollback().await?;
                    return Ok(false);
                }

                sqlx::query(
                    r#"
                    INSERT INTO access_tokens (id, access_token, session_id, scope, created_at, expires_at, revoked)
                    VALUES (?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&new_access.id)
                .bind(&new_access.access_token)
                .bind(&new_access.session_id)
                .bind(&new_access.scope)
                .bind(new_access.created_at)
                .bind(new_access.expires_at)
                .bind(new_access.revoked)
                .execute(&mut *tx)
                .await?;

                sqlx::query(
                    r#"
                    INSERT INTO refresh_tokens (id, refresh_token, access_token_id, created_at, expires_at, revoked)
                    VALUES (?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&new_refresh.id)
                .bind(&new_refresh.refresh_token)
                .bind(&new_refresh.access_token_id)
                .bind(new_refresh.created_at)
                .bind(new_refresh.expires_at)
                .bind(new_refresh.revoked)
                .execute(&mut *tx)
                .await?;

                tx.commit().await?;
            }
            DatabasePool::Postgres(pool) => {
                let mut tx = pool.begin().await?;
                let consumed = sqlx::query(
                    "UPDATE refresh_tokens SET revoked = TRUE WHERE refresh_token = $1 AND revoked = FALSE AND expires_at > $2",
                )
                .bind(old_refresh_token)
                .bind(now)
                .execute(&mut *tx)
                .await?
                .rows_affected();

                if consumed == 0 {
                    tx.rollback().await?;
                    return Ok(false);
                }

                sqlx::query(
                    r#"
                    INSERT INTO access_tokens (id, access_token, session_id, scope, created_at, expires_at, revoked)
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    "#,
                )
                .bind(&new_access.id)
                .bind(&new_access.access_token)
                .bind(&new_access.session_id)
                .bind(&new_access.scope)
                .bind(new_access.created_at)
                .bind(new_access.expires_at)
                .bind(new_access.revoked)
                .execute(&mut *tx)
                .await?;

                sqlx::query(
                    r#"
                    INSERT INTO refresh_tokens (id, refresh_token, access_token_id, created_at, expires_at, revoked)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    "#,
                )
                .bind(&new_refresh.id)
                .bind(&new_refresh.refresh_token)
                .bind(&new_refresh.access_token_id)
                .bind(new_refresh.created_at)
                .bind(new_refresh.expires_at)
                .bind(new_refresh.revoked)
                .execute(&mut *tx)
                .await?;

                tx.commit().await?;
            }
        }

        Ok(true)
    }

    async fn delete_refresh_token(&self, refresh_token: &str) -> Result<(), StorageError> {
        match &self.pool {
            DatabasePool::Sqlite(pool) => {
                sqlx::query("DELETE FROM refresh_tokens WHERE refresh_token = ?")
                    .bind(refresh_token)
                    .execute(pool)
                    .await?;
            }
            DatabasePool::Postgres(pool) => {
                sqlx::query("DELETE FROM refresh_tokens WHERE refresh_token = $1")
                    .bind(refresh_token)
                    .execute(pool)
                    .await?;
            }
        }

        Ok(())
    }
}

#[async_trait]
impl RelationStorage for SqlxStorage {
    async fn associate(
        &self,
        a_kind: EntityKind,
        a_id: &str,
        b_kind: EntityKind,
        b_id: &str,
    ) -> Result<(), StorageError> {
        match &self.pool {
            DatabasePool::Sqlite(pool) => {
                sqlx::query(
                    "INSERT OR IGNORE INTO relations (a_kind, a_id, b_kind, b_id) VALUES (?, ?, ?, ?)",
                )
                .bind(a_kind.as_str())
                .bind(a_id)
                .bind(b_kind.as_str())
                .bind(b_id)
                .execute(pool)
                .await?;
            }
            DatabasePool::Postgres(pool) => {
                sqlx::query(
                    "INSERT INTO relations (a_kind, a_id, b_kind, b_id) VALUES ($1, $2, $3, $4) ON CONFLICT DO NOTHING",
                )
                .bind(a_kind.as_str())
                .bind(a_id)
                .bind(b_kind.as_str())
                .bind(b_id)
                .execute(pool)
                .await?;
            }
        }

        Ok(())
    }

    async fn dissociate(
        &self,
        a_kind: EntityKind,
        a_id: &str,
        b_kind: EntityKind,
        b_id: &str,
    ) -> Result<(), StorageError> {
        // Associations are undirected; remove the row whichever way it was
        // recorded.
        match &self.pool {
            DatabasePool::Sqlite(pool) => {
                sqlx::query(
                    r#"
                    DELETE FROM relations
                    WHERE (a_kind = ? AND a_id = ? AND b_kind = ? AND b_id = ?)
                       OR (a_kind = ? AND a_id = ? AND b_kind = ? AND b_id = ?)
                    "#,
                )
                .bind(a_kind.as_str())
                .bind(a_id)
                .bind(b_kind.as_str())
                .bind(b_id)
                .bind(b_kind.as_str())
                .bind(b_id)
                .bind(a_kind.as_str())
                .bind(a_id)
                .execute(pool)
                .await?;
            }
            DatabasePool::Postgres(pool) => {
                sqlx::query(
                    r#"
                    DELETE FROM relations
                    WHERE (a_kind = $1 AND a_id = $2 AND b_kind = $3 AND b_id = $4)
                       OR (a_kind = $5 AND a_id = $6 AND b_kind = $7 AND b_id = $8)
                    "#,
                )
                .bind(a_kind.as_str())
                .bind(a_id)
                .bind(b_kind.as_str())
                .bind(b_id)
                .bind(b_kind.as_str())
                .bind(b_id)
                .bind(a_kind.as_str())
                .bind(a_id)
                .execute(pool)
                .await?;
            }
        }

        Ok(())
    }

    async fn related(
        &self,
        kind: EntityKind,
        id: &str,
    ) -> Result<Vec<(EntityKind, String)>, StorageError> {
        let rows = match &self.pool {
            DatabasePool::Sqlite(pool) => {
                sqlx::query_as::<_, Relation>(
                    "SELECT * FROM relations WHERE (a_kind = ? AND a_id = ?) OR (b_kind = ? AND b_id = ?)",
                )
                .bind(kind.as_str())
                .bind(id)
                .bind(kind.as_str())
                .bind(id)
                .fetch_all(pool)
                .await?
            }
            DatabasePool::Postgres(pool) => {
                sqlx::query_as::<_, Relation>(
                    "SELECT * FROM relations WHERE (a_kind = $1 AND a_id = $2) OR (b_kind = $3 AND b_id = $4)",
                )
                .bind(kind.as_str())
                .bind(id)
                .bind(kind.as_str())
                .bind(id)
                .fetch_all(pool)
                .await?
            }
        };

        Ok(rows
            .iter()
            .filter_map(|rel| rel.other(kind, id))
            .collect())
    }

    async fn dissociate_all(&self, kind: EntityKind, id: &str) -> Result<(), StorageError> {
        match &self.pool {
            DatabasePool::Sqlite(pool) => {
                sqlx::query(
                    "DELETE FROM relations WHERE (a_kind = ? AND a_id = ?) OR (b_kind = ? AND b_id = ?)",
                )
                .bind(kind.as_str())
                .bind(id)
                .bind(kind.as_str())
                .bind(id)
                .execute(pool)
                .await?;
            }
            DatabasePool::Postgres(pool) => {
                sqlx::query(
                    "DELETE FROM relations WHERE (a_kind = $1 AND a_id = $2) OR (b_kind = $3 AND b_id = $4)",
                )
                .bind(kind.as_str())
                .bind(id)
                .bind(kind.as_str())
                .bind(id)
                .execute(pool)
                .await?;
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Storage for SqlxStorage {
    async fn init(&self) -> Result<(), StorageError> {
        self.init_sqlx().await.map_err(Into::into)
    }

    async fn revoke_token(&self, token: &str) -> Result<(), StorageError> {
        // Flag rather than delete, so a revoked token can still be reported
        // as revoked (instead of unknown) on later validation. Matching zero
        // rows is fine: revocation is idempotent.
        match &self.pool {
            DatabasePool::Sqlite(pool) => {
                let mut tx = pool.begin().await?;
                sqlx::query("UPDATE access_tokens SET revoked = 1 WHERE access_token = ?")
                    .bind(token)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query(
                    "UPDATE refresh_tokens SET revoked = 1 WHERE refresh_token = ? OR access_token_id IN (SELECT id FROM access_tokens WHERE access_token = ?)",
                )
                .bind(token)
                .bind(token)
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;
            }
            DatabasePool::Postgres(pool) => {
                let mut tx = pool.begin().await?;
                sqlx::query("UPDATE access_tokens SET revoked = TRUE WHERE access_token = $1")
                    .bind(token)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query(
                    "UPDATE refresh_tokens SET revoked = TRUE WHERE refresh_token = $1 OR access_token_id IN (SELECT id FROM access_tokens WHERE access_token = $2)",
                )
                .bind(token)
                .bind(token)
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;
            }
        }

        Ok(())
    }

    async fn healthcheck(&self) -> Result<(), StorageError> {
        // Keep readiness/liveness cheap: don't run bootstrap.
        match &self.pool {
            DatabasePool::Sqlite(pool) => {
                sqlx::query("SELECT 1").execute(pool).await.map_err(StorageError::from)?;
            }
            DatabasePool::Postgres(pool) => {
                sqlx::query("SELECT 1").execute(pool).await.map_err(StorageError::from)?;
            }
        }

        Ok(())
    }
}

fn sqlite_db_path(database_url: &str) -> Option<PathBuf> {
    if !database_url.starts_with("sqlite:") {
        return None;
    }
    if database_url.starts_with("sqlite::memory:") {
        return None;
    }

    let mut rest = &database_url["sqlite:".len()..];

    // Reduce URL-ish forms (sqlite:///path, sqlite://path) to a plain path.
    if rest.starts_with("///") {
        rest = &rest[2..];
    } else if rest.starts_with("//") {
        rest = &rest[1..];
    }

    let path_part = rest.split('?').next().unwrap_or(rest);
    if path_part.is_empty() {
        return None;
    }

    Some(PathBuf::from(path_part))
}

fn sqlite_url_with_create_mode(database_url: &str) -> Cow<'_, str> {
    if !database_url.starts_with("sqlite:") {
        return Cow::Borrowed(database_url);
    }
    if database_url.starts_with("sqlite::memory:") {
        return Cow::Borrowed(database_url);
    }

    // URI mode won't create a missing database file unless told to.
    if database_url.contains("mode=") {
        return Cow::Borrowed(database_url);
    }

    let sep = if database_url.contains('?') { '&' } else { '?' };
    Cow::Owned(format!("{database_url}{sep}mode=rwc"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_db_path_handles_url_forms() {
        assert_eq!(
            sqlite_db_path("sqlite:data/store.db"),
            Some(PathBuf::from("data/store.db"))
        );
        assert_eq!(
            sqlite_db_path("sqlite:///var/lib/store.db?mode=rwc"),
            Some(PathBuf::from("/var/lib/store.db"))
        );
        assert_eq!(sqlite_db_path("sqlite::memory:"), None);
        assert_eq!(sqlite_db_path("postgres://localhost/store"), None);
    }

    #[test]
    fn sqlite_url_gets_create_mode_once() {
        assert_eq!(
            sqlite_url_with_create_mode("sqlite:store.db"),
            "sqlite:store.db?mode=rwc"
        );
        assert_eq!(
            sqlite_url_with_create_mode("sqlite:store.db?cache=shared"),
            "sqlite:store.db?cache=shared&mode=rwc"
        );
        assert_eq!(
            sqlite_url_with_create_mode("sqlite:store.db?mode=ro"),
            "sqlite:store.db?mode=ro"
        );
    }
}
