//! Persistence layer (design doc §3.1 / §4.11), grounded on
//! `GitHubDatabase.insert_repository` in `database.py`: owners are always
//! inserted (or already present) before the repository row that references
//! them, and organization rows are a separate identity from user rows even
//! though GitHub's own REST modeling points `owner_id` at the users table.
//!
//! `insert_repository` in `database.py` always calls `insert_contributor` on
//! `repo_data['owner']` regardless of whether that owner's `type` is `User`
//! or `Organization` — the `organizations` table is only ever populated from
//! a repository's separate, optional `organization` field. `users` mirrors
//! that: it holds every repository owner (tagged by a `kind` column), so
//! `repositories.owner_id REFERENCES users(id)` always resolves.

use crate::error::StoreError;
use crate::models::{EnrichmentDelta, Owner, OwnerKind, OwnerRecord, RepositoryRecord};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

/// Storage seam for the crawler core. A trait (rather than a bare struct)
/// so `tests/` can swap in an in-memory SQLite pool without touching the
/// pipeline code that depends on it.
#[async_trait]
pub trait Store: Send + Sync {
    async fn known_owner_logins(&self) -> Result<std::collections::HashSet<String>, StoreError>;
    /// Inserts or updates a repository's owner row, always in `users`: a
    /// repository owner is a contributor regardless of whether GitHub
    /// reports it as a `User` or an `Organization` actor, so
    /// `repositories.owner_id` always resolves (see module docs).
    async fn upsert_owner(&self, owner: &Owner) -> Result<(), StoreError>;
    /// Inserts or updates a repository's separate `organization` row in
    /// `organizations`, referenced by `repositories.organization_id`. This
    /// is a distinct identity from the owner row even when the same login
    /// fills both roles.
    async fn upsert_organization(&self, record: &OwnerRecord) -> Result<(), StoreError>;
    /// Inserts or updates the repository row. Returns `true` if this was a
    /// new row, `false` if a row with this `id` already existed (design doc
    /// §4.4 point 4: the latter is counted as a duplicate by the caller).
    async fn upsert_repository(&self, repo: &RepositoryRecord) -> Result<bool, StoreError>;
    /// Applies every delta from one GraphQL batch in a single transaction
    /// (design doc §4.5: "writes are batched into a single transaction per
    /// GraphQL batch").
    async fn apply_enrichment_batch(&self, deltas: &[EnrichmentDelta]) -> Result<(), StoreError>;
    async fn repository_ids_missing_enrichment(&self, limit: i64) -> Result<Vec<i64>, StoreError>;
    /// Returns `(id, full_name)` pairs for repositories still missing
    /// enrichment, so the GraphQL batcher can split `full_name` into the
    /// `owner`/`name` pair its query variables need.
    async fn repositories_missing_enrichment(&self, limit: i64) -> Result<Vec<(i64, String)>, StoreError>;
    /// Same shape as `repositories_missing_enrichment` but ignoring whether
    /// enrichment has already run, for `enrich --force`.
    async fn all_repositories(&self, limit: i64) -> Result<Vec<(i64, String)>, StoreError>;
    async fn owners_with_no_repositories(&self) -> Result<Vec<(i64, OwnerKind)>, StoreError>;
    async fn delete_owner(&self, id: i64, kind: OwnerKind) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(sqlx::Error::from)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().max_connections(5).connect_with(options).await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Forward-only, idempotent migrations: every statement is `IF NOT
    /// EXISTS`, so re-running against an already-migrated database is a
    /// no-op rather than an error.
    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY,
                login TEXT NOT NULL UNIQUE,
                kind TEXT NOT NULL DEFAULT 'User',
                name TEXT,
                email TEXT,
                company TEXT,
                blog TEXT,
                location TEXT,
                bio TEXT,
                twitter_username TEXT,
                avatar_url TEXT,
                public_repos INTEGER NOT NULL DEFAULT 0,
                public_gists INTEGER NOT NULL DEFAULT 0,
                followers INTEGER NOT NULL DEFAULT 0,
                following INTEGER NOT NULL DEFAULT 0,
                country_code TEXT,
                region TEXT,
                created_at TEXT,
                updated_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS organizations (
                id INTEGER PRIMARY KEY,
                login TEXT NOT NULL UNIQUE,
                name TEXT,
                email TEXT,
                company TEXT,
                blog TEXT,
                location TEXT,
                bio TEXT,
                twitter_username TEXT,
                avatar_url TEXT,
                public_repos INTEGER NOT NULL DEFAULT 0,
                public_gists INTEGER NOT NULL DEFAULT 0,
                followers INTEGER NOT NULL DEFAULT 0,
                following INTEGER NOT NULL DEFAULT 0,
                public_members INTEGER,
                country_code TEXT,
                region TEXT,
                created_at TEXT,
                updated_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS repositories (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                full_name TEXT NOT NULL UNIQUE,
                owner_id INTEGER NOT NULL REFERENCES users(id),
                owner_kind TEXT NOT NULL DEFAULT 'User',
                organization_id INTEGER REFERENCES organizations(id),
                description TEXT,
                homepage TEXT,
                language TEXT,
                private INTEGER NOT NULL DEFAULT 0,
                fork INTEGER NOT NULL DEFAULT 0,
                default_branch TEXT,
                size INTEGER NOT NULL DEFAULT 0,
                stargazers_count INTEGER NOT NULL DEFAULT 0,
                watchers_count INTEGER NOT NULL DEFAULT 0,
                forks_count INTEGER NOT NULL DEFAULT 0,
                open_issues_count INTEGER NOT NULL DEFAULT 0,
                contributors_count INTEGER,
                commits_count INTEGER,
                pull_requests_count INTEGER,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                pushed_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_repositories_owner_id ON repositories(owner_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_repositories_organization_id ON repositories(organization_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    #[cfg(test)]
    pub async fn in_memory() -> Self {
        Self::connect("sqlite::memory:").await.unwrap()
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn known_owner_logins(&self) -> Result<std::collections::HashSet<String>, StoreError> {
        let user_rows = sqlx::query("SELECT login FROM users").fetch_all(&self.pool).await?;
        let org_rows = sqlx::query("SELECT login FROM organizations").fetch_all(&self.pool).await?;
        let mut logins = std::collections::HashSet::with_capacity(user_rows.len() + org_rows.len());
        for row in user_rows.iter().chain(org_rows.iter()) {
            logins.insert(row.try_get::<String, _>("login")?);
        }
        Ok(logins)
    }

    async fn upsert_owner(&self, owner: &Owner) -> Result<(), StoreError> {
        match owner {
            Owner::User(record) => self.upsert_user(OwnerKind::User, record).await,
            Owner::Organization(record) => self.upsert_user(OwnerKind::Organization, record).await,
        }
    }

    async fn upsert_organization(&self, record: &OwnerRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO organizations (
                id, login, name, email, company, blog, location, bio, twitter_username,
                avatar_url, public_repos, public_gists, followers, following, public_members,
                country_code, region, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                login = excluded.login, name = excluded.name, email = excluded.email,
                company = excluded.company, blog = excluded.blog, location = excluded.location,
                bio = excluded.bio, twitter_username = excluded.twitter_username,
                avatar_url = excluded.avatar_url, public_repos = excluded.public_repos,
                public_gists = excluded.public_gists, followers = excluded.followers,
                following = excluded.following, public_members = excluded.public_members,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(record.id)
        .bind(&record.login)
        .bind(&record.name)
        .bind(&record.email)
        .bind(&record.company)
        .bind(&record.blog)
        .bind(&record.location)
        .bind(&record.bio)
        .bind(&record.twitter_username)
        .bind(&record.avatar_url)
        .bind(record.public_repos)
        .bind(record.public_gists)
        .bind(record.followers)
        .bind(record.following)
        .bind(record.public_members)
        .bind(&record.country_code)
        .bind(&record.region)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Inserts the repository row, always after its owner row has already
    /// been upserted by the caller (the pipeline owns that ordering; this
    /// method just enforces the foreign key by construction).
    async fn upsert_repository(&self, repo: &RepositoryRecord) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let existed = sqlx::query("SELECT 1 FROM repositories WHERE id = ?")
            .bind(repo.id)
            .fetch_optional(&mut *tx)
            .await?
            .is_some();

        sqlx::query(
            r#"
            INSERT INTO repositories (
                id, name, full_name, owner_id, owner_kind, organization_id, description, homepage,
                language, private, fork, default_branch, size, stargazers_count,
                watchers_count, forks_count, open_issues_count, contributors_count,
                commits_count, pull_requests_count, created_at, updated_at, pushed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                full_name = excluded.full_name,
                description = excluded.description,
                homepage = excluded.homepage,
                language = excluded.language,
                private = excluded.private,
                fork = excluded.fork,
                default_branch = excluded.default_branch,
                size = excluded.size,
                stargazers_count = excluded.stargazers_count,
                watchers_count = excluded.watchers_count,
                forks_count = excluded.forks_count,
                open_issues_count = excluded.open_issues_count,
                updated_at = excluded.updated_at,
                pushed_at = excluded.pushed_at
            "#,
        )
        .bind(repo.id)
        .bind(&repo.name)
        .bind(&repo.full_name)
        .bind(repo.owner_id)
        .bind(owner_kind_to_db(repo.owner_kind))
        .bind(repo.organization_id)
        .bind(&repo.description)
        .bind(&repo.homepage)
        .bind(&repo.language)
        .bind(repo.private)
        .bind(repo.fork)
        .bind(&repo.default_branch)
        .bind(repo.size)
        .bind(repo.stargazers_count)
        .bind(repo.watchers_count)
        .bind(repo.forks_count)
        .bind(repo.open_issues_count)
        .bind(repo.contributors_count)
        .bind(repo.commits_count)
        .bind(repo.pull_requests_count)
        .bind(repo.created_at)
        .bind(repo.updated_at)
        .bind(repo.pushed_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(!existed)
    }

    async fn apply_enrichment_batch(&self, deltas: &[EnrichmentDelta]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for delta in deltas {
            sqlx::query(
                r#"
                UPDATE repositories
                SET pull_requests_count = ?, commits_count = ?,
                    contributors_count = COALESCE(?, contributors_count)
                WHERE id = ?
                "#,
            )
            .bind(delta.pull_requests_count)
            .bind(delta.commits_count)
            .bind(delta.contributors_count)
            .bind(delta.database_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn repository_ids_missing_enrichment(&self, limit: i64) -> Result<Vec<i64>, StoreError> {
        let rows = sqlx::query(
            "SELECT id FROM repositories WHERE pull_requests_count IS NULL OR commits_count IS NULL ORDER BY id LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(|r| r.try_get::<i64, _>("id").map_err(StoreError::from)).collect()
    }

    async fn repositories_missing_enrichment(&self, limit: i64) -> Result<Vec<(i64, String)>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, full_name FROM repositories WHERE pull_requests_count IS NULL OR commits_count IS NULL ORDER BY id LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| Ok((r.try_get::<i64, _>("id")?, r.try_get::<String, _>("full_name")?)))
            .collect()
    }

    async fn all_repositories(&self, limit: i64) -> Result<Vec<(i64, String)>, StoreError> {
        let rows = sqlx::query("SELECT id, full_name FROM repositories ORDER BY id LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|r| Ok((r.try_get::<i64, _>("id")?, r.try_get::<String, _>("full_name")?)))
            .collect()
    }

    async fn owners_with_no_repositories(&self) -> Result<Vec<(i64, OwnerKind)>, StoreError> {
        let users = sqlx::query(
            "SELECT id FROM users WHERE id NOT IN (SELECT owner_id FROM repositories)",
        )
        .fetch_all(&self.pool)
        .await?;
        let orgs = sqlx::query(
            "SELECT id FROM organizations WHERE id NOT IN (SELECT organization_id FROM repositories WHERE organization_id IS NOT NULL)",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(users.len() + orgs.len());
        for row in users {
            out.push((row.try_get::<i64, _>("id")?, OwnerKind::User));
        }
        for row in orgs {
            out.push((row.try_get::<i64, _>("id")?, OwnerKind::Organization));
        }
        Ok(out)
    }

    async fn delete_owner(&self, id: i64, kind: OwnerKind) -> Result<(), StoreError> {
        let table = match kind {
            OwnerKind::User => "users",
            OwnerKind::Organization => "organizations",
        };
        sqlx::query(&format!("DELETE FROM {table} WHERE id = ?")).bind(id).execute(&self.pool).await?;
        Ok(())
    }
}

impl SqliteStore {
    async fn upsert_user(&self, kind: OwnerKind, record: &OwnerRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (
                id, login, kind, name, email, company, blog, location, bio, twitter_username,
                avatar_url, public_repos, public_gists, followers, following,
                country_code, region, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                login = excluded.login, kind = excluded.kind, name = excluded.name, email = excluded.email,
                company = excluded.company, blog = excluded.blog, location = excluded.location,
                bio = excluded.bio, twitter_username = excluded.twitter_username,
                avatar_url = excluded.avatar_url, public_repos = excluded.public_repos,
                public_gists = excluded.public_gists, followers = excluded.followers,
                following = excluded.following, updated_at = excluded.updated_at
            "#,
        )
        .bind(record.id)
        .bind(&record.login)
        .bind(owner_kind_to_db(kind))
        .bind(&record.name)
        .bind(&record.email)
        .bind(&record.company)
        .bind(&record.blog)
        .bind(&record.location)
        .bind(&record.bio)
        .bind(&record.twitter_username)
        .bind(&record.avatar_url)
        .bind(record.public_repos)
        .bind(record.public_gists)
        .bind(record.followers)
        .bind(record.following)
        .bind(&record.country_code)
        .bind(&record.region)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn owner_kind_to_db(kind: OwnerKind) -> &'static str {
    match kind {
        OwnerKind::User => "User",
        OwnerKind::Organization => "Organization",
    }
}
