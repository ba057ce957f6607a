//! Typed records for the data model in the design doc §3. The Python source
//! this is grounded on shuffles bare dicts between layers; here every shape
//! that crosses a module boundary gets its own struct.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Discriminates an owner as it appears embedded in a repository search hit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum OwnerKind {
    User,
    Organization,
}

/// The minimal owner shape present on a repository search result, before the
/// full profile has been fetched.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OwnerSummary {
    pub id: i64,
    pub login: String,
    #[serde(rename = "type")]
    pub kind: OwnerKind,
}

/// Full profile fields shared by users and organizations, as returned by
/// `GET /users/{login}` or `GET /orgs/{login}`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct OwnerProfile {
    pub id: i64,
    pub login: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub company: Option<String>,
    pub blog: Option<String>,
    pub location: Option<String>,
    pub bio: Option<String>,
    pub twitter_username: Option<String>,
    pub avatar_url: Option<String>,
    pub public_repos: i64,
    pub public_gists: i64,
    pub followers: i64,
    pub following: i64,
    /// Only populated for organizations.
    pub public_members: Option<i64>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// The owner sum type from design doc §3. `country_code`/`region` are
/// populated by the external geocoding collaborator, never by the core.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Owner {
    User(OwnerRecord),
    Organization(OwnerRecord),
}

impl Owner {
    pub fn login(&self) -> &str {
        match self {
            Owner::User(r) | Owner::Organization(r) => &r.login,
        }
    }

    pub fn kind(&self) -> OwnerKind {
        match self {
            Owner::User(_) => OwnerKind::User,
            Owner::Organization(_) => OwnerKind::Organization,
        }
    }

    pub fn from_profile(kind: OwnerKind, profile: OwnerProfile) -> Self {
        let record = OwnerRecord::from(profile);
        match kind {
            OwnerKind::User => Owner::User(record),
            OwnerKind::Organization => Owner::Organization(record),
        }
    }
}

impl From<OwnerProfile> for OwnerRecord {
    fn from(profile: OwnerProfile) -> Self {
        OwnerRecord {
            id: profile.id,
            login: profile.login,
            name: profile.name,
            email: profile.email,
            company: profile.company,
            blog: profile.blog,
            location: profile.location,
            bio: profile.bio,
            twitter_username: profile.twitter_username,
            avatar_url: profile.avatar_url,
            public_repos: profile.public_repos,
            public_gists: profile.public_gists,
            followers: profile.followers,
            following: profile.following,
            public_members: profile.public_members,
            country_code: None,
            region: None,
            created_at: profile.created_at,
            updated_at: profile.updated_at,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct OwnerRecord {
    pub id: i64,
    pub login: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub company: Option<String>,
    pub blog: Option<String>,
    pub location: Option<String>,
    pub bio: Option<String>,
    pub twitter_username: Option<String>,
    pub avatar_url: Option<String>,
    pub public_repos: i64,
    pub public_gists: i64,
    pub followers: i64,
    pub following: i64,
    pub public_members: Option<i64>,
    pub country_code: Option<String>,
    pub region: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// A single item from `GET /search/repositories`, as handed from the Search
/// Driver to the Repository Pipeline.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RepositorySummary {
    pub id: i64,
    pub name: String,
    pub full_name: String,
    pub owner: OwnerSummary,
    pub organization: Option<OwnerSummary>,
    pub description: Option<String>,
    pub homepage: Option<String>,
    pub language: Option<String>,
    pub private: bool,
    pub fork: bool,
    pub default_branch: Option<String>,
    pub size: i64,
    pub stargazers_count: i64,
    pub watchers_count: i64,
    pub forks_count: i64,
    pub open_issues_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub pushed_at: Option<DateTime<Utc>>,
}

/// Fully materialized repository row, matching the `repositories` table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RepositoryRecord {
    pub id: i64,
    pub name: String,
    pub full_name: String,
    pub owner_id: i64,
    pub owner_kind: OwnerKind,
    pub organization_id: Option<i64>,
    pub description: Option<String>,
    pub homepage: Option<String>,
    pub language: Option<String>,
    pub private: bool,
    pub fork: bool,
    pub default_branch: Option<String>,
    pub size: i64,
    pub stargazers_count: i64,
    pub watchers_count: i64,
    pub forks_count: i64,
    pub open_issues_count: i64,
    pub contributors_count: Option<i64>,
    pub commits_count: Option<i64>,
    pub pull_requests_count: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub pushed_at: Option<DateTime<Utc>>,
}

impl RepositoryRecord {
    pub fn from_summary(summary: RepositorySummary, owner_kind: OwnerKind) -> Self {
        Self {
            id: summary.id,
            name: summary.name,
            full_name: summary.full_name,
            owner_id: summary.owner.id,
            owner_kind,
            organization_id: summary.organization.map(|o| o.id),
            description: summary.description,
            homepage: summary.homepage,
            language: summary.language,
            private: summary.private,
            fork: summary.fork,
            default_branch: summary.default_branch,
            size: summary.size,
            stargazers_count: summary.stargazers_count,
            watchers_count: summary.watchers_count,
            forks_count: summary.forks_count,
            open_issues_count: summary.open_issues_count,
            contributors_count: None,
            commits_count: None,
            pull_requests_count: None,
            created_at: summary.created_at,
            updated_at: summary.updated_at,
            pushed_at: summary.pushed_at,
        }
    }
}

/// Aggregate counts produced by the GraphQL Enrichment Batcher for a single
/// repository, keyed strictly on `database_id` (see REDESIGN FLAGS #1: the
/// opaque GraphQL node `id` is never accepted as a join key).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnrichmentDelta {
    pub database_id: i64,
    pub pull_requests_count: i64,
    pub commits_count: i64,
    /// Deliberately left at `None` here; the GraphQL path does not compute
    /// contributor counts (see design doc §4.7 / §9).
    pub contributors_count: Option<i64>,
}

/// A half-open `[start, end)` interval on repository creation time used as a
/// search filter, plus its state in the adaptive-subdivision state machine.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn width(&self) -> chrono::Duration {
        self.end - self.start
    }

    /// Splits into `n` equal-duration sub-windows covering the same range.
    pub fn split(&self, n: u32) -> Vec<Window> {
        assert!(n > 0, "cannot split a window into zero parts");
        let total_seconds = self.width().num_seconds().max(0);
        let n = n as i64;
        let mut windows = Vec::with_capacity(n as usize);
        let mut cursor = self.start;
        for i in 1..=n {
            let end = if i == n {
                self.end
            } else {
                self.start + chrono::Duration::seconds(total_seconds * i / n)
            };
            windows.push(Window::new(cursor, end));
            cursor = end;
        }
        windows
    }
}

/// A star-range bucket, composed with date windows as a Cartesian product
/// when the caller supplies `--star-range` buckets (design doc §4.3).
#[derive(Clone, Copy, Debug)]
pub struct StarRange {
    pub min: i64,
    pub max: Option<i64>,
}
