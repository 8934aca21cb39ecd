//! Pure mapping from logical entities to destination records.
//!
//! Every projection of a post carries the full post, comments included, so
//! each query pattern is answered from a single partition read. Nothing in
//! here reads a clock; identical input always yields identical records.

use chrono::{DateTime, SecondsFormat, Utc};
use cutover_store::{Record, RecordKey};
use parse_display::Display;
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::{
    error::{CutoverError, Result},
    model::{Post, User},
};

pub const POSTS_BY_ID: &str = "posts_by_id";
pub const POSTS_BY_AUTHOR: &str = "posts_by_author";
pub const POSTS_BY_DATE: &str = "posts_by_date";
pub const POSTS_BY_CONTENT: &str = "posts_by_content";
pub const AUTHOR_POST_COUNTS: &str = "author_post_counts";
pub const USERS: &str = "users";
pub const USERS_BY_EMAIL: &str = "users_by_email";

/// Row tables holding a post projection, `posts_by_id` last.
pub const POST_TABLES: [&str; 4] = [POSTS_BY_AUTHOR, POSTS_BY_DATE, POSTS_BY_CONTENT, POSTS_BY_ID];

/// Every destination table, counters included.
pub const DESTINATION_TABLES: [&str; 7] = [
    POSTS_BY_AUTHOR,
    POSTS_BY_DATE,
    POSTS_BY_CONTENT,
    POSTS_BY_ID,
    AUTHOR_POST_COUNTS,
    USERS_BY_EMAIL,
    USERS,
];

/// Content buckets in listing order.
pub fn content_buckets() -> Vec<String> {
    std::iter::once("#".to_owned())
        .chain(('A'..='Z').map(String::from))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[display(style = "snake_case")]
pub enum ProjectionKind {
    ById,
    ByAuthor,
    ByDate,
    ByContent,
    User,
    UserByEmail,
}

impl ProjectionKind {
    pub fn table(&self) -> &'static str {
        match self {
            ProjectionKind::ById => POSTS_BY_ID,
            ProjectionKind::ByAuthor => POSTS_BY_AUTHOR,
            ProjectionKind::ByDate => POSTS_BY_DATE,
            ProjectionKind::ByContent => POSTS_BY_CONTENT,
            ProjectionKind::User => USERS,
            ProjectionKind::UserByEmail => USERS_BY_EMAIL,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub kind: ProjectionKind,
    pub record: Record,
}

/// All destination records derived from one entity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectionSet(Vec<Projection>);

impl ProjectionSet {
    pub fn get(&self, kind: ProjectionKind) -> Option<&Record> {
        self.0
            .iter()
            .find(|projection| projection.kind == kind)
            .map(|projection| &projection.record)
    }

    pub fn keys(&self) -> Vec<RecordKey> {
        self.0.iter().map(|p| p.record.key.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Projection> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_records(self) -> Vec<Record> {
        self.0.into_iter().map(|p| p.record).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterDelta {
    pub table: &'static str,
    pub key: String,
    pub delta: i64,
}

/// Destination changes needed to move an entity from one state to another.
///
/// `deletes` run first, then `puts`, then `counters`. Within `deletes` and
/// `puts` the by-id row always comes last so it keeps describing what else
/// was written until everything else succeeded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WritePlan {
    pub deletes: Vec<RecordKey>,
    pub puts: Vec<Record>,
    pub counters: Vec<CounterDelta>,
}

impl WritePlan {
    pub fn is_empty(&self) -> bool {
        self.deletes.is_empty() && self.puts.is_empty() && self.counters.is_empty()
    }

    /// Authors whose post counter this plan moves.
    pub fn counter_keys(&self) -> BTreeSet<String> {
        self.counters.iter().map(|c| c.key.to_owned()).collect()
    }
}

/// `YYYY-MM-DD` partition of the feed table.
pub fn date_bucket(value: &DateTime<Utc>) -> String {
    value.format("%Y-%m-%d").to_string()
}

/// Lexicographically sortable timestamp followed by the post id.
pub fn time_clustering(value: &DateTime<Utc>, id: Uuid) -> String {
    format!(
        "{}#{id}",
        value.to_rfc3339_opts(SecondsFormat::Micros, true)
    )
}

/// First character uppercased when it is an ASCII letter, `#` otherwise.
pub fn content_prefix(content: &str) -> String {
    match content.chars().next() {
        Some(c) if c.is_ascii_alphabetic() => c.to_ascii_uppercase().to_string(),
        _ => "#".to_owned(),
    }
}

pub fn content_clustering(content: &str, id: Uuid) -> String {
    format!("{content}\u{0}{id}")
}

pub fn validate_post(post: &Post) -> Result<()> {
    if post.id.is_nil() {
        return Err(CutoverError::Translation("post id is nil".to_owned()));
    }

    if post.author.id.is_nil() {
        return Err(CutoverError::Translation(format!(
            "post {} has a nil author id",
            post.id
        )));
    }

    if post.author.name.trim().is_empty() {
        return Err(CutoverError::Translation(format!(
            "post {} has an empty author name",
            post.id
        )));
    }

    if post.content.trim().is_empty() {
        return Err(CutoverError::Translation(format!(
            "post {} has blank content",
            post.id
        )));
    }

    if let Some(comment) = post.comments.iter().find(|c| c.author.id.is_nil()) {
        return Err(CutoverError::Translation(format!(
            "comment {} of post {} has a nil author id",
            comment.id, post.id
        )));
    }

    Ok(())
}

pub fn validate_user(user: &User) -> Result<()> {
    if user.id.is_nil() {
        return Err(CutoverError::Translation("user id is nil".to_owned()));
    }

    if user.name.trim().is_empty() {
        return Err(CutoverError::Translation(format!(
            "user {} has an empty name",
            user.id
        )));
    }

    if user.email.trim().is_empty() {
        return Err(CutoverError::Translation(format!(
            "user {} has a blank email",
            user.id
        )));
    }

    Ok(())
}

fn post_keys(post: &Post) -> [(ProjectionKind, RecordKey); 4] {
    let id = post.id.to_string();

    [
        (
            ProjectionKind::ByAuthor,
            RecordKey::new(POSTS_BY_AUTHOR, post.author.id.to_string())
                .clustering(time_clustering(&post.created_at, post.id)),
        ),
        (
            ProjectionKind::ByDate,
            RecordKey::new(POSTS_BY_DATE, date_bucket(&post.created_at))
                .clustering(time_clustering(&post.created_at, post.id)),
        ),
        (
            ProjectionKind::ByContent,
            RecordKey::new(POSTS_BY_CONTENT, content_prefix(&post.content))
                .clustering(content_clustering(&post.content, post.id)),
        ),
        (ProjectionKind::ById, RecordKey::new(POSTS_BY_ID, id)),
    ]
}

pub fn project(post: &Post) -> Result<ProjectionSet> {
    validate_post(post)?;

    let projections = post_keys(post)
        .into_iter()
        .map(|(kind, key)| {
            Ok(Projection {
                kind,
                record: Record::new(key).data(post)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ProjectionSet(projections))
}

/// Keys of every row projection of `post`, `posts_by_id` last.
pub fn tombstone(post: &Post) -> Vec<RecordKey> {
    post_keys(post).into_iter().map(|(_, key)| key).collect()
}

/// Changes moving the destination from `previous` to `next`; `None` on
/// either side stands for an absent post.
pub fn plan(previous: Option<&Post>, next: Option<&Post>) -> Result<WritePlan> {
    let puts = match next {
        Some(post) => project(post)?.into_records(),
        _ => Vec::new(),
    };

    let deletes = diff(previous.map(tombstone).unwrap_or_default(), &puts);

    let previous_author = previous.map(|post| post.author.id);
    let next_author = next.map(|post| post.author.id);
    let mut counters = Vec::new();

    if previous_author != next_author {
        if let Some(author) = previous_author {
            counters.push(CounterDelta {
                table: AUTHOR_POST_COUNTS,
                key: author.to_string(),
                delta: -1,
            });
        }

        if let Some(author) = next_author {
            counters.push(CounterDelta {
                table: AUTHOR_POST_COUNTS,
                key: author.to_string(),
                delta: 1,
            });
        }
    }

    Ok(WritePlan {
        deletes,
        puts,
        counters,
    })
}

fn user_keys(user: &User) -> [(ProjectionKind, RecordKey); 2] {
    [
        (
            ProjectionKind::UserByEmail,
            RecordKey::new(USERS_BY_EMAIL, user.email.to_owned()),
        ),
        (ProjectionKind::User, RecordKey::new(USERS, user.id.to_string())),
    ]
}

pub fn project_user(user: &User) -> Result<ProjectionSet> {
    validate_user(user)?;

    let projections = user_keys(user)
        .into_iter()
        .map(|(kind, key)| {
            Ok(Projection {
                kind,
                record: Record::new(key).data(user)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ProjectionSet(projections))
}

pub fn tombstone_user(user: &User) -> Vec<RecordKey> {
    user_keys(user).into_iter().map(|(_, key)| key).collect()
}

pub fn plan_user(previous: Option<&User>, next: Option<&User>) -> Result<WritePlan> {
    let puts = match next {
        Some(user) => project_user(user)?.into_records(),
        _ => Vec::new(),
    };

    let deletes = diff(previous.map(tombstone_user).unwrap_or_default(), &puts);

    Ok(WritePlan {
        deletes,
        puts,
        counters: Vec::new(),
    })
}

fn diff(previous: Vec<RecordKey>, puts: &[Record]) -> Vec<RecordKey> {
    previous
        .into_iter()
        .filter(|key| !puts.iter().any(|record| &record.key == key))
        .collect()
}
