use chrono::{DateTime, SubsecRound, Utc};
use cutover_store::Entity;
use parse_display::Display;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Timestamps are kept at microsecond precision so they survive every store
/// and cursor round trip unchanged.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Identity of a mutable entity, also used as its lock key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, Serialize, Deserialize)]
pub enum EntityRef {
    #[display("user#{0}")]
    User(Uuid),
    #[display("post#{0}")]
    Post(Uuid),
}

/// Denormalized reference to a user, as stored on posts and comments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuthorRef {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

impl User {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            email: email.into(),
        }
    }

    pub fn author_ref(&self) -> AuthorRef {
        AuthorRef {
            id: self.id,
            name: self.name.to_owned(),
        }
    }
}

impl Entity for User {
    fn table<'a>() -> &'a str {
        "users"
    }

    fn id(&self) -> String {
        self.id.to_string()
    }
}

/// A comment embedded in a post.
///
/// Callers address comments by position; `id` is what writes resolve to so a
/// shifted index never removes the wrong comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: Uuid,
    pub author: AuthorRef,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Comment {
    pub fn new(author: AuthorRef, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            author,
            content: content.into(),
            created_at: now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: Uuid,
    pub author: AuthorRef,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub comments: Vec<Comment>,
}

impl Post {
    pub fn new(author: AuthorRef, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            author,
            content: content.into(),
            created_at: now(),
            comments: Vec::new(),
        }
    }

    pub fn created_at(mut self, value: DateTime<Utc>) -> Self {
        self.created_at = value.trunc_subsecs(6);
        self
    }

    pub fn comment_position(&self, id: Uuid) -> Option<usize> {
        self.comments.iter().position(|comment| comment.id == id)
    }

    pub fn comment_at(&self, position: usize) -> Option<&Comment> {
        self.comments.get(position)
    }
}

impl Entity for Post {
    fn table<'a>() -> &'a str {
        "posts"
    }

    fn id(&self) -> String {
        self.id.to_string()
    }
}

/// Entities the coordinator, migrator and reconciler track by [`EntityRef`].
pub trait Document: Entity {
    fn entity_ref_of(id: Uuid) -> EntityRef;
}

impl Document for User {
    fn entity_ref_of(id: Uuid) -> EntityRef {
        EntityRef::User(id)
    }
}

impl Document for Post {
    fn entity_ref_of(id: Uuid) -> EntityRef {
        EntityRef::Post(id)
    }
}
