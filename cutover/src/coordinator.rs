use cutover_store::{CursorOrder, Entity, RecordKey};
use parse_display::Display;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, fmt};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    backlog::{Backlog, Side},
    error::{CutoverError, Result},
    lock::EntityLocks,
    mirror::{self, Stores},
    model::{Comment, EntityRef, Post, User},
    phase::Phase,
    translator::{self, POSTS_BY_AUTHOR, USERS_BY_EMAIL},
};

/// Partial user update; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    CreateUser(User),
    UpdateUser { id: Uuid, update: UserUpdate },
    /// Also deletes every post the user authored.
    DeleteUser(Uuid),
    CreatePost(Post),
    UpdatePost { id: Uuid, content: String },
    DeletePost(Uuid),
    AddComment { post: Uuid, comment: Comment },
    RemoveComment { post: Uuid, position: usize },
    RemoveCommentById { post: Uuid, comment: Uuid },
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.entity())
    }
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::CreateUser(_) => "create_user",
            Operation::UpdateUser { .. } => "update_user",
            Operation::DeleteUser(_) => "delete_user",
            Operation::CreatePost(_) => "create_post",
            Operation::UpdatePost { .. } => "update_post",
            Operation::DeletePost(_) => "delete_post",
            Operation::AddComment { .. } => "add_comment",
            Operation::RemoveComment { .. } => "remove_comment",
            Operation::RemoveCommentById { .. } => "remove_comment_by_id",
        }
    }

    pub fn entity(&self) -> EntityRef {
        match self {
            Operation::CreateUser(user) => EntityRef::User(user.id),
            Operation::UpdateUser { id, .. } | Operation::DeleteUser(id) => EntityRef::User(*id),
            Operation::CreatePost(post) => EntityRef::Post(post.id),
            Operation::UpdatePost { id, .. } | Operation::DeletePost(id) => EntityRef::Post(*id),
            Operation::AddComment { post, .. }
            | Operation::RemoveComment { post, .. }
            | Operation::RemoveCommentById { post, .. } => EntityRef::Post(*post),
        }
    }
}

/// What happened on the non-authoritative side, worst last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display, Serialize, Deserialize)]
#[display(style = "snake_case")]
pub enum MirrorStatus {
    /// The active phase writes a single store.
    Skipped,
    Applied,
    /// Destination write failed; queued for reconciliation.
    Pending,
    /// Best-effort source write failed; queued for reconciliation.
    Failed,
}

impl MirrorStatus {
    pub fn merge(self, other: MirrorStatus) -> MirrorStatus {
        self.max(other)
    }
}

/// Entity state after the authoritative write.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    User(User),
    Post(Post),
    Deleted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub entity: EntityRef,
    pub value: Applied,
    pub mirror: MirrorStatus,
}

impl Outcome {
    pub fn post(&self) -> Option<&Post> {
        match &self.value {
            Applied::Post(post) => Some(post),
            _ => None,
        }
    }

    pub fn user(&self) -> Option<&User> {
        match &self.value {
            Applied::User(user) => Some(user),
            _ => None,
        }
    }
}

/// Applies mutations to the store subset the phase selects.
///
/// The authoritative store is written first and its failure fails the
/// operation. The other store is written afterwards; a failure there is
/// logged, recorded in the backlog and reported through [`MirrorStatus`].
#[derive(Clone)]
pub struct Coordinator {
    phase: Phase,
    stores: Stores,
    locks: EntityLocks,
    backlog: Backlog,
}

impl Coordinator {
    pub fn new(phase: Phase, stores: Stores, locks: EntityLocks, backlog: Backlog) -> Self {
        Self {
            phase,
            stores,
            locks,
            backlog,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub async fn apply(&self, operation: Operation) -> Result<Outcome> {
        debug!(phase = %self.phase, %operation, "applying operation");

        match operation {
            Operation::CreateUser(user) => self.create_user(user).await,
            Operation::UpdateUser { id, update } => self.update_user(id, update).await,
            Operation::DeleteUser(id) => self.delete_user(id).await,
            Operation::CreatePost(post) => self.create_post(post).await,
            Operation::UpdatePost { id, content } => {
                self.update_post(id, |post| {
                    post.content = content;
                    Ok(())
                })
                .await
            }
            Operation::DeletePost(id) => self.delete_post(id).await,
            Operation::AddComment { post, comment } => {
                if self.read_user(comment.author.id).await?.is_none() {
                    return Err(CutoverError::NotFound(
                        EntityRef::User(comment.author.id).to_string(),
                    ));
                }

                self.update_post(post, |post| {
                    post.comments.push(comment);
                    Ok(())
                })
                .await
            }
            Operation::RemoveComment { post, position } => {
                self.update_post(post, |post| {
                    let id = post
                        .comment_at(position)
                        .map(|comment| comment.id)
                        .ok_or_else(|| {
                            CutoverError::NotFound(format!("comment {position} of post#{}", post.id))
                        })?;

                    remove_comment(post, id)
                })
                .await
            }
            Operation::RemoveCommentById { post, comment } => {
                self.update_post(post, |post| remove_comment(post, comment))
                    .await
            }
        }
    }

    async fn create_user(&self, user: User) -> Result<Outcome> {
        translator::validate_user(&user)?;

        let entity = EntityRef::User(user.id);
        let _guard = self.locks.lock(entity).await?;

        if self.read_user(user.id).await?.is_some() {
            return Err(CutoverError::Validation(format!("{entity} already exists")));
        }

        let _email_guard = self.locks.lock(EntityLocks::email_key(&user.email)).await?;
        self.ensure_email_free(&user).await?;

        let mirror = self.write_user(user.id, Some(&user)).await?;

        Ok(Outcome {
            entity,
            value: Applied::User(user),
            mirror,
        })
    }

    async fn update_user(&self, id: Uuid, update: UserUpdate) -> Result<Outcome> {
        let entity = EntityRef::User(id);
        let _guard = self.locks.lock(entity).await?;

        let mut user = self
            .read_user(id)
            .await?
            .ok_or(CutoverError::NotFound(entity.to_string()))?;

        if let Some(name) = update.name {
            user.name = name;
        }

        let previous = user.email.to_owned();

        if let Some(email) = update.email {
            user.email = email;
        }

        translator::validate_user(&user)?;

        let mut email_guards = Vec::new();

        if user.email != previous {
            let mut emails = [previous.as_str(), user.email.as_str()];
            emails.sort();

            for email in emails {
                email_guards.push(self.locks.lock(EntityLocks::email_key(email)).await?);
            }

            self.ensure_email_free(&user).await?;
        }

        let mirror = self.write_user(id, Some(&user)).await?;

        Ok(Outcome {
            entity,
            value: Applied::User(user),
            mirror,
        })
    }

    async fn delete_user(&self, id: Uuid) -> Result<Outcome> {
        let entity = EntityRef::User(id);
        let _guard = self.locks.lock(entity).await?;

        if self.read_user(id).await?.is_none() {
            return Err(CutoverError::NotFound(entity.to_string()));
        }

        let mut mirror = MirrorStatus::Skipped;

        for post_id in self.authored_posts(id).await? {
            let _post_guard = self.locks.lock(EntityRef::Post(post_id)).await?;

            let Some(post) = self.read_post(post_id).await? else {
                continue;
            };

            mirror = mirror.merge(self.write_post(post_id, Some(post.author.id), None).await?);
        }

        mirror = mirror.merge(self.write_user(id, None).await?);

        Ok(Outcome {
            entity,
            value: Applied::Deleted,
            mirror,
        })
    }

    async fn create_post(&self, post: Post) -> Result<Outcome> {
        translator::validate_post(&post)?;

        let author = EntityRef::User(post.author.id);
        let _author_guard = self.locks.lock(author).await?;

        if self.read_user(post.author.id).await?.is_none() {
            return Err(CutoverError::NotFound(author.to_string()));
        }

        let entity = EntityRef::Post(post.id);
        let _guard = self.locks.lock(entity).await?;

        if self.read_post(post.id).await?.is_some() {
            return Err(CutoverError::Validation(format!("{entity} already exists")));
        }

        let mirror = self.write_post(post.id, None, Some(&post)).await?;

        Ok(Outcome {
            entity,
            value: Applied::Post(post),
            mirror,
        })
    }

    /// Read-modify-write of a whole post under its lock.
    async fn update_post<F>(&self, id: Uuid, change: F) -> Result<Outcome>
    where
        F: FnOnce(&mut Post) -> Result<()>,
    {
        let entity = EntityRef::Post(id);
        let _guard = self.locks.lock(entity).await?;

        let mut post = self
            .read_post(id)
            .await?
            .ok_or(CutoverError::NotFound(entity.to_string()))?;

        let author = post.author.id;
        change(&mut post)?;
        translator::validate_post(&post)?;

        let mirror = self.write_post(id, Some(author), Some(&post)).await?;

        Ok(Outcome {
            entity,
            value: Applied::Post(post),
            mirror,
        })
    }

    async fn delete_post(&self, id: Uuid) -> Result<Outcome> {
        let entity = EntityRef::Post(id);
        let _guard = self.locks.lock(entity).await?;

        let post = self
            .read_post(id)
            .await?
            .ok_or(CutoverError::NotFound(entity.to_string()))?;

        let mirror = self.write_post(id, Some(post.author.id), None).await?;

        Ok(Outcome {
            entity,
            value: Applied::Deleted,
            mirror,
        })
    }

    async fn write_post(
        &self,
        id: Uuid,
        previous_author: Option<Uuid>,
        next: Option<&Post>,
    ) -> Result<MirrorStatus> {
        let entity = EntityRef::Post(id);
        let authors = previous_author
            .into_iter()
            .chain(next.map(|post| post.author.id))
            .collect::<BTreeSet<_>>();

        if self.phase.source_authoritative() {
            mirror::write_source_post(&self.stores.source, id, next).await?;

            if !self.phase.writes_destination() {
                return Ok(MirrorStatus::Skipped);
            }

            let res =
                mirror::write_destination_post(&self.stores.destination, &self.locks, id, next)
                    .await
                    .map(|_| ());

            return Ok(self.mirrored(entity, Side::Destination, authors, res));
        }

        mirror::write_destination_post(&self.stores.destination, &self.locks, id, next).await?;

        let res = mirror::write_source_post(&self.stores.source, id, next).await;

        Ok(self.mirrored(entity, Side::Source, authors, res))
    }

    async fn write_user(&self, id: Uuid, next: Option<&User>) -> Result<MirrorStatus> {
        let entity = EntityRef::User(id);

        if self.phase.source_authoritative() {
            mirror::write_source_user(&self.stores.source, id, next).await?;

            if !self.phase.writes_destination() {
                return Ok(MirrorStatus::Skipped);
            }

            let res =
                mirror::write_destination_user(&self.stores.destination, &self.locks, id, next)
                    .await;

            return Ok(self.mirrored(entity, Side::Destination, BTreeSet::new(), res));
        }

        mirror::write_destination_user(&self.stores.destination, &self.locks, id, next).await?;

        let res = mirror::write_source_user(&self.stores.source, id, next).await;

        Ok(self.mirrored(entity, Side::Source, BTreeSet::new(), res))
    }

    fn mirrored(
        &self,
        entity: EntityRef,
        target: Side,
        authors: BTreeSet<Uuid>,
        res: Result<()>,
    ) -> MirrorStatus {
        let Err(e) = res else {
            return MirrorStatus::Applied;
        };

        warn!(%entity, %target, phase = %self.phase, "mirror write failed: {e}");
        self.backlog.record(entity, target, authors, e.to_string());

        match target {
            Side::Destination => MirrorStatus::Pending,
            Side::Source => MirrorStatus::Failed,
        }
    }

    async fn read_post(&self, id: Uuid) -> Result<Option<Post>> {
        if self.phase.source_authoritative() {
            mirror::source_post(&self.stores.source, id).await
        } else {
            mirror::destination_post(&self.stores.destination, id).await
        }
    }

    async fn read_user(&self, id: Uuid) -> Result<Option<User>> {
        if self.phase.source_authoritative() {
            mirror::source_user(&self.stores.source, id).await
        } else {
            mirror::destination_user(&self.stores.destination, id).await
        }
    }

    async fn ensure_email_free(&self, user: &User) -> Result<()> {
        let owner = if self.phase.source_authoritative() {
            self.stores
                .source
                .read_whole_table(User::table())
                .await?
                .iter()
                .filter_map(|record| User::from_record(record).ok())
                .find(|other| other.email == user.email)
                .map(|other| other.id)
        } else {
            self.stores
                .destination
                .get(&RecordKey::new(USERS_BY_EMAIL, user.email.to_owned()))
                .await?
                .map(|record| record.to_data::<User>())
                .transpose()?
                .map(|other| other.id)
        };

        match owner {
            Some(id) if id != user.id => Err(CutoverError::Validation(format!(
                "email {} is already registered",
                user.email
            ))),
            _ => Ok(()),
        }
    }

    async fn authored_posts(&self, author: Uuid) -> Result<Vec<Uuid>> {
        if self.phase.source_authoritative() {
            let posts = self.stores.source.read_whole_table(Post::table()).await?;

            return Ok(posts
                .iter()
                .filter_map(|record| Post::from_record(record).ok())
                .filter(|post| post.author.id == author)
                .map(|post| post.id)
                .collect());
        }

        let records = self
            .stores
            .destination
            .read_whole_partition(POSTS_BY_AUTHOR, &author.to_string(), CursorOrder::Asc)
            .await?;

        Ok(records
            .iter()
            .filter_map(|record| record.to_data::<Post>().ok())
            .map(|post| post.id)
            .collect())
    }
}

fn remove_comment(post: &mut Post, id: Uuid) -> Result<()> {
    let position = post
        .comment_position(id)
        .ok_or(CutoverError::NotFound(format!("comment {id} of post#{}", post.id)))?;

    post.comments.remove(position);

    Ok(())
}
