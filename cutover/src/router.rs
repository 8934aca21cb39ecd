use chrono::Utc;
use cutover_store::{CursorOrder, Entity, RecordKey, Store};
use futures_util::future::try_join_all;
use parse_display::{Display, FromStr};
use serde::{Deserialize, Serialize};
use std::{
    cmp::Reverse,
    collections::{BTreeSet, HashMap},
    future::Future,
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    error::{CutoverError, Result},
    mirror::{self, Stores},
    model::{Comment, EntityRef, Post, User},
    phase::Phase,
    translator::{
        content_buckets, content_prefix, date_bucket, AUTHOR_POST_COUNTS, POSTS_BY_AUTHOR,
        POSTS_BY_CONTENT, POSTS_BY_DATE, USERS, USERS_BY_EMAIL,
    },
};

/// Which store answered a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[display(style = "snake_case")]
pub enum Origin {
    Source,
    Destination,
    /// The destination failed or missed and the source answered instead.
    SourceFallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Routed<T> {
    pub value: T,
    pub origin: Origin,
}

impl<T> Routed<T> {
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Routed<U> {
        Routed {
            value: f(self.value),
            origin: self.origin,
        }
    }
}

/// Listing orders accepted by the post feed, parsed from the `sort` query
/// parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, FromStr)]
#[display(style = "kebab-case")]
pub enum PostSort {
    #[default]
    Latest,
    Oldest,
    ByContent,
    ByAuthor,
    ByCommentCount,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadQuery {
    Post(Uuid),
    Posts(PostSort),
    PostsByAuthor(Uuid),
    Comments(Uuid),
    User(Uuid),
    UserByEmail(String),
    Users,
    AuthorPostCount(Uuid),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReadResult {
    Post(PostView),
    Posts(Vec<PostView>),
    Comments(Vec<Comment>),
    User(User),
    Users(Vec<User>),
    Count(i64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostView {
    pub post: Post,
    pub comments_count: usize,
    pub author_post_count: i64,
}

/// Picks the store answering each read from the phase it was built with.
#[derive(Clone)]
pub struct Router {
    phase: Phase,
    stores: Stores,
    feed_days: u32,
}

impl Router {
    pub fn new(phase: Phase, stores: Stores, feed_days: u32) -> Self {
        Self {
            phase,
            stores,
            feed_days,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub async fn read(&self, query: ReadQuery) -> Result<Routed<ReadResult>> {
        Ok(match query {
            ReadQuery::Post(id) => self.post(id).await?.map(ReadResult::Post),
            ReadQuery::Posts(sort) => self.posts(sort).await?.map(ReadResult::Posts),
            ReadQuery::PostsByAuthor(id) => self.posts_by_author(id).await?.map(ReadResult::Posts),
            ReadQuery::Comments(id) => self.comments(id).await?.map(ReadResult::Comments),
            ReadQuery::User(id) => self.user(id).await?.map(ReadResult::User),
            ReadQuery::UserByEmail(email) => self.user_by_email(&email).await?.map(ReadResult::User),
            ReadQuery::Users => self.users().await?.map(ReadResult::Users),
            ReadQuery::AuthorPostCount(id) => {
                self.author_post_count(id).await?.map(ReadResult::Count)
            }
        })
    }

    async fn route<T, S, SF, D, DF>(&self, what: String, source: S, destination: D) -> Result<Routed<T>>
    where
        S: FnOnce() -> SF,
        SF: Future<Output = Result<T>>,
        D: FnOnce() -> DF,
        DF: Future<Output = Result<T>>,
    {
        if !self.phase.reads_destination() {
            return Ok(Routed {
                value: source().await?,
                origin: Origin::Source,
            });
        }

        if !self.phase.source_authoritative() {
            return Ok(Routed {
                value: destination().await?,
                origin: Origin::Destination,
            });
        }

        match destination().await {
            Ok(value) => Ok(Routed {
                value,
                origin: Origin::Destination,
            }),
            Err(e) => {
                if e.is_not_found() {
                    debug!(read = %what, "destination miss, falling back to source");
                } else {
                    warn!(read = %what, "destination read failed, falling back to source: {e}");
                }

                Ok(Routed {
                    value: source().await?,
                    origin: Origin::SourceFallback,
                })
            }
        }
    }

    pub async fn post(&self, id: Uuid) -> Result<Routed<PostView>> {
        self.route(
            format!("post#{id}"),
            || async move {
                let post = mirror::source_post(&self.stores.source, id)
                    .await?
                    .ok_or(CutoverError::NotFound(EntityRef::Post(id).to_string()))?;

                let counts = self.source_counts().await?;

                Ok(view(post, &counts))
            },
            || async move {
                let post = mirror::destination_post(&self.stores.destination, id)
                    .await?
                    .ok_or(CutoverError::NotFound(EntityRef::Post(id).to_string()))?;

                let counts = destination_counts(&self.stores.destination, [&post]).await?;

                Ok(view(post, &counts))
            },
        )
        .await
    }

    pub async fn posts(&self, sort: PostSort) -> Result<Routed<Vec<PostView>>> {
        self.route(
            format!("posts({sort})"),
            || self.source_posts(sort),
            || self.destination_posts(sort),
        )
        .await
    }

    /// Posts of one author, newest first.
    ///
    /// An empty destination partition is a valid answer, so an author whose
    /// posts are not migrated yet reads as having none instead of falling back.
    pub async fn posts_by_author(&self, author: Uuid) -> Result<Routed<Vec<PostView>>> {
        self.route(
            format!("posts_by_author({author})"),
            || async move {
                let mut posts = self
                    .all_source_posts()
                    .await?
                    .into_iter()
                    .filter(|post| post.author.id == author)
                    .collect::<Vec<_>>();

                posts.sort_by_key(|post| Reverse((post.created_at, post.id)));

                let counts = count_by_author(&posts);

                Ok(views(posts, &counts))
            },
            || async move {
                let posts = self.destination_author_posts(author).await?;
                let counts = destination_counts(&self.stores.destination, &posts).await?;

                Ok(views(posts, &counts))
            },
        )
        .await
    }

    pub async fn comments(&self, post: Uuid) -> Result<Routed<Vec<Comment>>> {
        Ok(self.post(post).await?.map(|view| view.post.comments))
    }

    pub async fn user(&self, id: Uuid) -> Result<Routed<User>> {
        let missing = || CutoverError::NotFound(EntityRef::User(id).to_string());

        self.route(
            format!("user#{id}"),
            || async move {
                mirror::source_user(&self.stores.source, id)
                    .await?
                    .ok_or_else(missing)
            },
            || async move {
                mirror::destination_user(&self.stores.destination, id)
                    .await?
                    .ok_or_else(missing)
            },
        )
        .await
    }

    pub async fn user_by_email(&self, email: &str) -> Result<Routed<User>> {
        let missing = || CutoverError::NotFound(format!("user with email {email}"));

        self.route(
            format!("user_by_email({email})"),
            || async move {
                self.all_source_users()
                    .await?
                    .into_iter()
                    .find(|user| user.email == email)
                    .ok_or_else(missing)
            },
            || async move {
                self.stores
                    .destination
                    .get(&RecordKey::new(USERS_BY_EMAIL, email))
                    .await?
                    .ok_or_else(missing)?
                    .to_data::<User>()
                    .map_err(CutoverError::from)
            },
        )
        .await
    }

    /// Every user ordered by name.
    pub async fn users(&self) -> Result<Routed<Vec<User>>> {
        self.route(
            "users".to_owned(),
            || async move { Ok(sorted_users(self.all_source_users().await?)) },
            || self.users_on(&self.stores.destination),
        )
        .await
    }

    /// The source has no counter; it counts the author's posts instead.
    ///
    /// A missing destination counter reads as zero and never falls back.
    pub async fn author_post_count(&self, author: Uuid) -> Result<Routed<i64>> {
        self.route(
            format!("author_post_count({author})"),
            || async move {
                Ok(self
                    .source_counts()
                    .await?
                    .get(&author)
                    .copied()
                    .unwrap_or_default())
            },
            || async move {
                Ok(self
                    .stores
                    .destination
                    .counter(AUTHOR_POST_COUNTS, &author.to_string())
                    .await?)
            },
        )
        .await
    }

    async fn all_source_posts(&self) -> Result<Vec<Post>> {
        Ok(self
            .stores
            .source
            .read_whole_table(Post::table())
            .await?
            .iter()
            .map(Post::from_record)
            .collect::<cutover_store::Result<Vec<_>>>()?)
    }

    async fn all_source_users(&self) -> Result<Vec<User>> {
        Ok(self
            .stores
            .source
            .read_whole_table(User::table())
            .await?
            .iter()
            .map(User::from_record)
            .collect::<cutover_store::Result<Vec<_>>>()?)
    }

    async fn source_counts(&self) -> Result<HashMap<Uuid, i64>> {
        Ok(count_by_author(&self.all_source_posts().await?))
    }

    async fn source_posts(&self, sort: PostSort) -> Result<Vec<PostView>> {
        let mut posts = self.all_source_posts().await?;
        let counts = count_by_author(&posts);

        match sort {
            PostSort::Latest => posts.sort_by_key(|post| Reverse((post.created_at, post.id))),
            PostSort::Oldest => posts.sort_by_key(|post| (post.created_at, post.id)),
            PostSort::ByContent => posts.sort_by(|a, b| {
                (content_prefix(&a.content), &a.content, a.id).cmp(&(
                    content_prefix(&b.content),
                    &b.content,
                    b.id,
                ))
            }),
            PostSort::ByCommentCount => {
                posts.sort_by_key(|post| Reverse((post.created_at, post.id)));
                posts.sort_by_key(|post| Reverse(post.comments.len()));
            }
            PostSort::ByAuthor => {
                let mut by_author = HashMap::<Uuid, Vec<Post>>::new();

                for post in posts {
                    by_author.entry(post.author.id).or_default().push(post);
                }

                posts = sorted_users(self.all_source_users().await?)
                    .into_iter()
                    .flat_map(|user| {
                        let mut posts = by_author.remove(&user.id).unwrap_or_default();
                        posts.sort_by_key(|post| Reverse((post.created_at, post.id)));
                        posts
                    })
                    .collect();
            }
        }

        Ok(views(posts, &counts))
    }

    async fn destination_posts(&self, sort: PostSort) -> Result<Vec<PostView>> {
        let destination = &self.stores.destination;

        let posts = match sort {
            PostSort::Latest => self.feed(CursorOrder::Desc).await?,
            PostSort::Oldest => self.feed(CursorOrder::Asc).await?,
            PostSort::ByCommentCount => {
                let mut posts = self.feed(CursorOrder::Desc).await?;
                posts.sort_by_key(|post| Reverse(post.comments.len()));
                posts
            }
            PostSort::ByContent => {
                let buckets = content_buckets();
                let partitions = try_join_all(buckets.iter().map(|bucket| {
                    destination.read_whole_partition(POSTS_BY_CONTENT, bucket, CursorOrder::Asc)
                }))
                .await?;

                decode_posts(partitions.into_iter().flatten())?
            }
            PostSort::ByAuthor => {
                let users = self.users_on(destination).await?;
                let partitions =
                    try_join_all(users.iter().map(|user| self.destination_author_posts(user.id)))
                        .await?;

                partitions.into_iter().flatten().collect()
            }
        };

        let counts = destination_counts(destination, &posts).await?;

        Ok(views(posts, &counts))
    }

    async fn users_on(&self, store: &Store) -> Result<Vec<User>> {
        let users = store
            .read_whole_table(USERS)
            .await?
            .iter()
            .map(|record| record.to_data::<User>())
            .collect::<cutover_store::Result<Vec<_>>>()?;

        Ok(sorted_users(users))
    }

    async fn destination_author_posts(&self, author: Uuid) -> Result<Vec<Post>> {
        let records = self
            .stores
            .destination
            .read_whole_partition(POSTS_BY_AUTHOR, &author.to_string(), CursorOrder::Desc)
            .await?;

        decode_posts(records)
    }

    /// Daily partitions within `feed_days` of now, walked in `order`.
    async fn feed(&self, order: CursorOrder) -> Result<Vec<Post>> {
        let now = Utc::now();
        let mut days = (0..self.feed_days)
            .map(|day| date_bucket(&(now - chrono::Duration::days(day as i64))))
            .collect::<Vec<_>>();

        if order == CursorOrder::Asc {
            days.reverse();
        }

        let partitions = try_join_all(days.iter().map(|day| {
            self.stores
                .destination
                .read_whole_partition(POSTS_BY_DATE, day, order)
        }))
        .await?;

        decode_posts(partitions.into_iter().flatten())
    }
}

fn decode_posts(records: impl IntoIterator<Item = cutover_store::Record>) -> Result<Vec<Post>> {
    Ok(records
        .into_iter()
        .map(|record| record.to_data::<Post>())
        .collect::<cutover_store::Result<Vec<_>>>()?)
}

async fn destination_counts<'a>(
    destination: &Store,
    posts: impl IntoIterator<Item = &'a Post>,
) -> Result<HashMap<Uuid, i64>> {
    let authors = posts
        .into_iter()
        .map(|post| post.author.id)
        .collect::<BTreeSet<_>>();

    let counts = try_join_all(authors.iter().map(|author| async move {
        destination
            .counter(AUTHOR_POST_COUNTS, &author.to_string())
            .await
            .map(|count| (*author, count))
    }))
    .await?;

    Ok(counts.into_iter().collect())
}

fn count_by_author(posts: &[Post]) -> HashMap<Uuid, i64> {
    let mut counts = HashMap::new();

    for post in posts {
        *counts.entry(post.author.id).or_default() += 1;
    }

    counts
}

fn sorted_users(mut users: Vec<User>) -> Vec<User> {
    users.sort_by(|a, b| (&a.name, a.id).cmp(&(&b.name, b.id)));
    users
}

fn view(post: Post, counts: &HashMap<Uuid, i64>) -> PostView {
    PostView {
        comments_count: post.comments.len(),
        author_post_count: counts.get(&post.author.id).copied().unwrap_or_default(),
        post,
    }
}

fn views(posts: Vec<Post>, counts: &HashMap<Uuid, i64>) -> Vec<PostView> {
    posts.into_iter().map(|post| view(post, counts)).collect()
}
