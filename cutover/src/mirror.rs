use cutover_store::{CursorOrder, Record, RecordKey, Store};
use std::collections::BTreeSet;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    backlog::Side,
    error::Result,
    lock::EntityLocks,
    model::{EntityRef, Post, User},
    translator::{self, WritePlan, AUTHOR_POST_COUNTS, POSTS_BY_AUTHOR, POSTS_BY_ID, USERS},
};

/// The pair of stores every component works against.
#[derive(Clone)]
pub struct Stores {
    pub source: Store,
    pub destination: Store,
}

impl Stores {
    pub fn new(source: Store, destination: Store) -> Self {
        Self {
            source,
            destination,
        }
    }

    pub fn side(&self, side: Side) -> &Store {
        match side {
            Side::Source => &self.source,
            Side::Destination => &self.destination,
        }
    }
}

pub(crate) async fn source_post(source: &Store, id: Uuid) -> Result<Option<Post>> {
    Ok(source.get_by_id::<Post>(id.to_string()).await?)
}

pub(crate) async fn source_user(source: &Store, id: Uuid) -> Result<Option<User>> {
    Ok(source.get_by_id::<User>(id.to_string()).await?)
}

pub(crate) async fn destination_post(destination: &Store, id: Uuid) -> Result<Option<Post>> {
    read_data(destination, &RecordKey::new(POSTS_BY_ID, id.to_string())).await
}

pub(crate) async fn destination_user(destination: &Store, id: Uuid) -> Result<Option<User>> {
    read_data(destination, &RecordKey::new(USERS, id.to_string())).await
}

async fn read_data<D: serde::de::DeserializeOwned>(
    store: &Store,
    key: &RecordKey,
) -> Result<Option<D>> {
    match store.get(key).await? {
        Some(record) => Ok(Some(record.to_data()?)),
        _ => Ok(None),
    }
}

/// Runs a plan against the destination while holding the counter locks of
/// every author it touches.
async fn apply_plan(destination: &Store, locks: &EntityLocks, plan: WritePlan) -> Result<()> {
    let mut guards = Vec::new();

    for author in plan.counter_keys() {
        guards.push(locks.lock(EntityLocks::counter_key(author)).await?);
    }

    for key in plan.deletes.iter() {
        destination.delete(key).await?;
    }

    for record in plan.puts.into_iter() {
        destination.put_record(record).await?;
    }

    for counter in plan.counters.iter() {
        destination
            .increment_counter(counter.table, &counter.key, counter.delta)
            .await?;
    }

    drop(guards);

    Ok(())
}

/// Moves the destination projections of post `id` to `next`, diffing
/// against what `posts_by_id` currently holds. Returns every author whose
/// partition was touched.
pub(crate) async fn write_destination_post(
    destination: &Store,
    locks: &EntityLocks,
    id: Uuid,
    next: Option<&Post>,
) -> Result<BTreeSet<Uuid>> {
    let previous = destination_post(destination, id).await?;
    let plan = translator::plan(previous.as_ref(), next)?;

    let authors = previous
        .iter()
        .chain(next)
        .map(|post| post.author.id)
        .collect();

    debug!(
        post = %id,
        deletes = plan.deletes.len(),
        puts = plan.puts.len(),
        counters = plan.counters.len(),
        "writing destination post"
    );

    apply_plan(destination, locks, plan).await?;

    Ok(authors)
}

pub(crate) async fn write_source_post(source: &Store, id: Uuid, next: Option<&Post>) -> Result<()> {
    match next {
        Some(post) => source.put(post).await?,
        _ => source.delete_by_id::<Post>(id.to_string()).await?,
    };

    Ok(())
}

pub(crate) async fn write_destination_user(
    destination: &Store,
    locks: &EntityLocks,
    id: Uuid,
    next: Option<&User>,
) -> Result<()> {
    let previous = destination_user(destination, id).await?;
    let plan = translator::plan_user(previous.as_ref(), next)?;

    apply_plan(destination, locks, plan).await
}

pub(crate) async fn write_source_user(source: &Store, id: Uuid, next: Option<&User>) -> Result<()> {
    match next {
        Some(user) => source.put(user).await?,
        _ => source.delete_by_id::<User>(id.to_string()).await?,
    };

    Ok(())
}

/// Recounts one author's posts from their `posts_by_author` partition and
/// moves the counter to match. Returns the repaired value.
pub(crate) async fn repair_author_count(
    destination: &Store,
    locks: &EntityLocks,
    author: Uuid,
) -> Result<i64> {
    let _guard = locks.lock(EntityLocks::counter_key(author)).await?;
    let key = author.to_string();

    let expected = destination
        .read_whole_partition(POSTS_BY_AUTHOR, &key, CursorOrder::Asc)
        .await?
        .len() as i64;

    let current = destination.counter(AUTHOR_POST_COUNTS, &key).await?;

    if current != expected {
        info!(%author, current, expected, "author post counter repaired");
        destination
            .increment_counter(AUTHOR_POST_COUNTS, &key, expected - current)
            .await?;
    }

    Ok(expected)
}

/// Copies the current source state of `entity` into the destination. The
/// caller holds the entity lock.
pub(crate) async fn copy_to_destination(
    stores: &Stores,
    locks: &EntityLocks,
    entity: EntityRef,
) -> Result<BTreeSet<Uuid>> {
    match entity {
        EntityRef::User(id) => {
            let user = source_user(&stores.source, id).await?;
            write_destination_user(&stores.destination, locks, id, user.as_ref()).await?;

            Ok(BTreeSet::new())
        }
        EntityRef::Post(id) => {
            let post = source_post(&stores.source, id).await?;
            write_destination_post(&stores.destination, locks, id, post.as_ref()).await
        }
    }
}

async fn copy_to_source(stores: &Stores, entity: EntityRef) -> Result<()> {
    match entity {
        EntityRef::User(id) => {
            let user = destination_user(&stores.destination, id).await?;
            write_source_user(&stores.source, id, user.as_ref()).await
        }
        EntityRef::Post(id) => {
            let post = destination_post(&stores.destination, id).await?;
            write_source_post(&stores.source, id, post.as_ref()).await
        }
    }
}

/// Re-reads `entity` from the side opposite to `target` and rewrites it
/// into `target`. Author counters in `authors`, and any the rewrite touched,
/// are recounted afterwards.
pub(crate) async fn sync(
    stores: &Stores,
    locks: &EntityLocks,
    entity: EntityRef,
    target: Side,
    authors: &BTreeSet<Uuid>,
) -> Result<()> {
    let mut authors = authors.clone();
    debug!(%entity, from = %target.other(), to = %target, "syncing entity");

    {
        let _guard = locks.lock(entity).await?;

        match target {
            Side::Destination => authors.extend(copy_to_destination(stores, locks, entity).await?),
            Side::Source => copy_to_source(stores, entity).await?,
        }
    }

    for author in authors {
        repair_author_count(&stores.destination, locks, author).await?;
    }

    Ok(())
}

/// Raw source records of a collection decode into this, so a corrupt
/// document surfaces as a per-entity failure rather than a failed page.
pub(crate) fn decode_id(record: &Record) -> Option<Uuid> {
    record.key.partition.parse().ok()
}
