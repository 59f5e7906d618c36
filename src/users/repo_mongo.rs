use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{
    bson::{self, doc, oid::ObjectId, Document},
    error::{ErrorKind, WriteFailure},
    options::IndexOptions,
    Collection, Database, IndexModel,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::{
    error::{Error, Result},
    users::{
        model::{Page, Role, User, UserId},
        repo::UserRepository,
    },
};

const DUPLICATE_KEY_CODE: i32 = 11000;
const INDEX_TIMEOUT: Duration = Duration::from_secs(30);

/// User document as stored in the collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct UserDocument {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    id: Option<ObjectId>,
    email: String,
    password: String,
    name: String,
    role: Role,
    active: bool,
    created_at: bson::DateTime,
    updated_at: bson::DateTime,
}

impl UserDocument {
    fn from_user(user: &User) -> Self {
        Self {
            id: None,
            email: user.email.clone(),
            password: user.password_hash.clone(),
            name: user.name.clone(),
            role: user.role,
            active: user.active,
            created_at: to_bson(user.created_at),
            updated_at: to_bson(user.updated_at),
        }
    }

    fn into_user(self) -> User {
        User {
            id: self.id.as_ref().map(surrogate_id).unwrap_or_default(),
            email: self.email,
            password_hash: self.password,
            name: self.name,
            role: self.role,
            active: self.active,
            created_at: from_bson(self.created_at),
            updated_at: from_bson(self.updated_at),
        }
    }
}

/// Numeric stand-in for an object id: the creation second embedded in it.
/// Lossy: every document created in the same second shares a surrogate, and
/// the object id cannot be recovered from it.
pub fn surrogate_id(oid: &ObjectId) -> UserId {
    oid.timestamp().timestamp_millis() / 1000
}

/// Users in a document collection keyed by store-generated object ids.
///
/// Lookup and deletion by numeric id are unsupported here because the
/// surrogate cannot be mapped back to a document; both always report
/// `NotFound`. Listing and searching only return active users, unlike the
/// relational repository.
pub struct MongoUserRepository {
    collection: Collection<UserDocument>,
}

impl MongoUserRepository {
    /// Kicks off creation of the unique email index in the background. A
    /// failure is logged and ignored since the index usually already exists.
    pub fn new(db: &Database, collection_name: &str) -> Self {
        let collection = db.collection::<UserDocument>(collection_name);

        let indexed = collection.clone();
        tokio::spawn(async move {
            let index = IndexModel::builder()
                .keys(doc! { "email": 1 })
                .options(IndexOptions::builder().unique(true).build())
                .build();
            match tokio::time::timeout(INDEX_TIMEOUT, indexed.create_index(index)).await {
                Ok(Ok(_)) => info!(collection = %indexed.name(), "email index ensured"),
                Ok(Err(e)) => warn!(error = %e, "failed to create email index"),
                Err(_) => warn!("timed out creating email index"),
            }
        });

        Self { collection }
    }

    async fn fetch_page(&self, filter: Document, offset: u64, limit: u64) -> Result<Page<User>> {
        let total = self
            .collection
            .count_documents(filter.clone())
            .await
            .map_err(|e| Error::storage("failed to count users", e))?;

        let Some(limit) = find_limit(limit) else {
            return Ok(Page {
                items: Vec::new(),
                total,
            });
        };
        let docs: Vec<UserDocument> = self
            .collection
            .find(filter)
            .skip(offset)
            .limit(limit)
            .sort(newest_first())
            .await
            .map_err(|e| Error::storage("failed to list users", e))?
            .try_collect()
            .await
            .map_err(|e| Error::storage("failed to decode users", e))?;

        Ok(Page {
            items: docs.into_iter().map(UserDocument::into_user).collect(),
            total,
        })
    }
}

#[async_trait]
impl UserRepository for MongoUserRepository {
    async fn create(&self, user: &mut User) -> Result<()> {
        let now = now_millis();
        let mut document = UserDocument::from_user(user);
        document.created_at = to_bson(now);
        document.updated_at = to_bson(now);

        let inserted = self.collection.insert_one(&document).await.map_err(|e| {
            if is_duplicate_key(&e) {
                Error::AlreadyExists("user")
            } else {
                Error::storage("failed to create user", e)
            }
        })?;

        if let Some(oid) = inserted.inserted_id.as_object_id() {
            user.id = surrogate_id(&oid);
        }
        user.created_at = now;
        user.updated_at = now;
        debug!(user_id = user.id, "user document inserted");
        Ok(())
    }

    async fn get_by_id(&self, id: UserId) -> Result<User> {
        debug!(user_id = id, "lookup by id is unsupported on the document backend");
        Err(Error::NotFound("user"))
    }

    async fn get_by_email(&self, email: &str) -> Result<User> {
        self.collection
            .find_one(doc! { "email": email })
            .await
            .map_err(|e| Error::storage("failed to get user by email", e))?
            .map(UserDocument::into_user)
            .ok_or(Error::NotFound("user"))
    }

    /// Matches on email; the email itself is not rewritten.
    async fn update(&self, user: &mut User) -> Result<()> {
        let now = now_millis();
        let update = doc! {
            "$set": {
                "name": &user.name,
                "role": user.role.as_str(),
                "active": user.active,
                "password": &user.password_hash,
                "updated_at": to_bson(now),
            }
        };
        let result = self
            .collection
            .update_one(doc! { "email": &user.email }, update)
            .await
            .map_err(|e| {
                if is_duplicate_key(&e) {
                    Error::AlreadyExists("user")
                } else {
                    Error::storage("failed to update user", e)
                }
            })?;

        if result.matched_count == 0 {
            return Err(Error::NotFound("user"));
        }
        user.updated_at = now;
        Ok(())
    }

    async fn delete(&self, id: UserId) -> Result<()> {
        debug!(user_id = id, "delete by id is unsupported on the document backend");
        Err(Error::NotFound("user"))
    }

    async fn list(&self, offset: u64, limit: u64) -> Result<Page<User>> {
        self.fetch_page(list_filter(), offset, limit).await
    }

    async fn search(&self, query: &str, offset: u64, limit: u64) -> Result<Page<User>> {
        self.fetch_page(search_filter(query), offset, limit).await
    }
}

fn list_filter() -> Document {
    doc! { "active": true }
}

fn search_filter(query: &str) -> Document {
    let pattern = doc! { "$regex": regex::escape(query), "$options": "i" };
    doc! {
        "active": true,
        "$or": [
            { "name": pattern.clone() },
            { "email": pattern },
        ],
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    let code = match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(we)) => Some(we.code),
        ErrorKind::Command(ce) => Some(ce.code),
        _ => None,
    };
    code == Some(DUPLICATE_KEY_CODE) || is_duplicate_key_message(&err.to_string())
}

pub(crate) fn is_duplicate_key_message(message: &str) -> bool {
    message.contains("E11000") || message.to_lowercase().contains("duplicate key error")
}

fn now_millis() -> OffsetDateTime {
    from_bson(bson::DateTime::now())
}

fn to_bson(at: OffsetDateTime) -> bson::DateTime {
    let millis = at.unix_timestamp_nanos() / 1_000_000;
    bson::DateTime::from_millis(i64::try_from(millis).unwrap_or(i64::MAX))
}

fn from_bson(at: bson::DateTime) -> OffsetDateTime {
    let nanos = i128::from(at.timestamp_millis()) * 1_000_000;
    OffsetDateTime::from_unix_timestamp_nanos(nanos).unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

/// The server reads a limit of zero as "no limit", so an empty page is
/// decided before querying.
fn find_limit(limit: u64) -> Option<i64> {
    match limit {
        0 => None,
        n => Some(i64::try_from(n).unwrap_or(i64::MAX)),
    }
}

/// `_id` breaks ties between documents created in the same millisecond.
fn newest_first() -> Document {
    doc! { "created_at": -1, "_id": -1 }
}
