//! Issued API key records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// One issued API key.
///
/// Everything except `external_id` is fixed at construction; the external id can
/// only be changed through the owning repository. Two records are equal when
/// their ids are equal, whatever the other fields hold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyRecord<E> {
    id: Uuid,
    #[serde(default)]
    consumer: String,
    key: String,
    external_id: E,
    created: DateTime<Utc>,
    #[serde(default)]
    roles: Vec<String>,
}

impl<E> ApiKeyRecord<E> {
    pub fn new<R, S>(
        id: Uuid,
        consumer: impl Into<String>,
        key: impl Into<String>,
        external_id: E,
        created: DateTime<Utc>,
        roles: R,
    ) -> Self
    where
        R: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id,
            consumer: consumer.into(),
            key: key.into(),
            external_id,
            created,
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn external_id(&self) -> &E {
        &self.external_id
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    /// True for a nil id or an empty key; such records never resolve a request.
    pub fn is_empty(&self) -> bool {
        self.id.is_nil() || self.key.is_empty()
    }

    pub(crate) fn set_external_id(&mut self, external_id: E) {
        self.external_id = external_id;
    }
}

impl<E> PartialEq for ApiKeyRecord<E> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<E> Eq for ApiKeyRecord<E> {}

impl<E> Hash for ApiKeyRecord<E> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Public view of a record without the secret key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyInfo<E> {
    pub id: Uuid,
    pub consumer: String,
    pub external_id: E,
    pub created: DateTime<Utc>,
    pub roles: Vec<String>,
}

impl<E> From<ApiKeyRecord<E>> for ApiKeyInfo<E> {
    fn from(rec: ApiKeyRecord<E>) -> Self {
        Self {
            id: rec.id,
            consumer: rec.consumer,
            external_id: rec.external_id,
            created: rec.created,
            roles: rec.roles,
        }
    }
}
