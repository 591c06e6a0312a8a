use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::error::RemoteError;
use crate::model::{Entity, RecordId};

/// The five verbs of a remote collection. Implementations classify their
/// own failures into [`RemoteError`].
#[async_trait]
pub trait RemoteCollection: Send + Sync + 'static {
    type Entity: Entity;

    async fn list(&self) -> Result<Vec<Self::Entity>, RemoteError>;

    async fn create(
        &self,
        draft: &<Self::Entity as Entity>::Draft,
    ) -> Result<Self::Entity, RemoteError>;

    async fn update(
        &self,
        key: &<Self::Entity as Entity>::Key,
        patch: &<Self::Entity as Entity>::Patch,
    ) -> Result<Self::Entity, RemoteError>;

    async fn delete(&self, key: &<Self::Entity as Entity>::Key) -> Result<(), RemoteError>;

    async fn set_status(
        &self,
        key: &<Self::Entity as Entity>::Key,
        status: &<Self::Entity as Entity>::Status,
    ) -> Result<Self::Entity, RemoteError>;
}

#[async_trait]
impl<R: RemoteCollection> RemoteCollection for std::sync::Arc<R> {
    type Entity = R::Entity;

    async fn list(&self) -> Result<Vec<R::Entity>, RemoteError> {
        (**self).list().await
    }

    async fn create(
        &self,
        draft: &<R::Entity as Entity>::Draft,
    ) -> Result<R::Entity, RemoteError> {
        (**self).create(draft).await
    }

    async fn update(
        &self,
        key: &<R::Entity as Entity>::Key,
        patch: &<R::Entity as Entity>::Patch,
    ) -> Result<R::Entity, RemoteError> {
        (**self).update(key, patch).await
    }

    async fn delete(&self, key: &<R::Entity as Entity>::Key) -> Result<(), RemoteError> {
        (**self).delete(key).await
    }

    async fn set_status(
        &self,
        key: &<R::Entity as Entity>::Key,
        status: &<R::Entity as Entity>::Status,
    ) -> Result<R::Entity, RemoteError> {
        (**self).set_status(key, status).await
    }
}

struct MemoryState<T> {
    records: Vec<T>,
    next_id: u64,
}

/// In-process collection behaving like the back-office REST server:
/// auto-increment ids from 1, payload validation, `NotFound` for unknown ids.
pub struct MemoryCollection<T: Entity> {
    state: Mutex<MemoryState<T>>,
}

impl<T: Entity> Default for MemoryCollection<T>
where
    T::Key: From<u64>,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> MemoryCollection<T>
where
    T::Key: From<u64>,
{
    #[must_use]
    pub fn new() -> Self {
        Self::seeded(Vec::new())
    }

    #[must_use]
    pub fn seeded(records: Vec<T>) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                records,
                next_id: 1,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current server-side contents, in insertion order.
    #[must_use]
    pub fn records(&self) -> Vec<T> {
        self.lock().records.clone()
    }

    /// Deletes a record behind the store's back, as another client would.
    pub fn evict(&self, key: &T::Key) -> bool {
        let id = RecordId::Assigned(key.clone());
        let mut state = self.lock();
        let before = state.records.len();
        state.records.retain(|r| r.id() != &id);
        state.records.len() != before
    }

    /// First free key at or after `next_id`, plus the counter value to
    /// commit once the record is accepted.
    fn next_key(state: &MemoryState<T>) -> (T::Key, u64) {
        let mut next = state.next_id;
        loop {
            let candidate: T::Key = next.into();
            next += 1;
            let id = RecordId::Assigned(candidate.clone());
            if !state.records.iter().any(|r| r.id() == &id) {
                return (candidate, next);
            }
        }
    }

    fn modify(
        &self,
        key: &T::Key,
        change: impl FnOnce(&mut T),
    ) -> Result<T, RemoteError> {
        let id = RecordId::Assigned(key.clone());
        let mut state = self.lock();
        let slot = state
            .records
            .iter_mut()
            .find(|r| r.id() == &id)
            .ok_or_else(|| RemoteError::not_found(format!("no record with id {key}")))?;

        let mut candidate = slot.clone();
        change(&mut candidate);
        validated(candidate.clone())?;
        *slot = candidate.clone();
        Ok(candidate)
    }
}

fn validated<T: Entity>(record: T) -> Result<T, RemoteError> {
    record.validate().map_err(|fields| RemoteError::Rejected {
        message: fields
            .first()
            .map_or_else(|| "validation failed".to_string(), |f| f.message.clone()),
        fields,
    })?;
    Ok(record)
}

#[async_trait]
impl<T: Entity> RemoteCollection for MemoryCollection<T>
where
    T::Key: From<u64>,
{
    type Entity = T;

    async fn list(&self) -> Result<Vec<T>, RemoteError> {
        Ok(self.records())
    }

    async fn create(&self, draft: &T::Draft) -> Result<T, RemoteError> {
        let mut state = self.lock();
        let (key, next_id) = Self::next_key(&state);
        let record = validated(T::from_draft(RecordId::Assigned(key.clone()), draft))?;
        state.next_id = next_id;
        state.records.push(record.clone());
        debug!(id = %key, "memory collection created record");
        Ok(record)
    }

    async fn update(&self, key: &T::Key, patch: &T::Patch) -> Result<T, RemoteError> {
        self.modify(key, |r| r.apply_patch(patch))
    }

    async fn delete(&self, key: &T::Key) -> Result<(), RemoteError> {
        if self.evict(key) {
            Ok(())
        } else {
            Err(RemoteError::not_found(format!("no record with id {key}")))
        }
    }

    async fn set_status(&self, key: &T::Key, status: &T::Status) -> Result<T, RemoteError> {
        self.modify(key, |r| r.apply_status(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{Client, ClientPatch, ClientStatus, NewClient};

    #[tokio::test]
    async fn test_create_assigns_sequential_ids() {
        let remote = MemoryCollection::<Client>::new();
        let a = remote.create(&NewClient::new("A", "a@x.io")).await.unwrap();
        let b = remote.create(&NewClient::new("B", "b@x.io")).await.unwrap();
        assert_eq!(a.id, RecordId::Assigned(1));
        assert_eq!(b.id, RecordId::Assigned(2));
        assert_eq!(remote.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_seeded_ids_are_skipped() {
        let seed = Client::from_draft(RecordId::Assigned(1), &NewClient::new("A", "a@x.io"));
        let remote = MemoryCollection::seeded(vec![seed]);
        let b = remote.create(&NewClient::new("B", "b@x.io")).await.unwrap();
        assert_eq!(b.id, RecordId::Assigned(2));
    }

    #[tokio::test]
    async fn test_invalid_payload_is_rejected_without_side_effects() {
        let remote = MemoryCollection::<Client>::new();
        let err = remote.create(&NewClient::new("", "a@x.io")).await.unwrap_err();
        assert!(matches!(err, RemoteError::Rejected { ref fields, .. } if fields[0].field == "name"));

        // The rejected draft did not use up an id
        let a = remote.create(&NewClient::new("A", "a@x.io")).await.unwrap();
        assert_eq!(a.id, RecordId::Assigned(1));
        let err = remote
            .update(&1, &ClientPatch::email("broken"))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Rejected { .. }));
        assert_eq!(remote.records(), vec![a]);
    }

    #[tokio::test]
    async fn test_unknown_ids_are_not_found() {
        let remote = MemoryCollection::<Client>::new();
        assert!(matches!(
            remote.delete(&5).await,
            Err(RemoteError::NotFound { .. })
        ));
        assert!(matches!(
            remote.set_status(&5, &ClientStatus::Suspended).await,
            Err(RemoteError::NotFound { .. })
        ));
    }
}
