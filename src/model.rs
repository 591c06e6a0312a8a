use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::FieldError;

const TEMP_ID_PREFIX: &str = "tmp-";

/// Locally scoped identifier for a record the remote has not assigned yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TempId(Uuid);

impl TempId {
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{TEMP_ID_PREFIX}{}", self.0)
    }
}

impl TryFrom<String> for TempId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let raw = value
            .strip_prefix(TEMP_ID_PREFIX)
            .ok_or_else(|| format!("temporary id must start with '{TEMP_ID_PREFIX}'"))?;
        Uuid::parse_str(raw)
            .map(Self)
            .map_err(|e| format!("invalid temporary id: {e}"))
    }
}

impl From<TempId> for String {
    fn from(id: TempId) -> Self {
        id.to_string()
    }
}

/// Identity of a record in a collection.
///
/// `Provisional` is declared first so untagged decoding only falls through
/// to `Assigned` when the value is not a `tmp-` id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId<K> {
    Provisional(TempId),
    Assigned(K),
}

impl<K> RecordId<K> {
    #[must_use]
    pub fn provisional() -> Self {
        Self::Provisional(TempId::generate())
    }

    #[must_use]
    pub const fn is_provisional(&self) -> bool {
        matches!(self, Self::Provisional(_))
    }

    #[must_use]
    pub const fn assigned(&self) -> Option<&K> {
        match self {
            Self::Assigned(key) => Some(key),
            Self::Provisional(_) => None,
        }
    }
}

impl<K> From<K> for RecordId<K> {
    fn from(key: K) -> Self {
        Self::Assigned(key)
    }
}

impl<K: fmt::Display> fmt::Display for RecordId<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Assigned(key) => key.fmt(f),
            Self::Provisional(temp) => temp.fmt(f),
        }
    }
}

/// A record type the store can synchronize.
///
/// Implementors are plain data; the store owns every copy it hands out.
pub trait Entity: Clone + fmt::Debug + Send + Sync + 'static {
    /// Server-assigned key, immutable once assigned.
    type Key: Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static;
    /// Input for `create`.
    type Draft: Clone + fmt::Debug + Send + Sync + 'static;
    /// Partial update for `update`.
    type Patch: Clone + fmt::Debug + Send + Sync + 'static;
    /// Value of the toggle-style status field.
    type Status: Clone + fmt::Debug + Send + Sync + 'static;

    fn id(&self) -> &RecordId<Self::Key>;

    fn from_draft(id: RecordId<Self::Key>, draft: &Self::Draft) -> Self;

    fn apply_patch(&mut self, patch: &Self::Patch);

    fn apply_status(&mut self, status: &Self::Status);

    /// Field-level checks a remote would run before accepting the record.
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        Ok(())
    }
}

/// Sync state of one record, for UI styling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordState {
    Synced,
    /// Created locally, remote `create` in flight.
    Provisional,
    /// Remote `update`/`setStatus` in flight.
    Saving,
    /// Grace timer armed; the row is hidden from the visible view.
    PendingDelete,
    /// Grace window elapsed, remote `delete` in flight.
    Deleting,
}

impl RecordState {
    #[must_use]
    pub const fn is_visible(self) -> bool {
        !matches!(self, Self::PendingDelete | Self::Deleting)
    }

    #[must_use]
    pub const fn is_settled(self) -> bool {
        matches!(self, Self::Synced)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SnapshotEntry<T> {
    pub entity: T,
    pub state: RecordState,
}

/// Ordered records of one collection, as of one committed transition.
#[derive(Clone, Debug, PartialEq)]
pub struct CollectionSnapshot<T> {
    entries: Vec<SnapshotEntry<T>>,
}

impl<T> Default for CollectionSnapshot<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> CollectionSnapshot<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SnapshotEntry<T>> {
        self.entries.iter()
    }

    pub fn entities(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|e| &e.entity)
    }

    #[must_use]
    pub fn into_entities(self) -> Vec<T> {
        self.entries.into_iter().map(|e| e.entity).collect()
    }
}

impl<T: Entity> CollectionSnapshot<T> {
    pub(crate) fn from_entities(entities: Vec<T>) -> Self {
        let mut snapshot = Self::new();
        for entity in entities {
            // Ids stay unique: a duplicate from the remote replaces in place.
            match snapshot.position(entity.id()) {
                Some(index) => snapshot.entries[index].entity = entity,
                None => snapshot.entries.push(SnapshotEntry {
                    entity,
                    state: RecordState::Synced,
                }),
            }
        }
        snapshot
    }

    #[must_use]
    pub fn get(&self, id: &RecordId<T::Key>) -> Option<&SnapshotEntry<T>> {
        self.entries.iter().find(|e| e.entity.id() == id)
    }

    #[must_use]
    pub fn position(&self, id: &RecordId<T::Key>) -> Option<usize> {
        self.entries.iter().position(|e| e.entity.id() == id)
    }

    #[must_use]
    pub fn contains(&self, id: &RecordId<T::Key>) -> bool {
        self.position(id).is_some()
    }

    pub(crate) fn get_mut(&mut self, id: &RecordId<T::Key>) -> Option<&mut SnapshotEntry<T>> {
        self.entries.iter_mut().find(|e| e.entity.id() == id)
    }

    pub(crate) fn push(&mut self, entity: T, state: RecordState) {
        self.entries.push(SnapshotEntry { entity, state });
    }

    pub(crate) fn remove(&mut self, id: &RecordId<T::Key>) -> Option<SnapshotEntry<T>> {
        self.position(id).map(|index| self.entries.remove(index))
    }

    pub(crate) fn set_state(&mut self, id: &RecordId<T::Key>, state: RecordState) -> bool {
        match self.get_mut(id) {
            Some(entry) => {
                entry.state = state;
                true
            }
            None => false,
        }
    }

    /// Swap the record at `id` for `entity` without moving it, dropping any
    /// other entry that already carries the new id.
    pub(crate) fn replace(&mut self, id: &RecordId<T::Key>, entity: T, state: RecordState) -> bool {
        let Some(index) = self.position(id) else {
            return false;
        };
        if entity.id() != id {
            if let Some(dup) = self.position(entity.id()) {
                self.entries.remove(dup);
                let index = if dup < index { index - 1 } else { index };
                self.entries[index] = SnapshotEntry { entity, state };
                return true;
            }
        }
        self.entries[index] = SnapshotEntry { entity, state };
        true
    }
}

/// Monotonic token that identifies one pending operation or armed timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpToken(pub(crate) u64);

impl OpToken {
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
    SetStatus,
}

impl OperationKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::SetStatus => "set_status",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the caller handed to a mutation.
#[derive(Clone, Debug)]
pub enum Submitted<T: Entity> {
    Draft(T::Draft),
    Patch(T::Patch),
    Status(T::Status),
    Delete,
}

/// One in-flight mutation. `previous` is captured before the optimistic
/// write and is the only input to rollback.
#[derive(Clone, Debug)]
pub struct PendingOperation<T: Entity> {
    pub token: OpToken,
    pub kind: OperationKind,
    pub target: RecordId<T::Key>,
    pub submitted: Submitted<T>,
    pub previous: Option<T>,
}

/// An armed two-phase delete.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingDeleteTimer<K> {
    pub target: RecordId<K>,
    pub token: OpToken,
    pub armed_at: Instant,
    pub deadline: Instant,
}

impl<K> PendingDeleteTimer<K> {
    pub(crate) fn arm(target: RecordId<K>, token: OpToken, grace: Duration) -> Self {
        let armed_at = Instant::now();
        Self {
            target,
            token,
            armed_at,
            deadline: armed_at + grace,
        }
    }

    #[must_use]
    pub fn remaining(&self, now: Instant) -> Duration {
        self.deadline.saturating_duration_since(now)
    }

    #[must_use]
    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Tag {
        id: RecordId<u32>,
        label: String,
    }

    impl Entity for Tag {
        type Key = u32;
        type Draft = String;
        type Patch = String;
        type Status = ();

        fn id(&self) -> &RecordId<u32> {
            &self.id
        }

        fn from_draft(id: RecordId<u32>, draft: &String) -> Self {
            Self {
                id,
                label: draft.clone(),
            }
        }

        fn apply_patch(&mut self, patch: &String) {
            self.label = patch.clone();
        }

        fn apply_status(&mut self, _status: &()) {}
    }

    fn tag(id: u32, label: &str) -> Tag {
        Tag {
            id: RecordId::Assigned(id),
            label: label.into(),
        }
    }

    #[test]
    fn test_temp_id_display_roundtrips_through_string() {
        let id = TempId::generate();
        let text = id.to_string();
        assert!(text.starts_with("tmp-"));
        assert_eq!(TempId::try_from(text).unwrap(), id);
        assert!(TempId::try_from("42".to_string()).is_err());
    }

    #[test]
    fn test_record_id_untagged_decoding() {
        let assigned: RecordId<u64> = serde_json::from_str("3").unwrap();
        assert_eq!(assigned, RecordId::Assigned(3));

        let temp = TempId::generate();
        let json = serde_json::to_string(&RecordId::<u64>::Provisional(temp)).unwrap();
        let decoded: RecordId<u64> = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, RecordId::Provisional(temp));

        let plain: RecordId<String> = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(plain, RecordId::Assigned("abc".to_string()));
    }

    #[test]
    fn test_record_id_from_key() {
        let id: RecordId<u64> = 9.into();
        assert_eq!(id.assigned(), Some(&9));
        assert!(!id.is_provisional());
    }

    #[test]
    fn test_record_state_visibility() {
        assert!(RecordState::Synced.is_visible());
        assert!(RecordState::Provisional.is_visible());
        assert!(RecordState::Saving.is_visible());
        assert!(!RecordState::PendingDelete.is_visible());
        assert!(!RecordState::Deleting.is_visible());
    }

    #[test]
    fn test_from_entities_keeps_ids_unique() {
        let snapshot =
            CollectionSnapshot::from_entities(vec![tag(1, "a"), tag(2, "b"), tag(1, "a2")]);
        let labels: Vec<_> = snapshot.entities().map(|t| t.label.as_str()).collect();
        assert_eq!(labels, ["a2", "b"]);
    }

    #[test]
    fn test_replace_preserves_position_and_drops_duplicate() {
        let mut snapshot = CollectionSnapshot::from_entities(vec![tag(1, "a"), tag(2, "b")]);
        let provisional = Tag::from_draft(RecordId::provisional(), &"c".to_string());
        let temp_id = provisional.id.clone();
        snapshot.push(provisional, RecordState::Provisional);

        assert!(snapshot.replace(&temp_id, tag(1, "c"), RecordState::Synced));
        let labels: Vec<_> = snapshot.entities().map(|t| t.label.as_str()).collect();
        assert_eq!(labels, ["b", "c"]);
        assert!(!snapshot.contains(&temp_id));
    }

    #[test]
    fn test_timer_deadline() {
        let timer = PendingDeleteTimer::arm(
            RecordId::Assigned(1u32),
            OpToken(1),
            Duration::from_millis(5000),
        );
        assert!(!timer.is_due(timer.armed_at));
        assert!(timer.is_due(timer.deadline));
        assert_eq!(timer.remaining(timer.armed_at), Duration::from_millis(5000));
    }
}
