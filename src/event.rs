use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::StoreError;
use crate::model::{CollectionSnapshot, Entity, OperationKind, RecordId};

/// What kind of committed transition produced a notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Loaded,
    LoadFailed,
    /// Refused before any local change (conflict, unknown id, full store).
    Rejected,
    /// Local state changed ahead of the remote call.
    Optimistic,
    /// Remote confirmed; local state now holds the server's record.
    Reconciled,
    /// Remote failed; `previous` was restored.
    RolledBack,
    /// Remote reported the record gone; it was dropped locally.
    RemovedImplicitly,
    DeleteArmed,
    DeleteCancelled,
    Deleted,
}

impl Transition {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Loaded => "loaded",
            Self::LoadFailed => "load_failed",
            Self::Rejected => "rejected",
            Self::Optimistic => "optimistic",
            Self::Reconciled => "reconciled",
            Self::RolledBack => "rolled_back",
            Self::RemovedImplicitly => "removed_implicitly",
            Self::DeleteArmed => "delete_armed",
            Self::DeleteCancelled => "delete_cancelled",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Emitted after every committed transition. Views re-render from the
/// carried snapshot only.
#[derive(Clone, Debug)]
pub struct ChangeNotification<T: Entity> {
    pub sequence: u64,
    pub transition: Transition,
    pub operation: Option<OperationKind>,
    pub target: Option<RecordId<T::Key>>,
    pub snapshot: CollectionSnapshot<T>,
    pub error: Option<StoreError>,
}

impl<T: Entity> ChangeNotification<T> {
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

pub struct Subscription<T: Entity> {
    id: SubscriptionId,
    receiver: mpsc::UnboundedReceiver<ChangeNotification<T>>,
}

impl<T: Entity> Subscription<T> {
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Next notification, or `None` once unsubscribed.
    pub async fn recv(&mut self) -> Option<ChangeNotification<T>> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ChangeNotification<T>> {
        self.receiver.try_recv().ok()
    }

    /// Everything already delivered, oldest first.
    pub fn drain(&mut self) -> Vec<ChangeNotification<T>> {
        let mut out = Vec::new();
        while let Ok(notification) = self.receiver.try_recv() {
            out.push(notification);
        }
        out
    }
}

impl<T: Entity> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

pub(crate) struct Subscribers<T: Entity> {
    next_id: u64,
    next_sequence: u64,
    senders: Vec<(SubscriptionId, mpsc::UnboundedSender<ChangeNotification<T>>)>,
}

impl<T: Entity> Subscribers<T> {
    pub(crate) fn new() -> Self {
        Self {
            next_id: 1,
            next_sequence: 1,
            senders: Vec::new(),
        }
    }

    pub(crate) fn subscribe(&mut self) -> Subscription<T> {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.push((id, tx));
        Subscription { id, receiver: rx }
    }

    pub(crate) fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.senders.len();
        self.senders.retain(|(sid, _)| *sid != id);
        self.senders.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.senders.len()
    }

    pub(crate) fn emit(
        &mut self,
        transition: Transition,
        operation: Option<OperationKind>,
        target: Option<RecordId<T::Key>>,
        snapshot: &CollectionSnapshot<T>,
        error: Option<StoreError>,
    ) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        if self.senders.is_empty() {
            return sequence;
        }

        let notification = ChangeNotification {
            sequence,
            transition,
            operation,
            target,
            snapshot: snapshot.clone(),
            error,
        };

        // Closed receivers are pruned here rather than on drop.
        self.senders
            .retain(|(_, tx)| tx.send(notification.clone()).is_ok());

        debug!(
            sequence,
            transition = %transition,
            subscribers = self.senders.len(),
            "change notification emitted"
        );
        sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::Client;

    fn empty() -> CollectionSnapshot<Client> {
        CollectionSnapshot::new()
    }

    #[test]
    fn test_subscribe_receives_in_order() {
        let mut subscribers = Subscribers::<Client>::new();
        let mut sub = subscribers.subscribe();

        subscribers.emit(Transition::Loaded, None, None, &empty(), None);
        subscribers.emit(
            Transition::Optimistic,
            Some(OperationKind::Update),
            Some(RecordId::Assigned(1)),
            &empty(),
            None,
        );

        let received = sub.drain();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].transition, Transition::Loaded);
        assert_eq!(received[1].transition, Transition::Optimistic);
        assert!(received[0].sequence < received[1].sequence);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let mut subscribers = Subscribers::<Client>::new();
        let mut sub = subscribers.subscribe();

        assert!(subscribers.unsubscribe(sub.id()));
        assert!(!subscribers.unsubscribe(sub.id()));

        subscribers.emit(Transition::Loaded, None, None, &empty(), None);
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn test_dropped_receivers_are_pruned() {
        let mut subscribers = Subscribers::<Client>::new();
        let kept = subscribers.subscribe();
        drop(subscribers.subscribe());
        assert_eq!(subscribers.len(), 2);

        subscribers.emit(Transition::Loaded, None, None, &empty(), None);
        assert_eq!(subscribers.len(), 1);
        drop(kept);
    }

    #[test]
    fn test_failure_flag() {
        let mut subscribers = Subscribers::<Client>::new();
        let mut sub = subscribers.subscribe();
        subscribers.emit(
            Transition::RolledBack,
            Some(OperationKind::Update),
            Some(RecordId::Assigned(2)),
            &empty(),
            Some(StoreError::not_found(2)),
        );
        assert!(sub.try_recv().unwrap().is_failure());
    }
}
