use std::sync::{Arc, Weak};

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::debug;

use crate::{
    TransferError, TransferEvent, TransferId, TransferProgress, TransferRecord, TransferState,
};

/// Callback interface for transfer lifecycle changes.
///
/// Delivery is best effort and in order per record; nothing is replayed to an
/// observer that subscribes late. Callbacks run on the manager's write path,
/// so they should return quickly.
pub trait TransferObserver: Send + Sync {
    fn on_state_change(
        &self,
        _record: &TransferRecord,
        _state: TransferState,
        _progress: TransferProgress,
    ) {
    }

    /// Progress moved after a block finished
    fn on_progress(&self, _record: &TransferRecord, _progress: TransferProgress) {}

    fn on_failure(&self, _record: &TransferRecord, _error: &TransferError) {}

    fn on_complete(&self, _record: &TransferRecord) {}
}

type ObserverList = RwLock<Vec<(u64, Arc<dyn TransferObserver>)>>;

/// Keeps an observer registered; dropping it unsubscribes
#[must_use = "the observer is removed when the subscription is dropped"]
pub struct ObserverSubscription {
    id: u64,
    list: Weak<ObserverList>,
}

impl ObserverSubscription {
    pub fn unsubscribe(self) {}
}

impl Drop for ObserverSubscription {
    fn drop(&mut self) {
        if let Some(list) = self.list.upgrade() {
            list.write().retain(|(id, _)| *id != self.id);
        }
    }
}

/// Fans manager changes out to observers and the broadcast event stream
pub(crate) struct Notifier {
    observers: Arc<ObserverList>,
    next_id: parking_lot::Mutex<u64>,
    events: broadcast::Sender<TransferEvent>,
}

impl Notifier {
    pub(crate) fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            observers: Arc::new(RwLock::new(Vec::new())),
            next_id: parking_lot::Mutex::new(0),
            events,
        }
    }

    pub(crate) fn subscribe(&self, observer: Arc<dyn TransferObserver>) -> ObserverSubscription {
        let id = {
            let mut next = self.next_id.lock();
            *next += 1;
            *next
        };
        self.observers.write().push((id, observer));
        ObserverSubscription {
            id,
            list: Arc::downgrade(&self.observers),
        }
    }

    pub(crate) fn events(&self) -> broadcast::Receiver<TransferEvent> {
        self.events.subscribe()
    }

    // Snapshot so callbacks may drop their own subscription
    fn snapshot(&self) -> Vec<Arc<dyn TransferObserver>> {
        self.observers
            .read()
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect()
    }

    fn emit(&self, event: TransferEvent) {
        debug!("Transfer event {} for {}", event.event_name(), event.transfer_id());
        let _ = self.events.send(event);
    }

    pub(crate) fn added(&self, record: &TransferRecord) {
        self.emit(TransferEvent::Added {
            id: record.id.clone(),
            owner_id: record.owner_id.clone(),
            at: Utc::now(),
        });
        for observer in self.snapshot() {
            observer.on_state_change(record, record.state, record.progress());
        }
    }

    pub(crate) fn state_changed(&self, record: &TransferRecord, from: TransferState) {
        let progress = record.progress();
        self.emit(TransferEvent::StateChanged {
            id: record.id.clone(),
            from,
            to: record.state,
            progress,
            at: Utc::now(),
        });
        let observers = self.snapshot();
        for observer in &observers {
            observer.on_state_change(record, record.state, progress);
        }
        if record.state == TransferState::Complete {
            self.emit(TransferEvent::Completed {
                id: record.id.clone(),
                at: Utc::now(),
            });
            for observer in &observers {
                observer.on_complete(record);
            }
        }
    }

    pub(crate) fn progress(&self, record: &TransferRecord) {
        let progress = record.progress();
        self.emit(TransferEvent::Progress {
            id: record.id.clone(),
            progress,
            at: Utc::now(),
        });
        for observer in self.snapshot() {
            observer.on_progress(record, progress);
        }
    }

    pub(crate) fn failed(&self, record: &TransferRecord, error: &TransferError) {
        self.emit(TransferEvent::Failed {
            id: record.id.clone(),
            error: error.to_string(),
            at: Utc::now(),
        });
        for observer in self.snapshot() {
            observer.on_failure(record, error);
        }
    }

    pub(crate) fn removed(&self, id: &TransferId) {
        self.emit(TransferEvent::Removed {
            id: id.clone(),
            at: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ByteRange, TransferRequest};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        changes: AtomicUsize,
        completions: AtomicUsize,
    }

    impl TransferObserver for Counting {
        fn on_state_change(&self, _: &TransferRecord, _: TransferState, _: TransferProgress) {
            self.changes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_complete(&self, _: &TransferRecord) {
            self.completions.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn record() -> TransferRecord {
        let request = TransferRequest::download("acct", "k", "/tmp/k").with_range(ByteRange::whole(1));
        TransferRecord::from_request(request, 1)
    }

    #[test]
    fn dropped_subscription_stops_delivery() {
        let notifier = Notifier::new(16);
        let observer = Arc::new(Counting::default());
        let subscription = notifier.subscribe(observer.clone());

        let mut rec = record();
        notifier.added(&rec);
        assert_eq!(observer.changes.load(Ordering::SeqCst), 1);

        drop(subscription);
        rec.transition(TransferState::InProgress).unwrap();
        notifier.state_changed(&rec, TransferState::Pending);
        assert_eq!(observer.changes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn completion_emits_state_and_completed_events() {
        let notifier = Notifier::new(16);
        let observer = Arc::new(Counting::default());
        let _subscription = notifier.subscribe(observer.clone());
        let mut events = notifier.events();

        let mut rec = record();
        rec.transition(TransferState::InProgress).unwrap();
        rec.add_progress(1).unwrap();
        rec.transition(TransferState::Complete).unwrap();
        notifier.state_changed(&rec, TransferState::InProgress);

        assert_eq!(events.recv().await.unwrap().event_name(), "state_changed");
        assert_eq!(events.recv().await.unwrap().event_name(), "completed");
        assert_eq!(observer.completions.load(Ordering::SeqCst), 1);
    }
}
