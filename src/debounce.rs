//! Coalesces bursts of input (search box keystrokes) into one settled value.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Write side. Cheap to clone; the debouncer ends once every clone is gone.
pub struct DebounceInput<T> {
    tx: Arc<watch::Sender<Option<T>>>,
}

impl<T> Clone for DebounceInput<T> {
    fn clone(&self) -> Self {
        Self {
            tx: Arc::clone(&self.tx),
        }
    }
}

impl<T> DebounceInput<T> {
    /// Replaces the pending value and restarts the quiet period.
    pub fn send(&self, value: T) {
        self.tx.send_replace(Some(value));
    }
}

pub struct Debouncer<T> {
    quiet: Duration,
    rx: watch::Receiver<Option<T>>,
}

/// Creates a connected input/debouncer pair.
pub fn debouncer<T>(quiet: Duration) -> (DebounceInput<T>, Debouncer<T>) {
    let (tx, rx) = watch::channel(None);
    (DebounceInput { tx: Arc::new(tx) }, Debouncer { quiet, rx })
}

impl<T: Clone> Debouncer<T> {
    #[must_use]
    pub const fn quiet_period(&self) -> Duration {
        self.quiet
    }

    /// Waits for input, then for `quiet` to pass with no further input, and
    /// yields the latest value. `None` once all inputs are dropped and
    /// nothing is left unseen.
    pub async fn settled(&mut self) -> Option<T> {
        if self.rx.changed().await.is_err() {
            return None;
        }

        loop {
            tokio::select! {
                () = tokio::time::sleep(self.quiet) => break,
                changed = self.rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.rx.borrow_and_update().clone()
    }
}
