/// Bounded chunk channel with a drop-oldest producer side
///
/// The producer must never block on enqueue. When the queue is full the
/// oldest queued chunk is popped and discarded to make room, so under
/// backpressure the consumer always sees the most recent audio.

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};
use tracing::warn;

/// Result of a non-blocking push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Enqueued without displacing anything
    Queued,
    /// Enqueued after discarding the oldest queued item
    DroppedOldest,
    /// No receiver left; the item was discarded
    Disconnected,
}

/// Sending half that evicts the oldest item instead of blocking
///
/// Holds a receiver clone so it can pop from its own queue.
#[derive(Debug, Clone)]
pub struct DropOldestSender<T> {
    tx: Sender<T>,
    evict: Receiver<T>,
}

impl<T> DropOldestSender<T> {
    pub fn push(&self, item: T) -> PushOutcome {
        let mut item = item;
        let mut dropped = false;

        loop {
            match self.tx.try_send(item) {
                Ok(()) => {
                    return if dropped {
                        PushOutcome::DroppedOldest
                    } else {
                        PushOutcome::Queued
                    };
                }
                Err(TrySendError::Full(rejected)) => {
                    item = rejected;
                    match self.evict.try_recv() {
                        Ok(_) => dropped = true,
                        // Consumer drained it in between; just retry
                        Err(TryRecvError::Empty) => {}
                        Err(TryRecvError::Disconnected) => return PushOutcome::Disconnected,
                    }
                }
                Err(TrySendError::Disconnected(_)) => return PushOutcome::Disconnected,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.tx.capacity()
    }
}

/// Create a bounded channel whose sender drops the oldest item when full
pub fn drop_oldest_channel<T>(capacity: usize) -> (DropOldestSender<T>, Receiver<T>) {
    let capacity = if capacity == 0 {
        warn!("Zero-capacity queue requested, using 1");
        1
    } else {
        capacity
    };

    let (tx, rx) = bounded(capacity);
    (
        DropOldestSender {
            tx,
            evict: rx.clone(),
        },
        rx,
    )
}
