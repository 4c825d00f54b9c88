use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Fan-out of one output stream to any number of channel subscribers.
///
/// Items are delivered to each subscriber in publish order. Subscribers whose receiver
/// was dropped are pruned on the next publish.
pub struct Broadcaster<T> {
    subscribers: Arc<Mutex<Vec<Sender<T>>>>,
}

impl<T> Clone for Broadcaster<T> {
    fn clone(&self) -> Self {
        Broadcaster {
            subscribers: Arc::clone(&self.subscribers),
        }
    }
}

impl<T> Default for Broadcaster<T> {
    fn default() -> Self {
        Broadcaster {
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T: Clone> Broadcaster<T> {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock cannot leave the sender list half-updated.
    fn lock(&self) -> MutexGuard<'_, Vec<Sender<T>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a new subscriber; it receives every item published from now on.
    pub fn subscribe(&self) -> Receiver<T> {
        let (sender, receiver) = unbounded();
        self.lock().push(sender);
        receiver
    }

    /// Sends `item` to every live subscriber and returns how many received it.
    pub fn publish(&self, item: T) -> usize {
        let mut subscribers = self.lock();
        subscribers.retain(|sender| sender.send(item.clone()).is_ok());
        subscribers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }
}
