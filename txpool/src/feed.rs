use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

const FEED_BUFFER: usize = 128;

struct SubEntry<T> {
    id: u64,
    sender: mpsc::Sender<T>,
}

struct FeedShared<T> {
    subs: Mutex<Vec<SubEntry<T>>>,
    next_id: AtomicU64,
}

fn lock_subs<T>(shared: &FeedShared<T>) -> MutexGuard<'_, Vec<SubEntry<T>>> {
    match shared.subs.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn remove_sub<T>(shared: &FeedShared<T>, id: u64) {
    lock_subs(shared).retain(|sub| sub.id != id);
}

/// Multi-subscriber broadcast. Publishing never blocks: events are pushed
/// with `try_send`, and a subscriber whose buffer has filled up is dropped
/// from the feed rather than stalling the publisher.
pub struct Feed<T> {
    shared: Arc<FeedShared<T>>,
}

impl<T> Clone for Feed<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Default for Feed<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Feed<T> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(FeedShared {
                subs: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn subscribe(&self) -> Subscription<T> {
        self.subscribe_with(FEED_BUFFER)
    }

    pub fn subscribe_with(&self, capacity: usize) -> Subscription<T> {
        let (sender, rx) = mpsc::channel(capacity.max(1));
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        lock_subs(&self.shared).push(SubEntry { id, sender });
        Subscription {
            id,
            rx,
            shared: Arc::downgrade(&self.shared),
        }
    }
}

impl<T: Clone> Feed<T> {
    /// Broadcasts `event`, returning how many subscribers received it.
    pub fn send(&self, event: T) -> usize {
        let mut delivered = 0;
        lock_subs(&self.shared).retain(|sub| match sub.sender.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => false,
            Err(TrySendError::Closed(_)) => false,
        });
        delivered
    }
}

/// Receiving half of a feed subscription. Dropping it unsubscribes.
pub struct Subscription<T> {
    id: u64,
    rx: mpsc::Receiver<T>,
    shared: Weak<FeedShared<T>>,
}

impl<T> Subscription<T> {
    /// Waits for the next event; `None` once the subscription was cancelled.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn unsubscribe(&self) {
        if let Some(shared) = self.shared.upgrade() {
            remove_sub(&shared, self.id);
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Groups subscriptions so they can all be cancelled at shutdown.
pub struct SubscriptionScope {
    closed: AtomicBool,
    closers: Mutex<Vec<Box<dyn Fn() + Send + Sync>>>,
}

impl Default for SubscriptionScope {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionScope {
    pub fn new() -> Self {
        Self {
            closed: AtomicBool::new(false),
            closers: Mutex::new(Vec::new()),
        }
    }

    /// Registers `sub` for cancellation when the scope closes. Tracking on a
    /// closed scope cancels the subscription immediately.
    pub fn track<T: Send + 'static>(&self, sub: Subscription<T>) -> Subscription<T> {
        let shared = sub.shared.clone();
        let id = sub.id;
        let closer: Box<dyn Fn() + Send + Sync> = Box::new(move || {
            if let Some(shared) = shared.upgrade() {
                remove_sub(&shared, id);
            }
        });
        if self.closed.load(Ordering::SeqCst) {
            closer();
            return sub;
        }
        match self.closers.lock() {
            Ok(mut closers) => closers.push(closer),
            Err(poisoned) => poisoned.into_inner().push(closer),
        }
        sub
    }

    /// Cancels every tracked subscription, waking their receivers.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let closers = match self.closers.lock() {
            Ok(mut closers) => std::mem::take(&mut *closers),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for closer in closers {
            closer();
        }
    }
}
