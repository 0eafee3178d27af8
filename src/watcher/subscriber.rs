//! Subscriber handles.
//!
//! A [`Subscriber`] is compared by identity: clones of one handle are the
//! same subscriber, two handles built from identical closures are not.
//! Keep a clone around to unsubscribe later.

use std::fmt;
use std::sync::Arc;

use super::event::WatchEvent;

type Callback = dyn Fn(&WatchEvent) + Send + Sync;
type Liveness = dyn Fn() -> bool + Send + Sync;

struct SubscriberInner {
    callback: Box<Callback>,
    liveness: Option<Box<Liveness>>,
}

/// Callback registered for change notifications on one path.
#[derive(Clone)]
pub struct Subscriber {
    inner: Arc<SubscriberInner>,
}

impl Subscriber {
    /// Create a subscriber that stays registered until explicitly removed.
    pub fn new(callback: impl Fn(&WatchEvent) + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(SubscriberInner {
                callback: Box::new(callback),
                liveness: None,
            }),
        }
    }

    /// Create a subscriber whose owner reports whether it is still wanted.
    ///
    /// The predicate is checked before every delivery. Once it returns
    /// `false` the subscriber is not invoked and the watcher unsubscribes it.
    pub fn with_liveness(
        is_wanted: impl Fn() -> bool + Send + Sync + 'static,
        callback: impl Fn(&WatchEvent) + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(SubscriberInner {
                callback: Box::new(callback),
                liveness: Some(Box::new(is_wanted)),
            }),
        }
    }

    pub fn is_wanted(&self) -> bool {
        self.inner.liveness.as_ref().is_none_or(|alive| alive())
    }

    /// Invoke the callback.
    pub fn notify(&self, event: &WatchEvent) {
        (self.inner.callback)(event);
    }

    pub fn same_as(&self, other: &Subscriber) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for Subscriber {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

impl Eq for Subscriber {}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &Arc::as_ptr(&self.inner))
            .field("has_liveness", &self.inner.liveness.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use crate::watcher::event::{ChangeKind, FileEvent};

    #[test]
    fn test_identity_equality() {
        let a = Subscriber::new(|_| {});
        let b = Subscriber::new(|_| {});

        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn test_liveness_predicate() {
        let alive = Arc::new(AtomicBool::new(true));
        let calls = Arc::new(AtomicUsize::new(0));

        let flag = Arc::clone(&alive);
        let counter = Arc::clone(&calls);
        let subscriber = Subscriber::with_liveness(
            move || flag.load(Ordering::SeqCst),
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );

        assert!(subscriber.is_wanted());
        subscriber.notify(&WatchEvent::File(FileEvent::new("/a", ChangeKind::Modified)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        alive.store(false, Ordering::SeqCst);
        assert!(!subscriber.is_wanted());
        assert!(Subscriber::new(|_| {}).is_wanted());
    }
}
