//! Subscriber list for one watched path.
//!
//! Most paths have exactly one subscriber, so the list is a small variant
//! type rather than a plain vector:
//!
//! ```text
//! Empty -> Single -> Multi
//!            ^         |
//!            +---------+   (Multi shrinks back to Single)
//! ```
//!
//! A `Multi` list may be mutated while it is being fired. Firing hands out
//! a snapshot of the backing sequence; a `remove` during a fire compacts
//! into a fresh sequence so the in-flight iteration is not disturbed.

use std::sync::Arc;

use super::event::WatchEvent;
use super::subscriber::Subscriber;

/// Callbacks registered for one watched path.
#[derive(Debug, Default)]
pub enum SubscriberList {
    #[default]
    Empty,
    Single(Subscriber),
    Multi {
        subscribers: Arc<Vec<Subscriber>>,
        /// Only picks how `remove` compacts: a fresh sequence while set, in
        /// place otherwise. The fire snapshot's `Arc` is what isolates an
        /// in-flight fire.
        firing: bool,
    },
}

impl SubscriberList {
    /// Append a subscriber.
    ///
    /// Adding the subscriber already held by a `Single` list is a no-op.
    /// `Multi` lists do not deduplicate: a subscriber added twice is
    /// invoked twice per event.
    pub fn add(self, subscriber: Subscriber) -> Self {
        match self {
            SubscriberList::Empty => SubscriberList::Single(subscriber),
            SubscriberList::Single(existing) if existing == subscriber => {
                SubscriberList::Single(existing)
            }
            SubscriberList::Single(existing) => SubscriberList::Multi {
                subscribers: Arc::new(vec![existing, subscriber]),
                firing: false,
            },
            SubscriberList::Multi {
                mut subscribers,
                firing,
            } => {
                // Copy-on-write: an outstanding fire snapshot keeps the old
                // sequence.
                Arc::make_mut(&mut subscribers).push(subscriber);
                SubscriberList::Multi {
                    subscribers,
                    firing,
                }
            }
        }
    }

    /// Remove the first occurrence of a subscriber.
    pub fn remove(self, subscriber: &Subscriber) -> Self {
        match self {
            SubscriberList::Empty => SubscriberList::Empty,
            SubscriberList::Single(existing) => {
                if existing == *subscriber {
                    SubscriberList::Empty
                } else {
                    SubscriberList::Single(existing)
                }
            }
            SubscriberList::Multi {
                mut subscribers,
                firing,
            } => {
                let Some(index) = subscribers.iter().position(|s| s == subscriber) else {
                    return SubscriberList::Multi {
                        subscribers,
                        firing,
                    };
                };

                if subscribers.len() == 2 {
                    return SubscriberList::Single(subscribers[1 - index].clone());
                }

                if firing {
                    let fresh: Vec<Subscriber> = subscribers
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| *i != index)
                        .map(|(_, s)| s.clone())
                        .collect();
                    subscribers = Arc::new(fresh);
                } else {
                    Arc::make_mut(&mut subscribers).remove(index);
                }

                SubscriberList::Multi {
                    subscribers,
                    firing,
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, SubscriberList::Empty)
    }

    pub fn len(&self) -> usize {
        match self {
            SubscriberList::Empty => 0,
            SubscriberList::Single(_) => 1,
            SubscriberList::Multi { subscribers, .. } => subscribers.len(),
        }
    }

    pub fn is_firing(&self) -> bool {
        matches!(self, SubscriberList::Multi { firing: true, .. })
    }

    /// Start a fire: mark the list in progress and return the subscribers
    /// visible right now.
    pub fn begin_fire(&mut self) -> FireSnapshot {
        match self {
            SubscriberList::Empty => FireSnapshot::Empty,
            SubscriberList::Single(subscriber) => FireSnapshot::One(subscriber.clone()),
            SubscriberList::Multi {
                subscribers,
                firing,
            } => {
                *firing = true;
                FireSnapshot::Many(Arc::clone(subscribers))
            }
        }
    }

    pub fn end_fire(&mut self) {
        if let SubscriberList::Multi { firing, .. } = self {
            *firing = false;
        }
    }

    /// Deliver an event to every subscriber in the list.
    ///
    /// Returns subscribers whose owner no longer wants them; the caller is
    /// expected to remove those. Callbacks cannot reach this list while it
    /// is borrowed here; the registry uses [`begin_fire`](Self::begin_fire)
    /// directly when callbacks may re-enter the watcher.
    pub fn fire_event(&mut self, event: &WatchEvent) -> Vec<Subscriber> {
        let snapshot = self.begin_fire();
        let stale = snapshot.fire(event);
        self.end_fire();
        stale
    }
}

/// Subscribers captured at the start of a fire.
#[derive(Debug)]
pub enum FireSnapshot {
    Empty,
    One(Subscriber),
    Many(Arc<Vec<Subscriber>>),
}

impl FireSnapshot {
    pub fn as_slice(&self) -> &[Subscriber] {
        match self {
            FireSnapshot::Empty => &[],
            FireSnapshot::One(subscriber) => std::slice::from_ref(subscriber),
            FireSnapshot::Many(subscribers) => subscribers.as_slice(),
        }
    }

    /// Invoke each wanted subscriber once, in order.
    ///
    /// Subscribers whose liveness predicate fails are skipped and returned.
    pub fn fire(&self, event: &WatchEvent) -> Vec<Subscriber> {
        let mut stale = Vec::new();
        for subscriber in self.as_slice() {
            if subscriber.is_wanted() {
                subscriber.notify(event);
            } else {
                stale.push(subscriber.clone());
            }
        }
        stale
    }
}
