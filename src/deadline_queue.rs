//! Pending actions ordered by expiration.
//!
//! Actions finish before their deadline far more often than they time out,
//! so the queue is a `BTreeMap` keyed by [`DeadlineKey`] with a side index
//! from action id to key: insert, remove-by-id and remove-min are all
//! `O(log n)`.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::action::{ActionId, DeadlineKey};

#[derive(Default)]
struct Inner {
    order: BTreeMap<DeadlineKey, ActionId>,
    keys: HashMap<ActionId, DeadlineKey>,
    next_seq: u64,
}

/// Deadline-ordered set of pending actions.
///
/// `changed()` resolves whenever an insertion moves the earliest deadline
/// forward, so a single timer armed on [`next_deadline`](Self::next_deadline)
/// can be re-armed.
#[derive(Default)]
pub struct DeadlineQueue {
    inner: Mutex<Inner>,
    rearm: Notify,
}

impl DeadlineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an action; returns `false` if it is already queued.
    pub fn insert(&self, id: ActionId, deadline: Instant) -> bool {
        let is_earliest = {
            let mut inner = self.inner.lock();
            if inner.keys.contains_key(&id) {
                return false;
            }
            let key = DeadlineKey {
                deadline,
                seq: inner.next_seq,
            };
            inner.next_seq += 1;
            inner.order.insert(key, id);
            inner.keys.insert(id, key);
            inner.order.keys().next() == Some(&key)
        };
        if is_earliest {
            self.rearm.notify_one();
        }
        true
    }

    /// Remove an action; returns `false` if it was not queued.
    pub fn remove(&self, id: ActionId) -> bool {
        let mut inner = self.inner.lock();
        match inner.keys.remove(&id) {
            Some(key) => {
                inner.order.remove(&key);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: ActionId) -> bool {
        self.inner.lock().keys.contains_key(&id)
    }

    /// Deadline of the next action to expire.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.inner
            .lock()
            .order
            .keys()
            .next()
            .map(|key| key.deadline)
    }

    /// Remove and return every action whose deadline is `<= now`, earliest first.
    pub fn pop_expired(&self, now: Instant) -> Vec<ActionId> {
        let mut inner = self.inner.lock();
        let mut expired = Vec::new();
        while let Some((key, id)) = inner.order.first_key_value().map(|(k, id)| (*k, *id)) {
            if key.deadline > now {
                break;
            }
            inner.order.remove(&key);
            inner.keys.remove(&id);
            expired.push(id);
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.inner.lock().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolves after an insertion became the new earliest deadline.
    ///
    /// A notification sent while nobody waits is kept, so a scheduler that
    /// reads `next_deadline` and then awaits this never misses a re-arm.
    pub async fn changed(&self) {
        self.rearm.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_pop_expired_in_deadline_order() {
        let queue = DeadlineQueue::new();
        let now = Instant::now();
        queue.insert(1, now + Duration::from_secs(3));
        queue.insert(2, now + Duration::from_secs(1));
        queue.insert(3, now + Duration::from_secs(2));
        queue.insert(4, now + Duration::from_secs(10));

        assert_eq!(queue.next_deadline(), Some(now + Duration::from_secs(1)));
        assert_eq!(
            queue.pop_expired(now + Duration::from_secs(3)),
            vec![2, 3, 1]
        );
        assert_eq!(queue.len(), 1);
        assert!(queue.pop_expired(now + Duration::from_secs(3)).is_empty());
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let queue = DeadlineQueue::new();
        let deadline = Instant::now();
        for id in [5, 3, 9] {
            queue.insert(id, deadline);
        }
        assert_eq!(queue.pop_expired(deadline), vec![5, 3, 9]);
    }

    #[test]
    fn test_insert_is_at_most_once_and_remove_by_id() {
        let queue = DeadlineQueue::new();
        let now = Instant::now();
        assert!(queue.insert(1, now));
        assert!(!queue.insert(1, now + Duration::from_secs(1)));
        assert_eq!(queue.len(), 1);

        assert!(queue.insert(2, now + Duration::from_secs(2)));
        assert!(queue.remove(1));
        assert!(!queue.remove(1));
        assert!(!queue.contains(1));
        assert_eq!(queue.next_deadline(), Some(now + Duration::from_secs(2)));
    }

    #[tokio::test]
    async fn test_earlier_insert_signals_rearm() {
        let queue = DeadlineQueue::new();
        let now = Instant::now();
        queue.insert(1, now + Duration::from_secs(10));
        // First insertion stored a permit.
        queue.changed().await;

        // A later deadline does not re-arm.
        queue.insert(2, now + Duration::from_secs(20));
        let pending =
            tokio::time::timeout(Duration::from_millis(10), queue.changed()).await;
        assert!(pending.is_err());

        queue.insert(3, now + Duration::from_secs(1));
        tokio::time::timeout(Duration::from_millis(10), queue.changed())
            .await
            .expect("re-arm not signalled");
    }
}
