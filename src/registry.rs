//! Single-flight registry: at most one live executor per key.
//!
//! A caller asking for a key that already has a live executor attaches its
//! continuation to it instead of starting another one. The entry is removed
//! the moment its executor stops, before the continuations run, so a
//! continuation asking for the same key starts a fresh executor.
//!
//! Every lookup, insert and remove goes through one registry-wide lock.
//! Executors are started and continuations run outside it.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Weak};

use log::{debug, info};
use parking_lot::Mutex;

use crate::action::ManagedAction;
use crate::executor::{Completion, Executor, ExecutorBehavior, Outcome};

type Entries<K, B> = Mutex<HashMap<K, Arc<Executor<B>>>>;

/// Keyed table of live executors of behavior `B`.
///
/// Not a process-wide singleton: create one per subsystem (or per test).
/// Clones share the same table.
pub struct SingleFlightRegistry<K, B: ExecutorBehavior> {
    entries: Arc<Entries<K, B>>,
}

impl<K, B: ExecutorBehavior> Clone for SingleFlightRegistry<K, B> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<K, B> Default for SingleFlightRegistry<K, B>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    B: ExecutorBehavior,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, B> SingleFlightRegistry<K, B>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    B: ExecutorBehavior,
{
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Attach `continuation` to the live executor for `key`, or build one
    /// with `factory`, register it, start it and attach to it.
    ///
    /// `factory` runs under the registry lock and must not call back into
    /// this registry.
    pub fn execute_or_attach<F, C>(&self, key: K, factory: F, continuation: C) -> Arc<Executor<B>>
    where
        F: FnOnce() -> Arc<Executor<B>>,
        C: FnOnce(Outcome<B::Output>) + Send + 'static,
    {
        let (executor, created) = {
            let mut entries = self.entries.lock();
            match entries.get(&key) {
                Some(existing) => (existing.clone(), false),
                None => {
                    let executor = factory();
                    entries.insert(key.clone(), executor.clone());
                    (executor, true)
                }
            }
        };

        if created {
            info!("[execute_or_attach]: {key:?} -> new executor {}", executor.id());
            let entries = Arc::downgrade(&self.entries);
            let id = executor.id();
            let key = key.clone();
            executor.on_stop(move || Self::deregister(&entries, &key, id));
        } else {
            debug!("[execute_or_attach]: {key:?} attached to executor {}", executor.id());
        }

        executor.execute(continuation);
        if created {
            executor.start();
        }
        executor
    }

    /// Like [`execute_or_attach`](Self::execute_or_attach), returning a
    /// future of the outcome.
    pub fn attach_or_start<F>(&self, key: K, factory: F) -> Completion<B::Output>
    where
        F: FnOnce() -> Arc<Executor<B>>,
    {
        let (tx, completion) = Completion::channel();
        self.execute_or_attach(key, factory, move |outcome| {
            let _ = tx.send(outcome);
        });
        completion
    }

    fn deregister(entries: &Weak<Entries<K, B>>, key: &K, id: u64) {
        let Some(entries) = entries.upgrade() else {
            return;
        };
        let mut entries = entries.lock();
        if entries.get(key).is_some_and(|e| e.id() == id) {
            entries.remove(key);
            debug!("[deregister]: {key:?} released by executor {id}");
        }
    }

    pub fn get(&self, key: &K) -> Option<Arc<Executor<B>>> {
        self.entries.lock().get(key).cloned()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel every live executor; each removes itself on stop.
    pub fn cancel_all(&self) {
        let live: Vec<Arc<Executor<B>>> = self.entries.lock().values().cloned().collect();
        for executor in live {
            executor.cancel();
        }
    }
}
