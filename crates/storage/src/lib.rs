//! Observable state container and the keyed, ordered collection built on it.

use std::{
    collections::VecDeque,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    thread::{self, ThreadId},
};

use shared::error::StoreError;
use tracing::{debug, trace};

pub mod collection;
pub mod ids;

pub use collection::{Collection, CollectionPatch, CollectionState};
pub use ids::{IdGenerator, RandomIds, SequentialIds};

/// A snapshot type that can absorb a partial update.
pub trait State: Clone + Send + Sync + 'static {
    type Patch: Send + 'static;

    fn merge(&self, patch: Self::Patch) -> Self;
}

/// Input to [`Store::set`].
pub enum Update<S: State> {
    Patch(S::Patch),
    /// Derives the patch from the snapshot current at commit time.
    Compute(Box<dyn FnOnce(&S) -> S::Patch + Send>),
}

impl<S: State> Update<S> {
    pub fn compute<F>(f: F) -> Self
    where
        F: FnOnce(&S) -> S::Patch + Send + 'static,
    {
        Self::Compute(Box::new(f))
    }

    fn resolve(self, current: &S) -> S::Patch {
        match self {
            Self::Patch(patch) => patch,
            Self::Compute(compute) => compute(current),
        }
    }
}

type Listener<S> = Arc<dyn Fn(&S, &S) + Send + Sync>;

struct Registry<S: State> {
    snapshot: Arc<S>,
    listeners: Vec<(u64, Listener<S>)>,
    next_listener_id: u64,
    disposed: bool,
    committing_on: Option<ThreadId>,
    // Updates scheduled from inside a notification; applied before the gate is released.
    deferred: VecDeque<Update<S>>,
}

struct StoreInner<S: State> {
    scope: String,
    registry: Mutex<Registry<S>>,
    // Held for the whole compute/replace/notify sequence of one commit.
    commit_gate: Mutex<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to one observable state container. Clones share the same state.
pub struct Store<S: State> {
    inner: Arc<StoreInner<S>>,
}

impl<S: State> Clone for Store<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: State> fmt::Debug for Store<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("scope", &self.inner.scope)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl<S: State> Store<S> {
    pub fn create(scope: impl Into<String>, initial: S) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                scope: scope.into(),
                registry: Mutex::new(Registry {
                    snapshot: Arc::new(initial),
                    listeners: Vec::new(),
                    next_listener_id: 0,
                    disposed: false,
                    committing_on: None,
                    deferred: VecDeque::new(),
                }),
                commit_gate: Mutex::new(()),
            }),
        }
    }

    pub fn scope(&self) -> &str {
        &self.inner.scope
    }

    fn scope_missing(&self) -> StoreError {
        StoreError::scope_missing(self.inner.scope.clone())
    }

    /// Most recently committed snapshot. Never waits for an in-progress commit.
    pub fn get(&self) -> Result<Arc<S>, StoreError> {
        let registry = lock(&self.inner.registry);
        if registry.disposed {
            return Err(self.scope_missing());
        }
        Ok(Arc::clone(&registry.snapshot))
    }

    /// Commits the next snapshot and notifies every subscriber, in
    /// registration order, before returning it.
    pub fn set(&self, update: Update<S>) -> Result<Arc<S>, StoreError> {
        let this_thread = thread::current().id();
        {
            let registry = lock(&self.inner.registry);
            if registry.disposed {
                return Err(self.scope_missing());
            }
            if registry.committing_on == Some(this_thread) {
                return Err(StoreError::ReentrantCommit {
                    scope: self.inner.scope.clone(),
                });
            }
        }

        let _gate = lock(&self.inner.commit_gate);
        let previous = {
            let mut registry = lock(&self.inner.registry);
            if registry.disposed {
                return Err(self.scope_missing());
            }
            registry.committing_on = Some(this_thread);
            Arc::clone(&registry.snapshot)
        };
        let _marker = CommitMarker {
            registry: &self.inner.registry,
        };

        let committed = self.commit(previous, update)?;
        self.drain_deferred();
        Ok(committed)
    }

    /// Like [`Store::set`], but safe to call from inside this store's own
    /// notification: there the update is queued and committed, with its own
    /// notification phase, once the current one has finished.
    pub fn schedule(&self, update: Update<S>) -> Result<(), StoreError> {
        {
            let mut registry = lock(&self.inner.registry);
            if registry.disposed {
                return Err(self.scope_missing());
            }
            if registry.committing_on == Some(thread::current().id()) {
                registry.deferred.push_back(update);
                return Ok(());
            }
        }
        self.set(update).map(|_| ())
    }

    // Caller holds the commit gate and the commit marker.
    fn commit(&self, previous: Arc<S>, update: Update<S>) -> Result<Arc<S>, StoreError> {
        let next = Arc::new(previous.merge(update.resolve(&previous)));
        let listeners: Vec<Listener<S>> = {
            let mut registry = lock(&self.inner.registry);
            if registry.disposed {
                return Err(self.scope_missing());
            }
            registry.snapshot = Arc::clone(&next);
            registry
                .listeners
                .iter()
                .map(|(_, listener)| Arc::clone(listener))
                .collect()
        };

        trace!(scope = %self.inner.scope, subscribers = listeners.len(), "store commit");
        for listener in &listeners {
            listener(&previous, &next);
        }
        Ok(next)
    }

    fn drain_deferred(&self) {
        loop {
            let (previous, update) = {
                let mut registry = lock(&self.inner.registry);
                let Some(update) = registry.deferred.pop_front() else {
                    return;
                };
                (Arc::clone(&registry.snapshot), update)
            };
            if let Err(error) = self.commit(previous, update) {
                debug!(scope = %self.inner.scope, %error, "scheduled update dropped");
                return;
            }
        }
    }

    /// Registers `on_change`, called after a commit only when the selected
    /// slice differs from the slice selected from the previous snapshot.
    pub fn subscribe<T, Sel, F>(&self, selector: Sel, on_change: F) -> Result<Subscription, StoreError>
    where
        T: PartialEq + 'static,
        Sel: Fn(&S) -> T + Send + Sync + 'static,
        F: Fn(&T) + Send + Sync + 'static,
    {
        let listener: Listener<S> = Arc::new(move |previous: &S, next: &S| {
            let slice = selector(next);
            if selector(previous) != slice {
                on_change(&slice);
            }
        });

        let id = {
            let mut registry = lock(&self.inner.registry);
            if registry.disposed {
                return Err(self.scope_missing());
            }
            let id = registry.next_listener_id;
            registry.next_listener_id += 1;
            registry.listeners.push((id, listener));
            id
        };

        let weak: Weak<StoreInner<S>> = Arc::downgrade(&self.inner);
        Ok(Subscription {
            detach: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    lock(&inner.registry)
                        .listeners
                        .retain(|(listener_id, _)| *listener_id != id);
                }
            })),
        })
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.registry).listeners.len()
    }

    pub fn is_disposed(&self) -> bool {
        lock(&self.inner.registry).disposed
    }

    /// Ends the store's scope. Subscribers are dropped and every later call
    /// fails with [`StoreError::ScopeMissing`].
    pub fn dispose(&self) {
        let listeners = {
            let mut registry = lock(&self.inner.registry);
            if registry.disposed {
                return;
            }
            registry.disposed = true;
            registry.deferred.clear();
            std::mem::take(&mut registry.listeners)
        };
        debug!(scope = %self.inner.scope, subscribers = listeners.len(), "store disposed");
        drop(listeners);
    }
}

struct CommitMarker<'a, S: State> {
    registry: &'a Mutex<Registry<S>>,
}

impl<S: State> Drop for CommitMarker<'_, S> {
    fn drop(&mut self) {
        lock(self.registry).committing_on = None;
    }
}

/// Disposer returned by [`Store::subscribe`]. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    detach: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.detach.is_some())
            .finish()
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
