use std::sync::Arc;

use futures::{future, Stream, StreamExt};
use shared::{
    domain::{ChecklistItem, Completable, EntityId, FieldMap, FieldValue, TodoItem},
    error::StoreError,
    protocol::{CommitPolicy, Mutation, StoreEvent},
};
use storage::{Collection, CollectionState, IdGenerator, RandomIds, Subscription};
use tokio::{
    runtime::Handle,
    sync::{broadcast, watch},
};
use tokio_stream::wrappers::BroadcastStream;
use tracing::info;

pub mod config;
pub mod coordinator;
pub mod latency;

pub use config::Settings;
pub use coordinator::MutationCoordinator;
pub use latency::{FixedLatency, LatencyBoundary, MutationTicket, NoLatency};

pub type TodoStore = ListStore<TodoItem>;
pub type ChecklistStore = ListStore<ChecklistItem>;

/// Everything a consumer needs from one list: fire-and-forget actions, read
/// accessors over the latest snapshot, and subscriptions.
///
/// Actions only fail when the store's scope has ended.
pub struct ListStore<E: Completable> {
    coordinator: MutationCoordinator<E>,
    events: broadcast::Sender<StoreEvent>,
    in_flight: watch::Receiver<usize>,
    _in_flight_feed: Subscription,
}

impl<E: Completable> ListStore<E> {
    pub fn new(scope: impl Into<String>, settings: &Settings) -> Result<Self, StoreError> {
        Self::new_with_dependencies(
            scope,
            settings,
            Arc::new(RandomIds),
            settings.latency_boundary(),
        )
    }

    pub fn new_with_dependencies(
        scope: impl Into<String>,
        settings: &Settings,
        ids: Arc<dyn IdGenerator>,
        latency: Arc<dyn LatencyBoundary>,
    ) -> Result<Self, StoreError> {
        let runtime = Handle::try_current().map_err(|_| StoreError::RuntimeUnavailable)?;
        let collection = Collection::with_id_generator(scope, ids);

        let (in_flight_tx, in_flight) = watch::channel(0usize);
        let feed = collection.subscribe(
            |state: &CollectionState<E>| state.in_flight,
            move |count: &usize| {
                in_flight_tx.send_replace(*count);
            },
        )?;

        let (events, _) = broadcast::channel(settings.event_capacity.max(1));
        info!(
            scope = collection.store().scope(),
            policy = ?settings.commit_policy,
            "list store created"
        );
        let coordinator = MutationCoordinator::new(
            collection,
            latency,
            settings.commit_policy,
            runtime,
            events.clone(),
        );

        Ok(Self {
            coordinator,
            events,
            in_flight,
            _in_flight_feed: feed,
        })
    }

    fn collection(&self) -> &Collection<E> {
        self.coordinator.collection()
    }

    pub fn scope(&self) -> &str {
        self.collection().store().scope()
    }

    pub fn policy(&self) -> CommitPolicy {
        self.coordinator.policy()
    }

    /// Returns the new entity's id right away; it appears in the ordering
    /// sequence once the mutation commits.
    pub fn add(&self, fields: FieldMap) -> Result<EntityId, StoreError> {
        let id = self.coordinator.next_id();
        self.coordinator.submit(Mutation::Add { id, fields })?;
        Ok(id)
    }

    pub fn remove(&self, id: EntityId) -> Result<(), StoreError> {
        self.coordinator.submit(Mutation::Remove { id })?;
        Ok(())
    }

    pub fn set_done(&self, id: EntityId, done: bool) -> Result<(), StoreError> {
        self.set_field(id, E::DONE_FIELD, FieldValue::Flag(done))
    }

    pub fn set_field(
        &self,
        id: EntityId,
        field: impl Into<String>,
        value: FieldValue,
    ) -> Result<(), StoreError> {
        self.coordinator.submit(Mutation::SetField {
            id,
            field: field.into(),
            value,
        })?;
        Ok(())
    }

    pub fn reset(&self) -> Result<(), StoreError> {
        self.coordinator.submit(Mutation::Reset)?;
        Ok(())
    }

    /// Returns the id the copy will carry. No copy is made if `id` is gone by
    /// the time the mutation commits.
    pub fn clone_entity(&self, id: EntityId) -> Result<EntityId, StoreError> {
        let new_id = self.coordinator.next_id();
        self.coordinator.submit(Mutation::Clone { id, new_id })?;
        Ok(new_id)
    }

    pub fn move_up(&self, id: EntityId) -> Result<(), StoreError> {
        self.coordinator.submit(Mutation::MoveUp { id })?;
        Ok(())
    }

    pub fn move_down(&self, id: EntityId) -> Result<(), StoreError> {
        self.coordinator.submit(Mutation::MoveDown { id })?;
        Ok(())
    }

    pub fn snapshot(&self) -> Result<Arc<CollectionState<E>>, StoreError> {
        self.collection().snapshot()
    }

    pub fn get(&self, id: EntityId) -> Result<Option<E>, StoreError> {
        self.collection().get(id)
    }

    pub fn is_done(&self, id: EntityId) -> Result<Option<bool>, StoreError> {
        Ok(self.snapshot()?.get(id).map(Completable::is_done))
    }

    pub fn ordering_sequence(&self) -> Result<Vec<EntityId>, StoreError> {
        Ok(self.snapshot()?.ids.to_vec())
    }

    pub fn pending(&self) -> Result<bool, StoreError> {
        Ok(self.snapshot()?.pending())
    }

    pub fn subscribe<T, Sel, F>(&self, selector: Sel, on_change: F) -> Result<Subscription, StoreError>
    where
        T: PartialEq + 'static,
        Sel: Fn(&CollectionState<E>) -> T + Send + Sync + 'static,
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.collection().subscribe(selector, on_change)
    }

    /// Resolves once no mutation is in flight. Fails if the store is disposed
    /// before that happens.
    pub async fn settled(&self) -> Result<(), StoreError> {
        self.snapshot()?;
        let mut in_flight = self.in_flight.clone();
        in_flight
            .wait_for(|count| *count == 0)
            .await
            .map_err(|_| StoreError::scope_missing(self.scope()))?;
        Ok(())
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Store events as a stream; events missed by a lagging reader are skipped.
    pub fn event_stream(&self) -> impl Stream<Item = StoreEvent> + Send + 'static {
        BroadcastStream::new(self.events.subscribe()).filter_map(|event| future::ready(event.ok()))
    }

    pub fn is_disposed(&self) -> bool {
        self.collection().store().is_disposed()
    }

    /// Ends the store's scope. Mutations still in flight are dropped when
    /// they reach their commit.
    pub fn dispose(&self) {
        if self.is_disposed() {
            return;
        }
        info!(scope = self.scope(), "list store disposed");
        let _ = self.events.send(StoreEvent::Disposed);
        self.collection().dispose();
    }
}

impl<E: Completable> Drop for ListStore<E> {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
