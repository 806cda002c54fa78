use std::{collections::HashMap, sync::Arc};

use serde::Serialize;
use shared::{
    domain::{Entity, EntityId, FieldMap, FieldValue},
    error::StoreError,
    protocol::Mutation,
};
use tracing::{debug, warn};

use crate::{IdGenerator, RandomIds, State, Store, Subscription, Update};

/// Snapshot of one list: ordering sequence, keyed storage and the number of
/// mutations still in flight.
///
/// Both structures sit behind `Arc`, so a commit that leaves one of them
/// alone shares it with the previous snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionState<E> {
    pub ids: Arc<Vec<EntityId>>,
    pub items: Arc<HashMap<EntityId, E>>,
    pub in_flight: usize,
}

impl<E> Default for CollectionState<E> {
    fn default() -> Self {
        Self {
            ids: Arc::new(Vec::new()),
            items: Arc::new(HashMap::new()),
            in_flight: 0,
        }
    }
}

/// Partial update for a [`CollectionState`]. `None` keeps the current value.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionPatch<E> {
    pub ids: Option<Vec<EntityId>>,
    pub items: Option<HashMap<EntityId, E>>,
    pub in_flight: Option<usize>,
}

impl<E> Default for CollectionPatch<E> {
    fn default() -> Self {
        Self {
            ids: None,
            items: None,
            in_flight: None,
        }
    }
}

impl<E> CollectionPatch<E> {
    pub fn unchanged() -> Self {
        Self::default()
    }

    pub fn cleared() -> Self {
        Self {
            ids: Some(Vec::new()),
            items: Some(HashMap::new()),
            in_flight: None,
        }
    }

    pub fn is_unchanged(&self) -> bool {
        self.ids.is_none() && self.items.is_none() && self.in_flight.is_none()
    }

    pub fn with_in_flight(mut self, in_flight: usize) -> Self {
        self.in_flight = Some(in_flight);
        self
    }
}

impl<E: Entity> State for CollectionState<E> {
    type Patch = CollectionPatch<E>;

    fn merge(&self, patch: Self::Patch) -> Self {
        Self {
            ids: patch.ids.map_or_else(|| Arc::clone(&self.ids), Arc::new),
            items: patch.items.map_or_else(|| Arc::clone(&self.items), Arc::new),
            in_flight: patch.in_flight.unwrap_or(self.in_flight),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Up,
    Down,
}

impl<E: Entity> CollectionState<E> {
    pub fn pending(&self) -> bool {
        self.in_flight > 0
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn get(&self, id: EntityId) -> Option<&E> {
        self.items.get(&id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.items.contains_key(&id)
    }

    pub fn position(&self, id: EntityId) -> Option<usize> {
        self.ids.iter().position(|candidate| *candidate == id)
    }

    /// Entities in display order.
    pub fn ordered(&self) -> impl Iterator<Item = &E> + '_ {
        self.ids.iter().filter_map(|id| self.items.get(id))
    }

    /// Checks that the ordering sequence and keyed storage hold exactly the
    /// same identifiers, each once, and that every entity sits under its own id.
    pub fn check_invariants(&self) -> Result<(), StoreError> {
        if self.ids.len() != self.items.len() {
            return Err(StoreError::InvariantViolation(format!(
                "ordering sequence has {} ids but keyed storage has {} entities",
                self.ids.len(),
                self.items.len()
            )));
        }
        let mut seen = std::collections::HashSet::with_capacity(self.ids.len());
        for id in self.ids.iter() {
            if !seen.insert(*id) {
                return Err(StoreError::InvariantViolation(format!(
                    "duplicate id {id} in ordering sequence"
                )));
            }
            match self.items.get(id) {
                None => {
                    return Err(StoreError::InvariantViolation(format!(
                        "id {id} is ordered but not stored"
                    )))
                }
                Some(entity) if entity.id() != *id => {
                    return Err(StoreError::InvariantViolation(format!(
                        "entity stored under {id} reports id {}",
                        entity.id()
                    )))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Computes the patch that applies `mutation` to this snapshot. Mutations
    /// addressing an absent id produce an unchanged patch.
    pub fn plan(&self, mutation: &Mutation) -> CollectionPatch<E> {
        match mutation {
            Mutation::Add { id, fields } => self.plan_insert(E::from_fields(*id, fields)),
            Mutation::SetField { id, field, value } => self.plan_set_field(*id, field, value),
            Mutation::Remove { id } => self.plan_remove(*id),
            Mutation::Reset => CollectionPatch::cleared(),
            Mutation::Clone { id, new_id } => match self.items.get(id) {
                Some(entity) => self.plan_insert(entity.with_id(*new_id)),
                None => absent(*id, "clone"),
            },
            Mutation::MoveUp { id } => self.plan_move(*id, Direction::Up),
            Mutation::MoveDown { id } => self.plan_move(*id, Direction::Down),
        }
    }

    fn plan_insert(&self, entity: E) -> CollectionPatch<E> {
        let id = entity.id();
        if self.items.contains_key(&id) {
            warn!(%id, "identifier collision; entity not inserted");
            return CollectionPatch::unchanged();
        }
        let mut ids = self.ids.to_vec();
        ids.push(id);
        let mut items = HashMap::clone(&self.items);
        items.insert(id, entity);
        CollectionPatch {
            ids: Some(ids),
            items: Some(items),
            in_flight: None,
        }
    }

    fn plan_set_field(&self, id: EntityId, field: &str, value: &FieldValue) -> CollectionPatch<E> {
        let Some(entity) = self.items.get(&id) else {
            return absent(id, "set_field");
        };
        let mut items = HashMap::clone(&self.items);
        items.insert(id, entity.with_field(field, value));
        CollectionPatch {
            items: Some(items),
            ..CollectionPatch::unchanged()
        }
    }

    fn plan_remove(&self, id: EntityId) -> CollectionPatch<E> {
        if !self.items.contains_key(&id) {
            return absent(id, "remove");
        }
        let ids = self.ids.iter().copied().filter(|other| *other != id).collect();
        let mut items = HashMap::clone(&self.items);
        items.remove(&id);
        CollectionPatch {
            ids: Some(ids),
            items: Some(items),
            in_flight: None,
        }
    }

    fn plan_move(&self, id: EntityId, direction: Direction) -> CollectionPatch<E> {
        let Some(index) = self.position(id) else {
            return absent(id, "move");
        };
        let neighbour = match direction {
            Direction::Up if index > 0 => index - 1,
            Direction::Down if index + 1 < self.ids.len() => index + 1,
            _ => return CollectionPatch::unchanged(),
        };
        // Keyed storage is unordered; only the sequence changes.
        let mut ids = self.ids.to_vec();
        ids.swap(index, neighbour);
        CollectionPatch {
            ids: Some(ids),
            ..CollectionPatch::unchanged()
        }
    }
}

fn absent<E>(id: EntityId, op: &'static str) -> CollectionPatch<E> {
    debug!(%id, op, "target not present; no-op");
    CollectionPatch::unchanged()
}

/// Synchronous CRUD and reorder operations over one list, each applied as a
/// single commit.
pub struct Collection<E: Entity> {
    store: Store<CollectionState<E>>,
    ids: Arc<dyn IdGenerator>,
}

impl<E: Entity> Clone for Collection<E> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            ids: Arc::clone(&self.ids),
        }
    }
}

impl<E: Entity> Collection<E> {
    pub fn new(scope: impl Into<String>) -> Self {
        Self::with_id_generator(scope, Arc::new(RandomIds))
    }

    pub fn with_id_generator(scope: impl Into<String>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            store: Store::create(scope, CollectionState::default()),
            ids,
        }
    }

    pub fn store(&self) -> &Store<CollectionState<E>> {
        &self.store
    }

    pub fn next_id(&self) -> EntityId {
        self.ids.next_id()
    }

    pub fn snapshot(&self) -> Result<Arc<CollectionState<E>>, StoreError> {
        self.store.get()
    }

    /// Applies `mutation` against whatever snapshot is current at commit time.
    pub fn apply(&self, mutation: Mutation) -> Result<Arc<CollectionState<E>>, StoreError> {
        self.store
            .set(Update::compute(move |current: &CollectionState<E>| current.plan(&mutation)))
    }

    pub fn add(&self, fields: FieldMap) -> Result<EntityId, StoreError> {
        let id = self.next_id();
        self.apply(Mutation::Add { id, fields })?;
        Ok(id)
    }

    pub fn get(&self, id: EntityId) -> Result<Option<E>, StoreError> {
        Ok(self.store.get()?.get(id).cloned())
    }

    pub fn set_field(
        &self,
        id: EntityId,
        field: impl Into<String>,
        value: FieldValue,
    ) -> Result<(), StoreError> {
        self.apply(Mutation::SetField {
            id,
            field: field.into(),
            value,
        })?;
        Ok(())
    }

    pub fn remove(&self, id: EntityId) -> Result<(), StoreError> {
        self.apply(Mutation::Remove { id })?;
        Ok(())
    }

    pub fn reset(&self) -> Result<(), StoreError> {
        self.apply(Mutation::Reset)?;
        Ok(())
    }

    /// Duplicates `id` at the end of the list. Returns the copy's id, or
    /// `None` when `id` was absent.
    pub fn clone_entity(&self, id: EntityId) -> Result<Option<EntityId>, StoreError> {
        let new_id = self.next_id();
        let committed = self.apply(Mutation::Clone { id, new_id })?;
        Ok(committed.contains(new_id).then_some(new_id))
    }

    pub fn move_up(&self, id: EntityId) -> Result<(), StoreError> {
        self.apply(Mutation::MoveUp { id })?;
        Ok(())
    }

    pub fn move_down(&self, id: EntityId) -> Result<(), StoreError> {
        self.apply(Mutation::MoveDown { id })?;
        Ok(())
    }

    pub fn subscribe<T, Sel, F>(&self, selector: Sel, on_change: F) -> Result<Subscription, StoreError>
    where
        T: PartialEq + 'static,
        Sel: Fn(&CollectionState<E>) -> T + Send + Sync + 'static,
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.store.subscribe(selector, on_change)
    }

    pub fn dispose(&self) {
        self.store.dispose();
    }
}

#[cfg(test)]
#[path = "tests/collection_tests.rs"]
mod tests;
