use std::sync::atomic::{AtomicU64, Ordering};

use shared::domain::EntityId;
use uuid::Uuid;

pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> EntityId;
}

/// Random v4 identifiers; collision-free for practical purposes.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIds;

impl IdGenerator for RandomIds {
    fn next_id(&self) -> EntityId {
        EntityId::random()
    }
}

/// Deterministic identifiers counting up from a seed.
///
/// Two generators sharing a seed hand out the same ids, which is how tests
/// provoke collisions.
#[derive(Debug, Default)]
pub struct SequentialIds {
    next: AtomicU64,
}

impl SequentialIds {
    pub fn starting_at(seed: u64) -> Self {
        Self {
            next: AtomicU64::new(seed),
        }
    }
}

impl IdGenerator for SequentialIds {
    fn next_id(&self) -> EntityId {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        EntityId(Uuid::from_u128(u128::from(n)))
    }
}
