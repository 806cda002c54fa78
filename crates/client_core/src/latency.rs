use std::time::Duration;

use async_trait::async_trait;
use shared::{domain::EntityId, protocol::MutationKind};

/// Identifies one submitted mutation while it is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationTicket {
    pub seq: u64,
    pub kind: MutationKind,
    pub target: Option<EntityId>,
}

/// The suspension point between issuing a mutation and committing it; where
/// a remote round trip would happen.
#[async_trait]
pub trait LatencyBoundary: Send + Sync {
    async fn wait(&self, ticket: &MutationTicket);
}

/// Yields once and resolves; commits happen on the next scheduler turn.
pub struct NoLatency;

#[async_trait]
impl LatencyBoundary for NoLatency {
    async fn wait(&self, _ticket: &MutationTicket) {
        tokio::task::yield_now().await;
    }
}

pub struct FixedLatency {
    delay: Duration,
}

impl FixedLatency {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

#[async_trait]
impl LatencyBoundary for FixedLatency {
    async fn wait(&self, _ticket: &MutationTicket) {
        tokio::time::sleep(self.delay).await;
    }
}
