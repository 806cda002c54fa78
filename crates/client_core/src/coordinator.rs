use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, PoisonError,
};

use shared::{
    domain::{Entity, EntityId},
    error::{ErrorReport, StoreError},
    protocol::{CommitPolicy, Mutation, MutationPhase, StoreEvent},
};
use storage::{Collection, CollectionPatch, CollectionState, Update};
use tokio::{
    runtime::Handle,
    sync::{broadcast, oneshot},
};
use tracing::{debug, warn};

use crate::latency::{LatencyBoundary, MutationTicket};

/// Runs collection mutations through a latency boundary, keeping the
/// snapshot's in-flight counter in step and ordering commits per `policy`.
pub struct MutationCoordinator<E: Entity> {
    collection: Collection<E>,
    latency: Arc<dyn LatencyBoundary>,
    policy: CommitPolicy,
    runtime: Handle,
    events: broadcast::Sender<StoreEvent>,
    next_seq: AtomicU64,
    // Resolves once the most recently issued mutation has committed.
    tail: Mutex<Option<oneshot::Receiver<()>>>,
}

impl<E: Entity> MutationCoordinator<E> {
    pub fn new(
        collection: Collection<E>,
        latency: Arc<dyn LatencyBoundary>,
        policy: CommitPolicy,
        runtime: Handle,
        events: broadcast::Sender<StoreEvent>,
    ) -> Self {
        Self {
            collection,
            latency,
            policy,
            runtime,
            events,
            next_seq: AtomicU64::new(1),
            tail: Mutex::new(None),
        }
    }

    pub fn collection(&self) -> &Collection<E> {
        &self.collection
    }

    pub fn policy(&self) -> CommitPolicy {
        self.policy
    }

    pub fn next_id(&self) -> EntityId {
        self.collection.next_id()
    }

    /// Marks the mutation in flight and schedules its commit. Called from a
    /// subscriber, the pending counter rises once that notification phase
    /// ends, still ahead of the mutation's own commit.
    pub fn submit(&self, mutation: Mutation) -> Result<MutationTicket, StoreError> {
        self.collection
            .store()
            .schedule(Update::compute(|current: &CollectionState<E>| {
                CollectionPatch::unchanged().with_in_flight(current.in_flight + 1)
            }))?;

        let (done_tx, done_rx) = oneshot::channel();
        let (seq, predecessor) = {
            let mut tail = self.tail.lock().unwrap_or_else(PoisonError::into_inner);
            let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
            let predecessor = match self.policy {
                CommitPolicy::Fifo => tail.replace(done_rx),
                CommitPolicy::Optimistic => None,
            };
            (seq, predecessor)
        };

        let ticket = MutationTicket {
            seq,
            kind: mutation.kind(),
            target: mutation.target(),
        };
        debug!(seq, kind = ?ticket.kind, target = ?ticket.target, policy = ?self.policy, "mutation submitted");

        let task = CommitTask {
            ticket,
            mutation,
            collection: self.collection.clone(),
            latency: Arc::clone(&self.latency),
            events: self.events.clone(),
            predecessor,
            done: done_tx,
        };
        self.runtime.spawn(task.run());
        Ok(ticket)
    }
}

struct CommitTask<E: Entity> {
    ticket: MutationTicket,
    mutation: Mutation,
    collection: Collection<E>,
    latency: Arc<dyn LatencyBoundary>,
    events: broadcast::Sender<StoreEvent>,
    predecessor: Option<oneshot::Receiver<()>>,
    done: oneshot::Sender<()>,
}

impl<E: Entity> CommitTask<E> {
    fn phase(&self, phase: MutationPhase) {
        let _ = self.events.send(StoreEvent::MutationPhaseChanged {
            seq: self.ticket.seq,
            kind: self.ticket.kind,
            phase,
        });
    }

    async fn run(mut self) {
        self.phase(MutationPhase::AwaitingLatency);
        self.latency.wait(&self.ticket).await;
        if let Some(predecessor) = self.predecessor.take() {
            // An Err only means the predecessor's task is gone; its turn is over either way.
            let _ = predecessor.await;
        }

        self.phase(MutationPhase::Committing);
        let mutation = self.mutation.clone();
        let result = self
            .collection
            .store()
            .set(Update::compute(move |current: &CollectionState<E>| {
                current
                    .plan(&mutation)
                    .with_in_flight(current.in_flight.saturating_sub(1))
            }));

        let seq = self.ticket.seq;
        match result {
            Ok(committed) => {
                debug!(seq, kind = ?self.ticket.kind, in_flight = committed.in_flight, "mutation committed");
                let _ = self.events.send(StoreEvent::MutationCommitted {
                    seq,
                    mutation: self.mutation.clone(),
                    in_flight: committed.in_flight,
                });
            }
            Err(error) => {
                warn!(seq, kind = ?self.ticket.kind, %error, "mutation dropped before commit");
                let _ = self.events.send(StoreEvent::MutationDropped {
                    seq,
                    kind: self.ticket.kind,
                    error: ErrorReport::from(&error),
                });
            }
        }

        self.phase(MutationPhase::Idle);
        let _ = self.done.send(());
    }
}
