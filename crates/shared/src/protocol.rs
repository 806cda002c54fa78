use serde::{Deserialize, Serialize};

use crate::{
    domain::{EntityId, FieldMap, FieldValue},
    error::ErrorReport,
};

/// A collection mutation, with any new identifiers already assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Mutation {
    Add {
        id: EntityId,
        fields: FieldMap,
    },
    SetField {
        id: EntityId,
        field: String,
        value: FieldValue,
    },
    Remove {
        id: EntityId,
    },
    Reset,
    Clone {
        id: EntityId,
        new_id: EntityId,
    },
    MoveUp {
        id: EntityId,
    },
    MoveDown {
        id: EntityId,
    },
}

impl Mutation {
    pub fn kind(&self) -> MutationKind {
        match self {
            Self::Add { .. } => MutationKind::Add,
            Self::SetField { .. } => MutationKind::SetField,
            Self::Remove { .. } => MutationKind::Remove,
            Self::Reset => MutationKind::Reset,
            Self::Clone { .. } => MutationKind::Clone,
            Self::MoveUp { .. } => MutationKind::MoveUp,
            Self::MoveDown { .. } => MutationKind::MoveDown,
        }
    }

    /// The existing entity this mutation addresses, if any.
    pub fn target(&self) -> Option<EntityId> {
        match self {
            Self::SetField { id, .. }
            | Self::Remove { id }
            | Self::Clone { id, .. }
            | Self::MoveUp { id }
            | Self::MoveDown { id } => Some(*id),
            Self::Add { .. } | Self::Reset => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Add,
    SetField,
    Remove,
    Reset,
    Clone,
    MoveUp,
    MoveDown,
}

/// Per-mutation lifecycle: `Idle -> AwaitingLatency -> Committing -> Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MutationPhase {
    #[default]
    Idle,
    AwaitingLatency,
    Committing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CommitPolicy {
    /// Commits apply in issue order regardless of when latencies resolve.
    #[default]
    Fifo,
    /// Whichever mutation finishes its latency first commits first.
    Optimistic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum StoreEvent {
    MutationPhaseChanged {
        seq: u64,
        kind: MutationKind,
        phase: MutationPhase,
    },
    MutationCommitted {
        seq: u64,
        mutation: Mutation,
        in_flight: usize,
    },
    MutationDropped {
        seq: u64,
        kind: MutationKind,
        error: ErrorReport,
    },
    Disposed,
}
