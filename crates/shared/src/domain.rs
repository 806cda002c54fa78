use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn random() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.hyphenated().fmt(f)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }
    };
}

id_newtype!(EntityId);

/// Consumer-supplied input for `add`, keyed by field name.
pub type FieldMap = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    Flag(bool),
}

/// A uniquely identified record held by a collection.
///
/// Every update produces a new value; implementations never mutate `self`.
pub trait Entity: Clone + fmt::Debug + PartialEq + Send + Sync + 'static {
    fn id(&self) -> EntityId;

    /// Same record under a different identifier.
    fn with_id(&self, id: EntityId) -> Self;

    /// Builds a fresh record from submitted fields. Missing fields are empty.
    fn from_fields(id: EntityId, fields: &FieldMap) -> Self;

    /// Returns the record with `field` replaced. Unknown fields and values of
    /// the wrong kind leave the record unchanged.
    fn with_field(&self, field: &str, value: &FieldValue) -> Self;
}

/// Entities carrying a completion flag.
pub trait Completable: Entity {
    const DONE_FIELD: &'static str;

    fn is_done(&self) -> bool;
}

fn text_field(fields: &FieldMap, name: &str) -> String {
    fields.get(name).cloned().unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: EntityId,
    pub text: String,
    pub is_done: bool,
}

impl Entity for TodoItem {
    fn id(&self) -> EntityId {
        self.id
    }

    fn with_id(&self, id: EntityId) -> Self {
        Self {
            id,
            ..self.clone()
        }
    }

    fn from_fields(id: EntityId, fields: &FieldMap) -> Self {
        Self {
            id,
            text: text_field(fields, "text"),
            is_done: false,
        }
    }

    fn with_field(&self, field: &str, value: &FieldValue) -> Self {
        match (field, value) {
            ("text", FieldValue::Text(text)) => Self {
                text: text.clone(),
                ..self.clone()
            },
            ("is_done", FieldValue::Flag(is_done)) => Self {
                is_done: *is_done,
                ..self.clone()
            },
            _ => self.clone(),
        }
    }
}

impl Completable for TodoItem {
    const DONE_FIELD: &'static str = "is_done";

    fn is_done(&self) -> bool {
        self.is_done
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub id: EntityId,
    pub content: String,
    pub finished: bool,
}

impl Entity for ChecklistItem {
    fn id(&self) -> EntityId {
        self.id
    }

    fn with_id(&self, id: EntityId) -> Self {
        Self {
            id,
            ..self.clone()
        }
    }

    fn from_fields(id: EntityId, fields: &FieldMap) -> Self {
        Self {
            id,
            content: text_field(fields, "content"),
            finished: false,
        }
    }

    fn with_field(&self, field: &str, value: &FieldValue) -> Self {
        match (field, value) {
            ("content", FieldValue::Text(content)) => Self {
                content: content.clone(),
                ..self.clone()
            },
            ("finished", FieldValue::Flag(finished)) => Self {
                finished: *finished,
                ..self.clone()
            },
            _ => self.clone(),
        }
    }
}

impl Completable for ChecklistItem {
    const DONE_FIELD: &'static str = "finished";

    fn is_done(&self) -> bool {
        self.finished
    }
}

/// Convenience for building a [`FieldMap`] from `(name, value)` pairs.
pub fn fields<I, K, V>(pairs: I) -> FieldMap
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
