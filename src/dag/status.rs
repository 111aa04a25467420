//! Per-object build statuses

use crate::domain::ObjectRef;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Valid,
    Invalid,
    Orphaned,
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusKind::Valid => write!(f, "valid"),
            StatusKind::Invalid => write!(f, "invalid"),
            StatusKind::Orphaned => write!(f, "orphaned"),
        }
    }
}

/// Outcome of processing one routing object
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Status {
    pub object: ObjectRef,
    pub kind: StatusKind,
    pub description: String,
    /// Host name the object contributed to, empty when unknown
    pub vhost: String,
}

/// Statuses keyed by object. The first status recorded for an object is
/// final; later writes for the same object are dropped.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatusLedger {
    entries: BTreeMap<ObjectRef, Status>,
}

impl StatusLedger {
    /// Record `status`, returning false when the object already has one
    pub fn record(&mut self, status: Status) -> bool {
        if self.entries.contains_key(&status.object) {
            return false;
        }
        self.entries.insert(status.object.clone(), status);
        true
    }

    pub fn get(&self, object: &ObjectRef) -> Option<&Status> {
        self.entries.get(object)
    }

    pub fn contains(&self, object: &ObjectRef) -> bool {
        self.entries.contains_key(object)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Status> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
