//! Strongly-typed identifiers.
//!
//! Every identifier is a ULID wrapped in `Id<T>`, where `T` is a marker type
//! that only exists at compile time. ULIDs sort by creation time, which the
//! stores rely on when listing items oldest-first.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// Marker trait providing the display prefix of an id type.
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// ULID-backed identifier, tagged with a marker type.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Parses both the prefixed display form (`item-01H…`) and a bare ULID.
impl<T: IdMarker> FromStr for Id<T> {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(T::prefix()).unwrap_or(s);
        Ulid::from_string(raw).map(Self::from_ulid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OutboxItem {}

impl IdMarker for OutboxItem {
    fn prefix() -> &'static str {
        "item-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Retry {}

impl IdMarker for Retry {
    fn prefix() -> &'static str {
        "retry-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Task {}

impl IdMarker for Task {
    fn prefix() -> &'static str {
        "task-"
    }
}

/// Identifier of an outbox item (one activity to federate).
pub type OutboxItemId = Id<OutboxItem>;

/// Opaque key of one retry cycle.
pub type RetryKey = Id<Retry>;

/// Identifier of a scheduled task in the trigger queue.
pub type TaskId = Id<Task>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_prefix() {
        let ulid = Ulid::new();
        assert!(OutboxItemId::from_ulid(ulid).to_string().starts_with("item-"));
        assert!(RetryKey::from_ulid(ulid).to_string().starts_with("retry-"));
        assert!(TaskId::from_ulid(ulid).to_string().starts_with("task-"));
    }

    #[test]
    fn parses_prefixed_and_bare_forms() {
        let id = OutboxItemId::from_ulid(Ulid::new());
        let prefixed: OutboxItemId = id.to_string().parse().unwrap();
        let bare: OutboxItemId = id.as_ulid().to_string().parse().unwrap();
        assert_eq!(prefixed, id);
        assert_eq!(bare, id);
    }

    #[test]
    fn serializes_as_bare_ulid_string() {
        let id = RetryKey::from_ulid(Ulid::new());
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.as_ulid()));
        let back: RetryKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn rejects_garbage() {
        assert!("item-not-a-ulid".parse::<OutboxItemId>().is_err());
    }

    #[test]
    fn ids_sort_by_creation_time() {
        let first = OutboxItemId::from_ulid(Ulid::from_parts(1_000, 7));
        let second = OutboxItemId::from_ulid(Ulid::from_parts(2_000, 3));
        assert!(first < second);
    }

    #[test]
    fn phantom_marker_is_zero_sized() {
        assert_eq!(std::mem::size_of::<OutboxItemId>(), std::mem::size_of::<Ulid>());
    }
}
