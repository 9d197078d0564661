//! Cache entries

use crate::error::FetchError;
use crate::keys::CacheKey;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, Shared};
use serde::Serialize;

/// Read-only view of one cached query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEntry<V> {
    pub key: CacheKey,
    /// Last confirmed or pending optimistic value; `None` before the first fetch
    pub value: Option<V>,
    /// Marked by invalidation or a failed fetch; the next query refetches
    pub stale: bool,
    pub fetching: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

impl<V> CacheEntry<V> {
    pub fn is_fresh(&self) -> bool {
        self.value.is_some() && !self.stale
    }
}

pub(crate) type SharedFetch<V> = Shared<BoxFuture<'static, Result<V, FetchError>>>;

pub(crate) struct InFlight<V> {
    pub generation: u64,
    pub fetch: SharedFetch<V>,
}

/// Mutable storage behind a key
pub(crate) struct Slot<V> {
    pub value: Option<V>,
    pub stale: bool,
    pub updated_at: Option<DateTime<Utc>>,
    /// Generation of the last fetch written here; 0 if none
    pub fetched: u64,
    pub in_flight: Option<InFlight<V>>,
}

impl<V> Default for Slot<V> {
    fn default() -> Self {
        Self {
            value: None,
            stale: false,
            updated_at: None,
            fetched: 0,
            in_flight: None,
        }
    }
}

impl<V: Clone> Slot<V> {
    pub fn is_fresh(&self) -> bool {
        self.value.is_some() && !self.stale
    }

    pub fn write(&mut self, value: V) {
        self.value = Some(value);
        self.updated_at = Some(Utc::now());
    }

    pub fn view(&self, key: &CacheKey) -> CacheEntry<V> {
        CacheEntry {
            key: key.clone(),
            value: self.value.clone(),
            stale: self.stale,
            fetching: self.in_flight.is_some(),
            updated_at: self.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_view_tracks_freshness() {
        let key = CacheKey::root("friends");
        let mut slot: Slot<Vec<String>> = Slot::default();
        assert!(!slot.view(&key).is_fresh());

        slot.write(vec!["alice".to_string()]);
        let entry = slot.view(&key);
        assert!(entry.is_fresh());
        assert!(entry.updated_at.is_some());
        assert!(!entry.fetching);

        slot.stale = true;
        assert!(!slot.is_fresh());
    }
}
