//! Per-user read cache for processed medication lists.
//!
//! Process-lifetime state only: nothing is persisted, and a restart
//! starts cold. Entries expire after [`CACHE_TTL`](crate::config::CACHE_TTL)
//! but are evicted lazily — an expired entry just reads as a miss until
//! the next `set` overwrites it. Every successful write for a user
//! invalidates that user's entry; unscoped maintenance clears the whole
//! store.

use std::collections::HashMap;

use chrono::NaiveDateTime;
use uuid::Uuid;

use crate::config::CACHE_TTL;
use crate::models::Medication;

struct CacheEntry {
    medications: Vec<Medication>,
    cached_at: NaiveDateTime,
}

/// Keyed read-through cache: user id → processed medication list.
#[derive(Default)]
pub struct MedicationCache {
    entries: HashMap<Uuid, CacheEntry>,
}

impl MedicationCache {
    pub fn new() -> Self {
        Self { entries: HashMap::new() }
    }

    /// Return the cached list if the entry is younger than the TTL.
    /// Expired entries are left in place (lazy eviction).
    pub fn get(&self, user_id: &Uuid, now: NaiveDateTime) -> Option<&[Medication]> {
        let entry = self.entries.get(user_id)?;
        if now - entry.cached_at < CACHE_TTL {
            Some(&entry.medications)
        } else {
            None
        }
    }

    pub fn set(&mut self, user_id: Uuid, medications: Vec<Medication>, now: NaiveDateTime) {
        self.entries.insert(user_id, CacheEntry { medications, cached_at: now });
    }

    /// Drop one user's entry, or everything when no user is given.
    pub fn invalidate(&mut self, user_id: Option<&Uuid>) {
        match user_id {
            Some(id) => {
                self.entries.remove(id);
            }
            None => self.entries.clear(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
