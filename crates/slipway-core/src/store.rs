//! Per-beacon presence records.
//!
//! Records live in a single owned map from beacon identifier to
//! [`BeaconPresence`], split into lock stripes. All mutation of one beacon
//! happens while holding its stripe, so two samples for the same beacon are
//! never applied concurrently, while beacons in other stripes proceed in
//! parallel. Records are created lazily on the first sample and removed
//! only by an explicit [`BeaconStore::sweep`].

use std::collections::hash_map::RandomState;
use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasher;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::engine::{PresenceSnapshot, PresenceState};
use crate::types::{secs_between, Side, Timestamp};

/// Default number of lock stripes.
pub const DEFAULT_SHARDS: usize = 16;

/// Default retention of idle records (24 hours).
pub const DEFAULT_RETENTION_SECS: f64 = 24.0 * 60.0 * 60.0;

/// Default interval between idle sweeps.
pub const DEFAULT_SWEEP_INTERVAL_SECS: f64 = 5.0 * 60.0;

/// Store tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Number of lock stripes.
    pub shards: usize,

    /// How long a record at rest is kept after its last update.
    pub retention_secs: f64,

    /// How often the wiring layer should run the sweep.
    pub sweep_interval_secs: f64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            shards: DEFAULT_SHARDS,
            retention_secs: DEFAULT_RETENTION_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
        }
    }
}

/// Engine-specific part of a presence record.
pub trait PresenceRecord: Send {
    /// The engine-tagged state held by the record.
    fn presence_state(&self) -> PresenceState;

    /// Whether the record is idle or terminal and may be evicted.
    fn is_at_rest(&self) -> bool;
}

/// Presence record of one beacon.
#[derive(Debug, Clone)]
pub struct BeaconPresence<R> {
    /// Beacon identifier.
    pub beacon_id: String,

    /// Entity the beacon was bound to when the record was (re)created.
    pub bound_entity_id: Option<String>,

    /// Set when an inward crossing is committed.
    pub entry_timestamp: Option<Timestamp>,

    /// Set when an outward crossing is committed.
    pub exit_timestamp: Option<Timestamp>,

    /// Time of the most recent mutation.
    pub last_update: Timestamp,

    /// Most recent sample time per side.
    pub last_seen_by_side: BTreeMap<Side, Timestamp>,

    /// Engine-specific state.
    pub record: R,
}

impl<R> BeaconPresence<R> {
    fn new(beacon_id: &str, bound_entity_id: Option<&str>, now: Timestamp, record: R) -> Self {
        Self {
            beacon_id: beacon_id.to_string(),
            bound_entity_id: bound_entity_id.map(str::to_string),
            entry_timestamp: None,
            exit_timestamp: None,
            last_update: now,
            last_seen_by_side: BTreeMap::new(),
            record,
        }
    }

    /// Record a sample seen on `side` at `timestamp`. Neither timestamp
    /// ever moves backwards.
    pub fn touch(&mut self, side: Side, timestamp: Timestamp) {
        self.last_seen_by_side
            .entry(side)
            .and_modify(|seen| *seen = (*seen).max(timestamp))
            .or_insert(timestamp);
        self.last_update = self.last_update.max(timestamp);
    }

    /// Whether a sample at `timestamp` predates the last mutation.
    #[must_use]
    pub fn is_stale_sample(&self, timestamp: Timestamp) -> bool {
        timestamp < self.last_update
    }

    /// When `side` last produced a sample.
    #[must_use]
    pub fn last_seen(&self, side: Side) -> Option<Timestamp> {
        self.last_seen_by_side.get(&side).copied()
    }
}

impl<R: PresenceRecord> BeaconPresence<R> {
    /// Read-only view of the record.
    #[must_use]
    pub fn snapshot(&self) -> PresenceSnapshot {
        PresenceSnapshot {
            beacon_id: self.beacon_id.clone(),
            state: self.record.presence_state(),
            bound_entity_id: self.bound_entity_id.clone(),
            entry_timestamp: self.entry_timestamp,
            exit_timestamp: self.exit_timestamp,
            last_update: self.last_update,
            last_seen_by_side: self.last_seen_by_side.clone(),
        }
    }
}

type Shard<R> = Mutex<HashMap<String, BeaconPresence<R>>>;

/// Striped map from beacon identifier to presence record.
pub struct BeaconStore<R> {
    shards: Box<[Shard<R>]>,
    hasher: RandomState,
}

impl<R: PresenceRecord> BeaconStore<R> {
    /// Create a store with `shards` lock stripes (at least one).
    #[must_use]
    pub fn new(shards: usize) -> Self {
        let shards = (0..shards.max(1)).map(|_| Mutex::new(HashMap::new())).collect();
        Self {
            shards,
            hasher: RandomState::new(),
        }
    }

    fn shard(&self, beacon_id: &str) -> MutexGuard<'_, HashMap<String, BeaconPresence<R>>> {
        let index = (self.hasher.hash_one(beacon_id) % self.shards.len() as u64) as usize;
        lock(&self.shards[index])
    }

    /// Run `f` on the record of `beacon_id` while holding its stripe.
    ///
    /// The record is created with `make` if absent. If it exists but was
    /// bound to a different entity, it is replaced by a fresh record and the
    /// previous one is handed to `f` as `Some(previous)`.
    pub fn update<T>(
        &self,
        beacon_id: &str,
        bound_entity_id: Option<&str>,
        now: Timestamp,
        make: impl FnOnce() -> R,
        f: impl FnOnce(&mut BeaconPresence<R>, Option<BeaconPresence<R>>) -> T,
    ) -> T {
        let mut shard = self.shard(beacon_id);

        let remapped = shard
            .get(beacon_id)
            .is_some_and(|existing| existing.bound_entity_id.as_deref() != bound_entity_id);
        let previous = if remapped {
            shard.remove(beacon_id)
        } else {
            None
        };

        let presence = shard
            .entry(beacon_id.to_string())
            .or_insert_with(|| BeaconPresence::new(beacon_id, bound_entity_id, now, make()));

        f(presence, previous)
    }

    /// Read the record of `beacon_id`, if tracked.
    pub fn get<T>(&self, beacon_id: &str, f: impl FnOnce(&BeaconPresence<R>) -> T) -> Option<T> {
        self.shard(beacon_id).get(beacon_id).map(f)
    }

    /// Visit every record, one stripe at a time.
    pub fn for_each_mut(&self, mut f: impl FnMut(&mut BeaconPresence<R>)) {
        for shard in self.shards.iter() {
            lock(shard).values_mut().for_each(&mut f);
        }
    }

    /// Remove records at rest whose last update is more than
    /// `retention_secs` before `now`. Returns the evicted identifiers.
    pub fn sweep(&self, now: Timestamp, retention_secs: f64) -> Vec<String> {
        let mut evicted = Vec::new();
        for shard in self.shards.iter() {
            lock(shard).retain(|id, presence| {
                let expired = presence.record.is_at_rest()
                    && secs_between(presence.last_update, now) > retention_secs;
                if expired {
                    evicted.push(id.clone());
                }
                !expired
            });
        }
        evicted
    }

    /// Identifiers of all tracked beacons.
    #[must_use]
    pub fn beacon_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .shards
            .iter()
            .flat_map(|shard| lock(shard).keys().cloned().collect::<Vec<_>>())
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Number of tracked beacons.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| lock(shard).len()).sum()
    }

    /// Whether no beacon is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// A poisoned stripe means a panic happened mid-update on another thread;
// the record it left behind is still structurally valid.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SingleGateState;
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::Arc;

    #[derive(Debug, Default)]
    struct Counter {
        hits: u32,
        at_rest: bool,
    }

    impl PresenceRecord for Counter {
        fn presence_state(&self) -> PresenceState {
            PresenceState::SingleGate(SingleGateState::Outside)
        }

        fn is_at_rest(&self) -> bool {
            self.at_rest
        }
    }

    fn t0() -> Timestamp {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn hit(store: &BeaconStore<Counter>, id: &str, entity: Option<&str>) -> (u32, bool) {
        store.update(id, entity, t0(), Counter::default, |presence, previous| {
            presence.record.hits += 1;
            (presence.record.hits, previous.is_some())
        })
    }

    #[test]
    fn test_records_are_created_lazily() {
        let store = BeaconStore::<Counter>::new(4);
        assert!(store.is_empty());
        assert_eq!(hit(&store, "b1", None), (1, false));
        assert_eq!(hit(&store, "b1", None), (2, false));
        assert_eq!(hit(&store, "b2", None), (1, false));
        assert_eq!(store.len(), 2);
        assert_eq!(store.beacon_ids(), vec!["b1".to_string(), "b2".to_string()]);
    }

    #[test]
    fn test_remapping_replaces_the_record() {
        let store = BeaconStore::<Counter>::new(4);
        hit(&store, "b1", Some("boat-1"));
        hit(&store, "b1", Some("boat-1"));
        assert_eq!(hit(&store, "b1", Some("boat-2")), (1, true));
        assert_eq!(hit(&store, "b1", None), (1, true));
        assert_eq!(
            store.get("b1", |p| p.bound_entity_id.clone()),
            Some(None)
        );
    }

    #[test]
    fn test_sweep_only_evicts_old_records_at_rest() {
        let store = BeaconStore::<Counter>::new(2);
        store.update("resting", None, t0(), Counter::default, |p, _| p.record.at_rest = true);
        store.update("busy", None, t0(), Counter::default, |_, _| ());
        store.update("fresh", None, t0() + Duration::hours(23), Counter::default, |p, _| {
            p.record.at_rest = true;
        });

        let evicted = store.sweep(t0() + Duration::hours(25), DEFAULT_RETENTION_SECS);
        assert_eq!(evicted, vec!["resting".to_string()]);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_touch_tracks_sides() {
        let store = BeaconStore::<Counter>::new(1);
        let later = t0() + Duration::seconds(3);
        store.update("b1", None, t0(), Counter::default, |p, _| p.touch(Side::Outer, later));
        let (seen, last) = store
            .get("b1", |p| (p.last_seen(Side::Outer), p.last_update))
            .unwrap();
        assert_eq!(seen, Some(later));
        assert_eq!(last, later);
    }

    #[test]
    fn test_touch_never_moves_backwards() {
        let store = BeaconStore::<Counter>::new(1);
        let later = t0() + Duration::seconds(30);
        let (last, outer, inner, stale) = store.update("b1", None, t0(), Counter::default, |p, _| {
            p.touch(Side::Outer, later);
            p.touch(Side::Inner, t0());
            p.touch(Side::Outer, t0());
            (
                p.last_update,
                p.last_seen(Side::Outer),
                p.last_seen(Side::Inner),
                p.is_stale_sample(t0()),
            )
        });
        assert_eq!(last, later);
        assert_eq!(outer, Some(later));
        assert_eq!(inner, Some(t0()));
        assert!(stale);
    }

    #[test]
    fn test_concurrent_updates_are_serialized_per_beacon() {
        let store = Arc::new(BeaconStore::<Counter>::new(4));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        hit(&store, "shared", None);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.get("shared", |p| p.record.hits), Some(4000));
    }
}
