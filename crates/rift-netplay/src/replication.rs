//! Host-side snapshot building and client-side snapshot application.
//!
//! The host stamps every snapshot with a tick counter. Deltas
//! ([`StateUpdate`]) only refresh entities the client already tracks; full
//! snapshots ([`FullState`]) make the tracked set equal to the host's set,
//! spawning and despawning proxies as needed.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use rift_netproto::limits::MAX_UNRELIABLE_PAYLOAD;
use rift_netproto::messages::replication::{EntityId, EntityState, FullState, StateUpdate};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

/// Worst-case postcard overhead of a snapshot's tick and entity count.
const SNAPSHOT_HEADER_BUDGET: usize = 16;

/// Game-side hooks used by replication.
pub trait ReplicatedWorld {
    /// Current authoritative entity states (host only).
    fn collect_entities(&mut self) -> Vec<EntityState>;

    fn spawn_proxy(&mut self, id: EntityId, state: &[u8]);

    fn update_proxy(&mut self, id: EntityId, state: &[u8]);

    fn despawn_proxy(&mut self, id: EntityId);
}

/// What a client does with a snapshot older than the newest one it applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StalenessPolicy {
    /// Drop snapshots whose tick is below the last applied tick.
    #[default]
    RejectStale,
    /// Apply every snapshot in arrival order.
    ApplyAll,
}

/// Host-side tick counter and snapshot builder.
#[derive(Debug, Clone)]
pub struct ReplicationHost {
    tick: u64,
    full_sync_interval: Duration,
    last_full_sync: Option<Instant>,
}

impl ReplicationHost {
    pub fn new(full_sync_interval: Duration) -> Self {
        Self {
            tick: 0,
            full_sync_interval,
            last_full_sync: None,
        }
    }

    /// Start a new lobby: tick counter back to zero, full sync due at once.
    pub fn reset(&mut self) {
        self.tick = 0;
        self.last_full_sync = None;
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Advance to the next tick and return its stamp.
    pub fn advance(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    pub fn last_full_sync(&self) -> Option<Instant> {
        self.last_full_sync
    }

    pub fn full_sync_due(&self, now: Instant) -> bool {
        match self.last_full_sync {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.full_sync_interval,
        }
    }

    pub fn mark_full_sync(&mut self, now: Instant) {
        self.last_full_sync = Some(now);
    }

    pub fn full_state(&self, entities: Vec<EntityState>) -> FullState {
        FullState {
            tick: self.tick,
            entities,
        }
    }

    /// Split the entity set into deltas that each fit one unreliable datagram.
    ///
    /// Entities too large for a datagram on their own are left out; the next
    /// full snapshot carries them.
    pub fn state_updates(&self, entities: &[EntityState]) -> Vec<StateUpdate> {
        let budget = MAX_UNRELIABLE_PAYLOAD - SNAPSHOT_HEADER_BUDGET;
        let mut updates = Vec::new();
        let mut current = Vec::new();
        let mut used = 0usize;

        for entity in entities {
            let size = match entity_wire_len(entity) {
                Ok(size) => size,
                Err(e) => {
                    warn!(
                        entity_id = entity.entity_id,
                        error = %e,
                        "entity state not encodable, skipped"
                    );
                    continue;
                }
            };
            if size > budget {
                warn!(
                    entity_id = entity.entity_id,
                    size, "entity state too large for a delta, skipped"
                );
                continue;
            }
            if used + size > budget {
                updates.push(StateUpdate {
                    tick: self.tick,
                    entities: std::mem::take(&mut current),
                });
                used = 0;
            }
            current.push(entity.clone());
            used += size;
        }

        if !current.is_empty() || updates.is_empty() {
            updates.push(StateUpdate {
                tick: self.tick,
                entities: current,
            });
        }
        updates
    }
}

fn entity_wire_len(entity: &EntityState) -> Result<usize, postcard::Error> {
    Ok(postcard::to_stdvec(entity)?.len())
}

/// Counts of proxy operations performed by one snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub spawned: usize,
    pub updated: usize,
    pub despawned: usize,
    /// Delta entries for entities the client does not track.
    pub ignored: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied(ApplyReport),
    Stale { tick: u64, last_applied: u64 },
}

#[derive(Debug, Clone)]
struct Replica {
    state: Vec<u8>,
    tick: u64,
}

/// Client-side set of tracked entity proxies.
#[derive(Debug, Clone, Default)]
pub struct ReplicaSet {
    tracked: BTreeMap<EntityId, Replica>,
    last_applied: Option<u64>,
    policy: StalenessPolicy,
}

impl ReplicaSet {
    pub fn new(policy: StalenessPolicy) -> Self {
        Self {
            tracked: BTreeMap::new(),
            last_applied: None,
            policy,
        }
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.tracked.contains_key(&id)
    }

    pub fn state(&self, id: EntityId) -> Option<&[u8]> {
        self.tracked.get(&id).map(|r| r.state.as_slice())
    }

    /// Tick of the snapshot that last touched `id`.
    pub fn entity_tick(&self, id: EntityId) -> Option<u64> {
        self.tracked.get(&id).map(|r| r.tick)
    }

    pub fn tracked_ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.tracked.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    pub fn last_applied(&self) -> Option<u64> {
        self.last_applied
    }

    fn check_stale(&self, tick: u64) -> Option<ApplyOutcome> {
        match (self.policy, self.last_applied) {
            (StalenessPolicy::RejectStale, Some(last)) if tick < last => {
                trace!(tick, last, "stale snapshot dropped");
                Some(ApplyOutcome::Stale {
                    tick,
                    last_applied: last,
                })
            }
            _ => None,
        }
    }

    fn record_tick(&mut self, tick: u64) {
        self.last_applied = Some(self.last_applied.map_or(tick, |last| last.max(tick)));
    }

    /// Apply a delta. Untracked entities are ignored.
    pub fn apply_delta<W: ReplicatedWorld + ?Sized>(
        &mut self,
        update: &StateUpdate,
        world: &mut W,
    ) -> ApplyOutcome {
        if let Some(stale) = self.check_stale(update.tick) {
            return stale;
        }

        let mut report = ApplyReport::default();
        for entity in &update.entities {
            match self.tracked.get_mut(&entity.entity_id) {
                Some(replica) => {
                    world.update_proxy(entity.entity_id, &entity.state);
                    replica.state.clone_from(&entity.state);
                    replica.tick = update.tick;
                    report.updated += 1;
                }
                None => report.ignored += 1,
            }
        }
        self.record_tick(update.tick);
        ApplyOutcome::Applied(report)
    }

    /// Apply a full snapshot. Afterwards the tracked set equals the snapshot's set.
    pub fn apply_full<W: ReplicatedWorld + ?Sized>(
        &mut self,
        full: &FullState,
        world: &mut W,
    ) -> ApplyOutcome {
        if let Some(stale) = self.check_stale(full.tick) {
            return stale;
        }

        // Later duplicates of an id win.
        let incoming: BTreeMap<EntityId, &[u8]> = full
            .entities
            .iter()
            .map(|e| (e.entity_id, e.state.as_slice()))
            .collect();

        let mut report = ApplyReport::default();
        let gone: Vec<EntityId> = self
            .tracked
            .keys()
            .filter(|id| !incoming.contains_key(*id))
            .copied()
            .collect();
        for id in gone {
            world.despawn_proxy(id);
            self.tracked.remove(&id);
            report.despawned += 1;
        }

        for (id, state) in incoming {
            match self.tracked.get_mut(&id) {
                Some(replica) => {
                    world.update_proxy(id, state);
                    replica.state = state.to_vec();
                    replica.tick = full.tick;
                    report.updated += 1;
                }
                None => {
                    world.spawn_proxy(id, state);
                    self.tracked.insert(
                        id,
                        Replica {
                            state: state.to_vec(),
                            tick: full.tick,
                        },
                    );
                    report.spawned += 1;
                }
            }
        }

        self.record_tick(full.tick);
        debug!(
            tick = full.tick,
            spawned = report.spawned,
            despawned = report.despawned,
            "full snapshot applied"
        );
        ApplyOutcome::Applied(report)
    }

    /// Despawn every proxy and forget the last applied tick.
    pub fn clear<W: ReplicatedWorld + ?Sized>(&mut self, world: &mut W) {
        for id in std::mem::take(&mut self.tracked).into_keys() {
            world.despawn_proxy(id);
        }
        self.last_applied = None;
    }
}
