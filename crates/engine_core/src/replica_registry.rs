//! Per-library table of known replicas.

use std::collections::{
    HashMap,
    HashSet,
};

use parking_lot::Mutex;
use sync_types::{
    HlcTimestamp,
    ReplicaId,
    ReplicaInfo,
    ReplicaStatus,
    ReplicaType,
    UserId,
};

pub struct ReplicaRegistry {
    truancy_threshold_ms: u64,
    replicas: Mutex<HashMap<ReplicaId, ReplicaInfo>>,
}

impl ReplicaRegistry {
    pub fn new(truancy_threshold_ms: u64) -> Self {
        Self { truancy_threshold_ms, replicas: Mutex::new(HashMap::new()) }
    }

    /// `status` reflects whether the replica was just created, already
    /// known and live, or already known but truant. The caller (the
    /// authority's `sync` handler) uses `New`/`Existing` to decide whether
    /// to resend full history; truancy does not by itself force a resync —
    /// only an explicit `resyncAll` or non-existing status does (spec.md
    /// §4.4.1 step 6).
    pub fn get_or_create(
        &self,
        replica_id: &ReplicaId,
        user_id: &UserId,
        replica_type: ReplicaType,
        now_ms: u64,
    ) -> (ReplicaStatus, ReplicaInfo) {
        let mut replicas = self.replicas.lock();
        if let Some(info) = replicas.get_mut(replica_id) {
            let status = if info.is_truant(now_ms, self.truancy_threshold_ms) {
                ReplicaStatus::Truant
            } else {
                ReplicaStatus::Existing
            };
            info.last_seen_ms = now_ms;
            return (status, info.clone());
        }
        let info = ReplicaInfo {
            replica_id: replica_id.clone(),
            user_id: user_id.clone(),
            replica_type,
            acked_timestamp: None,
            last_seen_ms: now_ms,
            created_at_ms: now_ms,
        };
        replicas.insert(replica_id.clone(), info.clone());
        (ReplicaStatus::New, info)
    }

    pub fn get(&self, replica_id: &ReplicaId) -> Option<ReplicaInfo> {
        self.replicas.lock().get(replica_id).cloned()
    }

    pub fn update_acknowledged(&self, replica_id: &ReplicaId, timestamp: &HlcTimestamp) {
        let mut replicas = self.replicas.lock();
        if let Some(info) = replicas.get_mut(replica_id) {
            info.acked_timestamp = Some(match &info.acked_timestamp {
                Some(current) if current >= timestamp => current.clone(),
                _ => timestamp.clone(),
            });
        }
    }

    pub fn update_last_seen(&self, replica_id: &ReplicaId, now_ms: u64) {
        if let Some(info) = self.replicas.lock().get_mut(replica_id) {
            info.last_seen_ms = now_ms;
        }
    }

    /// Used when the client requests `resyncAll` (spec.md §4.4.1 step 2):
    /// the registry entry is forgotten so the next `get_or_create` treats
    /// the replica as brand new.
    pub fn forget(&self, replica_id: &ReplicaId) {
        self.replicas.lock().remove(replica_id);
    }

    /// The minimum `ackedTimestamp` across every non-truant, non-read-only
    /// replica — the rebase horizon (spec.md §4.3, §4.4.5). `active_override`
    /// additionally counts currently-connected replicas even if they'd
    /// otherwise be classified truant, since a live connection is
    /// authoritative over a stale `lastSeen` (spec.md §4.4.5 step 1).
    /// Returns `None` if there are no qualifying replicas, or if any
    /// qualifying replica has never acknowledged anything — either way,
    /// rebase cannot proceed.
    pub fn get_global_ack(
        &self,
        now_ms: u64,
        active_override: &[ReplicaId],
    ) -> Option<HlcTimestamp> {
        let replicas = self.replicas.lock();
        let mut min_ack: Option<HlcTimestamp> = None;
        let mut saw_any = false;
        for info in replicas.values() {
            if info.replica_type.is_read_only() {
                continue;
            }
            let is_active = active_override.contains(&info.replica_id);
            if !is_active && info.is_truant(now_ms, self.truancy_threshold_ms) {
                continue;
            }
            saw_any = true;
            match &info.acked_timestamp {
                None => return None,
                Some(ts) => {
                    min_ack = Some(match min_ack {
                        Some(current) if current <= *ts => current,
                        _ => ts.clone(),
                    });
                },
            }
        }
        if !saw_any {
            return None;
        }
        min_ack
    }

    /// Every known replica that is either currently connected
    /// (`active_override`) or not truant — the same "still counts" test
    /// `get_global_ack` applies, but over every replica type rather than
    /// only non-read-only ones, since presence isn't scoped to writers.
    pub fn live_replica_ids(&self, now_ms: u64, active_override: &[ReplicaId]) -> HashSet<ReplicaId> {
        let replicas = self.replicas.lock();
        replicas
            .values()
            .filter(|info| {
                active_override.contains(&info.replica_id) || !info.is_truant(now_ms, self.truancy_threshold_ms)
            })
            .map(|info| info.replica_id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use sync_types::HlcTimestamp;

    use super::*;

    fn rid(s: &str) -> ReplicaId {
        ReplicaId::from(s.to_string())
    }

    fn uid(s: &str) -> UserId {
        UserId::from(s.to_string())
    }

    #[test]
    fn new_then_existing_then_truant() {
        let registry = ReplicaRegistry::new(1000);
        let (status, _) = registry.get_or_create(&rid("a"), &uid("u1"), ReplicaType::Realtime, 0);
        assert_eq!(status, ReplicaStatus::New);
        let (status, _) = registry.get_or_create(&rid("a"), &uid("u1"), ReplicaType::Realtime, 500);
        assert_eq!(status, ReplicaStatus::Existing);
        // now_ms jumps far past the truancy threshold relative to last_seen (500).
        let (status, _) = registry.get_or_create(&rid("a"), &uid("u1"), ReplicaType::Realtime, 2000);
        assert_eq!(status, ReplicaStatus::Truant);
    }

    #[test]
    fn global_ack_is_min_across_non_readonly_non_truant_replicas() {
        let registry = ReplicaRegistry::new(1_000_000);
        registry.get_or_create(&rid("a"), &uid("u1"), ReplicaType::Realtime, 0);
        registry.get_or_create(&rid("b"), &uid("u2"), ReplicaType::Push, 0);
        registry.get_or_create(&rid("ro"), &uid("u3"), ReplicaType::ReadOnlyRealtime, 0);

        registry.update_acknowledged(&rid("a"), &HlcTimestamp::from_raw("5-a".to_string()));
        registry.update_acknowledged(&rid("b"), &HlcTimestamp::from_raw("9-b".to_string()));
        // Read-only replica never acks; must not gate compaction.

        let ack = registry.get_global_ack(0, &[]).unwrap();
        assert_eq!(ack, HlcTimestamp::from_raw("5-a".to_string()));
    }

    #[test]
    fn global_ack_is_none_if_any_qualifying_replica_never_acked() {
        let registry = ReplicaRegistry::new(1_000_000);
        registry.get_or_create(&rid("a"), &uid("u1"), ReplicaType::Realtime, 0);
        registry.get_or_create(&rid("b"), &uid("u2"), ReplicaType::Realtime, 0);
        registry.update_acknowledged(&rid("a"), &HlcTimestamp::from_raw("5-a".to_string()));
        assert!(registry.get_global_ack(0, &[]).is_none());
    }

    #[test]
    fn active_override_includes_truant_replica_in_consensus() {
        let registry = ReplicaRegistry::new(10);
        registry.get_or_create(&rid("a"), &uid("u1"), ReplicaType::Realtime, 0);
        registry.update_acknowledged(&rid("a"), &HlcTimestamp::from_raw("1-a".to_string()));
        // a is truant at now_ms=1000 and excluded without an override: no
        // qualifying replicas remain, so there's no consensus.
        assert!(registry.get_global_ack(1000, &[]).is_none());
        // ...but it's still counted when explicitly marked active (currently
        // connected), per spec.md §4.4.5 step 1.
        let ack = registry.get_global_ack(1000, &[rid("a")]).unwrap();
        assert_eq!(ack, HlcTimestamp::from_raw("1-a".to_string()));
    }

    #[test]
    fn live_replica_ids_excludes_truant_replicas_unless_overridden() {
        let registry = ReplicaRegistry::new(10);
        registry.get_or_create(&rid("a"), &uid("u1"), ReplicaType::Realtime, 0);
        registry.get_or_create(&rid("b"), &uid("u2"), ReplicaType::Realtime, 0);

        let live = registry.live_replica_ids(1000, &[]);
        assert!(live.is_empty(), "both replicas are truant at now_ms=1000 with no override");

        let live = registry.live_replica_ids(1000, &[rid("a")]);
        assert_eq!(live, [rid("a")].into_iter().collect());
    }
}
