//! Ephemeral presence fan-out (spec.md §4.4.6, §9 "Global mutable state").
//!
//! Presence is process-wide, in-memory state, created on first access and
//! destroyed on library close — unlike operations and baselines, it is
//! never persisted. Access goes through `Authority`'s per-library write
//! lock, the same serialization discipline spec.md §9 requires for all
//! shared per-library state.

use std::collections::HashMap;

use sync_types::{
    Presence,
    ReplicaId,
    UserId,
};

#[derive(Clone, Debug)]
pub struct PresenceEntry {
    pub replica_id: ReplicaId,
    pub presence: Presence,
}

#[derive(Default)]
pub struct PresenceMap {
    by_user: HashMap<UserId, HashMap<ReplicaId, PresenceEntry>>,
}

impl PresenceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, user_id: &UserId, replica_id: &ReplicaId, presence: Presence) {
        self.by_user
            .entry(user_id.clone())
            .or_default()
            .insert(replica_id.clone(), PresenceEntry { replica_id: replica_id.clone(), presence });
    }

    /// Remove a replica's presence entry. Returns `true` if this was the
    /// last replica for that user — the caller should then emit
    /// `presence-offline` for the user (spec.md §4.4.6).
    pub fn remove(&mut self, user_id: &UserId, replica_id: &ReplicaId) -> bool {
        let Some(replicas) = self.by_user.get_mut(user_id) else { return false };
        replicas.remove(replica_id);
        if replicas.is_empty() {
            self.by_user.remove(user_id);
            true
        } else {
            false
        }
    }

    /// Drop every replica whose owning connection is gone, returning
    /// `(userId, replicaId)` for every user who went fully offline as a
    /// result, `replicaId` being the last of their replicas swept out. Used
    /// to sweep truant replicas out of the presence map (spec.md §4.4.6
    /// "Truant replicas removed from the map").
    pub fn retain_live(&mut self, live: &std::collections::HashSet<ReplicaId>) -> Vec<(UserId, ReplicaId)> {
        let mut went_offline = Vec::new();
        self.by_user.retain(|user_id, replicas| {
            let stale: Vec<ReplicaId> = replicas.keys().filter(|id| !live.contains(id)).cloned().collect();
            for id in &stale {
                replicas.remove(id);
            }
            if replicas.is_empty() {
                if let Some(last) = stale.into_iter().last() {
                    went_offline.push((user_id.clone(), last));
                }
                false
            } else {
                true
            }
        });
        went_offline
    }

    pub fn snapshot(&self) -> Vec<(UserId, ReplicaId, Presence)> {
        self.by_user
            .iter()
            .flat_map(|(user_id, replicas)| {
                replicas
                    .values()
                    .map(move |entry| (user_id.clone(), entry.replica_id.clone(), entry.presence.clone()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use sync_types::Value;

    use super::*;

    fn uid(s: &str) -> UserId {
        UserId::from(s.to_string())
    }

    fn rid(s: &str) -> ReplicaId {
        ReplicaId::from(s.to_string())
    }

    #[test]
    fn last_replica_for_user_disconnecting_reports_offline() {
        let mut map = PresenceMap::new();
        map.update(&uid("u1"), &rid("a"), Value::Null);
        map.update(&uid("u1"), &rid("b"), Value::Null);

        assert!(!map.remove(&uid("u1"), &rid("a")), "user still has replica b connected");
        assert!(map.remove(&uid("u1"), &rid("b")), "b was the last replica for u1");
    }

    #[test]
    fn retain_live_sweeps_stale_replicas_and_reports_users_gone_fully_offline() {
        let mut map = PresenceMap::new();
        map.update(&uid("u1"), &rid("a"), Value::Null);
        map.update(&uid("u2"), &rid("b"), Value::Null);
        map.update(&uid("u2"), &rid("c"), Value::Null);

        let live = [rid("a"), rid("b")].into_iter().collect();
        let offline = map.retain_live(&live);

        assert!(offline.is_empty(), "u2 still has replica b live");
        assert_eq!(map.snapshot().len(), 2);

        let live = [rid("a")].into_iter().collect();
        let offline = map.retain_live(&live);
        assert_eq!(offline, vec![(uid("u2"), rid("b"))]);
    }

    #[test]
    fn snapshot_reflects_all_users() {
        let mut map = PresenceMap::new();
        map.update(&uid("u1"), &rid("a"), Value::Bool(true));
        map.update(&uid("u2"), &rid("b"), Value::Bool(false));
        assert_eq!(map.snapshot().len(), 2);
    }
}
