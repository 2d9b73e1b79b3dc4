//! Fixed membership groups: registry, reload pipeline, history access.
//!
//! The group set is closed and known at compile time, so group membership is
//! a small predicate enum rather than anything polymorphic. All registry
//! mutation funnels through [`GroupService::reload`].

use crate::db::{self, Db};
use crate::errors::ApiError;
use crate::models::{Participant, Role};
use ark_bn254::Fr;
use merkle_groups::tree::MerkleTree;
use merkle_groups::types::{CommitmentHex, SerializedGroup};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::info;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupPredicate {
    All,
    Residents,
    Visitors,
}

impl GroupPredicate {
    pub fn matches(&self, role: Role) -> bool {
        match self {
            GroupPredicate::All => true,
            GroupPredicate::Residents => role == Role::Resident,
            GroupPredicate::Visitors => role == Role::Visitor,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct GroupSpec {
    pub id: &'static str,
    pub name: &'static str,
    pub predicate: GroupPredicate,
}

/// The fixed group set, in stable publication order. Groups are never created
/// or destroyed at runtime.
pub static FIXED_GROUPS: [GroupSpec; 3] = [
    GroupSpec { id: "participants", name: "All Participants", predicate: GroupPredicate::All },
    GroupSpec { id: "residents", name: "Residents", predicate: GroupPredicate::Residents },
    GroupSpec { id: "visitors", name: "Visitors", predicate: GroupPredicate::Visitors },
];

/// One group's complete accumulator state at one root.
///
/// Replaced wholesale on publish, never mutated in place; readers hold an
/// `Arc` snapshot that stays valid across later reloads.
pub struct AccumulatorState {
    pub spec: &'static GroupSpec,
    pub tree: MerkleTree,
}

impl AccumulatorState {
    pub fn root_hex(&self) -> String {
        CommitmentHex::from_fr(&self.tree.root()).hex
    }

    pub fn member_count(&self) -> u64 {
        self.tree.leaf_count() as u64
    }

    pub fn serialized(&self) -> SerializedGroup {
        SerializedGroup {
            id: self.spec.id.to_string(),
            name: self.spec.name.to_string(),
            depth: self.tree.depth(),
            root: self.root_hex(),
            members: self
                .tree
                .leaves()
                .iter()
                .map(|c| CommitmentHex::from_fr(c).hex)
                .collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LatestRootEntry {
    pub group_id: String,
    pub root: String,
    pub member_count: u64,
}

/// Owns the current state of every fixed group and serializes rebuilds.
pub struct GroupService {
    db: Db,
    /// Index-aligned with `FIXED_GROUPS`. Swapped as a whole on publish so
    /// readers never see a half-updated group set.
    registry: RwLock<Vec<Arc<AccumulatorState>>>,
    /// At most one reload computes at a time. A trigger arriving mid-reload
    /// blocks here, then recomputes from fresh data; an unchanged set makes
    /// that second pass a no-op.
    reload_lock: Mutex<()>,
}

impl GroupService {
    pub fn new(db: Db) -> Result<Self, ApiError> {
        let mut initial = Vec::with_capacity(FIXED_GROUPS.len());
        for spec in &FIXED_GROUPS {
            let tree = MerkleTree::build(&[])?;
            initial.push(Arc::new(AccumulatorState { spec, tree }));
        }

        Ok(Self {
            db,
            registry: RwLock::new(initial),
            reload_lock: Mutex::new(()),
        })
    }

    /// Re-derive every group from the authoritative participant set.
    ///
    /// Any failure aborts the whole attempt before anything is published, so
    /// the groups never drift apart in staleness. Safe to retry in full.
    pub async fn reload(&self) -> Result<(), ApiError> {
        let _guard = self.reload_lock.lock().await;

        let participants = db::list_participants(&self.db).await?;

        // Partition in creation order and build each candidate tree. A
        // capacity failure on any group is fatal to the attempt.
        let mut candidates: Vec<Arc<AccumulatorState>> = Vec::with_capacity(FIXED_GROUPS.len());
        for spec in &FIXED_GROUPS {
            let mut members: Vec<Fr> = Vec::new();
            for p in &participants {
                if spec.predicate.matches(p.role) {
                    let commitment = CommitmentHex { hex: p.commitment.clone() }
                        .to_fr()
                        .map_err(|_| ApiError::Internal)?;
                    members.push(commitment);
                }
            }

            let tree = MerkleTree::build(&members)?;
            candidates.push(Arc::new(AccumulatorState { spec, tree }));
        }

        // A group changed when its candidate root differs from the persisted
        // latest root, or when no latest root exists yet.
        let mut changed = Vec::new();
        for (i, candidate) in candidates.iter().enumerate() {
            let persisted = db::fetch_latest_root(&self.db, candidate.spec.id).await?;
            if persisted.as_deref() != Some(candidate.root_hex().as_str()) {
                changed.push(i);
            }
        }

        // Archive snapshots and latest roots in one transaction. The commit
        // happens before the in-memory publish, so a published root always
        // has a durable snapshot behind it.
        if !changed.is_empty() {
            let mut tx = self
                .db
                .begin()
                .await
                .map_err(|e| ApiError::ArchiveWriteFailure(format!("{e}")))?;

            for &i in &changed {
                let candidate = &candidates[i];
                let root_hex = candidate.root_hex();
                let serialized = serde_json::to_string(&candidate.serialized())
                    .map_err(|e| ApiError::ArchiveWriteFailure(format!("{e}")))?;

                db::append_group_history(&mut tx, candidate.spec.id, &root_hex, &serialized)
                    .await?;
                db::upsert_latest_root(&mut tx, candidate.spec.id, &root_hex, candidate.member_count())
                    .await?;

                info!(group_id = candidate.spec.id, root = %root_hex, members = candidate.member_count(), "archived new group root");
            }

            tx.commit()
                .await
                .map_err(|e| ApiError::ArchiveWriteFailure(format!("{e}")))?;
        }

        // Atomic publish. Groups whose root is unchanged keep their previous
        // state value, so readers of those groups observe no mutation.
        {
            let mut registry = self.registry.write().await;
            let next: Vec<Arc<AccumulatorState>> = candidates
                .into_iter()
                .enumerate()
                .map(|(i, candidate)| match registry.get(i) {
                    Some(prev) if prev.tree.root() == candidate.tree.root() => prev.clone(),
                    _ => candidate,
                })
                .collect();
            *registry = next;
        }

        info!(n_participants = participants.len(), n_changed = changed.len(), "reload complete");
        Ok(())
    }

    pub async fn get_group(&self, group_id: &str) -> Option<Arc<AccumulatorState>> {
        let registry = self.registry.read().await;
        registry.iter().find(|s| s.spec.id == group_id).cloned()
    }

    /// One entry per fixed group, in `FIXED_GROUPS` order.
    pub async fn latest_roots(&self) -> Vec<LatestRootEntry> {
        let registry = self.registry.read().await;
        registry
            .iter()
            .map(|s| LatestRootEntry {
                group_id: s.spec.id.to_string(),
                root: s.root_hex(),
                member_count: s.member_count(),
            })
            .collect()
    }

    pub async fn get_participant(&self, uuid: Uuid) -> Result<Option<Participant>, ApiError> {
        db::get_participant(&self.db, uuid).await
    }

    pub async fn get_historic_group(
        &self,
        group_id: &str,
        root_hex: &str,
    ) -> Result<Option<String>, ApiError> {
        db::fetch_historic_group(&self.db, group_id, root_hex).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use merkle_groups::tree::compute_root;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_service() -> GroupService {
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        db::init_schema(&db).await.unwrap();
        GroupService::new(db).unwrap()
    }

    async fn register(svc: &GroupService, email: &str, role: Role, value: u64) -> Fr {
        let commitment = Fr::from(value);
        db::insert_ticket_holder(&svc.db, email, "Test User", role, "atlantis", "order-1")
            .await
            .unwrap();
        db::save_commitment(&svc.db, email, &CommitmentHex::from_fr(&commitment).hex)
            .await
            .unwrap();
        commitment
    }

    async fn root_of(svc: &GroupService, group_id: &str) -> Fr {
        svc.get_group(group_id).await.unwrap().tree.root()
    }

    #[tokio::test]
    async fn partitions_participants_by_role() {
        let svc = test_service().await;
        let c1 = register(&svc, "p1@example.com", Role::Resident, 101).await;
        let c2 = register(&svc, "p2@example.com", Role::Visitor, 102).await;

        svc.reload().await.unwrap();

        assert_eq!(root_of(&svc, "residents").await, compute_root(&[c1]).unwrap());
        assert_eq!(root_of(&svc, "visitors").await, compute_root(&[c2]).unwrap());
        assert_eq!(root_of(&svc, "participants").await, compute_root(&[c1, c2]).unwrap());
    }

    #[tokio::test]
    async fn filtering_preserves_creation_order() {
        let svc = test_service().await;
        let mut residents = Vec::new();
        let mut all = Vec::new();

        for (i, role) in [Role::Resident, Role::Visitor, Role::Resident, Role::Visitor, Role::Resident]
            .iter()
            .enumerate()
        {
            let c = register(&svc, &format!("p{i}@example.com"), *role, 200 + i as u64).await;
            all.push(c);
            if *role == Role::Resident {
                residents.push(c);
            }
        }

        svc.reload().await.unwrap();

        let group = svc.get_group("residents").await.unwrap();
        assert_eq!(group.tree.leaves(), residents.as_slice());

        let group = svc.get_group("participants").await.unwrap();
        assert_eq!(group.tree.leaves(), all.as_slice());
    }

    #[tokio::test]
    async fn reload_is_idempotent() {
        let svc = test_service().await;
        register(&svc, "p1@example.com", Role::Resident, 301).await;

        svc.reload().await.unwrap();
        let roots_before = svc.latest_roots().await;
        let history_before = db::count_group_history(&svc.db, "participants").await.unwrap();

        svc.reload().await.unwrap();
        let roots_after = svc.latest_roots().await;
        let history_after = db::count_group_history(&svc.db, "participants").await.unwrap();

        assert_eq!(history_before, history_after);
        for (a, b) in roots_before.iter().zip(&roots_after) {
            assert_eq!(a.root, b.root);
            assert_eq!(a.member_count, b.member_count);
        }
    }

    #[tokio::test]
    async fn unchanged_group_is_untouched_by_reload() {
        let svc = test_service().await;
        register(&svc, "p1@example.com", Role::Resident, 401).await;
        let c2 = register(&svc, "p2@example.com", Role::Visitor, 402).await;
        svc.reload().await.unwrap();

        let visitors_before = root_of(&svc, "visitors").await;
        let residents_before = root_of(&svc, "residents").await;

        register(&svc, "p3@example.com", Role::Resident, 403).await;
        svc.reload().await.unwrap();

        assert_eq!(root_of(&svc, "visitors").await, visitors_before);
        assert_eq!(root_of(&svc, "visitors").await, compute_root(&[c2]).unwrap());
        assert_ne!(root_of(&svc, "residents").await, residents_before);

        // One snapshot per visitors root ever published; the second reload
        // added nothing for the unchanged group.
        assert_eq!(db::count_group_history(&svc.db, "visitors").await.unwrap(), 1);
        assert_eq!(db::count_group_history(&svc.db, "residents").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn historic_roots_remain_resolvable() {
        let svc = test_service().await;
        let c1 = register(&svc, "p1@example.com", Role::Resident, 501).await;
        svc.reload().await.unwrap();

        let old_root = svc.get_group("residents").await.unwrap().root_hex();

        register(&svc, "p2@example.com", Role::Resident, 502).await;
        svc.reload().await.unwrap();

        let new_root = svc.get_group("residents").await.unwrap().root_hex();
        assert_ne!(old_root, new_root);

        let snapshot = svc
            .get_historic_group("residents", &old_root)
            .await
            .unwrap()
            .expect("pre-reload snapshot must survive");
        let group: SerializedGroup = serde_json::from_str(&snapshot).unwrap();
        assert_eq!(group.root, old_root);
        assert_eq!(group.members, vec![CommitmentHex::from_fr(&c1).hex]);
    }

    #[tokio::test]
    async fn every_latest_root_has_a_snapshot() {
        let svc = test_service().await;
        register(&svc, "p1@example.com", Role::Resident, 601).await;
        register(&svc, "p2@example.com", Role::Visitor, 602).await;
        svc.reload().await.unwrap();

        for entry in svc.latest_roots().await {
            let snapshot = svc.get_historic_group(&entry.group_id, &entry.root).await.unwrap();
            assert!(snapshot.is_some(), "missing snapshot for {}", entry.group_id);
        }
    }

    #[tokio::test]
    async fn latest_roots_keep_stable_group_order() {
        let svc = test_service().await;
        svc.reload().await.unwrap();

        let ids: Vec<String> = svc.latest_roots().await.into_iter().map(|e| e.group_id).collect();
        assert_eq!(ids, vec!["participants", "residents", "visitors"]);
    }

    #[tokio::test]
    async fn empty_groups_are_archived_on_first_reload() {
        let svc = test_service().await;
        svc.reload().await.unwrap();

        let entries = svc.latest_roots().await;
        assert_eq!(entries.len(), 3);
        for entry in entries {
            assert_eq!(entry.member_count, 0);
            let snapshot = svc.get_historic_group(&entry.group_id, &entry.root).await.unwrap();
            assert!(snapshot.is_some());
        }
    }

    #[tokio::test]
    async fn failed_rebuild_publishes_nothing() {
        let svc = test_service().await;
        register(&svc, "p1@example.com", Role::Resident, 701).await;
        svc.reload().await.unwrap();

        let roots_before = svc.latest_roots().await;
        let mut history_before = Vec::new();
        for spec in &FIXED_GROUPS {
            history_before.push(db::count_group_history(&svc.db, spec.id).await.unwrap());
        }

        // A corrupt stored commitment fails one group's candidate build
        // mid-pipeline; the whole attempt must abort with no group updated.
        db::insert_ticket_holder(&svc.db, "p2@example.com", "Test User", Role::Visitor, "atlantis", "order-1")
            .await
            .unwrap();
        db::save_commitment(&svc.db, "p2@example.com", "not-a-field-element")
            .await
            .unwrap();

        assert!(svc.reload().await.is_err());

        assert_eq!(svc.latest_roots().await, roots_before);
        for (spec, before) in FIXED_GROUPS.iter().zip(&history_before) {
            assert_eq!(db::count_group_history(&svc.db, spec.id).await.unwrap(), *before);
        }
    }

    #[tokio::test]
    async fn source_failure_aborts_before_any_mutation() {
        let svc = test_service().await;
        register(&svc, "p1@example.com", Role::Resident, 702).await;
        svc.reload().await.unwrap();

        let roots_before = svc.latest_roots().await;

        svc.db.close().await;

        let err = svc.reload().await.unwrap_err();
        assert!(matches!(err, ApiError::SourceUnavailable(_)));
        assert_eq!(svc.latest_roots().await, roots_before);

        // Reads against a down database report the same retryable class.
        assert!(matches!(
            svc.get_participant(Uuid::new_v4()).await.unwrap_err(),
            ApiError::SourceUnavailable(_)
        ));
        assert!(matches!(
            svc.get_historic_group("residents", "00").await.unwrap_err(),
            ApiError::SourceUnavailable(_)
        ));
    }

    #[tokio::test]
    async fn unknown_group_is_not_found() {
        let svc = test_service().await;
        assert!(svc.get_group("organizers").await.is_none());
    }
}
