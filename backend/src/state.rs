use crate::db::Db;
use crate::errors::ApiError;
use crate::groups::GroupService;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_RELOAD_TIMEOUT_SECS: u64 = 30;

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub groups: Arc<GroupService>,
    pub reload_timeout: Duration,
}

impl AppState {
    pub fn new(db: Db, groups: Arc<GroupService>) -> Self {
        let reload_timeout = std::env::var("RELOAD_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_RELOAD_TIMEOUT_SECS);

        Self {
            db,
            groups,
            reload_timeout: Duration::from_secs(reload_timeout),
        }
    }

    /// Run a reload, waiting at most the configured timeout for the result.
    ///
    /// The reload runs as its own task, so a waiter that hits the deadline
    /// detaches without cancelling it: once started, the archive commit and
    /// registry publish always run to completion, and the caller gets
    /// `ReloadTimeout` rather than a claim that nothing changed.
    pub async fn reload_bounded(&self) -> Result<(), ApiError> {
        let groups = self.groups.clone();
        let reload = tokio::spawn(async move { groups.reload().await });

        match tokio::time::timeout(self.reload_timeout, reload).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ApiError::Internal),
            Err(_) => Err(ApiError::ReloadTimeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::Role;
    use ark_bn254::Fr;
    use merkle_groups::types::CommitmentHex;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_state(reload_timeout: Duration) -> AppState {
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        db::init_schema(&db).await.unwrap();
        let groups = Arc::new(GroupService::new(db.clone()).unwrap());

        AppState { db, groups, reload_timeout }
    }

    #[tokio::test]
    async fn bounded_reload_completes_within_deadline() {
        let state = test_state(Duration::from_secs(30)).await;

        state.reload_bounded().await.unwrap();
        assert_eq!(state.groups.latest_roots().await.len(), 3);
    }

    #[tokio::test]
    async fn timed_out_waiter_never_interrupts_the_publish() {
        let state = test_state(Duration::ZERO).await;
        db::insert_ticket_holder(&state.db, "p1@example.com", "Test User", Role::Resident, "atlantis", "order-1")
            .await
            .unwrap();
        db::save_commitment(
            &state.db,
            "p1@example.com",
            &CommitmentHex::from_fr(&Fr::from(801u64)).hex,
        )
        .await
        .unwrap();

        let err = state.reload_bounded().await.unwrap_err();
        assert!(matches!(err, ApiError::ReloadTimeout));

        // The detached reload keeps running; wait for its publish.
        let mut published = false;
        for _ in 0..250 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let roots = state.groups.latest_roots().await;
            if roots.iter().any(|e| e.group_id == "participants" && e.member_count == 1) {
                published = true;
                break;
            }
        }
        assert!(published, "detached reload must still publish");

        // Every published root already has its snapshot archived.
        for entry in state.groups.latest_roots().await {
            let snapshot = state
                .groups
                .get_historic_group(&entry.group_id, &entry.root)
                .await
                .unwrap();
            assert!(snapshot.is_some());
        }
    }
}
