//! Epoch Manager: run lifecycle (§4.1).
//!
//! `begin_run` is deliberately not transactional — see the open question in
//! §9. Correctness downstream does not depend on mutual exclusion here
//! because `lastSeenEpoch` is a high-water-mark and writes are
//! last-writer-wins.

use crate::error::StoreError;
use crate::model::Organization;
use crate::store::Store;
use chrono::Utc;
use std::sync::Arc;

pub struct EpochManager {
    store: Arc<dyn Store>,
}

impl EpochManager {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Allocate the next epoch for `org_id` and persist it. Concurrent
    /// callers for the same organization may race; see §4.1/§9.
    #[tracing::instrument(skip(self), fields(org_id))]
    pub async fn begin_run(&self, org_id: &str, name: Option<String>) -> Result<u64, StoreError> {
        let existing = self.store.get_organization(org_id).await?;
        let next_epoch = existing.as_ref().map(|o| o.current_epoch).unwrap_or(0) + 1;
        let now = Utc::now();

        let org = Organization {
            org_id: org_id.to_string(),
            current_epoch: next_epoch,
            last_finalized_epoch: existing.as_ref().map(|o| o.last_finalized_epoch).unwrap_or(0),
            name: name.or_else(|| existing.and_then(|o| o.name)),
            updated_at: now,
        };
        self.store.put_organization(org).await?;

        tracing::info!(org_id, epoch = next_epoch, "began run");
        metrics::counter!("roster_epochs_begun_total").increment(1);
        Ok(next_epoch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    #[tokio::test]
    async fn first_run_allocates_epoch_one() {
        let store = Arc::new(InMemoryStore::new());
        let manager = EpochManager::new(store.clone());

        let epoch = manager.begin_run("acme", None).await.unwrap();
        assert_eq!(epoch, 1);

        let org = store.get_organization("acme").await.unwrap().unwrap();
        assert_eq!(org.current_epoch, 1);
        assert_eq!(org.last_finalized_epoch, 0);
    }

    #[tokio::test]
    async fn successive_runs_increment_by_one() {
        let store = Arc::new(InMemoryStore::new());
        let manager = EpochManager::new(store.clone());

        assert_eq!(manager.begin_run("acme", None).await.unwrap(), 1);
        assert_eq!(manager.begin_run("acme", None).await.unwrap(), 2);
        assert_eq!(manager.begin_run("acme", None).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn name_is_merged_not_clobbered() {
        let store = Arc::new(InMemoryStore::new());
        let manager = EpochManager::new(store.clone());

        manager.begin_run("acme", Some("Acme Corp".to_string())).await.unwrap();
        manager.begin_run("acme", None).await.unwrap();

        let org = store.get_organization("acme").await.unwrap().unwrap();
        assert_eq!(org.name.as_deref(), Some("Acme Corp"));
    }
}
