//! Finalizer: post-snapshot sweep marking absent employees (§4.5).

use crate::error::FinalizeError;
use crate::model::Organization;
use crate::store::Store;
use chrono::Utc;
use std::sync::Arc;

const PAGE_SIZE: usize = 1000;

pub struct Finalizer {
    store: Arc<dyn Store>,
}

impl Finalizer {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Mark every employee with `presentInLatest=true ∧ lastSeenEpoch < epoch`
    /// as no longer present, then record `epoch` as both `currentEpoch` and
    /// `lastFinalizedEpoch`. Idempotent: re-running for the same epoch finds
    /// an empty page and is a no-op (§4.5, §8 boundary behaviors).
    #[tracing::instrument(skip(self), fields(org_id, epoch))]
    pub async fn finalize_run(&self, org_id: &str, epoch: u64) -> Result<usize, FinalizeError> {
        let mut cursor = None;
        let mut total_marked = 0;

        loop {
            let page = self
                .store
                .find_present_before_epoch(org_id, epoch, PAGE_SIZE, cursor.clone())
                .await?;

            let page_len = page.employees.len();
            if page_len == 0 {
                break;
            }

            let mut writes = Vec::with_capacity(page_len);
            for mut employee in page.employees {
                employee.present_in_latest = false;
                employee.updated_at = Utc::now();
                writes.push(crate::store::EmployeeWrite::Existing(employee));
            }
            self.store.commit_batch(org_id, writes).await?;
            total_marked += page_len;

            metrics::counter!("roster_finalizer_pages_total").increment(1);
            metrics::counter!("roster_finalizer_marked_absent_total").increment(page_len as u64);

            if page_len < PAGE_SIZE {
                break;
            }
            cursor = page.next_cursor;
        }

        let existing = self.store.get_organization(org_id).await?;
        let now = Utc::now();
        let org = Organization {
            org_id: org_id.to_string(),
            current_epoch: epoch,
            last_finalized_epoch: epoch,
            name: existing.and_then(|o| o.name),
            updated_at: now,
        };
        self.store.put_organization(org).await?;

        tracing::info!(org_id, epoch, marked_absent = total_marked, "finalized run");
        Ok(total_marked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epoch::EpochManager;
    use crate::model::{Employee, Source, Status};
    use crate::store::{EmployeeWrite, InMemoryStore};

    async fn upsert(store: &InMemoryStore, org: &str, email: &str, epoch: u64) {
        let emp = Employee::new_upsert(
            format!("id-{email}"),
            org.to_string(),
            email.to_string(),
            Status::Active,
            epoch,
            Utc::now(),
            Source::KafkaUpsert,
            None,
        );
        store.commit_batch(org, vec![EmployeeWrite::New(emp)]).await.unwrap();
    }

    #[tokio::test]
    async fn departure_via_next_snapshot() {
        let store = Arc::new(InMemoryStore::new());
        let epoch_mgr = EpochManager::new(store.clone());
        let finalizer = Finalizer::new(store.clone());

        let e1 = epoch_mgr.begin_run("acme", None).await.unwrap();
        upsert(&store, "acme", "alice@x.com", e1).await;
        upsert(&store, "acme", "bob@x.com", e1).await;
        upsert(&store, "acme", "charlie@x.com", e1).await;
        finalizer.finalize_run("acme", e1).await.unwrap();

        let e2 = epoch_mgr.begin_run("acme", None).await.unwrap();
        upsert(&store, "acme", "alice@x.com", e2).await;
        upsert(&store, "acme", "bob@x.com", e2).await;
        let marked = finalizer.finalize_run("acme", e2).await.unwrap();

        assert_eq!(marked, 1); // only charlie
        let charlie = store.get_employee_by_email("acme", "charlie@x.com").await.unwrap().unwrap();
        assert!(!charlie.present_in_latest);
        assert_eq!(charlie.last_seen_epoch, e1);

        let org = store.get_organization("acme").await.unwrap().unwrap();
        assert_eq!(org.current_epoch, e2);
        assert_eq!(org.last_finalized_epoch, e2);
    }

    #[tokio::test]
    async fn rerunning_same_epoch_is_a_noop() {
        let store = Arc::new(InMemoryStore::new());
        let epoch_mgr = EpochManager::new(store.clone());
        let finalizer = Finalizer::new(store.clone());

        let e1 = epoch_mgr.begin_run("acme", None).await.unwrap();
        upsert(&store, "acme", "alice@x.com", e1).await;
        finalizer.finalize_run("acme", e1).await.unwrap();

        let marked_again = finalizer.finalize_run("acme", e1).await.unwrap();
        assert_eq!(marked_again, 0);
    }

    #[tokio::test]
    async fn exact_page_size_boundary_terminates() {
        let store = Arc::new(InMemoryStore::new());
        let epoch_mgr = EpochManager::new(store.clone());
        let finalizer = Finalizer::new(store.clone());

        let e1 = epoch_mgr.begin_run("acme", None).await.unwrap();
        for i in 0..PAGE_SIZE {
            upsert(&store, "acme", &format!("user{i}@x.com"), e1).await;
        }
        finalizer.finalize_run("acme", e1).await.unwrap();

        let e2 = epoch_mgr.begin_run("acme", None).await.unwrap();
        let marked = finalizer.finalize_run("acme", e2).await.unwrap();
        assert_eq!(marked, PAGE_SIZE);
    }
}
