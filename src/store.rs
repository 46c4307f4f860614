//! The document store contract assumed by the core (§6.3), plus an
//! in-memory fake used by tests and by the demo binary.
//!
//! Real deployments back this trait with a document database transport;
//! that transport itself is out of scope for this crate (§1).

use crate::error::StoreError;
use crate::model::{Employee, Organization};
use async_trait::async_trait;
use std::collections::HashMap;

/// One page of the finalizer's sweep query (§4.5).
#[derive(Clone, Debug, Default)]
pub struct Page {
    pub employees: Vec<Employee>,
    /// Cursor to pass as `start_after` on the next page, `None` once the
    /// last page has been returned.
    pub next_cursor: Option<(u64, String)>,
}

/// A single entry in a reconciliation write batch, tagged per §4.3 step 3
/// so the store can choose `set-merge` vs. `create` semantics.
#[derive(Clone, Debug)]
pub enum EmployeeWrite {
    Existing(Employee),
    New(Employee),
}

impl EmployeeWrite {
    pub fn employee(&self) -> &Employee {
        match self {
            EmployeeWrite::Existing(e) | EmployeeWrite::New(e) => e,
        }
    }
}

/// Document store primitives the core needs: point get, set-merge, chunked
/// keyed lookup, atomic batch writes, and a paginated filtered scan.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_organization(&self, org_id: &str) -> Result<Option<Organization>, StoreError>;

    /// Create-or-merge the organization document (used by `begin_run` and
    /// `finalize_run`; not required to be transactional, see §4.1).
    async fn put_organization(&self, org: Organization) -> Result<(), StoreError>;

    /// Resolve employees by normalized email, chunked by the caller to
    /// `QUERY_CHUNK_SIZE` per call (§4.3 step 2). Returns only matches found.
    async fn get_employees_by_email(
        &self,
        org_id: &str,
        emails: &[String],
    ) -> Result<HashMap<String, Employee>, StoreError>;

    async fn get_employee_by_email(
        &self,
        org_id: &str,
        email: &str,
    ) -> Result<Option<Employee>, StoreError>;

    /// Commit a group of writes atomically (all-or-nothing), up to the
    /// store's batch-size limit (§4.3 step 4, §5 resource bounds).
    async fn commit_batch(&self, org_id: &str, writes: Vec<EmployeeWrite>) -> Result<(), StoreError>;

    /// Apply a single delta transition in place (§4.4). No-op contract: the
    /// caller has already confirmed the employee exists.
    async fn apply_employee_update(&self, org_id: &str, employee: Employee) -> Result<(), StoreError>;

    /// `presentInLatest = true AND lastSeenEpoch < epoch`, ordered by
    /// `lastSeenEpoch`, paginated (§4.5).
    async fn find_present_before_epoch(
        &self,
        org_id: &str,
        epoch: u64,
        page_size: usize,
        cursor: Option<(u64, String)>,
    ) -> Result<Page, StoreError>;
}

#[derive(Default)]
struct OrgState {
    org: Option<Organization>,
    employees: HashMap<String, Employee>, // keyed by document id
    by_email: HashMap<String, String>,    // email -> id
}

/// An in-memory [`Store`] fake, sufficient for unit and integration tests
/// and for running the server without a live document database.
#[derive(Default)]
pub struct InMemoryStore {
    orgs: parking_lot::Mutex<HashMap<String, OrgState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_organization(&self, org_id: &str) -> Result<Option<Organization>, StoreError> {
        Ok(self
            .orgs
            .lock()
            .get(org_id)
            .and_then(|s| s.org.clone()))
    }

    async fn put_organization(&self, org: Organization) -> Result<(), StoreError> {
        let mut orgs = self.orgs.lock();
        let entry = orgs.entry(org.org_id.clone()).or_default();
        entry.org = Some(org);
        Ok(())
    }

    async fn get_employees_by_email(
        &self,
        org_id: &str,
        emails: &[String],
    ) -> Result<HashMap<String, Employee>, StoreError> {
        let orgs = self.orgs.lock();
        let mut found = HashMap::with_capacity(emails.len());
        if let Some(state) = orgs.get(org_id) {
            for email in emails {
                if let Some(id) = state.by_email.get(email) {
                    if let Some(emp) = state.employees.get(id) {
                        found.insert(email.clone(), emp.clone());
                    }
                }
            }
        }
        Ok(found)
    }

    async fn get_employee_by_email(
        &self,
        org_id: &str,
        email: &str,
    ) -> Result<Option<Employee>, StoreError> {
        let orgs = self.orgs.lock();
        Ok(orgs.get(org_id).and_then(|state| {
            state
                .by_email
                .get(email)
                .and_then(|id| state.employees.get(id))
                .cloned()
        }))
    }

    async fn commit_batch(&self, org_id: &str, writes: Vec<EmployeeWrite>) -> Result<(), StoreError> {
        let mut orgs = self.orgs.lock();
        let state = orgs.entry(org_id.to_string()).or_default();
        for write in writes {
            let emp = write.employee().clone();
            state.by_email.insert(emp.email.clone(), emp.id.clone());
            state.employees.insert(emp.id.clone(), emp);
        }
        Ok(())
    }

    async fn apply_employee_update(&self, org_id: &str, employee: Employee) -> Result<(), StoreError> {
        let mut orgs = self.orgs.lock();
        let state = orgs.entry(org_id.to_string()).or_default();
        state.by_email.insert(employee.email.clone(), employee.id.clone());
        state.employees.insert(employee.id.clone(), employee);
        Ok(())
    }

    async fn find_present_before_epoch(
        &self,
        org_id: &str,
        epoch: u64,
        page_size: usize,
        cursor: Option<(u64, String)>,
    ) -> Result<Page, StoreError> {
        let orgs = self.orgs.lock();
        let Some(state) = orgs.get(org_id) else {
            return Ok(Page::default());
        };

        let mut matches: Vec<&Employee> = state
            .employees
            .values()
            .filter(|e| e.present_in_latest && e.last_seen_epoch < epoch)
            .collect();
        matches.sort_by(|a, b| (a.last_seen_epoch, &a.id).cmp(&(b.last_seen_epoch, &b.id)));

        let start = match &cursor {
            None => 0,
            Some((cur_epoch, cur_id)) => matches
                .iter()
                .position(|e| &(e.last_seen_epoch, e.id.clone()) > &(*cur_epoch, cur_id.clone()))
                .unwrap_or(matches.len()),
        };

        let page: Vec<Employee> = matches
            .into_iter()
            .skip(start)
            .take(page_size)
            .cloned()
            .collect();

        let next_cursor = if page.len() == page_size {
            page.last().map(|e| (e.last_seen_epoch, e.id.clone()))
        } else {
            None
        };

        Ok(Page {
            employees: page,
            next_cursor,
        })
    }
}
