//! Core data model: organizations, employees, and provenance (§3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Three-state employment status, canonical form stored in the document
/// store. See [`crate::status::normalize_status`] for the free-form mapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Active,
    Inactive,
    Left,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Active => "active",
            Status::Inactive => "inactive",
            Status::Left => "left",
        };
        write!(f, "{s}")
    }
}

/// Provenance tag recorded on every employee write (§3, design note on the
/// delta source tag). Preserved literally for downstream consumers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    #[serde(rename = "email:upsert")]
    EmailUpsert,
    #[serde(rename = "email:delta")]
    EmailDelta,
    #[serde(rename = "kafka:upsert")]
    KafkaUpsert,
    #[serde(rename = "kafka:delta")]
    KafkaDelta,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Source::EmailUpsert => "email:upsert",
            Source::EmailDelta => "email:delta",
            Source::KafkaUpsert => "kafka:upsert",
            Source::KafkaDelta => "kafka:delta",
        };
        write!(f, "{s}")
    }
}

impl Source {
    /// The delta-channel variant of this source's ingestion channel (email
    /// or kafka), regardless of whether `self` was itself an upsert tag.
    pub fn as_delta(self) -> Self {
        match self {
            Source::EmailUpsert | Source::EmailDelta => Source::EmailDelta,
            Source::KafkaUpsert | Source::KafkaDelta => Source::KafkaDelta,
        }
    }
}

/// Organization record, keyed by `org_id` (§3).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub org_id: String,
    pub current_epoch: u64,
    pub last_finalized_epoch: u64,
    pub name: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Organization {
    pub fn new(org_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            org_id: org_id.into(),
            current_epoch: 0,
            last_finalized_epoch: 0,
            name: None,
            updated_at: now,
        }
    }
}

/// Employee record, keyed by an opaque system-assigned id; logical identity
/// is `(org_id, email)` (§3).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Employee {
    pub id: String,
    pub org_id: String,
    pub email: String,
    pub status_in_org: Status,
    pub present_in_latest: bool,
    pub last_seen_epoch: u64,
    pub updated_at: DateTime<Utc>,
    pub source: Source,
    pub last_event_id: Option<String>,
}

impl Employee {
    /// A brand-new employee document for `email`, as created on first
    /// upsert during reconciliation.
    pub fn new_upsert(
        id: String,
        org_id: String,
        email: String,
        status_in_org: Status,
        epoch: u64,
        now: DateTime<Utc>,
        source: Source,
        last_event_id: Option<String>,
    ) -> Self {
        Self {
            id,
            org_id,
            email,
            status_in_org,
            present_in_latest: true,
            last_seen_epoch: epoch,
            updated_at: now,
            source,
            last_event_id,
        }
    }
}
