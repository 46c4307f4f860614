//! Status normalization and email validation (§4.4).

use crate::model::Status;
use std::sync::OnceLock;

const ACTIVE_VOCAB: &[&str] = &[
    "active",
    "employed",
    "current",
    "working",
    "full-time",
    "fulltime",
    "part-time",
    "parttime",
    "contractor",
    "consultant",
    "intern",
];

const INACTIVE_VOCAB: &[&str] = &[
    "inactive",
    "on leave",
    "onleave",
    "leave",
    "sabbatical",
    "maternity",
    "paternity",
    "medical",
    "suspended",
];

const LEFT_VOCAB: &[&str] = &[
    "left",
    "terminated",
    "former",
    "resigned",
    "retired",
    "departed",
    "exited",
    "quit",
    "fired",
    "removed",
];

fn email_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid regex"))
}

/// Normalize a free-form status string into the canonical three-state
/// vocabulary. Matches case-insensitively, exact match first, then
/// substring match against each vocabulary's terms in declaration order.
/// Empty/null input defaults to `active`; unrecognized non-empty input
/// defaults to `inactive`. Idempotent: `normalize(normalize(s)) == normalize(s)`.
pub fn normalize_status(raw: Option<&str>) -> Status {
    let raw = match raw {
        None => return Status::Active,
        Some(s) => s.trim(),
    };
    if raw.is_empty() {
        return Status::Active;
    }
    let lower = raw.to_lowercase();

    if let Some(status) = exact_match(&lower) {
        return status;
    }
    if let Some(status) = substring_match(&lower) {
        return status;
    }
    Status::Inactive
}

fn exact_match(lower: &str) -> Option<Status> {
    if ACTIVE_VOCAB.contains(&lower) {
        Some(Status::Active)
    } else if INACTIVE_VOCAB.contains(&lower) {
        Some(Status::Inactive)
    } else if LEFT_VOCAB.contains(&lower) {
        Some(Status::Left)
    } else {
        None
    }
}

fn substring_match(lower: &str) -> Option<Status> {
    if ACTIVE_VOCAB.iter().any(|term| lower.contains(term)) {
        Some(Status::Active)
    } else if INACTIVE_VOCAB.iter().any(|term| lower.contains(term)) {
        Some(Status::Inactive)
    } else if LEFT_VOCAB.iter().any(|term| lower.contains(term)) {
        Some(Status::Left)
    } else {
        None
    }
}

/// Normalize (lowercase, trim) an email address for use as the logical
/// `(orgId, email)` primary key.
pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Validate an already-normalized email against the spec's RFC-ish pattern.
pub fn is_valid_email(email: &str) -> bool {
    email_re().is_match(email)
}
