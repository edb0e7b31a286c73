//! Identify use-case service.
//!
//! # Responsibility
//! - Run match, expand, merge, coverage, create and summarize as one
//!   store transaction.
//! - Retry the whole operation from the match step on lock contention.
//! - Emit one metadata-only log event per outcome.
//!
//! # Invariants
//! - An attempt either commits every write it made or none of them.
//! - A retry never resumes midway; it re-reads everything.
//! - Integrity violations are returned as-is and never repaired.

use crate::model::contact::{ContactId, NewContact};
use crate::model::identify::{ContactSummary, IdentifyRequest, IdentifyResponse};
use crate::repo::contact_repo::{ContactStore, RepoError};
use crate::resolve::{
    build_summary, group_roots, is_covered, plan_merge, validate_expansion, ContactGroup,
    IntegrityViolation,
};
use log::{error, info, warn};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Bounded retry of whole Identify attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first. Values below 1 act as 1.
    pub max_attempts: u32,
    /// Sleep before attempt `n + 1` is `backoff * n`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(25),
        }
    }
}

/// Errors from the Identify use-case.
#[derive(Debug)]
pub enum IdentifyError {
    /// Store failure in a single attempt.
    Store(RepoError),
    /// Persisted groups break the identity hierarchy.
    Integrity(IntegrityViolation),
    /// Every attempt hit lock contention or a lock timeout.
    RetriesExhausted { attempts: u32, last: RepoError },
}

impl IdentifyError {
    /// Whether the caller may safely run the same request again.
    ///
    /// True for lock contention and for an unavailable store. Nothing from a
    /// failed attempt is committed, so a retry converges on the same grouping.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(err) => err.is_retryable(),
            Self::Integrity(_) => false,
            Self::RetriesExhausted { .. } => true,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Store(err) if err.is_retryable() => "store_unavailable",
            Self::Store(_) => "store_failed",
            Self::Integrity(_) => "integrity_violation",
            Self::RetriesExhausted { .. } => "retries_exhausted",
        }
    }
}

impl Display for IdentifyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(err) => write!(f, "{err}"),
            Self::Integrity(err) => write!(f, "contact data integrity violation: {err}"),
            Self::RetriesExhausted { attempts, last } => {
                write!(f, "identify gave up after {attempts} attempts: {last}")
            }
        }
    }
}

impl Error for IdentifyError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::Integrity(err) => Some(err),
            Self::RetriesExhausted { last, .. } => Some(last),
        }
    }
}

impl From<RepoError> for IdentifyError {
    fn from(value: RepoError) -> Self {
        Self::Store(value)
    }
}

impl From<IntegrityViolation> for IdentifyError {
    fn from(value: IntegrityViolation) -> Self {
        Self::Integrity(value)
    }
}

/// Detailed outcome of one committed Identify call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub summary: ContactSummary,
    /// Contacts matched directly by email or phone.
    pub matched: usize,
    /// Former primaries demoted by this call.
    pub demoted: Vec<ContactId>,
    /// Secondaries moved to the canonical primary by this call.
    pub repointed: Vec<ContactId>,
    /// Contact inserted by this call, if any.
    pub created: Option<ContactId>,
    /// Attempt that committed, starting at 1.
    pub attempts: u32,
}

/// Identify service facade over a contact store.
pub struct IdentifyService<S: ContactStore> {
    store: S,
    retry: RetryPolicy,
}

impl<S: ContactStore> IdentifyService<S> {
    /// Creates a service with the default retry policy.
    pub fn new(store: S) -> Self {
        Self::with_retry_policy(store, RetryPolicy::default())
    }

    pub fn with_retry_policy(store: S, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Resolves the request to its canonical identity view.
    pub fn identify(&self, request: &IdentifyRequest) -> Result<IdentifyResponse, IdentifyError> {
        self.resolve(request).map(|resolution| IdentifyResponse {
            contact: resolution.summary,
        })
    }

    /// Same as [`IdentifyService::identify`], with what the call changed.
    ///
    /// A request with neither email nor phone is accepted and always creates
    /// a new primary with no attributes; it is logged at `warn`.
    pub fn resolve(&self, request: &IdentifyRequest) -> Result<Resolution, IdentifyError> {
        let request = request.normalized();
        let op_id = Uuid::new_v4();
        let started_at = Instant::now();
        let max_attempts = self.retry.max_attempts.max(1);

        if request.is_empty() {
            warn!("event=identify module=service status=warn op_id={op_id} reason=empty_request");
        }

        let mut attempt = 1;
        loop {
            match self
                .store
                .transaction(|store| resolve_in_transaction(store, &request))
            {
                Ok(mut resolution) => {
                    resolution.attempts = attempt;
                    info!(
                        "event=identify module=service status=ok op_id={op_id} attempt={attempt} duration_ms={} primary_id={} matched={} demoted={} repointed={} created={}",
                        started_at.elapsed().as_millis(),
                        resolution.summary.primary_contact_id,
                        resolution.matched,
                        resolution.demoted.len(),
                        resolution.repointed.len(),
                        resolution.created.is_some(),
                    );
                    return Ok(resolution);
                }
                Err(IdentifyError::Store(err)) if err.is_contention() => {
                    if attempt >= max_attempts {
                        let exhausted = IdentifyError::RetriesExhausted {
                            attempts: attempt,
                            last: err,
                        };
                        log_failure(op_id, attempt, started_at, &exhausted);
                        return Err(exhausted);
                    }
                    warn!(
                        "event=identify module=service status=retry op_id={op_id} attempt={attempt} duration_ms={} error={err}",
                        started_at.elapsed().as_millis()
                    );
                    std::thread::sleep(self.retry.backoff * attempt);
                    attempt += 1;
                }
                Err(err) => {
                    log_failure(op_id, attempt, started_at, &err);
                    return Err(err);
                }
            }
        }
    }
}

fn log_failure(op_id: Uuid, attempt: u32, started_at: Instant, err: &IdentifyError) {
    error!(
        "event=identify module=service status=error op_id={op_id} attempt={attempt} duration_ms={} error_code={} retryable={} error={err}",
        started_at.elapsed().as_millis(),
        err.code(),
        err.is_retryable(),
    );
}

/// One attempt; every read and write goes through the transaction's store.
fn resolve_in_transaction<S: ContactStore>(
    store: &S,
    request: &IdentifyRequest,
) -> Result<Resolution, IdentifyError> {
    let email = request.email.as_deref();
    let phone_number = request.phone_number.as_deref();

    let matched = store.find_by_email_or_phone(email, phone_number)?;
    if matched.is_empty() {
        let created = store.insert(&NewContact::primary(
            request.email.clone(),
            request.phone_number.clone(),
        ))?;
        let created_id = created.id;
        let group = ContactGroup::singleton(created)?;
        return Ok(Resolution {
            summary: build_summary(&group),
            matched: 0,
            demoted: Vec::new(),
            repointed: Vec::new(),
            created: Some(created_id),
            attempts: 0,
        });
    }

    let expanded = store.find_by_ids_or_linked_ids(&group_roots(&matched))?;
    validate_expansion(&expanded)?;

    let plan = plan_merge(&expanded)?;
    if !plan.is_noop() {
        store.update_batch(&plan.updates())?;
    }

    // Re-read: the batch above changed membership.
    let members = store.find_by_ids_or_linked_ids(&BTreeSet::from([plan.canonical_id]))?;
    let mut group = ContactGroup::from_members(plan.canonical_id, members)?;

    let mut created = None;
    if !is_covered(&group, email, phone_number) {
        let contact = store.insert(&NewContact::secondary_of(
            plan.canonical_id,
            request.email.clone(),
            request.phone_number.clone(),
        ))?;
        created = Some(contact.id);
        group.push_secondary(contact)?;
    }

    Ok(Resolution {
        summary: build_summary(&group),
        matched: matched.len(),
        demoted: plan.demoted,
        repointed: plan.repointed,
        created,
        attempts: 0,
    })
}
