//! The entry-decision state machine.
//!
//! A request moves through `TokenVerified → IdentityResolved →
//! StatusChecked → BiometricChecked → Decided`, short-circuiting on the
//! first failing stage. Whatever happens, internal faults included, the
//! attempt terminates in a decision and exactly one audit record.

use chrono::{DateTime, Utc};
use std::fmt::Display;
use tracing::{debug, error, instrument};

use crate::gate::biometric::{EmbeddingExtractor, FaceMatcher};
use crate::gate::extractor::ExtractorError;
use crate::gate::store::{AuditRecord, AuditSink, IdentityStore, StoreError};
use crate::gate::token::PassCodec;

/// Audit sentinel for attempts whose token never yielded a subject id.
/// Identity ids start at 1, so 0 can never collide with a real account.
pub const UNKNOWN_SUBJECT: i64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// Malformed, expired, or forged credential.
    InvalidToken,
    /// Token verified but the claimed identity does not exist.
    UnknownIdentity,
    /// The identity's own expiry is in the past.
    AccountExpired,
    /// No face embedding enrolled for the identity.
    MissingTemplate,
    /// The live image contained no detectable face; a non-match, not a fault.
    NoFaceDetected,
    /// Similarity at or below the threshold.
    FaceMismatch,
    /// The extraction capability missed its deadline.
    ExtractionTimeout,
    /// Unexpected fault; details go to the audit log, not to the caller.
    Internal,
}

/// Terminal outcome of one verification attempt.
#[derive(Debug, Clone)]
pub struct EntryDecision {
    pub subject_id: Option<i64>,
    pub email: Option<String>,
    pub similarity: Option<f32>,
    /// `None` means access was granted.
    pub denied: Option<DenyReason>,
    pub(crate) error_log: Option<String>,
}

impl EntryDecision {
    #[must_use]
    pub fn access_granted(&self) -> bool {
        self.denied.is_none()
    }

    fn allow(subject_id: i64, email: String, similarity: f32) -> Self {
        Self {
            subject_id: Some(subject_id),
            email: Some(email),
            similarity: Some(similarity),
            denied: None,
            error_log: None,
        }
    }

    fn deny(subject_id: Option<i64>, reason: DenyReason, error_log: impl Into<String>) -> Self {
        Self {
            subject_id,
            email: None,
            similarity: None,
            denied: Some(reason),
            error_log: Some(error_log.into()),
        }
    }

    fn with_similarity(mut self, similarity: f32) -> Self {
        self.similarity = Some(similarity);
        self
    }
}

/// Outcome of a mint request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueOutcome {
    Issued(String),
    UnknownIdentity,
    AccountExpired,
}

/// Orchestrates one verification attempt end to end.
///
/// Stateless across requests; the secret key inside the codec and the
/// matcher threshold are fixed at startup.
#[derive(Debug, Clone)]
pub struct Gate<S, X> {
    codec: PassCodec,
    matcher: FaceMatcher,
    store: S,
    extractor: X,
}

impl<S, X> Gate<S, X>
where
    S: IdentityStore + AuditSink,
    X: EmbeddingExtractor,
{
    pub fn new(codec: PassCodec, matcher: FaceMatcher, store: S, extractor: X) -> Self {
        Self {
            codec,
            matcher,
            store,
            extractor,
        }
    }

    /// Run the full pipeline for one attempt and audit the outcome.
    #[instrument(skip_all)]
    pub async fn verify_entry(&self, token: &str, image: &[u8]) -> EntryDecision {
        let now = Utc::now();
        let decision = self.decide(token, image, now).await;
        self.audit(&decision, now).await;
        decision
    }

    /// Mint a fresh credential for an existing, non-expired identity.
    ///
    /// # Errors
    ///
    /// Propagates store failures; the caller decides how to report them.
    pub async fn issue_token(
        &self,
        subject_id: i64,
        now: DateTime<Utc>,
    ) -> Result<IssueOutcome, StoreError> {
        let Some(identity) = self.store.identity(subject_id).await? else {
            return Ok(IssueOutcome::UnknownIdentity);
        };
        if identity.is_expired(now) {
            return Ok(IssueOutcome::AccountExpired);
        }
        Ok(IssueOutcome::Issued(
            self.codec.issue(subject_id, now.timestamp()),
        ))
    }

    async fn decide(&self, token: &str, image: &[u8], now: DateTime<Utc>) -> EntryDecision {
        // TokenVerified
        let subject_id = match self.codec.verify(token, now.timestamp()) {
            Ok(subject_id) => subject_id,
            Err(err) => {
                debug!("Credential rejected: {err}");
                return EntryDecision::deny(
                    None,
                    DenyReason::InvalidToken,
                    "Invalid or expired QR token",
                );
            }
        };

        // IdentityResolved; a verified token for a deleted account still
        // leaves an audit trail under the claimed id.
        let identity = match self.store.identity(subject_id).await {
            Ok(Some(identity)) => identity,
            Ok(None) => {
                return EntryDecision::deny(
                    Some(subject_id),
                    DenyReason::UnknownIdentity,
                    "Identity not found",
                )
            }
            Err(err) => return internal_fault(Some(subject_id), &err),
        };

        // StatusChecked, before any biometric work starts.
        if identity.is_expired(now) {
            return EntryDecision::deny(
                Some(subject_id),
                DenyReason::AccountExpired,
                "Account expired",
            );
        }

        let Some(stored) = identity.embedding else {
            return EntryDecision::deny(
                Some(subject_id),
                DenyReason::MissingTemplate,
                "No biometric template registered",
            );
        };

        // BiometricChecked
        let live = match self.extractor.extract(image).await {
            Ok(Some(embedding)) => embedding,
            Ok(None) => {
                return EntryDecision::deny(
                    Some(subject_id),
                    DenyReason::NoFaceDetected,
                    "No face detected",
                )
                .with_similarity(0.0)
            }
            Err(ExtractorError::Timeout) => {
                return EntryDecision::deny(
                    Some(subject_id),
                    DenyReason::ExtractionTimeout,
                    "biometric extraction timeout",
                )
            }
            Err(err) => return internal_fault(Some(subject_id), &err),
        };

        // Decided
        match self.matcher.matches(&live, &stored) {
            Ok((true, similarity)) => EntryDecision::allow(subject_id, identity.email, similarity),
            Ok((false, similarity)) => EntryDecision::deny(
                Some(subject_id),
                DenyReason::FaceMismatch,
                format!("Face mismatch (similarity: {similarity:.2})"),
            )
            .with_similarity(similarity),
            Err(err) => internal_fault(Some(subject_id), &err),
        }
    }

    async fn audit(&self, decision: &EntryDecision, now: DateTime<Utc>) {
        let record = AuditRecord {
            subject_id: decision.subject_id.unwrap_or(UNKNOWN_SUBJECT),
            access_granted: decision.access_granted(),
            error_log: decision.error_log.clone(),
            similarity: decision.similarity,
            created_at: now,
        };
        // A failing sink must not turn into a crashed attempt; operators see
        // the error, the caller still gets the decision.
        if let Err(err) = self.store.append(&record).await {
            error!("Failed to append entry log: {err}");
        }
    }
}

fn internal_fault(subject_id: Option<i64>, cause: &dyn Display) -> EntryDecision {
    error!("Entry verification fault: {cause}");
    EntryDecision::deny(
        subject_id,
        DenyReason::Internal,
        format!("Internal error: {cause}"),
    )
}
