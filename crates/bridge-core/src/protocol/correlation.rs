//! Request/response correlation for the pairing connection.
//!
//! # Why correlate? (for beginners)
//!
//! The pairing connection is a single bidirectional message stream.  After we
//! send a CSR, the next message to arrive is not necessarily the answer: the
//! bridge may still be repeating permission reports, or send unrelated
//! notifications.  Each request therefore carries a freshly generated
//! [`RequestTag`], and the bridge echoes that tag on its response.  Only a
//! response whose tag matches the pending entry completes the request.
//!
//! # One pending entry per connection
//!
//! The pairing protocol never has two requests outstanding.  The table
//! enforces that: registering a second request while one is pending is an
//! error rather than a silent overwrite, so a late response to an abandoned
//! request can never be mistaken for the answer to a new one.
//!
//! Each entry owns its own timeout.  The async layer races the response
//! against that timeout; whichever finishes first wins and the entry is
//! removed either way.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Opaque identifier echoed back by the bridge on a correlated response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestTag(String);

impl RequestTag {
    /// Generates a new random tag.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wraps a tag received from the wire.
    pub fn from_wire(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Error type for correlation table operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CorrelationError {
    /// A request is already awaiting its response on this connection.
    #[error("request {0} is still awaiting a response")]
    AlreadyPending(RequestTag),
}

/// A request awaiting its response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    tag: RequestTag,
    timeout: Duration,
}

impl PendingRequest {
    pub fn tag(&self) -> &RequestTag {
        &self.tag
    }

    /// How long the caller may wait for the response.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Correlation table for one connection; holds at most one pending request.
#[derive(Debug, Default)]
pub struct CorrelationTable {
    pending: Option<PendingRequest>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new request with a generated tag.
    ///
    /// # Errors
    ///
    /// Returns [`CorrelationError::AlreadyPending`] if another request has not
    /// yet been resolved or cancelled.
    pub fn register(&mut self, timeout: Duration) -> Result<PendingRequest, CorrelationError> {
        if let Some(existing) = &self.pending {
            return Err(CorrelationError::AlreadyPending(existing.tag.clone()));
        }
        let entry = PendingRequest {
            tag: RequestTag::generate(),
            timeout,
        };
        self.pending = Some(entry.clone());
        Ok(entry)
    }

    /// Completes the pending request if `tag` matches it.
    ///
    /// Returns `None`, leaving the table untouched, for any other tag.
    pub fn resolve(&mut self, tag: &RequestTag) -> Option<PendingRequest> {
        match &self.pending {
            Some(entry) if &entry.tag == tag => self.pending.take(),
            _ => None,
        }
    }

    /// Drops the pending request (its deadline passed or the attempt was
    /// abandoned).
    pub fn cancel(&mut self) -> Option<PendingRequest> {
        self.pending.take()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const FIVE_SECONDS: Duration = Duration::from_secs(5);

    #[test]
    fn test_generated_tags_are_unique() {
        let a = RequestTag::generate();
        let b = RequestTag::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_register_creates_pending_entry_with_timeout() {
        // Arrange
        let mut table = CorrelationTable::new();

        // Act
        let entry = table.register(FIVE_SECONDS).expect("register");

        // Assert
        assert!(table.is_pending());
        assert_eq!(entry.timeout(), FIVE_SECONDS);
    }

    #[test]
    fn test_second_register_is_rejected_while_pending() {
        let mut table = CorrelationTable::new();
        let first = table.register(FIVE_SECONDS).unwrap();

        let result = table.register(FIVE_SECONDS);

        assert_eq!(result, Err(CorrelationError::AlreadyPending(first.tag().clone())));
    }

    #[test]
    fn test_resolve_with_matching_tag_clears_entry() {
        let mut table = CorrelationTable::new();
        let entry = table.register(FIVE_SECONDS).unwrap();

        let resolved = table.resolve(entry.tag());

        assert_eq!(resolved, Some(entry));
        assert!(!table.is_pending());
    }

    #[test]
    fn test_resolve_with_foreign_tag_keeps_entry() {
        let mut table = CorrelationTable::new();
        table.register(FIVE_SECONDS).unwrap();

        let resolved = table.resolve(&RequestTag::from_wire("someone-else"));

        assert_eq!(resolved, None);
        assert!(table.is_pending(), "a foreign tag must not complete the request");
    }

    #[test]
    fn test_cancel_allows_a_new_registration() {
        let mut table = CorrelationTable::new();
        let first = table.register(FIVE_SECONDS).unwrap();

        table.cancel();
        let second = table.register(FIVE_SECONDS).expect("register after cancel");

        assert_ne!(first.tag(), second.tag());
        // The stale tag no longer resolves anything.
        assert_eq!(table.resolve(first.tag()), None);
    }
}
