//! Identifier providers
//!
//! The lifecycle manager never generates ids itself; it asks an injected
//! [`IdProvider`]. Production code uses [`RandomUserIds`] for the per-launch
//! user id and [`UuidSessionIds`] for client-assigned session ids. Tests use
//! [`SequentialIds`] for deterministic values.

use std::sync::atomic::{AtomicU64, Ordering};

use rand::distr::Alphanumeric;
use rand::Rng;

/// Source of fresh identifiers
pub trait IdProvider: Send + Sync {
    /// Produce a new identifier
    fn next_id(&self) -> String;
}

/// Length of the random part of a generated user id
pub const USER_SUFFIX_LEN: usize = 6;

/// `user-` followed by [`USER_SUFFIX_LEN`] random lowercase alphanumerics
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomUserIds;

impl IdProvider for RandomUserIds {
    fn next_id(&self) -> String {
        let suffix: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(USER_SUFFIX_LEN)
            .map(|b| char::from(b).to_ascii_lowercase())
            .collect();
        format!("user-{}", suffix)
    }
}

/// Random v4 UUIDs
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidSessionIds;

impl IdProvider for UuidSessionIds {
    fn next_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// `{prefix}-{n}` with `n` counting up from 1
///
/// # Examples
///
/// ```
/// use lgtm_client::identity::{IdProvider, SequentialIds};
///
/// let ids = SequentialIds::new("session");
/// assert_eq!(ids.next_id(), "session-1");
/// assert_eq!(ids.next_id(), "session-2");
/// ```
#[derive(Debug)]
pub struct SequentialIds {
    prefix: String,
    counter: AtomicU64,
}

impl SequentialIds {
    /// Start a sequence with `prefix`
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(0),
        }
    }
}

impl IdProvider for SequentialIds {
    fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}-{}", self.prefix, n)
    }
}

/// Always the same identifier
#[derive(Debug, Clone)]
pub struct FixedId(pub String);

impl IdProvider for FixedId {
    fn next_id(&self) -> String {
        self.0.clone()
    }
}
