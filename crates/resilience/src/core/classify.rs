//! Failure categories used to decide what a breaker counts and what a retry
//! policy retries

use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Category of a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The call did not finish in time
    Timeout,
    /// Transport-level failure (refused, reset, broken pipe)
    Connection,
    /// The dependency reported itself unavailable
    Unavailable,
    /// The dependency asked us to slow down
    Throttled,
    /// The dependency failed while handling the request
    Server,
    /// The caller gave up on the call
    Cancelled,
    /// The request itself was wrong; repeating it will not help
    Invalid,
    /// Logic error on our side
    Internal,
}

impl FailureKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 8] = [
        Self::Timeout,
        Self::Connection,
        Self::Unavailable,
        Self::Throttled,
        Self::Server,
        Self::Cancelled,
        Self::Invalid,
        Self::Internal,
    ];

    /// Stable lowercase name, used for metric labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Connection => "connection",
            Self::Unavailable => "unavailable",
            Self::Throttled => "throttled",
            Self::Server => "server",
            Self::Cancelled => "cancelled",
            Self::Invalid => "invalid",
            Self::Internal => "internal",
        }
    }

    /// Whether this kind is usually a transient blip.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Connection | Self::Unavailable | Self::Throttled | Self::Server
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can tell which [`FailureKind`] they belong to.
///
/// Implement this for the error type of every unit of work protected by a
/// breaker or a retry policy.
pub trait Classify {
    /// Category of this failure.
    fn failure_kind(&self) -> FailureKind;
}

impl Classify for io::Error {
    fn failure_kind(&self) -> FailureKind {
        match self.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => FailureKind::Timeout,
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => FailureKind::Connection,
            io::ErrorKind::AddrNotAvailable | io::ErrorKind::AddrInUse => {
                FailureKind::Unavailable
            }
            io::ErrorKind::Interrupted => FailureKind::Cancelled,
            io::ErrorKind::InvalidInput
            | io::ErrorKind::InvalidData
            | io::ErrorKind::NotFound
            | io::ErrorKind::PermissionDenied
            | io::ErrorKind::AlreadyExists
            | io::ErrorKind::Unsupported => FailureKind::Invalid,
            _ => FailureKind::Internal,
        }
    }
}

impl<T: Classify + ?Sized> Classify for &T {
    fn failure_kind(&self) -> FailureKind {
        (**self).failure_kind()
    }
}

impl<T: Classify + ?Sized> Classify for Box<T> {
    fn failure_kind(&self) -> FailureKind {
        (**self).failure_kind()
    }
}

/// Set of failure kinds a component reacts to.
///
/// Failures outside the set are treated as programmer errors: breakers do
/// not count them and retry policies do not retry them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExpectedFailures {
    kinds: SmallVec<[FailureKind; 8]>,
}

impl ExpectedFailures {
    /// Empty set.
    #[must_use]
    pub fn none() -> Self {
        Self {
            kinds: SmallVec::new(),
        }
    }

    /// Every kind, including `Invalid` and `Internal`.
    #[must_use]
    pub fn all() -> Self {
        Self::from_kinds(FailureKind::ALL)
    }

    /// Transient kinds only (the default).
    #[must_use]
    pub fn transient() -> Self {
        Self::from_kinds(FailureKind::ALL.into_iter().filter(|k| k.is_transient()))
    }

    /// Build from an iterator, dropping duplicates.
    pub fn from_kinds(kinds: impl IntoIterator<Item = FailureKind>) -> Self {
        let mut set = Self::none();
        for kind in kinds {
            set.insert(kind);
        }
        set
    }

    /// Add a kind.
    #[must_use]
    pub fn with(mut self, kind: FailureKind) -> Self {
        self.insert(kind);
        self
    }

    /// Remove a kind.
    #[must_use]
    pub fn without(mut self, kind: FailureKind) -> Self {
        self.kinds.retain(|k| *k != kind);
        self
    }

    fn insert(&mut self, kind: FailureKind) {
        if !self.kinds.contains(&kind) {
            self.kinds.push(kind);
        }
    }

    /// Whether `kind` is in the set.
    #[must_use]
    pub fn contains(&self, kind: FailureKind) -> bool {
        self.kinds.contains(&kind)
    }

    /// Whether `error` falls in the set.
    pub fn matches<E: Classify + ?Sized>(&self, error: &E) -> bool {
        self.contains(error.failure_kind())
    }

    /// Iterate the kinds.
    pub fn iter(&self) -> impl Iterator<Item = FailureKind> + '_ {
        self.kinds.iter().copied()
    }

    /// Number of kinds in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

impl Default for ExpectedFailures {
    fn default() -> Self {
        Self::transient()
    }
}

impl FromIterator<FailureKind> for ExpectedFailures {
    fn from_iter<I: IntoIterator<Item = FailureKind>>(iter: I) -> Self {
        Self::from_kinds(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_set_is_transient_kinds() {
        let set = ExpectedFailures::default();
        assert!(set.contains(FailureKind::Timeout));
        assert!(set.contains(FailureKind::Server));
        assert!(!set.contains(FailureKind::Cancelled));
        assert!(!set.contains(FailureKind::Invalid));
        assert!(!set.contains(FailureKind::Internal));
        assert_eq!(set.len(), 5);
    }

    #[test]
    fn test_with_and_without_do_not_duplicate() {
        let set = ExpectedFailures::none()
            .with(FailureKind::Timeout)
            .with(FailureKind::Timeout)
            .with(FailureKind::Cancelled)
            .without(FailureKind::Timeout);

        assert_eq!(set.iter().collect::<Vec<_>>(), vec![FailureKind::Cancelled]);
    }

    #[test]
    fn test_io_errors_are_classified() {
        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        let timed_out = io::Error::from(io::ErrorKind::TimedOut);
        let missing = io::Error::from(io::ErrorKind::NotFound);

        assert_eq!(refused.failure_kind(), FailureKind::Connection);
        assert_eq!(timed_out.failure_kind(), FailureKind::Timeout);
        assert_eq!(missing.failure_kind(), FailureKind::Invalid);
        assert!(ExpectedFailures::default().matches(&refused));
        assert!(!ExpectedFailures::default().matches(&missing));
    }

    #[test]
    fn test_set_deserializes_from_kind_names() {
        let set: ExpectedFailures = serde_json::from_str(r#"["timeout","throttled"]"#).unwrap();
        assert!(set.contains(FailureKind::Throttled));
        assert_eq!(set.len(), 2);
    }
}
