//! # Change Stamps
//!
//! Opaque version tokens attached to every piece of host data. A consumer
//! remembers the stamp it last synchronized against and compares for
//! inequality on the next step; the content is never diffed.
//!
//! Stamps are issued from a single process-wide counter, so two different
//! pieces of data never share a fresh stamp and a bumped value is always
//! distinct from every value observed before it.

use std::sync::atomic::{AtomicI64, Ordering};

use serde::{Deserialize, Serialize};

static NEXT_STAMP: AtomicI64 = AtomicI64::new(1);

/// Comparable, monotonically advancing version token
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChangeStamp(i64);

impl ChangeStamp {
    /// Never observed; differs from every stamp the counter hands out
    pub const UNSEEN: ChangeStamp = ChangeStamp(-1);

    /// Returned by stamp lookups on keys that do not exist
    pub const ABSENT: ChangeStamp = ChangeStamp(-2);

    /// Take a fresh stamp from the process-wide counter
    pub fn next() -> Self {
        Self(NEXT_STAMP.fetch_add(1, Ordering::Relaxed))
    }

    /// Wrap a raw stamp value supplied by a collaborator
    pub const fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    /// Raw value, for logging
    pub const fn raw(self) -> i64 {
        self.0
    }

    /// True for the two sentinels
    pub fn is_sentinel(self) -> bool {
        self == Self::UNSEEN || self == Self::ABSENT
    }
}

impl Default for ChangeStamp {
    fn default() -> Self {
        Self::UNSEEN
    }
}

impl std::fmt::Display for ChangeStamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_is_monotonic_and_unique() {
        let a = ChangeStamp::next();
        let b = ChangeStamp::next();
        assert!(b > a);
        assert_ne!(a, b);
        assert!(!a.is_sentinel());
    }

    #[test]
    fn test_sentinels_never_issued() {
        for _ in 0..100 {
            let s = ChangeStamp::next();
            assert_ne!(s, ChangeStamp::UNSEEN);
            assert_ne!(s, ChangeStamp::ABSENT);
        }
        assert_eq!(ChangeStamp::default(), ChangeStamp::UNSEEN);
    }
}
