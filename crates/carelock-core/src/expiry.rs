//! Expiry predicate shared by every grant kind.
//!
//! Expiry is never enforced by deleting data: an expired grant simply stops
//! counting. The background sweeper only tidies storage.

/// Milliseconds in one day.
pub const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Whether a grant with the given lifetime fields counts at `now`.
///
/// A grant is active until and including its `expires_at` instant, and never
/// again once it has been superseded.
pub fn is_active(expires_at: Option<i64>, superseded_at: Option<i64>, now: i64) -> bool {
    if superseded_at.is_some() {
        return false;
    }
    match expires_at {
        Some(expires) => now <= expires,
        None => true,
    }
}

/// Anything with an optional expiry that the sweeper can retire.
pub trait Expiring {
    /// When the grant stops counting (Unix ms), if ever.
    fn expires_at(&self) -> Option<i64>;

    /// When the sweeper marked the grant superseded, if it has.
    fn superseded_at(&self) -> Option<i64>;

    /// Whether the grant counts at `now`.
    fn is_active(&self, now: i64) -> bool {
        is_active(self.expires_at(), self.superseded_at(), now)
    }

    /// Whether the grant expired more than `grace_ms` ago and is not yet superseded.
    fn is_long_expired(&self, now: i64, grace_ms: i64) -> bool {
        self.superseded_at().is_none()
            && self
                .expires_at()
                .is_some_and(|expires| now.saturating_sub(expires) > grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_active_until_expiry_inclusive() {
        assert!(is_active(Some(1000), None, 500));
        assert!(is_active(Some(1000), None, 1000));
        assert!(!is_active(Some(1000), None, 1001));
    }

    #[test]
    fn test_no_expiry_is_always_active() {
        assert!(is_active(None, None, i64::MAX));
    }

    #[test]
    fn test_superseded_is_never_active() {
        assert!(!is_active(None, Some(10), 0));
    }

    proptest! {
        #[test]
        fn expiry_is_monotonic(expires in any::<i64>(), now in any::<i64>(), later in 0i64..DAY_MS) {
            let active = is_active(Some(expires), None, now);
            prop_assert_eq!(active, now <= expires);
            if !active {
                prop_assert!(!is_active(Some(expires), None, now.saturating_add(later)));
            }
        }
    }
}
