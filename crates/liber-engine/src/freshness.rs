//! Freshness policy: when does a user need new recommendations?

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use liber_core::defaults::FRESHNESS_WINDOW_HOURS;

/// Decides whether a user's most recent recommendation set is recent enough
/// to skip regeneration. Used by both the single-user and batch paths.
#[derive(Debug, Clone, Copy)]
pub struct FreshnessPolicy {
    window: Duration,
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self {
            window: Duration::hours(FRESHNESS_WINDOW_HOURS),
        }
    }
}

impl FreshnessPolicy {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    /// Whether a new set should be generated.
    ///
    /// `force` always wins. A user with no prior set is always stale.
    /// Otherwise stale iff strictly more than the window has elapsed since
    /// the latest set was created: exactly the boundary is still fresh.
    pub fn needs_generation(
        &self,
        latest: Option<DateTime<Utc>>,
        force: bool,
        now: DateTime<Utc>,
    ) -> bool {
        if force {
            return true;
        }
        let stale = match latest {
            None => true,
            Some(created_at) => now - created_at > self.window,
        };
        debug!(stale, ?latest, "Freshness check");
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_force_always_regenerates() {
        let policy = FreshnessPolicy::default();
        let now = Utc::now();
        assert!(policy.needs_generation(Some(now), true, now));
        assert!(policy.needs_generation(None, true, now));
    }

    #[test]
    fn test_no_prior_set_is_stale() {
        let policy = FreshnessPolicy::default();
        assert!(policy.needs_generation(None, false, Utc::now()));
    }

    #[test]
    fn test_boundary_exactly_24h_is_fresh() {
        let policy = FreshnessPolicy::default();
        let now = Utc::now();
        let created = now - Duration::hours(24);
        assert!(!policy.needs_generation(Some(created), false, now));
    }

    #[test]
    fn test_23h59m_is_fresh() {
        let policy = FreshnessPolicy::default();
        let now = Utc::now();
        let created = now - (Duration::hours(23) + Duration::minutes(59));
        assert!(!policy.needs_generation(Some(created), false, now));
    }

    #[test]
    fn test_24h00m01s_is_stale() {
        let policy = FreshnessPolicy::default();
        let now = Utc::now();
        let created = now - (Duration::hours(24) + Duration::seconds(1));
        assert!(policy.needs_generation(Some(created), false, now));
    }

    #[test]
    fn test_custom_window() {
        let policy = FreshnessPolicy::new(Duration::hours(1));
        let now = Utc::now();
        assert!(!policy.needs_generation(Some(now - Duration::minutes(59)), false, now));
        assert!(policy.needs_generation(Some(now - Duration::minutes(61)), false, now));
    }
}
