//! Lease aggregation.
//!
//! A refresh cycle yields one token lease and one lease per secret. The next
//! cycle must start before the shortest of them runs out, so the loader
//! refreshes at three quarters of the minimum.

use std::time::Duration;

/// Fraction of the shortest lease after which the loader refreshes.
pub const REFRESH_RATIO: f64 = 0.75;

/// Where a lease comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseSource {
    /// The auth token
    Token,
    /// A fetched secret
    Secret,
}

/// A lease duration tagged with its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    /// Remaining validity
    pub duration: Duration,
    /// Origin of the lease
    pub source: LeaseSource,
}

impl Lease {
    /// Token lease.
    #[must_use]
    pub const fn token(duration: Duration) -> Self {
        Self {
            duration,
            source: LeaseSource::Token,
        }
    }

    /// Secret lease.
    #[must_use]
    pub const fn secret(duration: Duration) -> Self {
        Self {
            duration,
            source: LeaseSource::Secret,
        }
    }
}

/// Refresh interval for a token lease and the shortest secret lease.
///
/// A zero lease governs: it yields a zero interval, so the next cycle runs
/// immediately instead of renewal being skipped.
#[must_use]
pub fn refresh_interval(token_lease: Duration, min_secret_lease: Duration) -> Duration {
    scale(token_lease.min(min_secret_lease))
}

/// Refresh interval across any mix of leases; `None` without leases.
#[must_use]
pub fn aggregate(leases: &[Lease]) -> Option<Duration> {
    min_lease(leases.iter().map(|lease| lease.duration)).map(scale)
}

/// Shortest of `leases`.
pub fn min_lease(leases: impl IntoIterator<Item = Duration>) -> Option<Duration> {
    leases.into_iter().min()
}

// 3/4 in integer nanoseconds; exact where the f64 product would round.
fn scale(lease: Duration) -> Duration {
    let nanos = lease.as_nanos() * 3 / 4;
    let secs = u64::try_from(nanos / 1_000_000_000).unwrap_or(u64::MAX);
    #[allow(clippy::cast_possible_truncation)]
    let subsec = (nanos % 1_000_000_000) as u32;
    Duration::new(secs, subsec)
}
