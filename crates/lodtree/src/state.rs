//! Per-(node, layer) update state machine.
//!
//! ```text
//! Idle --new_try--> Pending --success--> Idle
//!                           --no_more_update_possible--> Finished
//!                           --failure(definitive = false)--> Error --(delay)--> Pending
//!                           --failure(definitive = true)--> DefinitiveError
//! Idle/Pending --no_data--> Idle
//! ```
//!
//! `Finished` and `DefinitiveError` are terminal.

use std::sync::Arc;
use std::time::Duration;

use web_time::Instant;

/// Default delays between retries, indexed by error count.
pub const DEFAULT_BACKOFF_SECS: [f64; 4] = [1.0, 3.0, 7.0, 60.0];

/// Ascending table of retry delays.
///
/// The `n`th consecutive error waits `tiers[min(n, len) - 1]`; errors past
/// the end of the table reuse the last tier.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    tiers: Vec<Duration>,
}

impl Backoff {
    /// Create a table from delays in seconds. Negative and non-finite
    /// values are dropped and the rest sorted ascending.
    #[must_use]
    pub fn from_secs(secs: &[f64]) -> Self {
        let mut tiers: Vec<Duration> = secs
            .iter()
            .filter(|s| s.is_finite() && **s >= 0.0)
            .map(|&s| Duration::from_secs_f64(s))
            .collect();
        tiers.sort();
        Self { tiers }
    }

    /// Delay to wait after `error_count` consecutive errors.
    #[must_use]
    pub fn delay(&self, error_count: u32) -> Duration {
        let index = (error_count as usize).min(self.tiers.len()).saturating_sub(1);
        self.tiers.get(index).copied().unwrap_or_default()
    }

    #[must_use]
    pub fn tiers(&self) -> &[Duration] {
        &self.tiers
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from_secs(&DEFAULT_BACKOFF_SECS)
    }
}

/// Phase of an [`UpdateState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Pending,
    Error,
    DefinitiveError,
    Finished,
}

/// Tracks fetches and failures of one layer on one node.
#[derive(Debug, Clone)]
pub struct UpdateState {
    phase: Phase,
    error_count: u32,
    last_error: Option<Instant>,
    lowest_level_error: Option<i32>,
    backoff: Arc<Backoff>,
}

impl Default for UpdateState {
    fn default() -> Self {
        Self::new(Arc::new(Backoff::default()))
    }
}

impl UpdateState {
    #[must_use]
    pub fn new(backoff: Arc<Backoff>) -> Self {
        Self {
            phase: Phase::Idle,
            error_count: 0,
            last_error: None,
            lowest_level_error: None,
            backoff,
        }
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    /// Lowest level known to fail, `None` standing for +infinity.
    #[must_use]
    pub fn lowest_level_error(&self) -> Option<i32> {
        self.lowest_level_error
    }

    /// Whether a new fetch may be issued at `now`.
    #[must_use]
    pub fn can_try_update(&self, now: Instant) -> bool {
        match self.phase {
            Phase::Idle => true,
            Phase::Error => {
                let elapsed = self
                    .last_error
                    .map_or(Duration::MAX, |at| now.saturating_duration_since(at));
                elapsed >= self.backoff.delay(self.error_count)
            }
            Phase::Pending | Phase::DefinitiveError | Phase::Finished => false,
        }
    }

    /// Seconds the current error phase waits before retrying; zero outside
    /// of [`Phase::Error`].
    #[must_use]
    pub fn seconds_until_next_try(&self) -> f64 {
        if self.phase == Phase::Error {
            self.backoff.delay(self.error_count).as_secs_f64()
        } else {
            0.0
        }
    }

    /// Mark a fetch as issued. Returns `false`, changing nothing, unless
    /// [`can_try_update`](Self::can_try_update) allows it.
    pub fn new_try(&mut self, now: Instant) -> bool {
        if !self.can_try_update(now) {
            return false;
        }
        self.phase = Phase::Pending;
        true
    }

    /// The pending fetch succeeded.
    ///
    /// The lowest failing level is kept: a level that failed once is never
    /// asked for again on this node.
    pub fn success(&mut self) -> bool {
        if self.phase != Phase::Pending {
            return false;
        }
        self.phase = Phase::Idle;
        self.last_error = None;
        true
    }

    /// The node already holds the best data available; stop updating.
    pub fn no_more_update_possible(&mut self) -> bool {
        if !matches!(self.phase, Phase::Idle | Phase::Pending) {
            return false;
        }
        self.phase = Phase::Finished;
        true
    }

    /// The pending fetch failed.
    ///
    /// A definitive failure is never retried. `target_level` is the level
    /// the fetch asked for, if it asked for one.
    pub fn failure(&mut self, now: Instant, definitive: bool, target_level: Option<i32>) -> bool {
        if self.phase != Phase::Pending {
            return false;
        }
        self.record_level(target_level);
        self.last_error = Some(now);
        self.error_count += 1;
        self.phase = if definitive {
            Phase::DefinitiveError
        } else {
            Phase::Error
        };
        true
    }

    /// The requested level has no data. Retryable at once at another level.
    pub fn no_data(&mut self, target_level: Option<i32>) -> bool {
        if !matches!(self.phase, Phase::Idle | Phase::Pending) {
            return false;
        }
        self.record_level(target_level);
        self.phase = Phase::Idle;
        true
    }

    fn record_level(&mut self, target_level: Option<i32>) {
        if let Some(level) = target_level {
            self.lowest_level_error = Some(self.lowest_level_error.map_or(level, |l| l.min(level)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    #[test]
    fn test_happy_path() {
        let now = Instant::now();
        let mut state = UpdateState::default();
        assert!(state.can_try_update(now));
        assert!(state.new_try(now));
        assert_eq!(state.phase(), Phase::Pending);
        assert!(!state.can_try_update(now));
        assert!(!state.new_try(now));
        assert!(state.success());
        assert_eq!(state.phase(), Phase::Idle);
        assert!(state.can_try_update(now));
    }

    #[test]
    fn test_error_waits_for_backoff() {
        let t0 = Instant::now();
        let mut state = UpdateState::default();
        state.new_try(t0);
        state.failure(t0, false, Some(12));
        assert_eq!(state.phase(), Phase::Error);
        assert_eq!(state.error_count(), 1);
        assert_eq!(state.lowest_level_error(), Some(12));
        assert!(!state.can_try_update(t0 + secs(0.5)));
        assert!(state.can_try_update(t0 + secs(1.0)));

        let t1 = t0 + secs(1.0);
        assert!(state.new_try(t1));
        state.failure(t1, false, Some(14));
        assert_eq!(state.lowest_level_error(), Some(12));
        assert!(!state.can_try_update(t1 + secs(2.9)));
        assert!(state.can_try_update(t1 + secs(3.0)));
    }

    #[test]
    fn test_definitive_error_is_terminal() {
        let now = Instant::now();
        let mut state = UpdateState::default();
        state.new_try(now);
        state.failure(now, true, None);
        assert_eq!(state.phase(), Phase::DefinitiveError);
        assert!(!state.can_try_update(now + secs(3600.0)));
        assert!(!state.no_data(Some(3)));
        assert!(!state.success());
        assert!(!state.no_more_update_possible());
        assert_eq!(state.phase(), Phase::DefinitiveError);
    }

    #[test]
    fn test_finished_is_terminal() {
        let now = Instant::now();
        let mut state = UpdateState::default();
        state.new_try(now);
        assert!(state.no_more_update_possible());
        assert!(!state.can_try_update(now));
        assert!(!state.failure(now, false, Some(1)));
        assert_eq!(state.phase(), Phase::Finished);
    }

    #[test]
    fn test_no_data_is_immediately_retryable() {
        let now = Instant::now();
        let mut state = UpdateState::default();
        state.new_try(now);
        assert!(state.no_data(Some(9)));
        assert_eq!(state.phase(), Phase::Idle);
        assert_eq!(state.error_count(), 0);
        assert_eq!(state.lowest_level_error(), Some(9));
        assert!(state.can_try_update(now));
    }

    #[test]
    fn test_success_keeps_lowest_level_error() {
        let t0 = Instant::now();
        let mut state = UpdateState::default();
        state.new_try(t0);
        state.no_data(Some(9));
        state.new_try(t0);
        assert!(state.success());
        assert_eq!(state.lowest_level_error(), Some(9));

        state.new_try(t0);
        state.failure(t0, false, Some(20));
        let t1 = t0 + secs(1.0);
        assert!(state.new_try(t1));
        assert!(state.success());
        assert_eq!(state.lowest_level_error(), Some(9));
        assert_eq!(state.error_count(), 1);
    }

    #[test]
    fn test_seconds_until_next_try_outside_error() {
        let state = UpdateState::default();
        assert_eq!(state.seconds_until_next_try(), 0.0);
    }

    #[test]
    fn test_backoff_table_is_sorted_and_filtered() {
        let backoff = Backoff::from_secs(&[5.0, -1.0, 2.0, f64::NAN]);
        assert_eq!(backoff.tiers(), &[secs(2.0), secs(5.0)]);
        assert_eq!(Backoff::from_secs(&[]).delay(3), Duration::ZERO);
    }

    proptest! {
        #[test]
        fn test_backoff_is_monotonic_then_constant(errors in 1u32..12) {
            let t0 = Instant::now();
            let mut state = UpdateState::default();
            let mut previous = 0.0;
            for n in 1..=errors {
                let at = t0 + secs(f64::from(n) * 100.0);
                prop_assert!(state.new_try(at));
                state.failure(at, false, None);
                let wait = state.seconds_until_next_try();
                prop_assert!(wait >= previous);
                if n as usize >= DEFAULT_BACKOFF_SECS.len() {
                    prop_assert_eq!(wait, 60.0);
                }
                previous = wait;
            }
        }
    }
}
