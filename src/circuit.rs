//! Circuit breaker: trips on sustained cumulative error rate across
//! reconciler invocations (§4.3 step 6).

use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: CircuitState,
    successes: u64,
    failures: u64,
    opened_at: Option<Instant>,
}

/// Tracks cumulative error rate across all invocations and trips when it
/// crosses `ERROR_THRESHOLD`, refusing new work for `CIRCUIT_RESET_MS`
/// before allowing a single half-open probe.
pub struct CircuitBreaker {
    inner: parking_lot::Mutex<Inner>,
    error_threshold: f64,
    reset_after: Duration,
}

impl CircuitBreaker {
    pub fn new(error_threshold: f64, reset_after: Duration) -> Self {
        Self {
            inner: parking_lot::Mutex::new(Inner {
                state: CircuitState::Closed,
                successes: 0,
                failures: 0,
                opened_at: None,
            }),
            error_threshold,
            reset_after,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Returns `true` if an invocation may proceed right now. `OPEN` refuses
    /// until the reset window elapses, at which point exactly the calling
    /// attempt is admitted as the `HALF_OPEN` probe.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.reset_after {
                    inner.state = CircuitState::HalfOpen;
                    tracing::info!("circuit breaker half-open after reset window");
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record the outcome of an admitted invocation and update state.
    pub fn record(&self, had_errors: bool) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                if had_errors {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    tracing::warn!("circuit breaker re-opened after failed half-open probe");
                    metrics::counter!("roster_circuit_transitions_total", "to" => "open").increment(1);
                } else {
                    inner.state = CircuitState::Closed;
                    inner.successes = 0;
                    inner.failures = 0;
                    tracing::info!("circuit breaker closed");
                    metrics::counter!("roster_circuit_transitions_total", "to" => "closed").increment(1);
                }
                return;
            }
            CircuitState::Open => return, // shouldn't happen: allow_request gated this
            CircuitState::Closed => {}
        }

        if had_errors {
            inner.failures += 1;
        } else {
            inner.successes += 1;
        }

        let total = inner.successes + inner.failures;
        if total >= 1 {
            let rate = inner.failures as f64 / total as f64;
            if rate > self.error_threshold {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                tracing::warn!(rate, "circuit breaker tripped open");
                metrics::counter!("roster_circuit_transitions_total", "to" => "open").increment(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stays_closed_under_threshold() {
        let cb = CircuitBreaker::new(0.3, Duration::from_secs(60));
        for _ in 0..7 {
            assert!(cb.allow_request());
            cb.record(false);
        }
        for _ in 0..2 {
            assert!(cb.allow_request());
            cb.record(true);
        }
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn trips_open_above_threshold() {
        let cb = CircuitBreaker::new(0.3, Duration::from_secs(60));
        cb.record(true);
        cb.record(true);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request());
    }

    #[test]
    fn half_open_success_closes_failure_reopens() {
        let cb = CircuitBreaker::new(0.3, Duration::from_millis(0));
        cb.record(true);
        cb.record(true);
        assert_eq!(cb.state(), CircuitState::Open);

        assert!(cb.allow_request()); // reset window elapsed immediately
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record(false);
        assert_eq!(cb.state(), CircuitState::Closed);

        // Trip again, then fail the half-open probe.
        cb.record(true);
        cb.record(true);
        assert!(cb.allow_request());
        cb.record(true);
        assert_eq!(cb.state(), CircuitState::Open);
    }
}
