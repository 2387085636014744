//! # Adaptive Request Pacing
//!
//! Converts a requests-per-minute budget into a minimum spacing between
//! dispatches, raises the budget slowly while requests succeed and cuts it
//! sharply when the service throttles.

use std::time::Duration;

use rand::{Rng, SeedableRng, rngs::StdRng};
use tokio::time::{Instant, sleep};
use tracing::{debug, info};

/// Consecutive successes between budget raises
const RAISE_EVERY: u32 = 8;

/// Base of the exponential backoff
const BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Cap of the exponential backoff before jitter
const BACKOFF_CAP: Duration = Duration::from_secs(6);

/// Pacing state for one ingestion run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateState {
    pub current_rpm: u32,
    pub min_rpm: u32,
    pub max_rpm: u32,
    /// Time of the most recent dispatch
    pub last_request_time: Option<Instant>,
    pub success_streak: u32,
    pub fail_streak: u32,
}

/// Paces requests against a budget that adapts to the service's feedback.
///
/// `current_rpm` never leaves `[min_rpm, max_rpm]`.
#[derive(Debug)]
pub struct RateController {
    state: RateState,
    rng: StdRng,
}

impl RateController {
    /// Create a controller. Bounds are repaired so that
    /// `1 <= min_rpm <= initial <= max_rpm` holds.
    pub fn new(initial_rpm: u32, min_rpm: u32, max_rpm: u32, seed: u64) -> Self {
        let min_rpm = min_rpm.max(1);
        let max_rpm = max_rpm.max(min_rpm);
        Self {
            state: RateState {
                current_rpm: initial_rpm.clamp(min_rpm, max_rpm),
                min_rpm,
                max_rpm,
                last_request_time: None,
                success_streak: 0,
                fail_streak: 0,
            },
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn state(&self) -> &RateState {
        &self.state
    }

    pub fn current_rpm(&self) -> u32 {
        self.state.current_rpm
    }

    /// Minimum spacing between dispatches at the current budget
    pub fn interval(&self) -> Duration {
        Duration::from_secs(60) / self.state.current_rpm
    }

    /// Time left before the next dispatch is allowed; zero before the first
    pub fn next_delay(&self) -> Duration {
        match self.state.last_request_time {
            Some(last) => (last + self.interval()).saturating_duration_since(Instant::now()),
            None => Duration::ZERO,
        }
    }

    /// Record that a request is being sent now
    pub fn mark_dispatched(&mut self) {
        self.state.last_request_time = Some(Instant::now());
    }

    /// Sleep until the spacing allows a request, then record the dispatch
    pub async fn wait_turn(&mut self) {
        let delay = self.next_delay();
        if !delay.is_zero() {
            debug!(?delay, rpm = self.state.current_rpm, "Pacing request");
            sleep(delay).await;
        }
        self.mark_dispatched();
    }

    pub fn on_success(&mut self) {
        self.state.success_streak += 1;
        self.state.fail_streak = 0;

        if self.state.success_streak % RAISE_EVERY == 0 {
            let current = self.state.current_rpm;
            let raised = (current as u64 * 11 / 10).max(current as u64 + 1);
            let raised = raised.min(self.state.max_rpm as u64) as u32;
            if raised != current {
                info!(from = current, to = raised, "Raising request rate");
                self.state.current_rpm = raised;
            }
        }
    }

    /// Record a failed request and return how long to back off.
    ///
    /// A throttle cuts the budget to 60%. A server hint is used as-is;
    /// otherwise the backoff is exponential in the failure streak.
    pub fn on_failure(&mut self, throttled: bool, server_hint: Option<Duration>) -> Duration {
        self.state.success_streak = 0;
        self.state.fail_streak += 1;

        if throttled {
            let current = self.state.current_rpm;
            let lowered = ((current as u64 * 6 / 10) as u32).max(self.state.min_rpm);
            if lowered != current {
                info!(from = current, to = lowered, "Throttled, lowering request rate");
                self.state.current_rpm = lowered;
            }
        }

        match server_hint {
            Some(hint) => hint,
            None => {
                let exponent = self.state.fail_streak.saturating_sub(1).min(16);
                let base = BACKOFF_BASE.saturating_mul(1 << exponent).min(BACKOFF_CAP);
                base.mul_f64(self.rng.gen_range(0.9..=1.1))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_are_repaired() {
        let controller = RateController::new(1000, 0, 500, 1);
        assert_eq!(controller.state().min_rpm, 1);
        assert_eq!(controller.current_rpm(), 500);

        let controller = RateController::new(10, 50, 20, 1);
        assert_eq!(controller.state().max_rpm, 50);
        assert_eq!(controller.current_rpm(), 50);
    }

    #[test]
    fn test_raise_after_eight_successes() {
        let mut controller = RateController::new(200, 50, 500, 1);
        for _ in 0..7 {
            controller.on_success();
        }
        assert_eq!(controller.current_rpm(), 200);
        controller.on_success();
        assert_eq!(controller.current_rpm(), 220);
    }

    #[test]
    fn test_throttle_cuts_to_sixty_percent() {
        let mut controller = RateController::new(600, 60, 1000, 1);
        let backoff = controller.on_failure(true, Some(Duration::from_secs(2)));

        assert_eq!(backoff, Duration::from_secs(2));
        assert_eq!(controller.current_rpm(), 360);
        assert_eq!(controller.state().fail_streak, 1);
        assert_eq!(controller.state().success_streak, 0);
    }

    #[test]
    fn test_rate_never_leaves_bounds() {
        let mut controller = RateController::new(200, 50, 500, 7);
        for _ in 0..20 {
            controller.on_failure(true, None);
            let rpm = controller.current_rpm();
            assert!((50..=500).contains(&rpm));
        }
        assert_eq!(controller.current_rpm(), 50);

        for _ in 0..400 {
            controller.on_success();
            let rpm = controller.current_rpm();
            assert!((50..=500).contains(&rpm));
        }
        assert_eq!(controller.current_rpm(), 500);
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let mut controller = RateController::new(200, 50, 500, 3);
        let expected = [0.5, 1.0, 2.0, 4.0, 6.0, 6.0];
        for base in expected {
            let backoff = controller.on_failure(false, None).as_secs_f64();
            assert!(
                backoff >= base * 0.9 - 1e-9 && backoff <= base * 1.1 + 1e-9,
                "backoff {} outside jitter of {}",
                backoff,
                base
            );
        }
        assert_eq!(controller.current_rpm(), 200);
    }

    #[test]
    fn test_success_resets_fail_streak() {
        let mut controller = RateController::new(200, 50, 500, 3);
        controller.on_failure(false, None);
        controller.on_failure(false, None);
        controller.on_success();
        assert_eq!(controller.state().fail_streak, 0);

        let backoff = controller.on_failure(false, None).as_secs_f64();
        assert!(backoff <= 0.55 + 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spacing_between_dispatches() {
        let mut controller = RateController::new(120, 50, 500, 1);
        assert_eq!(controller.next_delay(), Duration::ZERO);

        let start = Instant::now();
        controller.wait_turn().await;
        controller.wait_turn().await;

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(500));
        assert!(elapsed < Duration::from_millis(600));
        assert_eq!(controller.next_delay(), Duration::from_millis(500));
    }
}
