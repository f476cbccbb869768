use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// How a simulation decides it is finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCondition {
    /// Wall-clock bounded.
    Duration(Duration),
    /// Dispatched-request bounded.
    Requests(u64),
    /// Neither bound given: every user walks its scenario exactly once.
    FixedUsers,
}

/// Shared stopping condition consulted by every user loop at walk boundaries.
///
/// The start instant is armed once by the coordinator; until then elapsed
/// time reads as zero, so a gate is always open before the run begins.
#[derive(Debug)]
pub struct RunGate {
    condition: StopCondition,
    started: OnceLock<Instant>,
}

impl RunGate {
    /// Duration wins over a request cap when both are configured.
    pub fn choose(duration: Option<Duration>, requests: Option<u64>) -> Self {
        let condition = match (duration, requests) {
            (Some(d), _) => StopCondition::Duration(d),
            (None, Some(n)) => StopCondition::Requests(n),
            (None, None) => StopCondition::FixedUsers,
        };

        Self {
            condition,
            started: OnceLock::new(),
        }
    }

    pub fn start_at(&self, started: Instant) {
        let _ = self.started.set(started);
    }

    pub fn condition(&self) -> StopCondition {
        self.condition
    }

    fn elapsed(&self) -> Duration {
        self.started
            .get()
            .map(Instant::elapsed)
            .unwrap_or(Duration::ZERO)
    }

    /// Whether another walk may start, given the dispatched-request count.
    pub fn keep_going(&self, sent: u64) -> bool {
        match self.condition {
            StopCondition::Duration(limit) => self.elapsed() < limit,
            StopCondition::Requests(limit) => sent < limit,
            StopCondition::FixedUsers => true,
        }
    }

    /// Fraction of the budget consumed, clamped to [0, 1]. Fixed-user runs
    /// have no meaningful budget and report 0.
    pub fn progress(&self, sent: u64) -> f64 {
        match self.condition {
            StopCondition::Duration(limit) => {
                if limit.is_zero() {
                    return 1.0;
                }
                (self.elapsed().as_secs_f64() / limit.as_secs_f64()).clamp(0.0, 1.0)
            }
            StopCondition::Requests(limit) => {
                if limit == 0 {
                    return 1.0;
                }
                (sent as f64 / limit as f64).clamp(0.0, 1.0)
            }
            StopCondition::FixedUsers => 0.0,
        }
    }

    /// True when each user loop should stop after a single walk.
    pub fn runs_once(&self) -> bool {
        matches!(self.condition, StopCondition::FixedUsers)
    }

    pub fn info(&self) -> String {
        match self.condition {
            StopCondition::Duration(limit) => format!("duration {limit:?}"),
            StopCondition::Requests(limit) => format!("{limit} requests"),
            StopCondition::FixedUsers => "each user once".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_takes_precedence_over_requests() {
        let gate = RunGate::choose(Some(Duration::from_secs(5)), Some(10));

        assert_eq!(gate.condition(), StopCondition::Duration(Duration::from_secs(5)));
    }

    #[test]
    fn request_gate_closes_at_the_cap() {
        let gate = RunGate::choose(None, Some(3));
        gate.start_at(Instant::now());

        assert!(gate.keep_going(0));
        assert!(gate.keep_going(2));
        assert!(!gate.keep_going(3));
        assert!(!gate.keep_going(7));
    }

    #[test]
    fn duration_gate_closes_after_the_deadline() {
        let gate = RunGate::choose(Some(Duration::from_millis(10)), None);
        gate.start_at(Instant::now() - Duration::from_millis(20));

        assert!(!gate.keep_going(0));
        assert_eq!(gate.progress(0), 1.0);
    }

    #[test]
    fn unarmed_duration_gate_is_open() {
        let gate = RunGate::choose(Some(Duration::from_millis(1)), None);

        assert!(gate.keep_going(u64::MAX));
        assert_eq!(gate.progress(0), 0.0);
    }

    #[test]
    fn request_progress_is_clamped() {
        let gate = RunGate::choose(None, Some(4));

        assert_eq!(gate.progress(2), 0.5);
        assert_eq!(gate.progress(9), 1.0);
    }

    #[test]
    fn fixed_user_gate_never_closes_on_its_own() {
        let gate = RunGate::choose(None, None);

        assert!(gate.keep_going(u64::MAX));
        assert!(gate.runs_once());
        assert_eq!(gate.progress(100), 0.0);
    }
}
