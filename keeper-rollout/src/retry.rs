//! Retry planning for distribution-tool installs.
//!
//! [`RetryPolicy::plan`] is a pure function of the attempt number and the
//! attempt's outcome; the caller owns process spawning and sleeping.

use std::time::Duration;

/// Classified result of one install attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    Success,
    /// The tool reported a locked or busy manifest.
    Busy,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    Done,
    /// Sleep `delay`, run the remedial step first when `remedy` is set, then
    /// try again.
    Retry { delay: Duration, remedy: bool },
    GiveUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// What to do after `attempt` (1-based) ended with `outcome`.
    ///
    /// Delay grows linearly: `base_delay * attempt`. The remedial step is
    /// offered for a busy manifest only, and only once per install.
    pub fn plan(&self, attempt: u32, outcome: InstallOutcome, remedy_used: bool) -> NextStep {
        match outcome {
            InstallOutcome::Success => NextStep::Done,
            _ if attempt >= self.max_attempts => NextStep::GiveUp,
            InstallOutcome::Busy => NextStep::Retry {
                delay: self.base_delay * attempt,
                remedy: !remedy_used,
            },
            InstallOutcome::Failed => NextStep::Retry {
                delay: self.base_delay * attempt,
                remedy: false,
            },
        }
    }
}

/// Blocking sleep, replaceable in tests.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_secs(10))
    }

    #[rstest]
    #[case(1, InstallOutcome::Failed, false, NextStep::Retry { delay: Duration::from_secs(10), remedy: false })]
    #[case(2, InstallOutcome::Failed, false, NextStep::Retry { delay: Duration::from_secs(20), remedy: false })]
    #[case(3, InstallOutcome::Failed, false, NextStep::GiveUp)]
    #[case(1, InstallOutcome::Busy, false, NextStep::Retry { delay: Duration::from_secs(10), remedy: true })]
    #[case(2, InstallOutcome::Busy, true, NextStep::Retry { delay: Duration::from_secs(20), remedy: false })]
    #[case(3, InstallOutcome::Busy, false, NextStep::GiveUp)]
    #[case(3, InstallOutcome::Success, true, NextStep::Done)]
    fn plan_table(
        #[case] attempt: u32,
        #[case] outcome: InstallOutcome,
        #[case] remedy_used: bool,
        #[case] expected: NextStep,
    ) {
        assert_eq!(policy().plan(attempt, outcome, remedy_used), expected);
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        let policy = RetryPolicy::new(0, Duration::from_secs(1));
        assert_eq!(policy.plan(1, InstallOutcome::Failed, false), NextStep::GiveUp);
    }
}
