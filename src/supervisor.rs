use std::thread;
use std::time::Duration;

use tracing::{error, info, warn};

/// How many times the entry point is re-run after failing, and how long to
/// wait in between. The default restarts forever, immediately.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestartPolicy {
    pub max_restarts: Option<u32>,
    pub backoff_ms: u64,
}

impl RestartPolicy {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn limited(max_restarts: u32) -> Self {
        RestartPolicy {
            max_restarts: Some(max_restarts),
            backoff_ms: 0,
        }
    }

    pub fn with_backoff_ms(mut self, backoff_ms: u64) -> Self {
        self.backoff_ms = backoff_ms;
        self
    }

    fn allows(&self, restarts_done: u32) -> bool {
        self.max_restarts.is_none_or(|max| restarts_done < max)
    }
}

/// Run `entry` again from the top every time it fails.
///
/// `entry` receives the attempt number, starting at 0. Whatever it
/// initialized is dropped with its error, so each attempt starts clean.
/// Returns the first success, or the last error once the restart budget is
/// used up. An entry returning `Result<Infallible, _>` never succeeds.
pub fn supervise<T, E, F>(policy: RestartPolicy, mut entry: F) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut(u32) -> Result<T, E>,
{
    let mut attempt: u32 = 0;
    loop {
        if attempt > 0 {
            info!("Restarting (attempt {})", attempt);
        }
        let err = match entry(attempt) {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        error!("Attempt {} failed: {}", attempt, err);

        if !policy.allows(attempt) {
            warn!("Restart budget exhausted after {} restarts", attempt);
            return Err(err);
        }
        if policy.backoff_ms > 0 {
            thread::sleep(Duration::from_millis(policy.backoff_ms));
        }
        attempt = attempt.saturating_add(1);
    }
}
