use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Delays before each retry: one initial attempt, then up to three more.
pub const DEFAULT_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(3),
    Duration::from_secs(5),
];

/// Errors that can say whether another attempt might succeed.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

/// Fixed-schedule bounded retry shared by the database backend and the
/// agent's senders.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delays: DEFAULT_DELAYS.to_vec(),
        }
    }
}

impl RetryPolicy {
    /// Same number of retries, no waiting. Used by tests.
    pub fn immediate() -> Self {
        Self {
            delays: vec![Duration::ZERO; DEFAULT_DELAYS.len()],
        }
    }

    /// Run `op`, retrying transient failures on the fixed schedule.
    ///
    /// Non-transient errors and the error of the last attempt are
    /// returned as is.
    pub async fn run<T, E, F, Fut>(&self, what: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Transient + std::fmt::Display,
    {
        let mut delays = self.delays.iter();
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() => match delays.next() {
                    Some(delay) => {
                        warn!(op = what, error = %e, retry_in = ?delay, "transient failure, retrying");
                        if !delay.is_zero() {
                            tokio::time::sleep(*delay).await;
                        }
                    }
                    None => return Err(e),
                },
                Err(e) => return Err(e),
            }
        }
    }
}
