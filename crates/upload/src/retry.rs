use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::error::UploadError;

/// Retry budgets, backoffs and the status codes that drive them.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts per part, including the first.
    pub part_attempts: u32,
    /// Attempts for the completion call.
    pub complete_attempts: u32,
    /// Attempts for deleting an abandoned session.
    pub abort_attempts: u32,
    /// Attempts for a buffered single-shot put.
    pub put_attempts: u32,
    /// Fixed delay before retrying a failed call.
    pub backoff: Duration,
    /// Bounds of the random delay after a rate-limit response.
    pub throttle_min: Duration,
    pub throttle_max: Duration,
    /// Status that means "slow down"; retried without spending budget.
    pub rate_limit_status: u16,
    /// Status the service uses for a body checksum mismatch.
    pub checksum_status: u16,
    /// Completion statuses meaning the object is already assembled.
    pub completion_done_statuses: Vec<u16>,
    /// Completion statuses outside 4xx that must not be retried.
    pub completion_terminal_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            part_attempts: 5,
            complete_attempts: 5,
            abort_attempts: 10,
            put_attempts: 3,
            backoff: Duration::from_secs(3),
            throttle_min: Duration::from_secs(1),
            throttle_max: Duration::from_secs(9),
            rate_limit_status: 509,
            checksum_status: 406,
            completion_done_statuses: vec![612, 614],
            completion_terminal_statuses: vec![579],
        }
    }
}

/// What to do after a failed part attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartVerdict {
    /// Rate limited: wait a random while, keep the budget.
    Throttled,
    /// Retry against the budget.
    Retry,
    /// Give up on this part.
    Fail,
    /// Cancelled; stop without side effects.
    Cancelled,
}

/// What to do after a failed completion attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompleteVerdict {
    AlreadyDone,
    Retry,
    Fail,
    Cancelled,
}

impl RetryPolicy {
    /// Policy with no waiting, for tests and latency-sensitive callers.
    pub fn immediate() -> Self {
        Self {
            backoff: Duration::ZERO,
            throttle_min: Duration::ZERO,
            throttle_max: Duration::ZERO,
            ..Self::default()
        }
    }

    pub fn classify_part(&self, err: &UploadError) -> PartVerdict {
        match err {
            UploadError::Cancelled => PartVerdict::Cancelled,
            UploadError::Status { status, .. } if *status == self.rate_limit_status => {
                PartVerdict::Throttled
            }
            UploadError::Status { status, .. } if *status == self.checksum_status => {
                PartVerdict::Retry
            }
            UploadError::Status { status, .. } if is_client_error(*status) => PartVerdict::Fail,
            UploadError::Status { .. }
            | UploadError::ChecksumMismatch { .. }
            | UploadError::Transport(_)
            | UploadError::Json(_) => PartVerdict::Retry,
            _ => PartVerdict::Fail,
        }
    }

    pub fn classify_complete(&self, err: &UploadError) -> CompleteVerdict {
        match err {
            UploadError::Cancelled => CompleteVerdict::Cancelled,
            UploadError::Status { status, .. } => {
                if self.completion_done_statuses.contains(status) {
                    CompleteVerdict::AlreadyDone
                } else if is_client_error(*status)
                    || self.completion_terminal_statuses.contains(status)
                {
                    CompleteVerdict::Fail
                } else {
                    CompleteVerdict::Retry
                }
            }
            UploadError::Transport(_) | UploadError::Json(_) => CompleteVerdict::Retry,
            _ => CompleteVerdict::Fail,
        }
    }

    /// Whether a failed session delete is worth another attempt.
    pub fn should_retry_abort(&self, err: &UploadError) -> bool {
        match err {
            UploadError::Status { status, .. } => !is_client_error(*status),
            UploadError::Transport(_) | UploadError::Json(_) => true,
            _ => false,
        }
    }

    /// Health verdict for the host that produced `err`.
    ///
    /// `Some(true)` when the host answered deliberately (a client-class
    /// refusal or a configured completion status), `Some(false)` when it
    /// misbehaved, `None` for local failures that say nothing about it.
    pub(crate) fn host_healthy(&self, err: &UploadError) -> Option<bool> {
        match err {
            UploadError::Status { status, .. } => {
                if *status == self.rate_limit_status || *status == self.checksum_status {
                    Some(false)
                } else if is_client_error(*status)
                    || self.completion_done_statuses.contains(status)
                    || self.completion_terminal_statuses.contains(status)
                {
                    Some(true)
                } else {
                    Some(false)
                }
            }
            UploadError::Transport(_)
            | UploadError::Json(_)
            | UploadError::ChecksumMismatch { .. } => Some(false),
            _ => None,
        }
    }

    /// Random delay in `[throttle_min, throttle_max]`.
    pub fn throttle_delay(&self) -> Duration {
        let lo = self.throttle_min.as_millis() as u64;
        let hi = (self.throttle_max.as_millis() as u64).max(lo);
        Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
    }
}

fn is_client_error(status: u16) -> bool {
    (400..500).contains(&status)
}

/// Sleeps for `delay` unless `cancel` fires first.
pub(crate) async fn sleep_or_cancel(
    cancel: &CancellationToken,
    delay: Duration,
) -> Result<(), UploadError> {
    if delay.is_zero() {
        return if cancel.is_cancelled() {
            Err(UploadError::Cancelled)
        } else {
            Ok(())
        };
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(UploadError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}
