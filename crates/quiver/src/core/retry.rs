use std::time::Duration;

use crate::error::Error;

/// Retry policy consulted by the network dispatcher on transient failures.
///
/// One instance lives on each request and is only ever touched by the
/// worker currently executing that request; implementations need no
/// internal synchronization.
pub trait RetryPolicy: Send {
    /// Per-attempt timeout for the next transport call.
    fn current_timeout(&self) -> Duration;

    /// Number of retries performed so far.
    fn current_retry_count(&self) -> u32;

    /// Offer a transient error to the policy.
    ///
    /// Returns `Ok(())` when another attempt should be made; the policy
    /// records the attempt and grows its timeout. Returns the error back
    /// when attempts are exhausted, which ends the request.
    fn retry(&mut self, error: Error) -> Result<(), Error>;
}

/// Multiplicative-backoff retry policy.
///
/// Each permitted retry grows the timeout by
/// `timeout += timeout * backoff_multiplier`. The default configuration
/// fails fast: a fixed 2.5 s timeout and zero retries.
#[derive(Debug, Clone)]
pub struct DefaultRetryPolicy {
    current_timeout: Duration,
    retry_count: u32,
    max_retries: u32,
    backoff_multiplier: f32,
}

impl DefaultRetryPolicy {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2500);
    pub const DEFAULT_MAX_RETRIES: u32 = 0;
    pub const DEFAULT_BACKOFF_MULTIPLIER: f32 = 1.0;

    pub fn new(initial_timeout: Duration, max_retries: u32, backoff_multiplier: f32) -> Self {
        Self {
            current_timeout: initial_timeout,
            retry_count: 0,
            max_retries,
            backoff_multiplier,
        }
    }

    pub fn backoff_multiplier(&self) -> f32 {
        self.backoff_multiplier
    }

    fn has_attempt_remaining(&self) -> bool {
        self.retry_count <= self.max_retries
    }
}

impl Default for DefaultRetryPolicy {
    fn default() -> Self {
        Self::new(
            Self::DEFAULT_TIMEOUT,
            Self::DEFAULT_MAX_RETRIES,
            Self::DEFAULT_BACKOFF_MULTIPLIER,
        )
    }
}

impl RetryPolicy for DefaultRetryPolicy {
    fn current_timeout(&self) -> Duration {
        self.current_timeout
    }

    fn current_retry_count(&self) -> u32 {
        self.retry_count
    }

    fn retry(&mut self, error: Error) -> Result<(), Error> {
        self.retry_count += 1;
        self.current_timeout += self.current_timeout.mul_f32(self.backoff_multiplier);
        if self.has_attempt_remaining() {
            Ok(())
        } else {
            Err(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_fails_fast() {
        let mut policy = DefaultRetryPolicy::default();
        assert_eq!(policy.current_timeout(), Duration::from_millis(2500));
        assert_eq!(policy.current_retry_count(), 0);

        // Zero retries: the first transient failure is final.
        assert!(policy.retry(Error::Timeout).is_err());
    }

    #[test]
    fn permits_configured_number_of_retries() {
        let mut policy = DefaultRetryPolicy::new(Duration::from_millis(100), 2, 1.0);

        assert!(policy.retry(Error::Timeout).is_ok());
        assert_eq!(policy.current_retry_count(), 1);
        assert!(policy.retry(Error::Timeout).is_ok());
        assert_eq!(policy.current_retry_count(), 2);

        let result = policy.retry(Error::Timeout);
        assert!(matches!(result, Err(Error::Timeout)));
        assert_eq!(policy.current_retry_count(), 3);
    }

    #[test]
    fn timeout_grows_multiplicatively() {
        let mut policy = DefaultRetryPolicy::new(Duration::from_millis(100), 5, 2.0);

        // timeout += timeout * multiplier: 100 -> 300 -> 900
        let _ = policy.retry(Error::Timeout);
        assert_eq!(policy.current_timeout(), Duration::from_millis(300));
        let _ = policy.retry(Error::Timeout);
        assert_eq!(policy.current_timeout(), Duration::from_millis(900));
    }

    #[test]
    fn unit_multiplier_doubles_each_attempt() {
        let mut policy = DefaultRetryPolicy::new(Duration::from_millis(100), 5, 1.0);

        let _ = policy.retry(Error::Timeout);
        assert_eq!(policy.current_timeout(), Duration::from_millis(200));
        let _ = policy.retry(Error::Timeout);
        assert_eq!(policy.current_timeout(), Duration::from_millis(400));
    }

    #[test]
    fn returns_the_offered_error_on_exhaustion() {
        let mut policy = DefaultRetryPolicy::new(Duration::from_millis(10), 0, 1.0);
        let result = policy.retry(Error::Redirect {
            location: Some("http://example.com/next".into()),
        });
        match result {
            Err(Error::Redirect { location }) => {
                assert_eq!(location.as_deref(), Some("http://example.com/next"));
            }
            other => panic!("expected redirect error back, got {other:?}"),
        }
    }
}
