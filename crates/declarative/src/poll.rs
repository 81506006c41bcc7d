//! Status polling with cancellation support.
//!
//! Used by resources whose creation completes asynchronously at the
//! provider. Only status queries are repeated; the mutating request that
//! started the operation is never re-issued from here.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// Configuration for status polling.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Delay between status queries
    pub interval: Duration,
    /// Give up after this long; `None` waits indefinitely
    pub timeout: Option<Duration>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            timeout: None,
        }
    }
}

impl PollConfig {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Shared cancellation flag.
///
/// Clones share state. Cancelling wakes any poll currently sleeping on the
/// token.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (flag, cvar) = &*self.inner;
        let mut cancelled = match flag.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *cancelled = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        let (flag, _) = &*self.inner;
        match flag.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Sleep for `duration` unless cancelled first. Returns `true` if the
    /// token was cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let guard = match flag.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let result = cvar.wait_timeout_while(guard, duration, |cancelled| !*cancelled);
        match result {
            Ok((guard, _)) => *guard,
            Err(poisoned) => *poisoned.into_inner().0,
        }
    }
}

/// Outcome of a single status query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus<T> {
    /// Still in progress; carries the reported status for logging
    Pending(String),
    /// Reached the desired terminal state
    Ready(T),
    /// The provider no longer knows the resource
    Gone,
}

/// Query `check` at a fixed interval until it reports a terminal state.
///
/// # Returns
/// * `Ok(Some(value))` - the resource is ready
/// * `Ok(None)` - the resource disappeared while waiting
/// * `Err` - cancelled, timed out, or `check` failed (errors are not retried)
pub fn poll_until<T, F>(
    config: &PollConfig,
    cancel: &CancelToken,
    what: &str,
    mut check: F,
) -> Result<Option<T>>
where
    F: FnMut() -> Result<PollStatus<T>>,
{
    let start = Instant::now();
    let mut attempts = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled(what.to_string()));
        }

        attempts += 1;
        match check()? {
            PollStatus::Ready(value) => {
                log::debug!("{what} ready after {attempts} check(s)");
                return Ok(Some(value));
            }
            PollStatus::Gone => {
                log::debug!("{what} disappeared while waiting");
                return Ok(None);
            }
            PollStatus::Pending(status) => {
                log::debug!("{what} is {status}, checking again in {:?}", config.interval);
            }
        }

        if let Some(timeout) = config.timeout
            && start.elapsed() + config.interval > timeout
        {
            return Err(Error::Timeout {
                what: what.to_string(),
                attempts,
            });
        }

        if cancel.sleep(config.interval) {
            return Err(Error::Cancelled(what.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;

    fn fast() -> PollConfig {
        PollConfig::new(Duration::from_millis(1))
    }

    #[test]
    fn test_ready_after_pending() {
        let mut calls = 0;
        let result = poll_until(&fast(), &CancelToken::new(), "device", || {
            calls += 1;
            if calls < 3 {
                Ok(PollStatus::Pending("provisioning".into()))
            } else {
                Ok(PollStatus::Ready(calls))
            }
        })
        .unwrap();
        assert_eq!(result, Some(3));
    }

    #[test]
    fn test_gone_is_not_an_error() {
        let result: Option<()> =
            poll_until(&fast(), &CancelToken::new(), "device", || Ok(PollStatus::Gone)).unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn test_check_errors_are_not_retried() {
        let mut calls = 0;
        let result: Result<Option<()>> = poll_until(&fast(), &CancelToken::new(), "device", || {
            calls += 1;
            Err(ProviderError::api("boom").into())
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_cancelled_before_start() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let result: Result<Option<()>> =
            poll_until(&fast(), &cancel, "device", || Ok(PollStatus::Ready(())));
        assert!(matches!(result, Err(Error::Cancelled(_))));
    }

    #[test]
    fn test_cancel_wakes_sleeping_poll() {
        let cancel = CancelToken::new();
        let remote = cancel.clone();
        let config = PollConfig::new(Duration::from_secs(60));

        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            remote.cancel();
        });

        let started = Instant::now();
        let result: Result<Option<()>> = poll_until(&config, &cancel, "device", || {
            Ok(PollStatus::Pending("provisioning".into()))
        });
        handle.join().unwrap();

        assert!(matches!(result, Err(Error::Cancelled(_))));
        assert!(started.elapsed() < Duration::from_secs(30));
    }

    #[test]
    fn test_timeout() {
        let config = fast().with_timeout(Duration::from_millis(5));
        let result: Result<Option<()>> = poll_until(&config, &CancelToken::new(), "device", || {
            Ok(PollStatus::Pending("provisioning".into()))
        });
        assert!(matches!(result, Err(Error::Timeout { .. })));
    }
}
