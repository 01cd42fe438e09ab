use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter_max: Option<Duration>,
}

impl RetryConfig {
    /// Backoff used for assessment saves.
    pub fn aggressive() -> Self {
        Self {
            max_attempts: 7,
            base_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_millis(1000),
            jitter_max: Some(Duration::from_millis(100)),
        }
    }

    /// No waiting between attempts.
    pub fn immediate(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            base_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            jitter_max: None,
        }
    }

    fn jitter(&self) -> Duration {
        match self.jitter_max {
            Some(max) if !max.is_zero() => {
                let max_ms = max.as_millis() as u64;
                Duration::from_millis(rand::random::<u64>() % (max_ms + 1))
            }
            _ => Duration::ZERO,
        }
    }
}

/// Runs `f` until it succeeds or `max_attempts` is used up, doubling the
/// backoff between attempts. Returns the last error.
pub async fn retry_async_with_config<F, Fut, T, E>(config: RetryConfig, mut f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt = 0;
    let mut backoff = config.base_backoff;

    loop {
        attempt += 1;
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt >= config.max_attempts => return Err(e),
            Err(e) => {
                tracing::debug!(
                    "Attempt {}/{} failed, retrying in {:?}: {}",
                    attempt,
                    config.max_attempts,
                    backoff,
                    e
                );
                let wait = backoff + config.jitter();
                if !wait.is_zero() {
                    tokio::time::sleep(wait).await;
                }
                backoff = std::cmp::min(backoff * 2, config.max_backoff);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn retry_succeeds_after_retries() {
        let counter = AtomicUsize::new(0);
        let cfg = RetryConfig {
            max_attempts: 3,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(10),
            jitter_max: None,
        };

        let res: Result<usize, &'static str> = retry_async_with_config(cfg, || async {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err("fail")
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(res, Ok(2));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_fails_after_max_attempts() {
        let counter = AtomicUsize::new(0);

        let res: Result<(), &'static str> =
            retry_async_with_config(RetryConfig::immediate(2), || async {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("always fail")
            })
            .await;

        assert_eq!(res, Err("always fail"));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn zero_attempts_still_runs_once() {
        let counter = AtomicUsize::new(0);
        let res: Result<(), &'static str> =
            retry_async_with_config(RetryConfig::immediate(0), || async {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("fail")
            })
            .await;

        assert!(res.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn aggressive_rides_out_a_short_outage() {
        let counter = AtomicUsize::new(0);
        let started = tokio::time::Instant::now();

        let res: Result<usize, &'static str> =
            retry_async_with_config(RetryConfig::aggressive(), || async {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 6 {
                    Err("store down")
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(res, Ok(6));
        // 50 + 100 + 200 + 400 + 800 + 1000 ms of backoff, plus jitter
        assert!(started.elapsed() >= Duration::from_millis(2550));
    }
}
