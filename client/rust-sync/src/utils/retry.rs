use rand;
use std::time::Duration;

#[derive(Clone)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_max: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            jitter_max: Some(Duration::from_millis(50)),
        }
    }
}

impl RetryConfig {
    /// Delay before the retry that follows failure number `attempt` (1-based):
    /// `attempt × base_delay`, capped at `max_delay`.
    fn delay_after(&self, attempt: usize) -> Duration {
        std::cmp::min(self.base_delay * attempt as u32, self.max_delay)
    }
}

/// Retries `f` until it succeeds, `retryable` rejects the error, or
/// `max_attempts` calls have been made. The delay between attempts grows
/// linearly, so a terminal error on the first call costs no sleep at all.
pub async fn retry_async_with_config<F, Fut, T, E, P>(
    config: RetryConfig,
    retryable: P,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0usize;

    loop {
        attempt += 1;
        let res = f().await;
        match res {
            Ok(v) => return Ok(v),
            Err(e) => {
                if attempt >= config.max_attempts || !retryable(&e) {
                    return Err(e);
                }

                let mut wait = config.delay_after(attempt);

                // apply jitter
                if let Some(jitter_max) = config.jitter_max {
                    let jitter_ms = jitter_max.as_millis() as u64;
                    if jitter_ms > 0 {
                        let extra = rand::random::<u64>() % (jitter_ms + 1);
                        wait += Duration::from_millis(extra);
                    }
                }

                tokio::time::sleep(wait).await;
            }
        }
    }
}
