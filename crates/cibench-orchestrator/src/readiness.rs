//! Readiness polling with exponential backoff

use cibench_core::HttpProbe;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Sleep and per-attempt timeout schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    /// Upper bound on a single GET
    pub max_attempt_timeout: Duration,
    /// Lower bound on a single GET, whatever the sleep
    pub min_attempt_timeout: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            max_attempt_timeout: Duration::from_secs(5),
            min_attempt_timeout: Duration::from_secs(1),
        }
    }
}

impl BackoffPolicy {
    fn attempt_timeout(&self, sleep: Duration) -> Duration {
        sleep
            .min(self.max_attempt_timeout)
            .max(self.min_attempt_timeout)
    }

    fn next(&self, sleep: Duration) -> Duration {
        sleep.saturating_mul(2).min(self.max)
    }
}

/// Outcome of one readiness wait
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeResult {
    pub ready: bool,
    pub attempts: u32,
    #[serde(rename = "elapsed_s", serialize_with = "serialize_secs")]
    pub elapsed: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

/// Polls a URL until it answers with the expected status or a deadline passes
#[derive(Clone)]
pub struct ReadinessProbe {
    probe: Arc<dyn HttpProbe>,
    policy: BackoffPolicy,
}

impl ReadinessProbe {
    pub fn new(probe: Arc<dyn HttpProbe>) -> Self {
        Self {
            probe,
            policy: BackoffPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Wait until `url` returns `success_status`, for at most `max_wait`.
    ///
    /// Never fails: transport errors and other statuses are retried, and an
    /// elapsed deadline yields `ready = false`.
    pub async fn wait_ready(&self, url: &str, max_wait: Duration, success_status: u16) -> ProbeResult {
        let start = Instant::now();
        let deadline = start + max_wait;
        let mut sleep = self.policy.initial;
        let mut result = ProbeResult {
            ready: false,
            attempts: 0,
            elapsed: Duration::ZERO,
            last_status: None,
            last_error: None,
        };

        while Instant::now() < deadline {
            result.attempts += 1;
            let timeout = self.policy.attempt_timeout(sleep);
            match self.probe.get_status(url, timeout).await {
                Ok(status) if status == success_status => {
                    result.ready = true;
                    result.last_status = Some(status);
                    result.last_error = None;
                    result.elapsed = start.elapsed();
                    info!(url, attempts = result.attempts, "Service ready");
                    return result;
                }
                Ok(status) => {
                    debug!(url, attempt = result.attempts, status, "Service not ready");
                    result.last_status = Some(status);
                }
                Err(e) => {
                    debug!(url, attempt = result.attempts, error = %e, "Probe failed");
                    result.last_error = Some(e.to_string());
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            tokio::time::sleep(sleep.min(remaining)).await;
            sleep = self.policy.next(sleep);
        }

        result.elapsed = start.elapsed();
        warn!(
            url,
            attempts = result.attempts,
            waited_s = result.elapsed.as_secs_f64(),
            "Service not ready before deadline"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cibench_dev::{setup_test_logging, MockProbe, ProbeReply};

    const URL: &str = "http://127.0.0.1:9000/v1/models";

    #[tokio::test(start_paused = true)]
    async fn test_ready_on_third_attempt() {
        setup_test_logging();
        let probe = MockProbe::ready_after(2);
        let readiness = ReadinessProbe::new(Arc::new(probe.clone()));

        let result = readiness.wait_ready(URL, Duration::from_secs(60), 200).await;

        assert!(result.ready);
        assert_eq!(result.attempts, 3);
        assert_eq!(probe.calls(), 3);
        assert_eq!(result.elapsed, Duration::from_secs(3));
        assert_eq!(
            probe.timeouts().await,
            vec![Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(4)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_returns_false() {
        let probe = MockProbe::always(ProbeReply::Status(503));
        let readiness = ReadinessProbe::new(Arc::new(probe.clone()));

        let result = readiness.wait_ready(URL, Duration::from_secs(10), 200).await;

        // attempts at t = 0, 1, 3, 7; the last sleep is clipped to the deadline
        assert!(!result.ready);
        assert_eq!(result.attempts, 4);
        assert_eq!(result.elapsed, Duration::from_secs(10));
        assert_eq!(result.last_status, Some(503));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_caps() {
        let probe = MockProbe::always(ProbeReply::Unreachable);
        let readiness = ReadinessProbe::new(Arc::new(probe.clone()));

        let result = readiness.wait_ready(URL, Duration::from_secs(120), 200).await;

        // sleeps 1, 2, 4, 8, 16, 30, 30, 29 (clipped)
        assert!(!result.ready);
        assert_eq!(result.attempts, 8);
        assert!(result.last_error.unwrap().contains("connection refused"));

        let timeouts = probe.timeouts().await;
        assert!(timeouts.iter().all(|t| *t >= Duration::from_secs(1) && *t <= Duration::from_secs(5)));
        assert_eq!(timeouts.last(), Some(&Duration::from_secs(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_success_status() {
        let probe = MockProbe::new(vec![ProbeReply::Status(200), ProbeReply::Status(204)]);
        let readiness = ReadinessProbe::new(Arc::new(probe.clone()));

        let result = readiness.wait_ready(URL, Duration::from_secs(5), 204).await;
        assert!(result.ready);
        assert_eq!(result.attempts, 2);
    }

    #[test]
    fn test_attempt_timeout_floor() {
        let policy = BackoffPolicy {
            initial: Duration::from_millis(100),
            ..BackoffPolicy::default()
        };
        assert_eq!(policy.attempt_timeout(policy.initial), Duration::from_secs(1));
        assert_eq!(policy.next(Duration::from_secs(20)), Duration::from_secs(30));
    }
}
