//! Bounded polling and engine reachability checks.

use crate::drivers::Driver;
use async_trait::async_trait;
use machine_shared::errors::{MachineError, MachineResult};
use std::future::Future;
use std::time::Duration;
use tokio::net::TcpStream;

/// Default engine port when the driver URL carries none.
const DEFAULT_ENGINE_PORT: u16 = 2376;

/// Retry budget for state polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub attempts: usize,
    pub interval: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            attempts: 60,
            interval: Duration::from_secs(3),
        }
    }
}

impl WaitPolicy {
    pub fn budget(&self) -> Duration {
        self.interval * u32::try_from(self.attempts).unwrap_or(u32::MAX)
    }
}

/// Poll `check` until it returns true, sleeping `policy.interval` between
/// attempts. Fails with [`MachineError::Timeout`] once the attempts are
/// used up.
pub async fn wait_for<F, Fut>(policy: WaitPolicy, operation: &str, mut check: F) -> MachineResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for attempt in 0..policy.attempts {
        if check().await {
            return Ok(());
        }
        tracing::trace!(operation, attempt, "condition not met yet");
        tokio::time::sleep(policy.interval).await;
    }
    Err(MachineError::Timeout {
        operation: format!(
            "{} (maximum number of retries ({}) exceeded)",
            operation, policy.attempts
        ),
        duration: policy.budget(),
    })
}

/// Confirms the container engine of a started machine accepts connections.
#[async_trait]
pub trait EngineProbe: Send + Sync {
    async fn wait_for_engine(&self, driver: &dyn Driver, policy: WaitPolicy) -> MachineResult<()>;
}

/// Dials the engine URL reported by the driver.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpEngineProbe;

/// `host:port` of an engine URL such as `tcp://10.0.0.5:2376`.
pub fn engine_address(engine_url: &str) -> MachineResult<String> {
    let parsed = url::Url::parse(engine_url)
        .map_err(|e| MachineError::Driver(format!("invalid engine URL {:?}: {}", engine_url, e)))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| MachineError::Driver(format!("engine URL {:?} has no host", engine_url)))?;
    let port = parsed.port().unwrap_or(DEFAULT_ENGINE_PORT);
    Ok(format!("{}:{}", host, port))
}

#[async_trait]
impl EngineProbe for TcpEngineProbe {
    async fn wait_for_engine(&self, driver: &dyn Driver, policy: WaitPolicy) -> MachineResult<()> {
        let addr = engine_address(&driver.get_url().await?)?;
        tracing::info!("Waiting for the container engine at {}...", addr);

        wait_for(policy, "waiting for the container engine", || {
            let addr = addr.clone();
            async move {
                matches!(
                    tokio::time::timeout(policy.interval, TcpStream::connect(&addr)).await,
                    Ok(Ok(_))
                )
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn quick(attempts: usize) -> WaitPolicy {
        WaitPolicy {
            attempts,
            interval: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_wait_for_succeeds_midway() {
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&polls);
        wait_for(quick(5), "third time lucky", move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move { n == 2 }
        })
        .await
        .unwrap();
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_wait_for_exhausts_budget() {
        let err = wait_for(quick(3), "never", || async { false })
            .await
            .unwrap_err();
        assert!(matches!(err, MachineError::Timeout { .. }));
        assert!(err.to_string().contains("maximum number of retries (3)"));
    }

    #[test]
    fn test_engine_address() {
        assert_eq!(engine_address("tcp://10.0.0.5:2376").unwrap(), "10.0.0.5:2376");
        assert_eq!(engine_address("tcp://example.com").unwrap(), "example.com:2376");
        assert!(engine_address("not a url").is_err());
    }

    #[test]
    fn test_default_policy_budget() {
        assert_eq!(WaitPolicy::default().budget(), Duration::from_secs(180));
    }
}
