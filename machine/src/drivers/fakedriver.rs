//! In-memory driver used to exercise the orchestrator and RPC layer.

use super::{BaseDriver, Driver, DriverOptions, McnFlag, config_from_raw, config_to_raw};
use async_trait::async_trait;
use machine_shared::State;
use machine_shared::errors::{MachineError, MachineResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const DRIVER_NAME: &str = "fakedriver";

/// Invocation counters, shared with the test that owns the driver.
#[derive(Debug, Default)]
pub struct FakeCalls {
    pub start: AtomicUsize,
    pub stop: AtomicUsize,
    pub kill: AtomicUsize,
    pub restart: AtomicUsize,
    pub get_state: AtomicUsize,
}

impl FakeCalls {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FakeDriver {
    #[serde(flatten)]
    pub base: BaseDriver,
    #[serde(rename = "MockState", default)]
    pub mock_state: State,
    #[serde(rename = "MockURL", default)]
    pub mock_url: String,
    /// Polls of `get_state` that report the transitional state before the
    /// target state of the last action becomes visible.
    #[serde(skip)]
    pub settle_polls: usize,
    #[serde(skip)]
    pending: Option<State>,
    #[serde(skip)]
    remaining_polls: Arc<AtomicUsize>,
    #[serde(skip)]
    pub calls: Arc<FakeCalls>,
}

impl FakeDriver {
    pub fn new(machine_name: &str, store_path: &str) -> Self {
        Self {
            base: BaseDriver::new(machine_name, store_path),
            ..Default::default()
        }
    }

    pub fn with_state(machine_name: &str, state: State) -> Self {
        Self {
            mock_state: state,
            ..Self::new(machine_name, "")
        }
    }

    pub fn boxed(machine_name: &str, store_path: &str) -> Box<dyn Driver> {
        Box::new(Self::new(machine_name, store_path))
    }

    fn transition(&mut self, via: State, target: State) {
        if self.settle_polls == 0 {
            self.mock_state = target;
            self.pending = None;
        } else {
            self.mock_state = via;
            self.pending = Some(target);
            self.remaining_polls
                .store(self.settle_polls, Ordering::SeqCst);
        }
    }

    /// State as seen by the next poll; consumes one settle poll.
    fn poll_state(&self) -> State {
        let Some(target) = self.pending else {
            return self.mock_state;
        };
        let remaining = self.remaining_polls.load(Ordering::SeqCst);
        if remaining == 0 {
            return target;
        }
        self.remaining_polls.store(remaining - 1, Ordering::SeqCst);
        self.mock_state
    }

    fn settled(&self) -> Self {
        let mut snapshot = self.clone();
        if let Some(target) = self.pending {
            snapshot.mock_state = target;
            snapshot.pending = None;
        }
        snapshot
    }
}

#[async_trait]
impl Driver for FakeDriver {
    async fn create(&mut self) -> MachineResult<()> {
        self.mock_state = State::Running;
        Ok(())
    }

    async fn driver_name(&self) -> MachineResult<String> {
        Ok(DRIVER_NAME.to_string())
    }

    async fn get_create_flags(&self) -> MachineResult<Vec<McnFlag>> {
        Ok(vec![
            McnFlag::string("fake-url", "URL reported by the fake driver", ""),
            McnFlag::int("fake-settle-polls", "state polls before transitions settle", 0),
        ])
    }

    async fn get_ip(&self) -> MachineResult<String> {
        self.base.get_ip()
    }

    async fn get_machine_name(&self) -> MachineResult<String> {
        Ok(self.base.get_machine_name())
    }

    async fn get_ssh_hostname(&self) -> MachineResult<String> {
        self.base.get_ip()
    }

    async fn get_ssh_key_path(&self) -> MachineResult<String> {
        Ok(self.base.get_ssh_key_path())
    }

    async fn get_ssh_port(&self) -> MachineResult<u16> {
        Ok(self.base.get_ssh_port())
    }

    async fn get_ssh_username(&self) -> MachineResult<String> {
        Ok(self.base.get_ssh_username())
    }

    async fn get_url(&self) -> MachineResult<String> {
        if self.mock_url.is_empty() {
            return Err(MachineError::Driver("fake driver has no URL".into()));
        }
        Ok(self.mock_url.clone())
    }

    async fn get_state(&self) -> MachineResult<State> {
        self.calls.get_state.fetch_add(1, Ordering::SeqCst);
        Ok(self.poll_state())
    }

    async fn kill(&mut self) -> MachineResult<()> {
        self.calls.kill.fetch_add(1, Ordering::SeqCst);
        self.transition(State::Stopping, State::Stopped);
        Ok(())
    }

    async fn pre_create_check(&self) -> MachineResult<()> {
        Ok(())
    }

    async fn remove(&mut self) -> MachineResult<()> {
        Ok(())
    }

    async fn restart(&mut self) -> MachineResult<()> {
        self.calls.restart.fetch_add(1, Ordering::SeqCst);
        self.transition(State::Starting, State::Running);
        Ok(())
    }

    async fn set_config_from_flags(&mut self, flags: &dyn DriverOptions) -> MachineResult<()> {
        self.mock_url = flags.string("fake-url");
        self.settle_polls = usize::try_from(flags.int("fake-settle-polls")).unwrap_or(0);
        Ok(())
    }

    async fn start(&mut self) -> MachineResult<()> {
        self.calls.start.fetch_add(1, Ordering::SeqCst);
        self.transition(State::Starting, State::Running);
        Ok(())
    }

    async fn stop(&mut self) -> MachineResult<()> {
        self.calls.stop.fetch_add(1, Ordering::SeqCst);
        self.transition(State::Stopping, State::Stopped);
        Ok(())
    }

    async fn get_config_raw(&self) -> MachineResult<Vec<u8>> {
        config_to_raw(&self.settled())
    }

    async fn set_config_raw(&mut self, raw: &[u8]) -> MachineResult<()> {
        let restored: FakeDriver = config_from_raw(raw)?;
        self.base = restored.base;
        self.mock_state = restored.mock_state;
        self.pending = None;
        self.mock_url = restored.mock_url;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transitions_settle_after_polls() {
        let mut driver = FakeDriver::with_state("dev", State::Stopped);
        driver.settle_polls = 2;

        driver.start().await.unwrap();
        assert_eq!(driver.get_state().await.unwrap(), State::Starting);
        assert_eq!(driver.get_state().await.unwrap(), State::Starting);
        assert_eq!(driver.get_state().await.unwrap(), State::Running);
        assert_eq!(FakeCalls::get(&driver.calls.start), 1);
        assert_eq!(FakeCalls::get(&driver.calls.get_state), 3);
    }

    #[tokio::test]
    async fn test_raw_config_reports_settled_state() {
        let mut driver = FakeDriver::with_state("dev", State::Running);
        driver.settle_polls = 5;
        driver.stop().await.unwrap();

        let raw = driver.get_config_raw().await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(json["MockState"], "Stopped");
        assert_eq!(json["MachineName"], "dev");
    }
}
