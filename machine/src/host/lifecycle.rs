//! Multi-step state transitions of a host.
//!
//! Drivers report state; the orchestrator never tracks transitions itself.
//! Every action is followed by polling `get_state` under the host's
//! [`WaitPolicy`] until the driver reports the target state.

use super::Host;
use super::probe::wait_for;
use crate::drivers::{Driver, machine_in_state};
use async_trait::async_trait;
use machine_shared::State;
use machine_shared::errors::{MachineError, MachineResult};

/// Package and service management on a running machine.
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn upgrade_package(&self, driver: &dyn Driver, package: &str) -> MachineResult<()>;

    async fn restart_service(&self, driver: &dyn Driver, service: &str) -> MachineResult<()>;
}

#[derive(Debug, Clone, Copy)]
enum Action {
    Start,
    Stop,
    Kill,
}

impl Host {
    pub async fn state(&self) -> MachineResult<State> {
        self.driver.get_state().await
    }

    /// Engine URL of the machine.
    pub async fn url(&self) -> MachineResult<String> {
        self.driver.get_url().await
    }

    pub async fn start(&mut self) -> MachineResult<()> {
        tracing::info!("Starting \"{}\"...", self.name);
        self.run_action_for_state(Action::Start, State::Running).await?;
        tracing::info!("Machine \"{}\" was started.", self.name);
        self.wait_for_engine().await
    }

    pub async fn stop(&mut self) -> MachineResult<()> {
        tracing::info!("Stopping \"{}\"...", self.name);
        self.run_action_for_state(Action::Stop, State::Stopped).await?;
        tracing::info!("Machine \"{}\" was stopped.", self.name);
        Ok(())
    }

    pub async fn kill(&mut self) -> MachineResult<()> {
        tracing::info!("Killing \"{}\"...", self.name);
        self.run_action_for_state(Action::Kill, State::Stopped).await?;
        tracing::info!("Machine \"{}\" was killed.", self.name);
        Ok(())
    }

    /// Start a stopped machine, restart a running one. Any other state is
    /// left alone.
    pub async fn restart(&mut self) -> MachineResult<()> {
        tracing::info!("Restarting \"{}\"...", self.name);
        if machine_in_state(self.driver.as_ref(), State::Stopped).await {
            return self.start().await;
        }
        if machine_in_state(self.driver.as_ref(), State::Running).await {
            self.driver.restart().await?;
            self.wait_for_state(State::Running).await?;
            return self.wait_for_engine().await;
        }
        tracing::debug!(machine = %self.name, "Machine is neither running nor stopped, not restarting");
        Ok(())
    }

    /// Upgrade the container engine. The machine must be running.
    pub async fn upgrade(&mut self, provisioner: &dyn Provisioner) -> MachineResult<()> {
        let state = self.driver.get_state().await?;
        if state != State::Running {
            return Err(MachineError::InvalidState(format!(
                "machine \"{}\" must be running to upgrade (current state: {})",
                self.name, state
            )));
        }

        tracing::info!("Upgrading docker...");
        provisioner
            .upgrade_package(self.driver.as_ref(), "docker")
            .await?;
        tracing::info!("Restarting docker...");
        provisioner
            .restart_service(self.driver.as_ref(), "docker")
            .await
    }

    /// Remove the backing machine. The record itself belongs to the store.
    pub async fn remove(&mut self) -> MachineResult<()> {
        tracing::info!("Removing \"{}\"...", self.name);
        self.driver.remove().await
    }

    async fn run_action_for_state(&mut self, action: Action, desired: State) -> MachineResult<()> {
        if machine_in_state(self.driver.as_ref(), desired).await {
            return Err(MachineError::AlreadyInState {
                name: self.name.clone(),
                state: desired.to_string(),
            });
        }

        match action {
            Action::Start => self.driver.start().await?,
            Action::Stop => self.driver.stop().await?,
            Action::Kill => self.driver.kill().await?,
        }

        self.wait_for_state(desired).await
    }

    async fn wait_for_state(&self, desired: State) -> MachineResult<()> {
        let driver = self.driver.as_ref();
        let operation = format!("waiting for \"{}\" to be {}", self.name, desired);
        wait_for(self.wait, &operation, || machine_in_state(driver, desired)).await
    }

    async fn wait_for_engine(&self) -> MachineResult<()> {
        self.probe
            .wait_for_engine(self.driver.as_ref(), self.wait)
            .await
    }
}
