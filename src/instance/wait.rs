//! Polling loops for remote state transitions and console output.
//!
//! Every wait uses a fixed poll interval and an independent wall-clock
//! deadline measured from the start of the call; neither backs off. The
//! condition is always checked before the deadline so a condition that
//! becomes true within the timeout succeeds, and a condition that never
//! does fails between `timeout` and `timeout + interval` later.

use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::debug;

use crate::client::InstanceState;
use crate::config::ConsoleMode;
use crate::console::ConsoleChannel;
use crate::control_plane::ControlPlane;
use crate::shell::CommandRunner;

use super::{FvpInstance, InstanceError, Phase};

impl<C: ControlPlane, R: CommandRunner> FvpInstance<'_, C, R> {
    /// Polls until the instance reports state `on`, then (re)attaches the
    /// console channel.
    ///
    /// Reconnecting closes any previous channel exactly once before the new
    /// one is opened, so a second call after a reboot never leaks the old
    /// channel.
    ///
    /// # Errors
    ///
    /// Returns [`InstanceError::RemoteError`] as soon as the instance
    /// reports `error`, or [`InstanceError::Timeout`] once the deadline
    /// passes.
    pub async fn wait_until_on(&mut self, timeout: Duration) -> Result<(), InstanceError> {
        let id = self.require_id("wait_until_on")?;
        self.wait_for_state(&id, InstanceState::On, timeout).await?;
        self.phase = Phase::On;
        self.reconnect_console(&id).await
    }

    /// Polls until the instance reports state `rebooting`.
    ///
    /// Used as a synchronisation point after requesting a reboot so a
    /// following [`FvpInstance::wait_until_on`] cannot observe the
    /// pre-reboot `on`.
    ///
    /// # Errors
    ///
    /// Returns [`InstanceError::RemoteError`] on the `error` state or
    /// [`InstanceError::Timeout`] once the deadline passes.
    pub async fn wait_until_rebooting(&mut self, timeout: Duration) -> Result<(), InstanceError> {
        let id = self.require_id("wait_until_rebooting")?;
        self.wait_for_state(&id, InstanceState::Rebooting, timeout)
            .await?;
        self.phase = Phase::Rebooting;
        Ok(())
    }

    /// Accumulates console output until the configured boot marker appears.
    ///
    /// Returns the full accumulated text, marker included.
    ///
    /// # Errors
    ///
    /// Returns [`InstanceError::InvalidState`] when no console channel is
    /// attached, or [`InstanceError::BootTimeout`] carrying the accumulated
    /// text once the deadline passes.
    pub async fn wait_until_booted(&mut self, timeout: Duration) -> Result<String, InstanceError> {
        let marker = self.options.boot_marker.clone();
        self.wait_for_marker("", &marker, timeout).await
    }

    /// Polls until the control plane forgets the instance.
    ///
    /// `NotFound` from the first poll counts as immediate success. No-op
    /// when no instance id is held.
    ///
    /// # Errors
    ///
    /// Returns [`InstanceError::Timeout`] when the instance is still
    /// visible after the deadline.
    pub async fn wait_until_deleted(&mut self, timeout: Duration) -> Result<(), InstanceError> {
        let Some(id) = self.instance_id.clone() else {
            return Ok(());
        };
        let deadline = Instant::now() + timeout;
        loop {
            match self.client.instance_state(&id).await {
                Err(err) if err.is_not_found() => break,
                Err(err) => return Err(err.into()),
                Ok(state) => debug!(instance_id = %id, state = %state.as_str(), "still present"),
            }
            if Instant::now() >= deadline {
                return Err(InstanceError::Timeout {
                    action: String::from("deletion"),
                    instance_id: id,
                });
            }
            sleep(self.poll_interval()).await;
        }
        self.instance_id = None;
        self.phase = Phase::Deleted;
        Ok(())
    }

    async fn wait_for_state(
        &mut self,
        id: &str,
        target: InstanceState,
        timeout: Duration,
    ) -> Result<(), InstanceError> {
        let deadline = Instant::now() + timeout;
        loop {
            let state = self.client.instance_state(id).await?;
            if state == target {
                return Ok(());
            }
            if state == InstanceState::Error {
                self.phase = Phase::Error;
                return Err(InstanceError::RemoteError {
                    instance_id: id.to_owned(),
                });
            }
            if Instant::now() >= deadline {
                return Err(InstanceError::Timeout {
                    action: format!("state '{}'", target.as_str()),
                    instance_id: id.to_owned(),
                });
            }
            debug!(instance_id = %id, state = %state.as_str(), target = %target.as_str(), "waiting");
            sleep(self.poll_interval()).await;
        }
    }

    /// Accumulates console output until `marker` shows up past `seen`.
    ///
    /// A retained console log still carries the marker from the previous
    /// boot, so a caller waiting across a reboot passes the pre-reboot log
    /// as `seen` and only output beyond that prefix can satisfy the search.
    /// When the log was reset in the meantime the prefix no longer matches
    /// and the whole text is searched.
    pub(super) async fn wait_for_marker(
        &mut self,
        seen: &str,
        marker: &str,
        timeout: Duration,
    ) -> Result<String, InstanceError> {
        let id = self.require_id("wait_for_marker")?;
        let client = self.client;
        let interval = self.poll_interval();
        let mode = self.options.console_mode;
        let Some(channel) = self.console.as_mut() else {
            return Err(InstanceError::InvalidState {
                operation: String::from("wait_until_booted"),
            });
        };

        let deadline = Instant::now() + timeout;
        let mut output = String::new();
        loop {
            channel.fill(client, &id, &mut output, interval).await?;
            let fresh = output.strip_prefix(seen).unwrap_or(output.as_str());
            if fresh.contains(marker) {
                return Ok(output);
            }
            if Instant::now() >= deadline {
                return Err(InstanceError::BootTimeout {
                    marker: marker.to_owned(),
                    instance_id: id,
                    console: output,
                });
            }
            // Streaming reads already block for up to one interval; the
            // pull-based channel, and a stream that has ended, need
            // explicit pacing.
            if mode == ConsoleMode::Snapshot || channel.is_closed() {
                sleep(interval).await;
            }
        }
    }

    pub(super) async fn reconnect_console(&mut self, id: &str) -> Result<(), InstanceError> {
        self.close_console();
        let channel = match self.options.console_mode {
            ConsoleMode::Snapshot => ConsoleChannel::snapshot(),
            ConsoleMode::Stream => {
                let url = self.client.console_url(id).await?;
                ConsoleChannel::open_stream(&url).await?
            }
        };
        self.console = Some(channel);
        self.channels_opened += 1;
        Ok(())
    }
}
