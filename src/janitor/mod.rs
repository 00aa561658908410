//! Test-instance janitor for the AVH control plane.
//!
//! The janitor is designed for integration-test runs that provision real
//! cloud instances. It identifies instances belonging to the harness via
//! their name prefix (`avh-harness-`), deletes them, waits for the control
//! plane to forget them, and fails if anything remains afterwards.

use std::time::Duration;

use thiserror::Error;
use tokio::time::{Instant, sleep};
use tracing::{debug, info};

use crate::client::{ClientError, InstanceSummary};
use crate::config::INSTANCE_NAME_PREFIX;
use crate::control_plane::ControlPlane;

/// Summary of janitor work.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SweepSummary {
    /// Number of harness instances deleted during the sweep.
    pub deleted: usize,
    /// Number of instances left alone because their names are not ours.
    pub skipped: usize,
}

/// Errors returned by the janitor.
#[derive(Debug, Error)]
pub enum JanitorError {
    /// Raised when instances remain after the sweep.
    #[error("instances remain after janitor sweep: {message}")]
    NotClean {
        /// Human-readable description of what remains.
        message: String,
    },
    /// Raised when a control-plane call fails.
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Deletes leaked harness instances through the control plane.
#[derive(Debug)]
pub struct Janitor<'c, C: ControlPlane> {
    client: &'c C,
    poll_interval: Duration,
    delete_timeout: Duration,
}

impl<'c, C: ControlPlane> Janitor<'c, C> {
    /// Creates a new janitor over a logged-in client.
    #[must_use]
    pub const fn new(client: &'c C, poll_interval: Duration, delete_timeout: Duration) -> Self {
        Self {
            client,
            poll_interval,
            delete_timeout,
        }
    }

    /// Performs a sweep and returns how many instances were deleted.
    ///
    /// Only instances whose names carry the harness prefix are touched;
    /// anything else in the project is counted as skipped. Deletion is
    /// requested for every target first, then each is awaited, so teardown
    /// of multiple leaks overlaps on the remote side.
    ///
    /// # Errors
    ///
    /// Returns [`JanitorError::NotClean`] when a target instance is still
    /// visible after the deadline, or the underlying client error when a
    /// call fails.
    pub async fn sweep(&self) -> Result<SweepSummary, JanitorError> {
        let instances = self.client.list_instances().await?;
        let (targets, others): (Vec<InstanceSummary>, Vec<InstanceSummary>) = instances
            .into_iter()
            .partition(|instance| instance.name.starts_with(INSTANCE_NAME_PREFIX));
        let skipped = others.len();

        let mut deleted = 0;
        for target in &targets {
            info!(instance = %target.name, id = %target.id, "deleting leaked instance");
            match self.client.delete_instance(&target.id).await {
                Ok(()) => deleted += 1,
                // Already gone, likely a concurrent teardown.
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err.into()),
            }
        }
        for target in &targets {
            self.wait_gone(target).await?;
        }

        Ok(SweepSummary { deleted, skipped })
    }

    async fn wait_gone(&self, target: &InstanceSummary) -> Result<(), JanitorError> {
        let deadline = Instant::now() + self.delete_timeout;
        loop {
            match self.client.instance_state(&target.id).await {
                Err(err) if err.is_not_found() => return Ok(()),
                Err(err) => return Err(err.into()),
                Ok(state) => {
                    debug!(instance = %target.name, state = %state.as_str(), "still present");
                }
            }
            if Instant::now() >= deadline {
                return Err(JanitorError::NotClean {
                    message: format!(
                        "instance {} ({}) still present after {} seconds",
                        target.name,
                        target.id,
                        self.delete_timeout.as_secs()
                    ),
                });
            }
            sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests;
