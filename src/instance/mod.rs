//! Lifecycle controller for a single emulation instance.
//!
//! A controller owns at most one remote instance and the console or shell
//! transport attached to it. Callers drive the lifecycle explicitly
//! (create → wait-until-on → wait-until-booted → run → delete); every wait
//! hides a fixed-interval polling loop with a wall-clock deadline.

mod run;
mod wait;

use std::time::Duration;

use camino::Utf8PathBuf;
use tempfile::TempDir;
use thiserror::Error;

use crate::client::{ClientError, InstanceSpec};
use crate::config::{ConsoleMode, WaitTimings};
use crate::console::ConsoleChannel;
use crate::control_plane::ControlPlane;
use crate::shell::{CommandRunner, ProcessCommandRunner, ProxiedShell, ShellError};

pub use run::RunResult;

/// Controller-local view of the instance lifecycle.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    /// No remote instance exists yet.
    Uncreated,
    /// `create` succeeded; the remote side is still provisioning.
    Creating,
    /// The instance reported state `on`.
    On,
    /// The instance reported state `rebooting`.
    Rebooting,
    /// Deletion was requested but not yet confirmed.
    Deleting,
    /// The control plane no longer knows the instance.
    Deleted,
    /// The instance entered a terminal error state. Absorbing.
    Error,
}

/// Errors raised by lifecycle operations.
#[derive(Debug, Error)]
pub enum InstanceError {
    /// Raised when an operation is invalid for the current phase.
    #[error("instance is not in a valid state for {operation}")]
    InvalidState {
        /// Operation that was rejected.
        operation: String,
    },
    /// Raised when the remote instance enters the error state.
    #[error("instance {instance_id} entered error state")]
    RemoteError {
        /// Provider instance identifier.
        instance_id: String,
    },
    /// Raised when a polling deadline is exceeded.
    #[error("timed out waiting for {action} on instance {instance_id}")]
    Timeout {
        /// Condition being waited on.
        action: String,
        /// Provider instance identifier.
        instance_id: String,
    },
    /// Raised when the console never shows the awaited marker in time.
    #[error(
        "timed out waiting for {marker:?} on instance {instance_id}; console so far: {console}"
    )]
    BootTimeout {
        /// Marker string being waited for.
        marker: String,
        /// Provider instance identifier.
        instance_id: String,
        /// Console text accumulated before the deadline.
        console: String,
    },
    /// Raised when an upload must succeed but did not.
    #[error("upload of {path} failed: {source}")]
    Upload {
        /// Local path that failed to upload.
        path: Utf8PathBuf,
        /// Underlying client error.
        #[source]
        source: ClientError,
    },
    /// Control-plane failure during a lifecycle call.
    #[error(transparent)]
    Client(#[from] ClientError),
    /// Shell transport failure during a remote-execution run.
    #[error(transparent)]
    Shell(#[from] ShellError),
}

/// Behaviour knobs for a controller, derived from harness configuration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ControllerOptions {
    /// Literal console marker treated as the boot-complete signal.
    pub boot_marker: String,
    /// Console transport to attach once the instance reports `on`.
    pub console_mode: ConsoleMode,
    /// Poll interval and per-wait deadlines.
    pub timings: WaitTimings,
}

/// Ephemeral SSH credentials registered for one controller session.
#[derive(Debug)]
struct SessionKey {
    key_id: String,
    identity_file: Utf8PathBuf,
    // Holds the private key material; removed when the key is dropped.
    _dir: TempDir,
}

#[derive(Debug)]
enum RunnerKind<R: CommandRunner> {
    ConsoleObserve { strict_upload: bool },
    RemoteShell { shell: ProxiedShell<R> },
}

/// Controller for a single Fast Models instance.
#[derive(Debug)]
pub struct FvpInstance<'c, C: ControlPlane, R: CommandRunner = ProcessCommandRunner> {
    client: &'c C,
    spec: InstanceSpec,
    options: ControllerOptions,
    runner: RunnerKind<R>,
    phase: Phase,
    instance_id: Option<String>,
    console: Option<ConsoleChannel>,
    session_key: Option<SessionKey>,
    channels_opened: u32,
    channels_closed: u32,
}

impl<'c, C: ControlPlane> FvpInstance<'c, C, ProcessCommandRunner> {
    /// Creates a controller that runs programs by observing the console
    /// across a reboot.
    ///
    /// With `strict_upload` disabled, upload failures during a run degrade
    /// to best-effort; enabling it makes them fatal.
    #[must_use]
    pub const fn console_observe(
        client: &'c C,
        spec: InstanceSpec,
        options: ControllerOptions,
        strict_upload: bool,
    ) -> Self {
        Self::with_runner(
            client,
            spec,
            options,
            RunnerKind::ConsoleObserve { strict_upload },
        )
    }
}

impl<'c, C: ControlPlane, R: CommandRunner> FvpInstance<'c, C, R> {
    /// Creates a controller that runs programs over a proxied remote shell.
    #[must_use]
    pub const fn remote_shell(
        client: &'c C,
        spec: InstanceSpec,
        options: ControllerOptions,
        shell: ProxiedShell<R>,
    ) -> Self {
        Self::with_runner(client, spec, options, RunnerKind::RemoteShell { shell })
    }

    const fn with_runner(
        client: &'c C,
        spec: InstanceSpec,
        options: ControllerOptions,
        runner: RunnerKind<R>,
    ) -> Self {
        Self {
            client,
            spec,
            options,
            runner,
            phase: Phase::Uncreated,
            instance_id: None,
            console: None,
            session_key: None,
            channels_opened: 0,
            channels_closed: 0,
        }
    }

    /// Returns the controller's local view of the lifecycle.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Returns the remote instance id, if one is held.
    #[must_use]
    pub fn instance_id(&self) -> Option<&str> {
        self.instance_id.as_deref()
    }

    /// Returns the name the instance was (or will be) created under.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Creates the remote instance and stores its id.
    ///
    /// # Errors
    ///
    /// Returns [`InstanceError::InvalidState`] when an instance already
    /// exists, or a client error when creation fails.
    pub async fn create(&mut self) -> Result<(), InstanceError> {
        if self.instance_id.is_some() {
            return Err(InstanceError::InvalidState {
                operation: String::from("create"),
            });
        }
        let id = self.client.create_instance(&self.spec).await?;
        self.instance_id = Some(id);
        self.phase = Phase::Creating;
        Ok(())
    }

    /// Releases the transport, revokes session credentials, and requests
    /// deletion of the remote instance.
    ///
    /// Idempotent: a second call (or a call before `create`) does nothing.
    ///
    /// # Errors
    ///
    /// Returns a client error when key revocation or deletion fails.
    pub async fn delete(&mut self) -> Result<(), InstanceError> {
        if matches!(self.phase, Phase::Deleting | Phase::Deleted) {
            return Ok(());
        }
        self.close_console();
        if let Some(key) = self.session_key.take() {
            self.client.revoke_project_key(&key.key_id).await?;
        }
        if let Some(id) = self.instance_id.clone() {
            self.client.delete_instance(&id).await?;
            self.phase = Phase::Deleting;
        }
        Ok(())
    }

    fn close_console(&mut self) {
        if let Some(mut channel) = self.console.take() {
            channel.close();
            self.channels_closed += 1;
        }
    }

    fn require_id(&self, operation: &str) -> Result<String, InstanceError> {
        self.instance_id
            .clone()
            .ok_or_else(|| InstanceError::InvalidState {
                operation: operation.to_owned(),
            })
    }

    const fn poll_interval(&self) -> Duration {
        self.options.timings.poll_interval
    }

    #[cfg(test)]
    pub(crate) fn attach_console(&mut self, channel: ConsoleChannel) {
        self.console = Some(channel);
        self.channels_opened += 1;
    }

    #[cfg(test)]
    pub(crate) const fn channel_counts(&self) -> (u32, u32) {
        (self.channels_opened, self.channels_closed)
    }

    #[cfg(test)]
    pub(crate) const fn console_is_open(&self) -> bool {
        self.console.is_some()
    }
}
