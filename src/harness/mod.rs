//! Orchestrates end-to-end firmware runs against the control plane.
//!
//! A run provisions a fresh instance, waits for power-on and the boot
//! marker, executes the firmware with the configured strategy, optionally
//! asserts on the output, and tears the instance down. Teardown is always
//! attempted once an instance exists; when teardown itself fails after an
//! earlier error, the note is appended to that error's message.

use std::fmt::Display;

use camino::Utf8PathBuf;
use thiserror::Error;
use tracing::info;

use crate::config::{ConfigError, ExecStrategy, HarnessConfig, WaitTimings};
use crate::control_plane::ControlPlane;
use crate::instance::{ControllerOptions, FvpInstance, InstanceError, RunResult};
use crate::shell::{ProxiedShell, ShellConfig, ShellError};

/// One firmware run to perform.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunRequest {
    /// Local firmware image to execute.
    pub firmware: Utf8PathBuf,
    /// Local simulator configuration file.
    pub fvp_config: Utf8PathBuf,
    /// Text the run output must contain for the run to count as passed.
    pub expect: Option<String>,
}

/// Successful result of a full harness run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunOutcome {
    /// Name of the instance the run executed on.
    pub instance_name: String,
    /// Output and exit status of the firmware run.
    pub result: RunResult,
}

/// Errors surfaced while performing a harness run.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Raised when configuration is invalid or incomplete.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Raised when the shell transport cannot be prepared.
    #[error(transparent)]
    Shell(#[from] ShellError),
    /// Raised when provisioning a new instance fails.
    #[error("failed to create instance: {0}")]
    Provision(#[source] InstanceError),
    /// Raised when the instance does not reach the `on` state.
    #[error("instance did not come on: {message}")]
    Ready {
        /// Description of the failure, including any teardown note.
        message: String,
        /// Underlying lifecycle error.
        #[source]
        source: InstanceError,
    },
    /// Raised when the boot marker never appears on the console.
    #[error("instance did not finish booting: {message}")]
    Boot {
        /// Description of the failure, including any teardown note.
        message: String,
        /// Underlying lifecycle error.
        #[source]
        source: InstanceError,
    },
    /// Raised when executing the firmware fails.
    #[error("firmware run failed: {message}")]
    Run {
        /// Description of the failure, including any teardown note.
        message: String,
        /// Underlying lifecycle error.
        #[source]
        source: InstanceError,
    },
    /// Raised when the run output lacks the expected text.
    #[error("run output missing {expected:?}: {message}")]
    Expectation {
        /// Text the output was required to contain.
        expected: String,
        /// Description of the failure, including any teardown note.
        message: String,
    },
    /// Raised when teardown fails after the run itself succeeded.
    #[error("failed to delete instance: {0}")]
    Teardown(#[source] InstanceError),
}

/// Executes the run workflow against a control plane.
#[derive(Debug)]
pub struct Harness<'c, C: ControlPlane> {
    client: &'c C,
    config: HarnessConfig,
}

impl<'c, C: ControlPlane> Harness<'c, C> {
    /// Creates a harness over a logged-in control-plane client.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the configuration fails validation.
    pub fn new(client: &'c C, config: HarnessConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { client, config })
    }

    /// Runs the end-to-end workflow for one firmware image.
    ///
    /// The firmware's exit status is preserved in the outcome even when
    /// non-zero; only the optional `expect` assertion turns output into a
    /// failure. Teardown is always attempted once an instance exists, and a
    /// teardown failure after a successful run is surfaced as
    /// [`HarnessError::Teardown`].
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError`] tagged with the lifecycle step that failed.
    pub async fn execute(&self, request: &RunRequest) -> Result<RunOutcome, HarnessError> {
        let spec = self.config.fresh_spec()?;
        let options = ControllerOptions {
            boot_marker: self.config.boot_marker.clone(),
            console_mode: self.config.console_transport()?,
            timings: self.config.timings(),
        };
        let mut instance = match self.config.strategy()? {
            ExecStrategy::ConsoleObserve => FvpInstance::console_observe(
                self.client,
                spec,
                options,
                self.config.strict_upload,
            ),
            ExecStrategy::RemoteShell => {
                let shell = ProxiedShell::with_process_runner(self.shell_config())?;
                FvpInstance::remote_shell(self.client, spec, options, shell)
            }
        };
        self.drive(&mut instance, request).await
    }

    async fn drive(
        &self,
        instance: &mut FvpInstance<'_, C>,
        request: &RunRequest,
    ) -> Result<RunOutcome, HarnessError> {
        let timings = self.config.timings();
        instance.create().await.map_err(HarnessError::Provision)?;
        info!(instance = %instance.name(), "instance created");

        if let Err(err) = instance.wait_until_on(timings.on_timeout).await {
            let message = Self::delete_with_note(instance, &err, timings).await;
            return Err(HarnessError::Ready {
                message,
                source: err,
            });
        }
        if let Err(err) = instance.wait_until_booted(timings.boot_timeout).await {
            let message = Self::delete_with_note(instance, &err, timings).await;
            return Err(HarnessError::Boot {
                message,
                source: err,
            });
        }
        info!(instance = %instance.name(), "instance booted");

        let result = match instance
            .run_program(&request.firmware, &request.fvp_config, timings.run_timeout)
            .await
        {
            Ok(result) => result,
            Err(err) => {
                let message = Self::delete_with_note(instance, &err, timings).await;
                return Err(HarnessError::Run {
                    message,
                    source: err,
                });
            }
        };

        if let Some(expected) = &request.expect {
            if !result.output.contains(expected) {
                let failure = format!("output does not contain {expected:?}");
                let message = Self::delete_with_note(instance, &failure, timings).await;
                return Err(HarnessError::Expectation {
                    expected: expected.clone(),
                    message,
                });
            }
        }

        instance.delete().await.map_err(HarnessError::Teardown)?;
        instance
            .wait_until_deleted(timings.delete_timeout)
            .await
            .map_err(HarnessError::Teardown)?;
        info!(instance = %instance.name(), "instance deleted");

        Ok(RunOutcome {
            instance_name: instance.name().to_owned(),
            result,
        })
    }

    /// Tears the instance down after a failure and folds any teardown error
    /// into the original message.
    async fn delete_with_note<E: Display>(
        instance: &mut FvpInstance<'_, C>,
        err: &E,
        timings: WaitTimings,
    ) -> String {
        let teardown_error = match instance.delete().await {
            Ok(()) => instance
                .wait_until_deleted(timings.delete_timeout)
                .await
                .err(),
            Err(delete_err) => Some(delete_err),
        };
        append_teardown_note(err.to_string(), teardown_error.as_ref())
    }

    fn shell_config(&self) -> ShellConfig {
        ShellConfig {
            ssh_bin: self.config.ssh_bin.clone(),
            scp_bin: self.config.scp_bin.clone(),
            keygen_bin: self.config.keygen_bin.clone(),
            proxy_host: self.config.proxy_host.clone(),
            // The proxy authenticates with the project id as the user name.
            proxy_user: self.client.project_id().to_owned(),
            user: self.config.ssh_user.clone(),
        }
    }
}

fn append_teardown_note<E: Display>(message: String, teardown_error: Option<&E>) -> String {
    if let Some(teardown) = teardown_error {
        format!("{message} (teardown also failed: {teardown})")
    } else {
        message
    }
}
