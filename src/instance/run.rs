//! Program execution on a booted instance.
//!
//! Two strategies share one entry point. The console strategy uploads the
//! firmware as the instance's boot image, reboots, and reads the result off
//! the serial console. The remote-shell strategy copies the files over a
//! proxied SSH hop and launches the simulator binary directly, preserving
//! its exit code.

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{info, warn};

use crate::client::UploadKind;
use crate::control_plane::ControlPlane;
use crate::shell::{
    CommandRunner, GeneratedKey, REMOTE_CONFIG_PATH, REMOTE_FIRMWARE_PATH, SIMULATOR_COMMAND,
    ShellError,
};

use super::{FvpInstance, InstanceError, RunnerKind, SessionKey};

/// Exit code `timeout(1)` reports when it had to kill the command.
const TIMED_OUT_EXIT_CODE: i32 = 124;

/// Outcome of one program run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunResult {
    /// Text produced by the program: console output for the observation
    /// strategy, stdout for the remote shell.
    pub output: String,
    /// Exit status when one is observable. The console strategy cannot see
    /// one and reports success as `Some(0)`; a remote command killed by its
    /// deadline reports `Some(124)`.
    pub exit_code: Option<i32>,
}

impl RunResult {
    /// Returns `true` when the run finished with a zero exit status.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.exit_code, Some(0))
    }
}

impl<C: ControlPlane, R: CommandRunner> FvpInstance<'_, C, R> {
    /// Runs `firmware` on the booted instance, returning its output.
    ///
    /// The strategy was fixed at construction time. `timeout` bounds only
    /// the program itself; the reboot and power-on waits in the console
    /// strategy use the controller's own deadlines.
    ///
    /// # Errors
    ///
    /// Returns [`InstanceError::InvalidState`] before `create`, an upload,
    /// wait, or shell error from the chosen strategy, or
    /// [`InstanceError::BootTimeout`] when the console never shows the
    /// completion marker.
    pub async fn run_program(
        &mut self,
        firmware: &Utf8Path,
        fvp_config: &Utf8Path,
        timeout: Duration,
    ) -> Result<RunResult, InstanceError> {
        let id = self.require_id("run_program")?;
        match &self.runner {
            RunnerKind::ConsoleObserve { strict_upload } => {
                let strict = *strict_upload;
                self.run_via_console(&id, firmware, fvp_config, strict, timeout)
                    .await
            }
            RunnerKind::RemoteShell { .. } => {
                self.run_via_shell(&id, firmware, fvp_config, timeout).await
            }
        }
    }

    async fn run_via_console(
        &mut self,
        id: &str,
        firmware: &Utf8Path,
        fvp_config: &Utf8Path,
        strict_upload: bool,
        timeout: Duration,
    ) -> Result<RunResult, InstanceError> {
        self.upload(id, UploadKind::FvpConfig, fvp_config, strict_upload)
            .await?;
        self.upload(id, UploadKind::Application, firmware, strict_upload)
            .await?;

        // The retained log still shows the marker from the previous boot;
        // remember what is there now so only output produced after the
        // reboot can satisfy the marker search.
        let seen = match self.client.console_log(id).await {
            Ok(log) => log,
            Err(err) => {
                warn!(
                    instance_id = %id,
                    error = %err,
                    "could not snapshot the pre-reboot console"
                );
                String::new()
            }
        };

        info!(instance_id = %id, "rebooting into uploaded firmware");
        self.client.reboot_instance(id).await?;
        let timings = self.options.timings;
        self.wait_until_rebooting(timings.reboot_timeout).await?;
        self.wait_until_on(timings.on_timeout).await?;

        let marker = self.options.boot_marker.clone();
        let output = self.wait_for_marker(&seen, &marker, timeout).await?;
        Ok(RunResult {
            output,
            exit_code: Some(0),
        })
    }

    async fn upload(
        &mut self,
        id: &str,
        kind: UploadKind,
        path: &Utf8Path,
        strict: bool,
    ) -> Result<(), InstanceError> {
        match self.client.upload_vmfile(kind, path, id).await {
            Ok(_) => Ok(()),
            Err(source) if strict => Err(InstanceError::Upload {
                path: path.to_owned(),
                source,
            }),
            Err(source) => {
                warn!(
                    instance_id = %id,
                    path = %path,
                    error = %source,
                    "upload failed; continuing with the image already present"
                );
                Ok(())
            }
        }
    }

    async fn run_via_shell(
        &mut self,
        id: &str,
        firmware: &Utf8Path,
        fvp_config: &Utf8Path,
        timeout: Duration,
    ) -> Result<RunResult, InstanceError> {
        let host = self.client.instance_ip(id).await?;
        let identity = self.ensure_session_key().await?;

        let RunnerKind::RemoteShell { shell } = &self.runner else {
            return Err(InstanceError::InvalidState {
                operation: String::from("run_program"),
            });
        };
        shell.put(&identity, &host, fvp_config, REMOTE_CONFIG_PATH)?;
        shell.put(&identity, &host, firmware, REMOTE_FIRMWARE_PATH)?;

        // timeout(1) on the instance bounds the simulator and surfaces the
        // overrun as exit code 124 instead of hanging the harness.
        let command = format!("timeout {} {SIMULATOR_COMMAND}", timeout.as_secs());
        info!(instance_id = %id, host = %host, "launching simulator over proxied shell");
        let result = shell.exec(&identity, &host, &command)?;
        if result.code == Some(TIMED_OUT_EXIT_CODE) {
            warn!(instance_id = %id, "simulator hit its run deadline");
        }
        Ok(RunResult {
            output: result.stdout,
            exit_code: result.code,
        })
    }

    /// Generates and registers the session key on first use; later runs in
    /// the same session reuse it.
    async fn ensure_session_key(&mut self) -> Result<Utf8PathBuf, InstanceError> {
        if let Some(key) = &self.session_key {
            return Ok(key.identity_file.clone());
        }
        let RunnerKind::RemoteShell { shell } = &self.runner else {
            return Err(InstanceError::InvalidState {
                operation: String::from("ensure_session_key"),
            });
        };
        let dir = tempfile::tempdir().map_err(|err| {
            InstanceError::Shell(ShellError::Keygen {
                message: err.to_string(),
            })
        })?;
        let dir_path = Utf8Path::from_path(dir.path()).ok_or_else(|| {
            InstanceError::Shell(ShellError::Keygen {
                message: String::from("temporary key directory is not valid UTF-8"),
            })
        })?;
        let GeneratedKey {
            identity_file,
            public_key,
        } = shell.generate_key(dir_path)?;
        let label = format!("session key for {}", self.spec.name);
        let key_id = self
            .client
            .register_project_key(&label, &public_key)
            .await?;
        info!(key_id = %key_id, "registered session key");
        let identity = identity_file.clone();
        self.session_key = Some(SessionKey {
            key_id,
            identity_file,
            _dir: dir,
        });
        Ok(identity)
    }
}
