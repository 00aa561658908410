//! Proxied remote-shell execution against an emulation instance.
//!
//! Instances only expose a private address behind the vendor's SSH proxy.
//! Both hops authenticate with an ephemeral ECDSA key generated per session
//! and registered as a project key; the proxy username is the project id.
//! All transport goes through the system `ssh`/`scp`/`ssh-keygen` binaries
//! behind the [`CommandRunner`] seam so tests can script the transport.

mod runner;

use std::ffi::OsString;

use camino::{Utf8Path, Utf8PathBuf};
use shell_escape::unix::escape;
use thiserror::Error;

pub use runner::{CommandOutput, CommandRunner, ProcessCommandRunner};

/// Remote path the firmware image is copied to before execution.
pub const REMOTE_FIRMWARE_PATH: &str = "/tmp/application.elf";

/// Remote path the simulator configuration is copied to.
pub const REMOTE_CONFIG_PATH: &str = "/tmp/fvp-config.txt";

/// Simulator invocation executed on the instance.
pub const SIMULATOR_COMMAND: &str =
    "./VHT-arm64/VHT_MPS3_Corstone_SSE-300 -f /tmp/fvp-config.txt -a /tmp/application.elf";

/// Errors raised by shell transport operations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ShellError {
    /// Raised when a required configuration value is blank.
    #[error("missing shell configuration value: {field}")]
    InvalidConfig {
        /// Name of the blank field.
        field: String,
    },
    /// Raised when an external command cannot be started.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// OS error message.
        message: String,
    },
    /// Raised when `ssh-keygen` fails to produce a key pair.
    #[error("key generation failed: {message}")]
    Keygen {
        /// Stderr from `ssh-keygen`, or an I/O error message.
        message: String,
    },
    /// Raised when a connection through the proxy cannot be established.
    #[error("failed to reach {user}@{host} via proxy {proxy_user}@{proxy_host}: {message}")]
    Connect {
        /// Remote login user.
        user: String,
        /// Instance address.
        host: String,
        /// Proxy login user (the project id).
        proxy_user: String,
        /// Proxy host.
        proxy_host: String,
        /// Stderr captured from the SSH client.
        message: String,
    },
    /// Raised when a file transfer returns a non-zero exit status.
    #[error("file transfer to {host} failed with status {status_text}: {stderr}")]
    Transfer {
        /// Instance address.
        host: String,
        /// Exit status reported by `scp`.
        status: Option<i32>,
        /// Human readable exit status.
        status_text: String,
        /// Stderr captured from `scp`.
        stderr: String,
    },
}

/// Shell transport settings, derived from harness configuration at startup.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ShellConfig {
    /// Path to the `ssh` executable.
    pub ssh_bin: String,
    /// Path to the `scp` executable.
    pub scp_bin: String,
    /// Path to the `ssh-keygen` executable.
    pub keygen_bin: String,
    /// Proxy host fronting instance private addresses.
    pub proxy_host: String,
    /// Proxy login user; the control plane expects the project id here.
    pub proxy_user: String,
    /// Login user on the emulated OS.
    pub user: String,
}

impl ShellConfig {
    /// Ensures configuration values are present after trimming whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`ShellError::InvalidConfig`] when any field is empty.
    pub fn validate(&self) -> Result<(), ShellError> {
        for (value, field) in [
            (&self.ssh_bin, "ssh_bin"),
            (&self.scp_bin, "scp_bin"),
            (&self.keygen_bin, "keygen_bin"),
            (&self.proxy_host, "proxy_host"),
            (&self.proxy_user, "proxy_user"),
            (&self.user, "user"),
        ] {
            if value.trim().is_empty() {
                return Err(ShellError::InvalidConfig {
                    field: field.to_owned(),
                });
            }
        }
        Ok(())
    }
}

/// Key pair generated for one controller session.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GeneratedKey {
    /// Path to the private key file.
    pub identity_file: Utf8PathBuf,
    /// Public key line suitable for registration as a project key.
    pub public_key: String,
}

/// Executes commands and transfers files on an instance through the proxy.
#[derive(Clone, Debug)]
pub struct ProxiedShell<R: CommandRunner> {
    config: ShellConfig,
    runner: R,
}

impl ProxiedShell<ProcessCommandRunner> {
    /// Convenience constructor that wires the real process runner.
    ///
    /// # Errors
    ///
    /// Returns [`ShellError::InvalidConfig`] when validation fails.
    pub fn with_process_runner(config: ShellConfig) -> Result<Self, ShellError> {
        Self::new(config, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> ProxiedShell<R> {
    /// Creates a new shell transport using the provided runner.
    ///
    /// # Errors
    ///
    /// Returns [`ShellError::InvalidConfig`] when configuration validation
    /// fails.
    pub fn new(config: ShellConfig, runner: R) -> Result<Self, ShellError> {
        config.validate()?;
        Ok(Self { config, runner })
    }

    /// Returns a reference to the underlying configuration.
    #[must_use]
    pub const fn config(&self) -> &ShellConfig {
        &self.config
    }

    #[cfg(test)]
    pub(crate) const fn runner(&self) -> &R {
        &self.runner
    }

    /// Generates an ECDSA key pair under `dir` and reads back the public
    /// half.
    ///
    /// # Errors
    ///
    /// Returns [`ShellError::Keygen`] when `ssh-keygen` fails or the public
    /// key cannot be read.
    pub fn generate_key(&self, dir: &Utf8Path) -> Result<GeneratedKey, ShellError> {
        let identity_file = dir.join("id_ecdsa");
        let args = vec![
            OsString::from("-q"),
            OsString::from("-t"),
            OsString::from("ecdsa"),
            OsString::from("-N"),
            OsString::from(""),
            OsString::from("-f"),
            OsString::from(identity_file.as_str()),
        ];
        let output = self.runner.run(&self.config.keygen_bin, &args)?;
        if !output.is_success() {
            return Err(ShellError::Keygen {
                message: output.stderr,
            });
        }

        let public_path = dir.join("id_ecdsa.pub");
        let public_key = std::fs::read_to_string(&public_path)
            .map_err(|err| ShellError::Keygen {
                message: format!("cannot read {public_path}: {err}"),
            })?
            .trim()
            .to_owned();

        Ok(GeneratedKey {
            identity_file,
            public_key,
        })
    }

    /// Copies `local` to `remote` on the instance at `host`.
    ///
    /// # Errors
    ///
    /// Returns [`ShellError::Transfer`] when `scp` exits non-zero.
    pub fn put(
        &self,
        identity_file: &Utf8Path,
        host: &str,
        local: &Utf8Path,
        remote: &str,
    ) -> Result<(), ShellError> {
        let mut args = self.common_options(identity_file);
        args.push(OsString::from(local.as_str()));
        // The remote side of an scp target goes through a shell.
        let remote_path = escape(remote.into());
        args.push(OsString::from(format!(
            "{}@{host}:{remote_path}",
            self.config.user
        )));

        let output = self.runner.run(&self.config.scp_bin, &args)?;
        if output.is_success() {
            return Ok(());
        }
        Err(ShellError::Transfer {
            host: host.to_owned(),
            status: output.code,
            status_text: status_text(output.code),
            stderr: output.stderr,
        })
    }

    /// Executes `command` on the instance at `host` and returns its output.
    ///
    /// The remote exit code is preserved in the returned
    /// [`CommandOutput::code`]; a non-zero program status is not an error
    /// here. Exit code 255 is the SSH client's own connection-failure
    /// marker and is surfaced as [`ShellError::Connect`] with proxy context.
    ///
    /// # Errors
    ///
    /// Returns [`ShellError::Connect`] when the transport itself fails.
    pub fn exec(
        &self,
        identity_file: &Utf8Path,
        host: &str,
        command: &str,
    ) -> Result<CommandOutput, ShellError> {
        let mut args = self.common_options(identity_file);
        args.push(OsString::from(format!("{}@{host}", self.config.user)));
        args.push(OsString::from(command));

        let output = self.runner.run(&self.config.ssh_bin, &args)?;
        if output.code == Some(255) {
            return Err(ShellError::Connect {
                user: self.config.user.clone(),
                host: host.to_owned(),
                proxy_user: self.config.proxy_user.clone(),
                proxy_host: self.config.proxy_host.clone(),
                message: output.stderr,
            });
        }
        Ok(output)
    }

    fn common_options(&self, identity_file: &Utf8Path) -> Vec<OsString> {
        vec![
            OsString::from("-i"),
            OsString::from(identity_file.as_str()),
            OsString::from("-o"),
            OsString::from("BatchMode=yes"),
            OsString::from("-o"),
            OsString::from("StrictHostKeyChecking=no"),
            OsString::from("-o"),
            OsString::from("UserKnownHostsFile=/dev/null"),
            OsString::from("-o"),
            OsString::from(format!(
                "ProxyJump={}@{}",
                self.config.proxy_user, self.config.proxy_host
            )),
        ]
    }
}

fn status_text(code: Option<i32>) -> String {
    code.map_or_else(|| String::from("unknown"), |value| value.to_string())
}
