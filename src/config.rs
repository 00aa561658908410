//! Configuration loading via `ortho-config`.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::client::{InstanceSpec, SpecError};

/// Default console marker printed by the Fast Models firmware images when
/// the simulated system reaches quiescence.
pub const DEFAULT_BOOT_MARKER: &str = "Info: /OSCI/SystemC: Simulation stopped by user.";

/// Name prefix applied to every instance the harness creates. The janitor
/// uses it to recognise leftovers.
pub const INSTANCE_NAME_PREFIX: &str = "avh-harness-";

/// Harness configuration derived from environment variables, configuration
/// files, and defaults.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "AVH",
    discovery(
        app_name = "avh-harness",
        env_var = "AVH_CONFIG_PATH",
        config_file_name = "avh-harness.toml",
        dotfile_name = ".avh-harness.toml",
        project_file_name = "avh-harness.toml"
    )
)]
pub struct HarnessConfig {
    /// Long-lived API token exchanged for a session token at startup. This
    /// value is required; its absence is a startup-time configuration error.
    pub api_token: String,
    /// Base URL of the control-plane API.
    #[ortho_config(default = "https://app.avh.arm.com/api".to_owned())]
    pub endpoint: String,
    /// Hardware flavor for new instances.
    #[ortho_config(default = "corstone-300fvp".to_owned())]
    pub default_flavor: String,
    /// Emulation OS family for new instances.
    #[ortho_config(default = "FastModels".to_owned())]
    pub default_os: String,
    /// OS/model version for new instances.
    #[ortho_config(default = "11.16.14".to_owned())]
    pub default_os_version: String,
    /// Literal console string treated as the boot-complete signal.
    #[ortho_config(default = DEFAULT_BOOT_MARKER.to_owned())]
    pub boot_marker: String,
    /// Console transport: `snapshot` polls the log endpoint, `stream` keeps
    /// a persistent channel open.
    #[ortho_config(default = "snapshot".to_owned())]
    pub console_mode: String,
    /// Program execution strategy: `console` observes the serial log across
    /// a reboot, `ssh` runs the simulator binary over a proxied shell.
    #[ortho_config(default = "console".to_owned())]
    pub exec_strategy: String,
    /// Whether upload failures in the console strategy abort the run instead
    /// of degrading to best-effort.
    #[ortho_config(default = false)]
    pub strict_upload: bool,
    /// Seconds between state/console polls. Independent from the timeouts.
    #[ortho_config(default = 1_u64)]
    pub poll_interval_secs: u64,
    /// Deadline for reaching the `on` state.
    #[ortho_config(default = 240_u64)]
    pub on_timeout_secs: u64,
    /// Deadline for observing the boot marker on the console.
    #[ortho_config(default = 240_u64)]
    pub boot_timeout_secs: u64,
    /// Deadline for observing the `rebooting` state after a reboot request.
    #[ortho_config(default = 240_u64)]
    pub reboot_timeout_secs: u64,
    /// Deadline for the control plane to forget a deleted instance.
    #[ortho_config(default = 60_u64)]
    pub delete_timeout_secs: u64,
    /// Deadline for a single program run.
    #[ortho_config(default = 120_u64)]
    pub run_timeout_secs: u64,
    /// SSH proxy host fronting instance private addresses.
    #[ortho_config(default = "proxy.app.avh.arm.com".to_owned())]
    pub proxy_host: String,
    /// Login user on the emulated OS.
    #[ortho_config(default = "ubuntu".to_owned())]
    pub ssh_user: String,
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Path to the `scp` executable.
    #[ortho_config(default = "scp".to_owned())]
    pub scp_bin: String,
    /// Path to the `ssh-keygen` executable.
    #[ortho_config(default = "ssh-keygen".to_owned())]
    pub keygen_bin: String,
}

/// Console transport selection parsed from [`HarnessConfig::console_mode`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConsoleMode {
    /// Poll the log-snapshot endpoint.
    Snapshot,
    /// Hold a persistent streaming channel.
    Stream,
}

/// Execution strategy selection parsed from [`HarnessConfig::exec_strategy`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExecStrategy {
    /// Upload, reboot, and watch the console for the boot marker.
    ConsoleObserve,
    /// Transfer files and invoke the simulator over a proxied shell.
    RemoteShell,
}

/// Timing knobs shared by every polling loop.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WaitTimings {
    /// Fixed interval between polls.
    pub poll_interval: Duration,
    /// Deadline for `wait_until_on`.
    pub on_timeout: Duration,
    /// Deadline for `wait_until_booted`.
    pub boot_timeout: Duration,
    /// Deadline for `wait_until_rebooting`.
    pub reboot_timeout: Duration,
    /// Deadline for `wait_until_deleted`.
    pub delete_timeout: Duration,
    /// Deadline for `run_program`.
    pub run_timeout: Duration,
}

/// Metadata for a configuration field, used to generate actionable error
/// messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl HarnessConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to avh-harness.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails, including when
    /// the required API token is absent from every source.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("avh-harness")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty
    /// or [`ConfigError::InvalidValue`] when a selector is unrecognised.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.api_token,
            &FieldMetadata::new("AVH API token", "AVH_API_TOKEN", "api_token"),
        )?;
        Self::require_field(
            &self.endpoint,
            &FieldMetadata::new("API endpoint", "AVH_ENDPOINT", "endpoint"),
        )?;
        Self::require_field(
            &self.default_flavor,
            &FieldMetadata::new("instance flavor", "AVH_DEFAULT_FLAVOR", "default_flavor"),
        )?;
        Self::require_field(
            &self.boot_marker,
            &FieldMetadata::new("boot marker", "AVH_BOOT_MARKER", "boot_marker"),
        )?;
        self.console_transport()?;
        self.strategy()?;
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: String::from("poll_interval_secs"),
                value: String::from("0"),
            });
        }
        Ok(())
    }

    /// Parses the configured console transport selector.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for an unknown mode string.
    pub fn console_transport(&self) -> Result<ConsoleMode, ConfigError> {
        match self.console_mode.trim() {
            "snapshot" => Ok(ConsoleMode::Snapshot),
            "stream" => Ok(ConsoleMode::Stream),
            other => Err(ConfigError::InvalidValue {
                field: String::from("console_mode"),
                value: other.to_owned(),
            }),
        }
    }

    /// Parses the configured execution strategy.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for an unknown strategy string.
    pub fn strategy(&self) -> Result<ExecStrategy, ConfigError> {
        match self.exec_strategy.trim() {
            "console" => Ok(ExecStrategy::ConsoleObserve),
            "ssh" => Ok(ExecStrategy::RemoteShell),
            other => Err(ConfigError::InvalidValue {
                field: String::from("exec_strategy"),
                value: other.to_owned(),
            }),
        }
    }

    /// Builds an [`InstanceSpec`] for a fresh harness-named instance.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the configured defaults fail validation.
    pub fn fresh_spec(&self) -> Result<InstanceSpec, ConfigError> {
        self.validate()?;
        InstanceSpec::builder()
            .name(format!(
                "{INSTANCE_NAME_PREFIX}{}",
                uuid::Uuid::new_v4().simple()
            ))
            .flavor(&self.default_flavor)
            .os(&self.default_os)
            .os_version(&self.default_os_version)
            .build()
            .map_err(ConfigError::from)
    }

    /// Returns the configured poll interval and deadlines as durations.
    #[must_use]
    pub const fn timings(&self) -> WaitTimings {
        WaitTimings {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            on_timeout: Duration::from_secs(self.on_timeout_secs),
            boot_timeout: Duration::from_secs(self.boot_timeout_secs),
            reboot_timeout: Duration::from_secs(self.reboot_timeout_secs),
            delete_timeout: Duration::from_secs(self.delete_timeout_secs),
            run_timeout: Duration::from_secs(self.run_timeout_secs),
        }
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a selector field holds an unrecognised value.
    #[error("invalid value for {field}: {value}")]
    InvalidValue {
        /// Field carrying the bad value.
        field: String,
        /// Value as configured.
        value: String,
    },
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

impl From<SpecError> for ConfigError {
    fn from(value: SpecError) -> Self {
        Self::Parse(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> HarnessConfig {
        HarnessConfig {
            api_token: String::from("token"),
            endpoint: String::from("https://app.avh.arm.com/api"),
            default_flavor: String::from("corstone-300fvp"),
            default_os: String::from("FastModels"),
            default_os_version: String::from("11.16.14"),
            boot_marker: DEFAULT_BOOT_MARKER.to_owned(),
            console_mode: String::from("snapshot"),
            exec_strategy: String::from("console"),
            strict_upload: false,
            poll_interval_secs: 1,
            on_timeout_secs: 240,
            boot_timeout_secs: 240,
            reboot_timeout_secs: 240,
            delete_timeout_secs: 60,
            run_timeout_secs: 120,
            proxy_host: String::from("proxy.app.avh.arm.com"),
            ssh_user: String::from("ubuntu"),
            ssh_bin: String::from("ssh"),
            scp_bin: String::from("scp"),
            keygen_bin: String::from("ssh-keygen"),
        }
    }

    #[test]
    fn validate_accepts_defaults() {
        base_config()
            .validate()
            .unwrap_or_else(|err| panic!("defaults should validate: {err}"));
    }

    #[test]
    fn validate_reports_missing_token_with_guidance() {
        let config = HarnessConfig {
            api_token: String::from("   "),
            ..base_config()
        };
        let Err(err) = config.validate() else {
            panic!("blank token should fail validation");
        };
        let message = err.to_string();
        assert!(message.contains("AVH_API_TOKEN"), "got: {message}");
    }

    #[test]
    fn validate_rejects_unknown_console_mode() {
        let config = HarnessConfig {
            console_mode: String::from("telnet"),
            ..base_config()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "console_mode"
        ));
    }

    #[test]
    fn validate_rejects_zero_poll_interval() {
        let config = HarnessConfig {
            poll_interval_secs: 0,
            ..base_config()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "poll_interval_secs"
        ));
    }

    #[test]
    fn fresh_spec_applies_name_prefix() {
        let spec = base_config()
            .fresh_spec()
            .unwrap_or_else(|err| panic!("spec should build: {err}"));
        assert!(spec.name.starts_with(INSTANCE_NAME_PREFIX));
        assert_eq!(spec.flavor, "corstone-300fvp");
    }
}
