//! Domain types shared between the client and the lifecycle controller.

use thiserror::Error;

/// Lifecycle state reported by the control plane for an instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum InstanceState {
    /// Instance exists but is powered off.
    Off,
    /// Instance is being provisioned.
    Creating,
    /// Instance is powered on and the model is executing.
    On,
    /// Instance is restarting.
    Rebooting,
    /// Instance is being torn down.
    Deleting,
    /// Instance entered a terminal error state.
    Error,
    /// State string the client does not recognise.
    Unknown(String),
}

impl InstanceState {
    /// Returns the wire representation of the state.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Off => "off",
            Self::Creating => "creating",
            Self::On => "on",
            Self::Rebooting => "rebooting",
            Self::Deleting => "deleting",
            Self::Error => "error",
            Self::Unknown(other) => other.as_str(),
        }
    }
}

impl From<&str> for InstanceState {
    fn from(value: &str) -> Self {
        match value {
            "off" => Self::Off,
            "creating" => Self::Creating,
            "on" => Self::On,
            "rebooting" => Self::Rebooting,
            "deleting" => Self::Deleting,
            "error" => Self::Error,
            other => Self::Unknown(other.to_owned()),
        }
    }
}

impl From<String> for InstanceState {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

/// Kind of file uploaded to an instance before a console-observed run.
///
/// The control plane stores both as `vmfile` images; the name tells the
/// booted model which role each file plays.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UploadKind {
    /// Simulator configuration file.
    FvpConfig,
    /// Firmware application image.
    Application,
}

impl UploadKind {
    /// Returns the image name the control plane expects for this kind.
    #[must_use]
    pub const fn image_name(self) -> &'static str {
        match self {
            Self::FvpConfig => "config-file",
            Self::Application => "application",
        }
    }
}

/// Parameters required to create a new emulation instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceSpec {
    /// Human readable instance name shown in the vendor dashboard.
    pub name: String,
    /// Hardware profile to emulate (for example `corstone-300fvp`).
    pub flavor: String,
    /// Emulation OS family (for example `FastModels`).
    pub os: String,
    /// OS/model version (for example `11.16.14`).
    pub os_version: String,
}

impl InstanceSpec {
    /// Starts a builder for an [`InstanceSpec`].
    #[must_use]
    pub fn builder() -> InstanceSpecBuilder {
        InstanceSpecBuilder::default()
    }

    /// Validates the instance spec, returning a descriptive error when a required
    /// field is missing.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::Validation`] when any field is empty.
    pub fn validate(&self) -> Result<(), SpecError> {
        if self.name.is_empty() {
            return Err(SpecError::Validation("name".to_owned()));
        }
        if self.flavor.is_empty() {
            return Err(SpecError::Validation("flavor".to_owned()));
        }
        if self.os.is_empty() {
            return Err(SpecError::Validation("os".to_owned()));
        }
        if self.os_version.is_empty() {
            return Err(SpecError::Validation("os_version".to_owned()));
        }
        Ok(())
    }
}

/// Builder for [`InstanceSpec`] that defers trimming and validation to
/// construction.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InstanceSpecBuilder {
    name: String,
    flavor: String,
    os: String,
    os_version: String,
}

impl InstanceSpecBuilder {
    /// Sets the instance name.
    #[must_use]
    pub fn name(mut self, value: impl Into<String>) -> Self {
        self.name = value.into();
        self
    }

    /// Sets the hardware flavor.
    #[must_use]
    pub fn flavor(mut self, value: impl Into<String>) -> Self {
        self.flavor = value.into();
        self
    }

    /// Sets the OS family.
    #[must_use]
    pub fn os(mut self, value: impl Into<String>) -> Self {
        self.os = value.into();
        self
    }

    /// Sets the OS version.
    #[must_use]
    pub fn os_version(mut self, value: impl Into<String>) -> Self {
        self.os_version = value.into();
        self
    }

    /// Builds and validates the [`InstanceSpec`], trimming string inputs.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::Validation`] when any required field is empty.
    pub fn build(self) -> Result<InstanceSpec, SpecError> {
        let spec = InstanceSpec {
            name: self.name.trim().to_owned(),
            flavor: self.flavor.trim().to_owned(),
            os: self.os.trim().to_owned(),
            os_version: self.os_version.trim().to_owned(),
        };
        spec.validate()?;
        Ok(spec)
    }
}

/// Summary row returned when listing a project's instances.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceSummary {
    /// Opaque instance identifier.
    pub id: String,
    /// Instance name as created.
    pub name: String,
    /// Last reported lifecycle state.
    pub state: InstanceState,
}

/// Errors raised while assembling an [`InstanceSpec`].
#[derive(Debug, Error, Eq, PartialEq)]
pub enum SpecError {
    /// Raised when a spec is missing a required field.
    #[error("missing or empty field: {0}")]
    Validation(String),
}
