//! Control-plane abstraction for instance lifecycle primitives.
//!
//! The lifecycle controller, harness, and janitor are written against this
//! trait so tests can substitute scripted fakes for the real HTTP client.
//! Every method maps to exactly one remote call; retry and polling policy is
//! the caller's responsibility.

use std::future::Future;
use std::pin::Pin;

use camino::Utf8Path;

use crate::client::{ClientError, InstanceSpec, InstanceState, InstanceSummary, UploadKind};

/// Future returned by control-plane operations.
pub type ClientFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ClientError>> + Send + 'a>>;

/// Primitive remote operations offered by the instance-management API.
pub trait ControlPlane {
    /// Returns the project identifier instances are scoped to.
    fn project_id(&self) -> &str;

    /// Creates a new instance and returns its opaque identifier.
    fn create_instance<'a>(&'a self, spec: &'a InstanceSpec) -> ClientFuture<'a, String>;

    /// Fetches the current lifecycle state of an instance.
    ///
    /// Implementations must surface [`ClientError::NotFound`] when the
    /// instance no longer exists; the controller relies on that to detect
    /// completed deletion.
    fn instance_state<'a>(&'a self, instance_id: &'a str) -> ClientFuture<'a, InstanceState>;

    /// Fetches the private network address of an instance.
    fn instance_ip<'a>(&'a self, instance_id: &'a str) -> ClientFuture<'a, String>;

    /// Fetches a full snapshot of the instance's console log.
    fn console_log<'a>(&'a self, instance_id: &'a str) -> ClientFuture<'a, String>;

    /// Fetches the per-instance console streaming URL.
    fn console_url<'a>(&'a self, instance_id: &'a str) -> ClientFuture<'a, String>;

    /// Uploads a local file to the instance and returns the file identifier.
    fn upload_vmfile<'a>(
        &'a self,
        kind: UploadKind,
        path: &'a Utf8Path,
        instance_id: &'a str,
    ) -> ClientFuture<'a, String>;

    /// Requests a reboot of the instance.
    fn reboot_instance<'a>(&'a self, instance_id: &'a str) -> ClientFuture<'a, ()>;

    /// Requests deletion of the instance.
    fn delete_instance<'a>(&'a self, instance_id: &'a str) -> ClientFuture<'a, ()>;

    /// Registers a public key with the project and returns the key id.
    fn register_project_key<'a>(
        &'a self,
        label: &'a str,
        public_key: &'a str,
    ) -> ClientFuture<'a, String>;

    /// Revokes a previously registered project key.
    fn revoke_project_key<'a>(&'a self, key_id: &'a str) -> ClientFuture<'a, ()>;

    /// Lists the instances visible in the default project.
    fn list_instances(&self) -> ClientFuture<'_, Vec<InstanceSummary>>;
}
