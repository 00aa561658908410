//! HTTP client for the AVH instance-management API.
//!
//! [`AvhClient::login`] exchanges the long-lived API token for a short-lived
//! bearer token and resolves the default project; every other method is a
//! single request with no retry. Serde request/response structs stay private
//! to this module so the rest of the crate only sees domain types.

mod error;
mod types;

use std::sync::LazyLock;
use std::time::Duration;

use camino::Utf8Path;
use serde::Deserialize;
use serde::Serialize;

use crate::control_plane::{ClientFuture, ControlPlane};

pub use error::ClientError;
pub use types::{
    InstanceSpec, InstanceSpecBuilder, InstanceState, InstanceSummary, SpecError, UploadKind,
};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

#[derive(Serialize)]
struct LoginRequest<'a> {
    api_token: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

#[derive(Deserialize)]
struct ProjectRow {
    id: String,
}

#[derive(Serialize)]
struct CreateInstanceRequest<'a> {
    name: &'a str,
    project: &'a str,
    flavor: &'a str,
    // The control plane calls the version string `os` and the OS family
    // `osbuild`; the naming is inherited from the vendor API.
    os: &'a str,
    osbuild: &'a str,
}

#[derive(Deserialize)]
struct CreatedInstance {
    id: String,
}

#[derive(Deserialize)]
struct InstanceDetails {
    wifi_ip: String,
}

#[derive(Deserialize)]
struct ConsoleEndpoint {
    url: String,
}

#[derive(Deserialize)]
struct InstanceRow {
    id: String,
    name: String,
    state: String,
}

#[derive(Deserialize)]
struct UploadedImage {
    id: String,
}

#[derive(Serialize)]
struct RegisterKeyRequest<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    label: &'a str,
    key: &'a str,
}

#[derive(Deserialize)]
struct RegisteredKey {
    identifier: String,
}

/// Authenticated client for the AVH control plane.
///
/// The bearer token and default project id are immutable after login, so a
/// single client may be shared read-only across several controllers.
#[derive(Clone, Debug)]
pub struct AvhClient {
    endpoint: String,
    token: String,
    default_project_id: String,
}

impl AvhClient {
    /// Exchanges `api_token` for a session token and resolves the default
    /// project.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Auth`] when the token is rejected,
    /// [`ClientError::NoProject`] when the account exposes no project, or a
    /// transport/decode error when the exchange fails.
    pub async fn login(endpoint: &str, api_token: &str) -> Result<Self, ClientError> {
        let base = endpoint.trim_end_matches('/').to_owned();
        let url = format!("{base}/v1/auth/login");
        let response = HTTP_CLIENT
            .post(&url)
            .json(&LoginRequest { api_token })
            .send()
            .await
            .map_err(|err| ClientError::transport(&url, &err))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| ClientError::transport(&url, &err))?;
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ClientError::Auth {
                message: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        if !status.is_success() {
            return Err(ClientError::Api {
                status: status.as_u16(),
                message: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        let login: LoginResponse = serde_json::from_slice(&body).map_err(|err| {
            ClientError::Decode {
                what: "login".to_owned(),
                message: err.to_string(),
            }
        })?;

        let client = Self {
            endpoint: base,
            token: login.token,
            default_project_id: String::new(),
        };
        let mut projects: Vec<ProjectRow> = client.get_json("/v1/projects", "projects").await?;
        let Some(first) = projects.drain(..).next() else {
            return Err(ClientError::NoProject);
        };

        Ok(Self {
            default_project_id: first.id,
            ..client
        })
    }

    /// Returns the default project identifier resolved at login.
    #[must_use]
    pub fn default_project_id(&self) -> &str {
        &self.default_project_id
    }

    /// Creates an instance and returns its identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the API call fails.
    pub async fn create_instance(&self, spec: &InstanceSpec) -> Result<String, ClientError> {
        let payload = CreateInstanceRequest {
            name: &spec.name,
            project: &self.default_project_id,
            flavor: &spec.flavor,
            os: &spec.os_version,
            osbuild: &spec.os,
        };
        let url = self.url("/v1/instances");
        let response = HTTP_CLIENT
            .post(&url)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await
            .map_err(|err| ClientError::transport(&url, &err))?;
        let body = Self::ensure_success(response, "instance", &spec.name).await?;
        let created: CreatedInstance =
            serde_json::from_slice(&body).map_err(|err| ClientError::Decode {
                what: "create_instance".to_owned(),
                message: err.to_string(),
            })?;
        Ok(created.id)
    }

    /// Fetches the current lifecycle state of `instance_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotFound`] when the instance no longer exists.
    pub async fn instance_state(&self, instance_id: &str) -> Result<InstanceState, ClientError> {
        let path = format!("/v1/instances/{instance_id}/state");
        let body = self.get_bytes(&path, "instance", instance_id).await?;
        // The endpoint returns either a bare string or a JSON-quoted one.
        let text = serde_json::from_slice::<String>(&body)
            .unwrap_or_else(|_| String::from_utf8_lossy(&body).trim().to_owned());
        Ok(InstanceState::from(text))
    }

    /// Fetches the instance's private network address.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the API call fails.
    pub async fn instance_ip(&self, instance_id: &str) -> Result<String, ClientError> {
        let path = format!("/v1/instances/{instance_id}");
        let body = self.get_bytes(&path, "instance", instance_id).await?;
        let details: InstanceDetails =
            serde_json::from_slice(&body).map_err(|err| ClientError::Decode {
                what: "instance".to_owned(),
                message: err.to_string(),
            })?;
        Ok(details.wifi_ip)
    }

    /// Fetches the full console log snapshot for `instance_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the API call fails.
    pub async fn console_log(&self, instance_id: &str) -> Result<String, ClientError> {
        let path = format!("/v1/instances/{instance_id}/consoleLog");
        let body = self.get_bytes(&path, "instance", instance_id).await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    /// Fetches the streaming console URL for `instance_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the API call fails.
    pub async fn console_url(&self, instance_id: &str) -> Result<String, ClientError> {
        let path = format!("/v1/instances/{instance_id}/console");
        let body = self.get_bytes(&path, "instance", instance_id).await?;
        let endpoint: ConsoleEndpoint =
            serde_json::from_slice(&body).map_err(|err| ClientError::Decode {
                what: "console".to_owned(),
                message: err.to_string(),
            })?;
        Ok(endpoint.url)
    }

    /// Uploads a local file as a `vmfile` image attached to `instance_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::UploadSource`] when the local file cannot be
    /// read, or an API error when the upload is rejected.
    pub async fn upload_vmfile(
        &self,
        kind: UploadKind,
        path: &Utf8Path,
        instance_id: &str,
    ) -> Result<String, ClientError> {
        let data = std::fs::read(path).map_err(|err| ClientError::UploadSource {
            path: path.to_string(),
            message: err.to_string(),
        })?;
        let file_name = path.file_name().unwrap_or("upload").to_owned();
        let form = reqwest::multipart::Form::new()
            .text("type", "vmfile")
            .text("encoding", "plain")
            .text("name", kind.image_name())
            .text("project", self.default_project_id.clone())
            .text("instance", instance_id.to_owned())
            .part(
                "file",
                reqwest::multipart::Part::bytes(data).file_name(file_name),
            );

        let url = self.url("/v1/images");
        let response = HTTP_CLIENT
            .post(&url)
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .await
            .map_err(|err| ClientError::transport(&url, &err))?;
        let body = Self::ensure_success(response, "instance", instance_id).await?;
        let uploaded: UploadedImage =
            serde_json::from_slice(&body).map_err(|err| ClientError::Decode {
                what: "upload_vmfile".to_owned(),
                message: err.to_string(),
            })?;
        Ok(uploaded.id)
    }

    /// Requests a reboot of `instance_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the API call fails.
    pub async fn reboot_instance(&self, instance_id: &str) -> Result<(), ClientError> {
        let url = self.url(&format!("/v1/instances/{instance_id}/reboot"));
        let response = HTTP_CLIENT
            .post(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|err| ClientError::transport(&url, &err))?;
        Self::ensure_success(response, "instance", instance_id).await?;
        Ok(())
    }

    /// Requests deletion of `instance_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the API call fails.
    pub async fn delete_instance(&self, instance_id: &str) -> Result<(), ClientError> {
        let url = self.url(&format!("/v1/instances/{instance_id}"));
        let response = HTTP_CLIENT
            .delete(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|err| ClientError::transport(&url, &err))?;
        Self::ensure_success(response, "instance", instance_id).await?;
        Ok(())
    }

    /// Registers `public_key` as a project authorized key.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the API call fails.
    pub async fn register_project_key(
        &self,
        label: &str,
        public_key: &str,
    ) -> Result<String, ClientError> {
        let url = self.url(&format!(
            "/v1/projects/{}/keys",
            self.default_project_id
        ));
        let payload = RegisterKeyRequest {
            kind: "ssh",
            label,
            key: public_key,
        };
        let response = HTTP_CLIENT
            .post(&url)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await
            .map_err(|err| ClientError::transport(&url, &err))?;
        let body = Self::ensure_success(response, "project", &self.default_project_id).await?;
        let registered: RegisteredKey =
            serde_json::from_slice(&body).map_err(|err| ClientError::Decode {
                what: "register_project_key".to_owned(),
                message: err.to_string(),
            })?;
        Ok(registered.identifier)
    }

    /// Revokes a previously registered project key.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the API call fails.
    pub async fn revoke_project_key(&self, key_id: &str) -> Result<(), ClientError> {
        let url = self.url(&format!(
            "/v1/projects/{}/keys/{key_id}",
            self.default_project_id
        ));
        let response = HTTP_CLIENT
            .delete(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|err| ClientError::transport(&url, &err))?;
        Self::ensure_success(response, "key", key_id).await?;
        Ok(())
    }

    /// Lists the instances in the default project.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the API call fails.
    pub async fn list_instances(&self) -> Result<Vec<InstanceSummary>, ClientError> {
        let rows: Vec<InstanceRow> = self.get_json("/v1/instances", "instances").await?;
        Ok(rows
            .into_iter()
            .map(|row| InstanceSummary {
                id: row.id,
                name: row.name,
                state: InstanceState::from(row.state),
            })
            .collect())
    }

    /// Releases pooled connections.
    ///
    /// Consuming the client makes a second close impossible; the shared
    /// connection pool itself is reclaimed when the process exits.
    pub fn close(self) {}

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.endpoint)
    }

    async fn get_bytes(
        &self,
        path: &str,
        resource: &str,
        id: &str,
    ) -> Result<Vec<u8>, ClientError> {
        let url = self.url(path);
        let response = HTTP_CLIENT
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|err| ClientError::transport(&url, &err))?;
        Self::ensure_success(response, resource, id).await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        what: &str,
    ) -> Result<T, ClientError> {
        let body = self.get_bytes(path, what, "-").await?;
        serde_json::from_slice(&body).map_err(|err| ClientError::Decode {
            what: what.to_owned(),
            message: err.to_string(),
        })
    }

    async fn ensure_success(
        response: reqwest::Response,
        resource: &str,
        id: &str,
    ) -> Result<Vec<u8>, ClientError> {
        let status = response.status();
        let url = response.url().to_string();
        let body = response
            .bytes()
            .await
            .map_err(|err| ClientError::transport(&url, &err))?
            .to_vec();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ClientError::not_found(resource, id));
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ClientError::Auth {
                message: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        if !status.is_success() {
            return Err(ClientError::Api {
                status: status.as_u16(),
                message: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        Ok(body)
    }
}

impl ControlPlane for AvhClient {
    fn project_id(&self) -> &str {
        &self.default_project_id
    }

    fn create_instance<'a>(&'a self, spec: &'a InstanceSpec) -> ClientFuture<'a, String> {
        Box::pin(self.create_instance(spec))
    }

    fn instance_state<'a>(&'a self, instance_id: &'a str) -> ClientFuture<'a, InstanceState> {
        Box::pin(self.instance_state(instance_id))
    }

    fn instance_ip<'a>(&'a self, instance_id: &'a str) -> ClientFuture<'a, String> {
        Box::pin(self.instance_ip(instance_id))
    }

    fn console_log<'a>(&'a self, instance_id: &'a str) -> ClientFuture<'a, String> {
        Box::pin(self.console_log(instance_id))
    }

    fn console_url<'a>(&'a self, instance_id: &'a str) -> ClientFuture<'a, String> {
        Box::pin(self.console_url(instance_id))
    }

    fn upload_vmfile<'a>(
        &'a self,
        kind: UploadKind,
        path: &'a Utf8Path,
        instance_id: &'a str,
    ) -> ClientFuture<'a, String> {
        Box::pin(self.upload_vmfile(kind, path, instance_id))
    }

    fn reboot_instance<'a>(&'a self, instance_id: &'a str) -> ClientFuture<'a, ()> {
        Box::pin(self.reboot_instance(instance_id))
    }

    fn delete_instance<'a>(&'a self, instance_id: &'a str) -> ClientFuture<'a, ()> {
        Box::pin(self.delete_instance(instance_id))
    }

    fn register_project_key<'a>(
        &'a self,
        label: &'a str,
        public_key: &'a str,
    ) -> ClientFuture<'a, String> {
        Box::pin(self.register_project_key(label, public_key))
    }

    fn revoke_project_key<'a>(&'a self, key_id: &'a str) -> ClientFuture<'a, ()> {
        Box::pin(self.revoke_project_key(key_id))
    }

    fn list_instances(&self) -> ClientFuture<'_, Vec<InstanceSummary>> {
        Box::pin(self.list_instances())
    }
}

#[cfg(test)]
mod tests;
