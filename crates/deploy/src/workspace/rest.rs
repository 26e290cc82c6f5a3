//! Workspace client over the control-plane REST API.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};
use url::Url;

use super::{RemoteJob, WorkspaceClient, WorkspaceError, WorkspaceResult};
use crate::config::{CurrentUser, JobDeployment, Permission, Principal};

/// Default timeout for API requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Number of retries on transport failures.
const MAX_RETRIES: usize = 3;

pub struct RestWorkspaceClient {
    client: reqwest::Client,
    host: Url,
    token: String,
}

impl RestWorkspaceClient {
    pub fn new(host: &str, token: impl Into<String>) -> anyhow::Result<Self> {
        let host = Url::parse(host).context(format!("Failed to parse workspace host {}", host))?;
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            host,
            token: token.into(),
        })
    }

    fn url(&self, path: &str) -> WorkspaceResult<Url> {
        self.host
            .join(path)
            .map_err(|e| WorkspaceError::Transport(format!("invalid API path {}: {}", path, e)))
    }

    /// Send a request, retrying transport failures with exponential backoff.
    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Value>,
    ) -> WorkspaceResult<reqwest::Response> {
        let url = self.url(path)?;

        let attempt = || async {
            let mut request = self
                .client
                .request(method.clone(), url.clone())
                .bearer_auth(&self.token)
                .query(query);
            if let Some(body) = &body {
                request = request.json(body);
            }
            let response = request
                .send()
                .await
                .map_err(|e| WorkspaceError::Transport(e.to_string()))?;
            check_status(path, response).await
        };

        attempt
            .retry(ExponentialBuilder::default().with_max_times(MAX_RETRIES))
            .when(|e| matches!(e, WorkspaceError::Transport(_)))
            .notify(|err, dur| {
                tracing::debug!(
                    error = %err,
                    delay = ?dur,
                    path = %path,
                    "Retrying workspace request"
                );
            })
            .await
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Value>,
    ) -> WorkspaceResult<T> {
        self.send(method, path, query, body)
            .await?
            .json()
            .await
            .map_err(|e| WorkspaceError::Transport(format!("failed to decode {}: {}", path, e)))
    }

    async fn object_id(&self, path: &str) -> WorkspaceResult<u64> {
        #[derive(Deserialize)]
        struct Status {
            object_id: u64,
        }
        let status: Status = self
            .call(Method::GET, "/api/2.0/workspace/get-status", &[("path", path)], None)
            .await?;
        Ok(status.object_id)
    }
}

async fn check_status(
    path: &str,
    response: reqwest::Response,
) -> WorkspaceResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    #[derive(Deserialize, Default)]
    struct ApiError {
        #[serde(default)]
        error_code: String,
        #[serde(default)]
        message: String,
    }
    let body: ApiError = response.json().await.unwrap_or_default();
    let message = if body.message.is_empty() {
        path.to_string()
    } else {
        body.message
    };

    Err(match (status, body.error_code.as_str()) {
        (StatusCode::NOT_FOUND, _) | (_, "RESOURCE_DOES_NOT_EXIST") => {
            WorkspaceError::NotFound(message)
        }
        (StatusCode::CONFLICT, _) | (_, "RESOURCE_ALREADY_EXISTS") => {
            WorkspaceError::AlreadyExists(message)
        }
        (StatusCode::FORBIDDEN, _) | (_, "PERMISSION_DENIED") => {
            WorkspaceError::PermissionDenied(message)
        }
        (s, _) if s.is_server_error() => WorkspaceError::Transport(format!("{}: {}", s, message)),
        (s, _) => WorkspaceError::Api {
            status: s.as_u16(),
            message,
        },
    })
}

#[derive(Deserialize)]
struct ScimUser {
    #[serde(rename = "userName")]
    user_name: String,
    #[serde(default)]
    id: String,
    #[serde(default)]
    groups: Vec<ScimGroup>,
}

#[derive(Deserialize)]
struct ScimGroup {
    #[serde(default)]
    display: String,
}

#[derive(Deserialize, Default)]
struct JobList {
    #[serde(default)]
    jobs: Vec<JobEntry>,
}

#[derive(Deserialize)]
struct JobEntry {
    job_id: u64,
    settings: JobSettings,
}

#[derive(Deserialize)]
struct JobSettings {
    #[serde(default)]
    name: String,
    #[serde(default)]
    deployment: Option<JobDeployment>,
}

fn acl_entry(permission: &Permission) -> Value {
    let key = match permission.principal {
        Principal::UserName(_) => "user_name",
        Principal::GroupName(_) => "group_name",
        Principal::ServicePrincipalName(_) => "service_principal_name",
    };
    json!({ key: permission.principal.name(), "permission_level": permission.level })
}

#[async_trait]
impl WorkspaceClient for RestWorkspaceClient {
    async fn current_user(&self) -> WorkspaceResult<CurrentUser> {
        let me: ScimUser = self
            .call(Method::GET, "/api/2.0/preview/scim/v2/Me", &[], None)
            .await?;
        Ok(CurrentUser {
            user_name: me.user_name,
            short_name: String::new(),
            id: me.id,
            groups: me.groups.into_iter().map(|g| g.display).collect(),
        })
    }

    async fn find_job_by_name(&self, name: &str) -> WorkspaceResult<Option<RemoteJob>> {
        let list: JobList = self
            .call(Method::GET, "/api/2.1/jobs/list", &[("name", name)], None)
            .await?;
        Ok(list
            .jobs
            .into_iter()
            .find(|j| j.settings.name == name)
            .map(|j| RemoteJob {
                id: j.job_id.to_string(),
                name: j.settings.name,
                deployment: j.settings.deployment,
            }))
    }

    async fn read_file(&self, path: &str) -> WorkspaceResult<Vec<u8>> {
        let response = self
            .send(
                Method::GET,
                "/api/2.0/workspace/export",
                &[("path", path), ("direct_download", "true")],
                None,
            )
            .await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| WorkspaceError::Transport(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn write_file(
        &self,
        path: &str,
        content: &[u8],
        overwrite: bool,
    ) -> WorkspaceResult<()> {
        if let Some((parent, _)) = path.rsplit_once('/')
            && !parent.is_empty()
        {
            self.mkdirs(parent).await?;
        }

        let url = self.url(&format!(
            "/api/2.0/workspace-files/import-file/{}",
            path.trim_start_matches('/')
        ))?;
        let overwrite = overwrite.to_string();
        let body = content.to_vec();

        let attempt = || async {
            let response = self
                .client
                .post(url.clone())
                .bearer_auth(&self.token)
                .query(&[("overwrite", overwrite.as_str())])
                .body(body.clone())
                .send()
                .await
                .map_err(|e| WorkspaceError::Transport(e.to_string()))?;
            check_status(path, response).await
        };

        attempt
            .retry(ExponentialBuilder::default().with_max_times(MAX_RETRIES))
            .when(|e| matches!(e, WorkspaceError::Transport(_)))
            .await?;
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> WorkspaceResult<()> {
        self.send(
            Method::POST,
            "/api/2.0/workspace/delete",
            &[],
            Some(json!({ "path": path })),
        )
        .await?;
        Ok(())
    }

    async fn mkdirs(&self, path: &str) -> WorkspaceResult<()> {
        self.send(
            Method::POST,
            "/api/2.0/workspace/mkdirs",
            &[],
            Some(json!({ "path": path })),
        )
        .await?;
        Ok(())
    }

    async fn set_directory_permissions(
        &self,
        path: &str,
        acl: &[Permission],
    ) -> WorkspaceResult<()> {
        let id = self.object_id(path).await?;
        let body = json!({
            "access_control_list": acl.iter().map(acl_entry).collect::<Vec<_>>(),
        });
        self.send(
            Method::PUT,
            &format!("/api/2.0/permissions/directories/{}", id),
            &[],
            Some(body),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acl_entry_uses_principal_key() {
        let entry = acl_entry(&Permission::group("CAN_READ", "analysts"));
        assert_eq!(entry["group_name"], "analysts");
        assert_eq!(entry["permission_level"], "CAN_READ");
    }

    #[test]
    fn test_new_rejects_invalid_host() {
        assert!(RestWorkspaceClient::new("not a url", "t").is_err());
        assert!(RestWorkspaceClient::new("https://acme.cloud.databricks.com", "t").is_ok());
    }

    #[test]
    fn test_job_list_decodes_deployment() {
        let list: JobList = serde_json::from_value(json!({
            "jobs": [{
                "job_id": 7,
                "settings": {
                    "name": "job1",
                    "deployment": {"kind": "BUNDLE", "metadata_file_path": "/a/state/metadata.json"}
                }
            }]
        }))
        .unwrap();
        let job = &list.jobs[0];
        assert_eq!(job.job_id, 7);
        assert_eq!(
            job.settings.deployment.as_ref().unwrap().metadata_file_path,
            "/a/state/metadata.json"
        );
    }
}
