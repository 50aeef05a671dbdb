//! HTTP client for a node's administrative API.

use crate::core::domain::{
    error::{DevbaoError, DevbaoResult, ValidationError},
    model::api_types::{
        AuditDevice, AuditInput, AuthInput, DataEnvelope, HaStatus, InitRequest, InitResponse,
        InitStatusResponse, LeaderResponse, MountInput, PolicyRequest, RaftConfiguration,
        RaftConfigurationResponse, RaftJoinRequest, RaftJoinResponse, RaftRemovePeerRequest,
        SealStatusResponse, SecretResponse, UnsealRequest,
    },
};
use reqwest::{
    Client, Method,
    header::{ACCEPT, CONTENT_TYPE},
};
use serde::{Serialize, de::DeserializeOwned};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;
use url::Url;

const TOKEN_HEADER: &str = "X-Vault-Token";
const JSON: &str = "application/json";
const MERGE_PATCH: &str = "application/merge-patch+json";

/// Client for one node's administrative API.
///
/// Every request carries the node's token (if any) in the `X-Vault-Token`
/// header. Failed responses are turned into [`DevbaoError::Api`] with the
/// server's error messages; transport failures into
/// [`DevbaoError::Connection`].
#[derive(Debug, Clone)]
pub struct ApiClient {
    http_client: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    /// Creates a client for `address` (e.g. `http://127.0.0.1:8200`).
    ///
    /// # Errors
    /// Returns `DevbaoError::Validation` if the address is not a URL,
    /// `DevbaoError::Io` if the CA bundle cannot be read, and
    /// `DevbaoError::Connection` if the HTTP client cannot be built.
    pub fn new(address: &str, token: Option<&str>, ca_path: Option<&Path>) -> DevbaoResult<Self> {
        let url = Url::parse(address).map_err(|e| {
            ValidationError::field("address", format!("invalid API address {address:?}: {e}"))
        })?;

        let mut builder = Client::builder();
        if let Some(ca_path) = ca_path {
            if url.scheme() == "https" {
                let pem = std::fs::read(ca_path).map_err(|e| DevbaoError::io(ca_path, e))?;
                let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| {
                    DevbaoError::Connection(format!(
                        "invalid CA bundle {}: {e}",
                        ca_path.display()
                    ))
                })?;
                builder = builder.add_root_certificate(cert);
            }
        }
        let http_client = builder
            .build()
            .map_err(|e| DevbaoError::Connection(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: address.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()).map(str::to_string),
        })
    }

    pub fn address(&self) -> &str {
        &self.base_url
    }

    /// Returns a copy of this client authenticating with `token` instead.
    pub fn with_token(&self, token: &str) -> Self {
        Self {
            token: Some(token.to_string()).filter(|t| !t.is_empty()),
            ..self.clone()
        }
    }

    pub async fn get<T>(&self, path: &str) -> DevbaoResult<T>
    where
        T: DeserializeOwned,
    {
        self.execute_request(Method::GET, path, None::<&()>, JSON)
            .await
    }

    pub async fn post<B, T>(&self, path: &str, body: &B) -> DevbaoResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.execute_request(Method::POST, path, Some(body), JSON)
            .await
    }

    pub async fn put<B, T>(&self, path: &str, body: &B) -> DevbaoResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.execute_request(Method::PUT, path, Some(body), JSON)
            .await
    }

    pub async fn delete<T>(&self, path: &str) -> DevbaoResult<T>
    where
        T: DeserializeOwned,
    {
        self.execute_request(Method::DELETE, path, None::<&()>, JSON)
            .await
    }

    /// Core request execution: sends, checks the status, and decodes the body.
    /// An empty body decodes as JSON `null`, so `()` and `Option<_>` accept
    /// `204 No Content`.
    async fn execute_request<B, T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        content_type: &str,
    ) -> DevbaoResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let path = path.trim_start_matches('/');
        let url = format!("{}/v1/{}", self.base_url, path);
        debug!(target: "devbao::api", %method, %url, "request");

        let mut req_builder = self
            .http_client
            .request(method, &url)
            .header(ACCEPT, JSON);
        if let Some(token) = &self.token {
            req_builder = req_builder.header(TOKEN_HEADER, token);
        }
        if let Some(body) = body {
            let bytes = serde_json::to_vec(body).map_err(|source| DevbaoError::Serialization {
                context: format!("request body for {path}"),
                source,
            })?;
            req_builder = req_builder.header(CONTENT_TYPE, content_type).body(bytes);
        }

        let response = req_builder
            .send()
            .await
            .map_err(|e| DevbaoError::Connection(format!("HTTP request to {url} failed: {e}")))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| DevbaoError::Connection(format!("failed to read response from {url}: {e}")))?;

        if !status.is_success() {
            return Err(DevbaoError::Api {
                path: path.to_string(),
                status: status.as_u16(),
                message: error_message(&bytes),
            });
        }

        let payload: &[u8] = if bytes.iter().all(u8::is_ascii_whitespace) {
            b"null"
        } else {
            &bytes
        };
        serde_json::from_slice(payload).map_err(|e| DevbaoError::Api {
            path: path.to_string(),
            status: status.as_u16(),
            message: format!("failed to parse response: {e}"),
        })
    }

    pub async fn init_status(&self) -> DevbaoResult<bool> {
        let status: InitStatusResponse = self.get("sys/init").await?;
        Ok(status.initialized)
    }

    pub async fn init(&self, request: &InitRequest) -> DevbaoResult<InitResponse> {
        self.post("sys/init", request).await
    }

    pub async fn seal_status(&self) -> DevbaoResult<SealStatusResponse> {
        self.get("sys/seal-status").await
    }

    /// Submits one key share.
    pub async fn unseal(&self, key: &str) -> DevbaoResult<SealStatusResponse> {
        self.post("sys/unseal", &UnsealRequest { key }).await
    }

    pub async fn seal(&self) -> DevbaoResult<()> {
        self.put("sys/seal", &serde_json::json!({})).await
    }

    pub async fn leader(&self) -> DevbaoResult<LeaderResponse> {
        self.get("sys/leader").await
    }

    pub async fn raft_join(&self, request: &RaftJoinRequest) -> DevbaoResult<RaftJoinResponse> {
        self.post("sys/storage/raft/join", request).await
    }

    pub async fn raft_configuration(&self) -> DevbaoResult<RaftConfiguration> {
        let envelope: DataEnvelope<RaftConfigurationResponse> =
            self.get("sys/storage/raft/configuration").await?;
        Ok(envelope.data.config)
    }

    pub async fn raft_remove_peer(&self, server_id: &str) -> DevbaoResult<()> {
        let _: Option<SecretResponse> = self
            .post(
                "sys/storage/raft/remove-peer",
                &RaftRemovePeerRequest { server_id },
            )
            .await?;
        Ok(())
    }

    pub async fn ha_status(&self) -> DevbaoResult<HaStatus> {
        let envelope: DataEnvelope<HaStatus> = self.get("sys/ha-status").await?;
        Ok(envelope.data)
    }

    /// Lists secret engine mounts; doubles as a token validity probe.
    pub async fn list_mounts(&self) -> DevbaoResult<serde_json::Value> {
        self.get("sys/mounts").await
    }

    pub async fn mount(&self, path: &str, input: &MountInput) -> DevbaoResult<()> {
        let _: Option<SecretResponse> = self.post(&format!("sys/mounts/{path}"), input).await?;
        Ok(())
    }

    pub async fn unmount(&self, path: &str) -> DevbaoResult<()> {
        let _: Option<SecretResponse> = self.delete(&format!("sys/mounts/{path}")).await?;
        Ok(())
    }

    pub async fn enable_auth(&self, path: &str, auth_type: &str) -> DevbaoResult<()> {
        let input = AuthInput {
            auth_type,
            description: "",
        };
        let _: Option<SecretResponse> = self.post(&format!("sys/auth/{path}"), &input).await?;
        Ok(())
    }

    pub async fn disable_auth(&self, path: &str) -> DevbaoResult<()> {
        let _: Option<SecretResponse> = self.delete(&format!("sys/auth/{path}")).await?;
        Ok(())
    }

    pub async fn put_policy(&self, name: &str, policy: &str) -> DevbaoResult<()> {
        let _: Option<SecretResponse> = self
            .put(
                &format!("sys/policies/acl/{name}"),
                &PolicyRequest { policy },
            )
            .await?;
        Ok(())
    }

    pub async fn delete_policy(&self, name: &str) -> DevbaoResult<()> {
        let _: Option<SecretResponse> =
            self.delete(&format!("sys/policies/acl/{name}")).await?;
        Ok(())
    }

    /// Enabled audit devices keyed by mount path (with trailing slash).
    pub async fn list_audit(&self) -> DevbaoResult<BTreeMap<String, AuditDevice>> {
        let envelope: DataEnvelope<BTreeMap<String, AuditDevice>> = self.get("sys/audit").await?;
        Ok(envelope.data)
    }

    pub async fn enable_audit(&self, name: &str, input: &AuditInput) -> DevbaoResult<()> {
        let _: Option<SecretResponse> = self.put(&format!("sys/audit/{name}"), input).await?;
        Ok(())
    }

    /// Reads a logical path; `None` when the server returns no content.
    pub async fn read(&self, path: &str) -> DevbaoResult<Option<SecretResponse>> {
        self.get(path).await
    }

    pub async fn write<B>(&self, path: &str, body: &B) -> DevbaoResult<Option<SecretResponse>>
    where
        B: Serialize + ?Sized,
    {
        self.post(path, body).await
    }

    /// Applies a JSON merge patch to a logical path.
    pub async fn merge_patch<B>(
        &self,
        path: &str,
        body: &B,
    ) -> DevbaoResult<Option<SecretResponse>>
    where
        B: Serialize + ?Sized,
    {
        self.execute_request(Method::PATCH, path, Some(body), MERGE_PATCH)
            .await
    }
}

/// Extracts `{"errors": [...]}` from an error body, falling back to raw text.
fn error_message(body: &[u8]) -> String {
    #[derive(serde::Deserialize)]
    struct ErrorBody {
        #[serde(default)]
        errors: Vec<String>,
    }

    match serde_json::from_slice::<ErrorBody>(body) {
        Ok(parsed) if !parsed.errors.is_empty() => parsed.errors.join("; "),
        _ => {
            let text = String::from_utf8_lossy(body).trim().to_string();
            if text.is_empty() {
                "no error details returned".to_string()
            } else {
                text
            }
        }
    }
}
