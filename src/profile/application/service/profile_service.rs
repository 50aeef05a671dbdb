use crate::core::{
    domain::{
        error::{DevbaoError, DevbaoResult},
        model::{
            api_types::{MountConfig, MountInput, SecretResponse},
            profile::Profile,
        },
    },
    infrastructure::api_client::ApiClient,
};
use serde_json::{Value, json};
use std::future::Future;
use tracing::{debug, info};

const PROFILE_TARGET: &str = "devbao::profile";

const AIA_URLS_TEMPLATE: [(&str, &str); 3] = [
    ("issuing_certificates", "{{cluster_aia_path}}/issuer/{{issuer_id}}/der"),
    (
        "crl_distribution_points",
        "{{cluster_aia_path}}/issuer/{{issuer_id}}/crl/der",
    ),
    ("ocsp_servers", "{{cluster_aia_path}}/ocsp"),
];

const READER_POLICY: &str = r#"path "*" {
  capabilities = ["read", "list"]
}
"#;

const WRITER_POLICY: &str = r#"path "*" {
  capabilities = ["create", "read", "update", "patch", "delete", "list"]
}
"#;

/// Applies and removes profiles through a node's API.
///
/// Every step runs in order and the first failure aborts the script. Server
/// warnings are collected as `from <path>:\n\t<warning>` and returned on
/// success, or attached to the [`DevbaoError::Profile`] on failure.
#[derive(Debug, Clone, Default)]
pub struct ProfileService;

impl ProfileService {
    pub fn new() -> Self {
        Self
    }

    pub async fn setup(&self, client: &ApiClient, profile: Profile) -> DevbaoResult<Vec<String>> {
        info!(target: PROFILE_TARGET, %profile, address = client.address(), "applying profile");
        let mut script = Script::new(client, profile);
        match profile {
            Profile::Pki => setup_pki(&mut script).await?,
            Profile::Transit => setup_transit(&mut script).await?,
            Profile::Userpass => setup_userpass(&mut script).await?,
            Profile::Kv => setup_kv(&mut script).await?,
        }
        Ok(script.warnings)
    }

    pub async fn remove(&self, client: &ApiClient, profile: Profile) -> DevbaoResult<Vec<String>> {
        info!(target: PROFILE_TARGET, %profile, address = client.address(), "removing profile");
        let mut script = Script::new(client, profile);
        match profile {
            Profile::Pki => {
                script.run("unmount pki-int", client.unmount("pki-int")).await?;
                script.run("unmount pki-root", client.unmount("pki-root")).await?;
            }
            Profile::Transit => {
                script.run("unmount transit", client.unmount("transit")).await?;
            }
            Profile::Userpass => {
                script
                    .run("disable auth userpass", client.disable_auth("userpass"))
                    .await?;
                script
                    .run("delete policy writer", client.delete_policy("writer"))
                    .await?;
                script
                    .run("delete policy reader", client.delete_policy("reader"))
                    .await?;
            }
            Profile::Kv => {
                script.run("unmount kv", client.unmount("kv")).await?;
            }
        }
        Ok(script.warnings)
    }
}

/// One run of a profile: the client it talks to and the warnings so far.
struct Script<'a> {
    client: &'a ApiClient,
    profile: Profile,
    warnings: Vec<String>,
}

impl<'a> Script<'a> {
    fn new(client: &'a ApiClient, profile: Profile) -> Self {
        Self {
            client,
            profile,
            warnings: Vec::new(),
        }
    }

    fn fail(&self, step: &str, source: DevbaoError) -> DevbaoError {
        DevbaoError::Profile {
            profile: self.profile.to_string(),
            step: step.to_string(),
            warnings: self.warnings.clone(),
            source: Box::new(source),
        }
    }

    async fn run<T, Fut>(&self, step: &str, call: Fut) -> DevbaoResult<T>
    where
        Fut: Future<Output = DevbaoResult<T>>,
    {
        debug!(target: PROFILE_TARGET, profile = %self.profile, step, "running step");
        call.await.map_err(|source| self.fail(step, source))
    }

    async fn mount(&self, path: &str, mount_type: &str, max_lease_ttl: Option<&str>) -> DevbaoResult<()> {
        let input = MountInput {
            config: MountConfig {
                max_lease_ttl: max_lease_ttl.map(str::to_string),
                ..MountConfig::default()
            },
            ..MountInput::new(mount_type)
        };
        self.run(&format!("mount {path}"), self.client.mount(path, &input))
            .await
    }

    /// Writes `body` to `path` and returns the response data.
    async fn write(&mut self, path: &str, body: Value) -> DevbaoResult<Value> {
        self.write_labeled(path, path, body).await
    }

    async fn write_labeled(&mut self, path: &str, label: &str, body: Value) -> DevbaoResult<Value> {
        let response = self
            .run(&format!("write {label}"), self.client.write(path, &body))
            .await?;
        Ok(self.absorb(label, response))
    }

    async fn patch(&mut self, path: &str, label: &str, body: Value) -> DevbaoResult<Value> {
        let response = self
            .run(&format!("patch {label}"), self.client.merge_patch(path, &body))
            .await?;
        Ok(self.absorb(label, response))
    }

    fn absorb(&mut self, label: &str, response: Option<SecretResponse>) -> Value {
        let Some(response) = response else {
            return Value::Null;
        };
        for warning in response.warnings.unwrap_or_default() {
            self.warnings.push(format!("from {label}:\n\t{warning}"));
        }
        response.data.unwrap_or(Value::Null)
    }

    /// Extracts a string field from response data, failing the step if absent.
    fn field(&self, step: &str, data: &Value, field: &str) -> DevbaoResult<String> {
        data.get(field)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                self.fail(
                    step,
                    DevbaoError::Api {
                        path: step.to_string(),
                        status: 200,
                        message: format!("response carries no {field}"),
                    },
                )
            })
    }
}

fn cluster_config(client: &ApiClient, mount: &str) -> Value {
    let base = format!("{}/v1/{mount}", client.address());
    json!({ "path": base, "aia_path": base })
}

fn templated_urls() -> Value {
    let mut urls = serde_json::Map::new();
    for (key, template) in AIA_URLS_TEMPLATE {
        urls.insert(key.to_string(), Value::from(template));
    }
    urls.insert("enable_templating".to_string(), Value::Bool(true));
    Value::Object(urls)
}

/// Root CA in `pki-root`, intermediate in `pki-int` signed by it, and a
/// permissive `testing` role on the intermediate.
async fn setup_pki(script: &mut Script<'_>) -> DevbaoResult<()> {
    let client = script.client;

    script.mount("pki-root", "pki", Some("87600h")).await?;
    let root = script
        .write(
            "pki-root/root/generate/internal",
            json!({
                "common_name": "Example Root X1",
                "issuer_name": "root-x1",
                "key_name": "key-root-x1",
                "key_type": "ec",
                "key_bits": "256",
                "ttl": "87600h",
            }),
        )
        .await?;
    let root_certificate = script.field("pki-root/root/generate/internal", &root, "certificate")?;

    script
        .patch(
            "pki-root/issuer/root-x1",
            "pki-root/issuer/root-x1",
            json!({ "leaf_not_after_behavior": "permit" }),
        )
        .await?;
    script
        .write("pki-root/config/cluster", cluster_config(client, "pki-root"))
        .await?;
    script.write("pki-root/config/urls", templated_urls()).await?;
    script
        .write("pki-root/config/crl", json!({ "auto_rebuild": true }))
        .await?;

    script.mount("pki-int", "pki", Some("2160h")).await?;
    script
        .write("pki-int/config/cluster", cluster_config(client, "pki-int"))
        .await?;
    script.write("pki-int/config/urls", templated_urls()).await?;
    script
        .write("pki-int/config/acme", json!({ "enabled": true }))
        .await?;
    script
        .write("pki-int/config/crl", json!({ "auto_rebuild": true }))
        .await?;

    let csr = script
        .write(
            "pki-int/intermediate/generate/internal",
            json!({
                "common_name": "Example Int R1",
                "key_name": "key-int-r1",
                "key_type": "ec",
                "key_bits": "256",
            }),
        )
        .await?;
    let csr = script.field("pki-int/intermediate/generate/internal", &csr, "csr")?;

    let signed = script
        .write(
            "pki-root/root/sign-intermediate",
            json!({ "csr": csr, "ttl": "4380h" }),
        )
        .await?;
    let intermediate = script.field("pki-root/root/sign-intermediate", &signed, "certificate")?;

    script
        .write_labeled(
            "pki-int/issuers/import/cert",
            "pki-int/issuers/import/cert (intermediate import)",
            json!({ "pem_bundle": intermediate }),
        )
        .await?;
    script
        .patch(
            "pki-int/issuer/default",
            "pki-int/issuer/default",
            json!({ "issuer_name": "int-r1", "leaf_not_after_behavior": "truncate" }),
        )
        .await?;

    let imported = script
        .write_labeled(
            "pki-int/issuers/import/cert",
            "pki-int/issuers/import/cert (root import)",
            json!({ "pem_bundle": root_certificate }),
        )
        .await?;
    let root_issuer = imported
        .get("imported_issuers")
        .and_then(Value::as_array)
        .and_then(|issuers| issuers.first())
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            script.fail(
                "import root into pki-int",
                DevbaoError::Api {
                    path: "pki-int/issuers/import/cert".into(),
                    status: 200,
                    message: format!("root issuer was not imported: {imported}"),
                },
            )
        })?;

    let issuer_path = format!("pki-int/issuer/{root_issuer}");
    script
        .patch(
            &issuer_path,
            &format!("{issuer_path} (rename root)"),
            json!({ "issuer_name": "root-r1" }),
        )
        .await?;

    script
        .write(
            "pki-int/roles/testing",
            json!({
                "allow_any_name": true,
                "enforce_hostnames": false,
                "key_type": "any",
                "ttl": "2160h",
            }),
        )
        .await?;
    Ok(())
}

async fn setup_transit(script: &mut Script<'_>) -> DevbaoResult<()> {
    script.mount("transit", "transit", None).await?;
    script
        .write(
            "transit/keys/auto-unseal",
            json!({ "type": "aes256-gcm96" }),
        )
        .await?;
    Ok(())
}

async fn setup_userpass(script: &mut Script<'_>) -> DevbaoResult<()> {
    let client = script.client;
    script
        .run(
            "enable auth userpass",
            client.enable_auth("userpass", "userpass"),
        )
        .await?;
    script
        .run("put policy reader", client.put_policy("reader", READER_POLICY))
        .await?;
    script
        .run("put policy writer", client.put_policy("writer", WRITER_POLICY))
        .await?;
    script
        .write(
            "auth/userpass/users/testing",
            json!({ "password": "testing", "token_policies": "reader,writer" }),
        )
        .await?;
    Ok(())
}

async fn setup_kv(script: &mut Script<'_>) -> DevbaoResult<()> {
    let mut input = MountInput::new("kv");
    input.options.insert("version".into(), "2".into());
    script
        .run("mount kv", script.client.mount("kv", &input))
        .await
}
