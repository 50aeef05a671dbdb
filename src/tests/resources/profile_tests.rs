use crate::{
    core::{
        domain::{error::DevbaoError, model::profile::Profile},
        infrastructure::api_client::ApiClient,
    },
    profile::application::service::profile_service::ProfileService,
};
use serde_json::{Value, json};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, header, method, path},
};

const ROOT_PEM: &str = "-----BEGIN CERTIFICATE-----\nroot\n-----END CERTIFICATE-----";
const INT_PEM: &str = "-----BEGIN CERTIFICATE-----\nint\n-----END CERTIFICATE-----";
const CSR_PEM: &str = "-----BEGIN CERTIFICATE REQUEST-----\ncsr\n-----END CERTIFICATE REQUEST-----";

fn client(server: &MockServer) -> ApiClient {
    ApiClient::new(&server.uri(), Some("s.root"), None).unwrap()
}

fn data(body: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "data": body }))
}

async fn expect_once(server: &MockServer, verb: &str, route: &str, response: ResponseTemplate) {
    Mock::given(method(verb))
        .and(path(format!("/v1/{route}")))
        .respond_with(response)
        .expect(1)
        .mount(server)
        .await;
}

/// Mounts every endpoint a full PKI setup touches, except the root import.
async fn mock_pki_chain(server: &MockServer) {
    for mount in ["pki-root", "pki-int"] {
        expect_once(server, "POST", &format!("sys/mounts/{mount}"), ResponseTemplate::new(204)).await;
        for config in ["cluster", "urls", "crl"] {
            expect_once(
                server,
                "POST",
                &format!("{mount}/config/{config}"),
                ResponseTemplate::new(204),
            )
            .await;
        }
    }
    expect_once(
        server,
        "POST",
        "pki-root/root/generate/internal",
        data(json!({ "certificate": ROOT_PEM, "issuer_id": "0001" })),
    )
    .await;
    expect_once(server, "PATCH", "pki-root/issuer/root-x1", data(json!({}))).await;
    expect_once(server, "POST", "pki-int/config/acme", ResponseTemplate::new(204)).await;
    expect_once(
        server,
        "POST",
        "pki-int/intermediate/generate/internal",
        data(json!({ "csr": CSR_PEM })),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/v1/pki-root/root/sign-intermediate"))
        .and(body_partial_json(json!({ "csr": CSR_PEM, "ttl": "4380h" })))
        .respond_with(data(json!({ "certificate": INT_PEM })))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/pki-int/issuers/import/cert"))
        .and(body_partial_json(json!({ "pem_bundle": INT_PEM })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "imported_issuers": ["int-id"] },
            "warnings": ["no private key for issuer"]
        })))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/v1/pki-int/issuer/default"))
        .and(header("content-type", "application/merge-patch+json"))
        .respond_with(data(json!({})))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_pki_builds_root_and_intermediate_chain() {
    let server = MockServer::start().await;
    mock_pki_chain(&server).await;
    Mock::given(method("POST"))
        .and(path("/v1/pki-int/issuers/import/cert"))
        .and(body_partial_json(json!({ "pem_bundle": ROOT_PEM })))
        .respond_with(data(json!({ "imported_issuers": ["root-id"] })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/v1/pki-int/issuer/root-id"))
        .and(body_partial_json(json!({ "issuer_name": "root-r1" })))
        .respond_with(data(json!({})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/pki-int/roles/testing"))
        .and(body_partial_json(json!({ "allow_any_name": true })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "warnings": ["ttl exceeds mount max"]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let warnings = ProfileService::new()
        .setup(&client(&server), Profile::Pki)
        .await
        .unwrap();
    assert_eq!(
        warnings,
        vec![
            "from pki-int/issuers/import/cert (intermediate import):\n\tno private key for issuer",
            "from pki-int/roles/testing:\n\tttl exceeds mount max",
        ]
    );
}

#[tokio::test]
async fn test_pki_fails_when_root_is_not_imported() {
    let server = MockServer::start().await;
    mock_pki_chain(&server).await;
    Mock::given(method("POST"))
        .and(path("/v1/pki-int/issuers/import/cert"))
        .and(body_partial_json(json!({ "pem_bundle": ROOT_PEM })))
        .respond_with(data(json!({ "imported_issuers": [] })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/pki-int/roles/testing"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&server)
        .await;

    let err = ProfileService::new()
        .setup(&client(&server), Profile::Pki)
        .await
        .unwrap_err();
    match err {
        DevbaoError::Profile {
            step, warnings, ..
        } => {
            assert_eq!(step, "import root into pki-int");
            assert_eq!(warnings.len(), 1);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_userpass_creates_policies_and_user() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/sys/auth/userpass"))
        .and(body_partial_json(json!({ "type": "userpass" })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    for name in ["reader", "writer"] {
        expect_once(
            &server,
            "PUT",
            &format!("sys/policies/acl/{name}"),
            ResponseTemplate::new(204),
        )
        .await;
    }
    Mock::given(method("POST"))
        .and(path("/v1/auth/userpass/users/testing"))
        .and(body_partial_json(json!({
            "password": "testing",
            "token_policies": "reader,writer"
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let warnings = ProfileService::new()
        .setup(&client(&server), Profile::Userpass)
        .await
        .unwrap();
    assert!(warnings.is_empty());
}

#[tokio::test]
async fn test_userpass_removal_disables_auth_before_policies() {
    let server = MockServer::start().await;
    expect_once(&server, "DELETE", "sys/auth/userpass", ResponseTemplate::new(204)).await;
    expect_once(&server, "DELETE", "sys/policies/acl/writer", ResponseTemplate::new(500)).await;
    Mock::given(method("DELETE"))
        .and(path("/v1/sys/policies/acl/reader"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&server)
        .await;

    let err = ProfileService::new()
        .remove(&client(&server), Profile::Userpass)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("delete policy writer"));
}
