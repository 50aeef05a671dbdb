use crate::{
    cluster::application::{
        request::cluster_start_request::ClusterStartRequest,
        response::cluster_response::{JoinOutcome, RemoveOutcome},
    },
    core::domain::{
        error::DevbaoError,
        model::{
            cluster::Cluster,
            instance_config::{ConfigOption, DevConfig},
            listener::Listener,
            node::Node,
            seal::{Seal, StaticSeal},
            storage::Storage,
        },
        value_object::ProductType,
    },
    tests::support::Harness,
};
use serde_json::{Value, json};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_json, method, path},
};

fn seal_status(sealed: bool) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "sealed": sealed, "initialized": true, "t": 2, "n": 3, "progress": 0
    }))
}

async fn mock_leader(server: &MockServer, is_self: bool) {
    Mock::given(method("GET"))
        .and(path("/v1/sys/leader"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ha_enabled": true, "is_self": is_self, "leader_address": ""
        })))
        .mount(server)
        .await;
}

/// Builds `n0` on `server` with root credentials and forms cluster `c` from it.
async fn founded_cluster(harness: &Harness, server: &MockServer, seals: Vec<Seal>) -> Node {
    let mut leader = harness.production_node("n0", server, seals).await;
    leader.token = "s.root".into();
    leader.unseal_keys = vec!["k1".into(), "k2".into()];
    harness.nodes.save(&leader).await.unwrap();
    harness.clusters.form("c", "n0", false).await.unwrap();
    harness.nodes.load("n0").await.unwrap()
}

/// Tags `name` with cluster `c` and, if `listed`, appends it to the record.
async fn enroll(harness: &Harness, name: &str, listed: bool) {
    let mut node = harness.nodes.load(name).await.unwrap();
    node.cluster = "c".into();
    harness.nodes.save(&node).await.unwrap();
    if listed {
        let mut cluster = harness.workspace.read_cluster("c").await.unwrap();
        cluster.nodes.push(name.to_string());
        harness.workspace.write_cluster(&cluster).await.unwrap();
    }
}

#[tokio::test]
async fn test_form_rejects_node_of_another_cluster() {
    let server = MockServer::start().await;
    let harness = Harness::stopped();
    harness.production_node("a", &server, Vec::new()).await;

    let cluster = harness.clusters.form("first", "a", false).await.unwrap();
    assert_eq!(cluster.nodes, vec!["a"]);
    assert_eq!(harness.nodes.load("a").await.unwrap().cluster, "first");

    let err = harness.clusters.form("second", "a", false).await.unwrap_err();
    assert!(matches!(err, DevbaoError::StateConflict(_)));
    assert!(err.to_string().contains("first"));
    assert!(!harness.clusters.exists("second").await);
}

#[tokio::test]
async fn test_form_refuses_existing_cluster_without_overwrite() {
    let server = MockServer::start().await;
    let harness = Harness::stopped();
    harness.production_node("a", &server, Vec::new()).await;
    harness.production_node("b", &server, Vec::new()).await;
    harness.clusters.form("c", "a", false).await.unwrap();

    let err = harness.clusters.form("c", "b", false).await.unwrap_err();
    assert!(matches!(err, DevbaoError::StateConflict(_)));

    harness.clusters.form("c", "b", true).await.unwrap();
    assert!(harness.nodes.load("a").await.unwrap().cluster.is_empty());
    assert_eq!(harness.clusters.load("c").await.unwrap().nodes, vec!["b"]);
}

#[tokio::test]
async fn test_form_requires_raft_storage_and_production_mode() {
    let harness = Harness::stopped();
    harness
        .nodes
        .build(
            "file",
            ProductType::OpenBao,
            vec![
                ConfigOption::Listener(Listener::tcp("127.0.0.1:8200")),
                ConfigOption::Storage(Storage::File),
            ],
        )
        .await
        .unwrap();
    harness
        .nodes
        .build(
            "dev",
            ProductType::Auto,
            vec![ConfigOption::Dev(DevConfig::default())],
        )
        .await
        .unwrap();

    let err = harness.clusters.form("c", "file", false).await.unwrap_err();
    assert!(matches!(err, DevbaoError::Validation { .. }));
    let err = harness.clusters.form("c", "dev", false).await.unwrap_err();
    assert!(err.to_string().contains("dev mode"));
}

#[tokio::test]
async fn test_load_detects_untagged_member() {
    let server = MockServer::start().await;
    let harness = Harness::stopped();
    founded_cluster(&harness, &server, Vec::new()).await;
    harness.production_node("n1", &server, Vec::new()).await;
    harness
        .workspace
        .write_cluster(&Cluster {
            nodes: vec!["n0".into(), "n1".into()],
            ..Cluster::new("c", "n0").unwrap()
        })
        .await
        .unwrap();

    let err = harness.clusters.load("c").await.unwrap_err();
    assert!(matches!(err, DevbaoError::Consistency(_)));
}

#[tokio::test]
async fn test_find_leader_collects_member_errors() {
    let server = MockServer::start().await;
    let harness = Harness::stopped();
    founded_cluster(&harness, &server, Vec::new()).await;
    mock_leader(&server, false).await;

    let cluster = harness.clusters.load("c").await.unwrap();
    let err = harness.clusters.find_leader(&cluster).await.unwrap_err();
    match err {
        DevbaoError::NoLeader { cluster, errors } => {
            assert_eq!(cluster, "c");
            assert_eq!(errors, vec!["node 0/n0: not the active node"]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_join_rejects_mismatched_seals_without_joining() {
    let leader_server = MockServer::start().await;
    let candidate_server = MockServer::start().await;
    let harness = Harness::stopped();
    founded_cluster(
        &harness,
        &leader_server,
        vec![Seal::Static(StaticSeal::generate())],
    )
    .await;
    harness
        .production_node("n1", &candidate_server, Vec::new())
        .await;
    mock_leader(&leader_server, true).await;

    Mock::given(method("POST"))
        .and(path("/v1/sys/storage/raft/join"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"joined": true})))
        .expect(0)
        .mount(&candidate_server)
        .await;

    let err = harness.clusters.join("c", "n1").await.unwrap_err();
    assert!(err.to_string().contains("mismatched seal configuration counts"));

    let candidate = harness.nodes.load("n1").await.unwrap();
    assert!(candidate.cluster.is_empty());
    assert!(candidate.token.is_empty());
    assert_eq!(harness.clusters.load("c").await.unwrap().nodes, vec!["n0"]);
}

#[tokio::test]
async fn test_three_nodes_join_in_order() {
    let servers = [
        MockServer::start().await,
        MockServer::start().await,
        MockServer::start().await,
    ];
    let harness = Harness::stopped();
    let seal = Seal::Static(StaticSeal::generate());
    founded_cluster(&harness, &servers[0], vec![seal.clone()]).await;
    harness
        .production_node("n1", &servers[1], vec![seal.clone()])
        .await;
    harness.production_node("n2", &servers[2], vec![seal]).await;

    mock_leader(&servers[0], true).await;
    for follower in &servers[1..] {
        mock_leader(follower, false).await;
        Mock::given(method("POST"))
            .and(path("/v1/sys/storage/raft/join"))
            .and(body_json(json!({
                "leader_api_addr": servers[0].uri(),
                "retry": true
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"joined": true})))
            .expect(1)
            .mount(follower)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/sys/seal-status"))
            .respond_with(seal_status(false))
            .mount(follower)
            .await;
        // Auto-unsealed followers never receive key shares.
        Mock::given(method("POST"))
            .and(path("/v1/sys/unseal"))
            .respond_with(seal_status(false))
            .expect(0)
            .mount(follower)
            .await;
    }

    assert_eq!(
        harness.clusters.join("c", "n1").await.unwrap(),
        JoinOutcome::Joined { resumed: false }
    );
    assert_eq!(
        harness.clusters.join("c", "n2").await.unwrap(),
        JoinOutcome::Joined { resumed: false }
    );
    assert_eq!(
        harness.clusters.join("c", "n2").await.unwrap(),
        JoinOutcome::AlreadyMember
    );

    let cluster = harness.clusters.load("c").await.unwrap();
    assert_eq!(cluster.nodes, vec!["n0", "n1", "n2"]);
    assert_eq!(harness.clusters.find_leader(&cluster).await.unwrap().name, "n0");

    let follower = harness.nodes.load("n2").await.unwrap();
    assert_eq!(follower.token, "s.root");
    assert_eq!(follower.cluster, "c");
}

#[tokio::test]
async fn test_join_resumes_pending_member_at_unseal() {
    let leader_server = MockServer::start().await;
    let candidate_server = MockServer::start().await;
    let harness = Harness::stopped();
    founded_cluster(&harness, &leader_server, Vec::new()).await;
    harness
        .production_node("n1", &candidate_server, Vec::new())
        .await;
    enroll(&harness, "n1", false).await;
    mock_leader(&leader_server, true).await;

    Mock::given(method("POST"))
        .and(path("/v1/sys/storage/raft/join"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"joined": true})))
        .expect(0)
        .mount(&candidate_server)
        .await;
    // Responsive probe and first unseal check see the node sealed.
    Mock::given(method("GET"))
        .and(path("/v1/sys/seal-status"))
        .respond_with(seal_status(true))
        .up_to_n_times(2)
        .mount(&candidate_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/sys/seal-status"))
        .respond_with(seal_status(false))
        .mount(&candidate_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/sys/unseal"))
        .and(body_json(json!({"key": "k1"})))
        .respond_with(seal_status(false))
        .expect(1)
        .mount(&candidate_server)
        .await;

    assert_eq!(
        harness.clusters.join("c", "n1").await.unwrap(),
        JoinOutcome::Joined { resumed: true }
    );
    assert_eq!(
        harness.clusters.load("c").await.unwrap().nodes,
        vec!["n0", "n1"]
    );
    assert_eq!(
        harness.nodes.load("n1").await.unwrap().unseal_keys,
        vec!["k1", "k2"]
    );
}

#[tokio::test]
async fn test_remove_stale_member_skips_remove_peer() {
    let leader_server = MockServer::start().await;
    let member_server = MockServer::start().await;
    let harness = Harness::stopped();
    founded_cluster(&harness, &leader_server, Vec::new()).await;
    harness
        .production_node("n1", &member_server, Vec::new())
        .await;
    enroll(&harness, "n1", true).await;
    mock_leader(&leader_server, true).await;

    Mock::given(method("GET"))
        .and(path("/v1/sys/ha-status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"nodes": [{
                "hostname": "n0",
                "api_address": leader_server.uri(),
                "cluster_address": "https://10.0.0.1:8201",
                "active_node": true
            }]}
        })))
        .mount(&leader_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/sys/storage/raft/remove-peer"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&leader_server)
        .await;

    assert_eq!(
        harness.clusters.remove("c", "n1").await.unwrap(),
        RemoveOutcome::Stale
    );
    assert_eq!(harness.clusters.load("c").await.unwrap().nodes, vec!["n0"]);
    assert!(harness.nodes.load("n1").await.unwrap().cluster.is_empty());
}

#[tokio::test]
async fn test_remove_live_member_maps_cluster_address_to_raft_id() {
    let leader_server = MockServer::start().await;
    let member_server = MockServer::start().await;
    let harness = Harness::stopped();
    founded_cluster(&harness, &leader_server, Vec::new()).await;
    harness
        .production_node("n1", &member_server, Vec::new())
        .await;
    enroll(&harness, "n1", true).await;
    mock_leader(&leader_server, true).await;

    Mock::given(method("GET"))
        .and(path("/v1/sys/ha-status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"nodes": [
                {
                    "api_address": leader_server.uri(),
                    "cluster_address": "https://10.0.0.1:8201",
                    "active_node": true
                },
                {
                    "api_address": member_server.uri(),
                    "cluster_address": "https://10.0.0.2:8201",
                    "active_node": false
                }
            ]}
        })))
        .mount(&leader_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/sys/storage/raft/configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"config": {"index": 12, "servers": [
                {"node_id": "raft-a", "address": "10.0.0.1:8201", "leader": true, "voter": true},
                {"node_id": "raft-b", "address": "10.0.0.2:8201", "leader": false, "voter": true}
            ]}}
        })))
        .mount(&leader_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/sys/storage/raft/remove-peer"))
        .and(body_json(json!({"server_id": "raft-b"})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&leader_server)
        .await;

    assert_eq!(
        harness.clusters.remove("c", "n1").await.unwrap(),
        RemoveOutcome::Removed {
            raft_id: "raft-b".into()
        }
    );
    assert_eq!(harness.clusters.load("c").await.unwrap().nodes, vec!["n0"]);
}

#[tokio::test]
async fn test_unseal_all_reports_already_unsealed_members() {
    let server = MockServer::start().await;
    let harness = Harness::stopped();
    founded_cluster(&harness, &server, Vec::new()).await;
    Mock::given(method("GET"))
        .and(path("/v1/sys/seal-status"))
        .respond_with(seal_status(false))
        .mount(&server)
        .await;

    let results = harness.clusters.unseal_all("c").await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].node, "n0");
    assert!(!results[0].unsealed);
}

#[tokio::test]
async fn test_clean_removes_members_and_pending_joins() {
    let server = MockServer::start().await;
    let harness = Harness::stopped();
    founded_cluster(&harness, &server, Vec::new()).await;
    harness.production_node("n1", &server, Vec::new()).await;
    enroll(&harness, "n1", false).await;
    harness.production_node("other", &server, Vec::new()).await;

    let outcome = harness.clusters.clean("c", false).await.unwrap();
    assert!(outcome.removed);
    assert!(!harness.clusters.exists("c").await);
    assert!(!harness.nodes.exists("n0").await);
    assert!(!harness.nodes.exists("n1").await);
    assert!(harness.nodes.exists("other").await);

    assert!(!harness.clusters.clean("c", false).await.unwrap().removed);
}

#[tokio::test]
async fn test_start_single_node_cluster() {
    let server = MockServer::start().await;
    let harness = Harness::stopped();

    Mock::given(method("GET"))
        .and(path("/v1/sys/init"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"initialized": false})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/sys/init"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "keys_base64": ["k1", "k2", "k3"],
            "root_token": "s.root"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/sys/seal-status"))
        .respond_with(seal_status(true))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/sys/seal-status"))
        .respond_with(seal_status(false))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/sys/unseal"))
        .respond_with(seal_status(true))
        .expect(2)
        .mount(&server)
        .await;
    mock_leader(&server, true).await;

    let mut request = ClusterStartRequest::new("solo");
    request.count = 1;
    request.listen = "127.0.0.1".into();
    request.base_port = server.address().port();

    let outcome = harness.clusters.start(&request, false).await.unwrap();
    assert_eq!(outcome.nodes, vec!["solo-node-0"]);
    assert_eq!(outcome.leader.name, "solo-node-0");
    assert_eq!(outcome.leader.token, "s.root");

    let err = harness.clusters.start(&request, false).await.unwrap_err();
    assert!(matches!(err, DevbaoError::StateConflict(_)));
}

#[tokio::test]
async fn test_start_rejects_empty_cluster_and_port_overflow() {
    let harness = Harness::stopped();
    let mut request = ClusterStartRequest::new("c");
    request.count = 0;
    assert!(matches!(
        harness.clusters.start(&request, false).await,
        Err(DevbaoError::Validation { .. })
    ));

    request.count = 3;
    request.base_port = 65_500;
    let err = harness.clusters.start(&request, false).await.unwrap_err();
    assert!(err.to_string().contains("no port left"));
    assert!(!harness.clusters.exists("c").await);
}

/// Leader `n0` and listed member `n1`, with HA status mapping both nodes to
/// the given cluster addresses.
async fn live_pair(
    leader_address: &str,
    member_address: &str,
) -> (Harness, MockServer, MockServer) {
    let leader_server = MockServer::start().await;
    let member_server = MockServer::start().await;
    let harness = Harness::stopped();
    founded_cluster(&harness, &leader_server, Vec::new()).await;
    harness
        .production_node("n1", &member_server, Vec::new())
        .await;
    enroll(&harness, "n1", true).await;
    mock_leader(&leader_server, true).await;

    Mock::given(method("GET"))
        .and(path("/v1/sys/ha-status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"nodes": [
                {
                    "api_address": leader_server.uri(),
                    "cluster_address": leader_address,
                    "active_node": true
                },
                {
                    "api_address": member_server.uri(),
                    "cluster_address": member_address,
                    "active_node": false
                }
            ]}
        })))
        .mount(&leader_server)
        .await;
    (harness, leader_server, member_server)
}

async fn mock_raft_servers(server: &MockServer, servers: Value) {
    Mock::given(method("GET"))
        .and(path("/v1/sys/storage/raft/configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"config": {"index": 3, "servers": servers}}
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_remove_matches_whole_transport_address() {
    let (harness, leader_server, _member_server) =
        live_pair("https://10.0.0.1:8201", "https://110.0.0.1:8201").await;
    mock_raft_servers(
        &leader_server,
        json!([
            {"node_id": "leader-id", "address": "10.0.0.1:8201", "leader": true, "voter": true},
            {"node_id": "member-id", "address": "110.0.0.1:8201", "leader": false, "voter": true}
        ]),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/v1/sys/storage/raft/remove-peer"))
        .and(body_json(json!({"server_id": "member-id"})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&leader_server)
        .await;

    assert_eq!(
        harness.clusters.remove("c", "n1").await.unwrap(),
        RemoveOutcome::Removed {
            raft_id: "member-id".into()
        }
    );
}

#[tokio::test]
async fn test_remove_fails_when_live_member_has_no_raft_server() {
    let (harness, leader_server, _member_server) =
        live_pair("https://127.0.0.1:8201", "https://127.0.0.1:8301").await;
    mock_raft_servers(
        &leader_server,
        json!([
            {"node_id": "leader-id", "address": "127.0.0.1:8201", "leader": true, "voter": true},
            {"node_id": "prefix-id", "address": "127.0.0.1:830", "leader": false, "voter": true}
        ]),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/v1/sys/storage/raft/remove-peer"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&leader_server)
        .await;

    let err = harness.clusters.remove("c", "n1").await.unwrap_err();
    assert!(matches!(err, DevbaoError::Consistency(_)));
    assert!(err.to_string().contains("https://127.0.0.1:8301"));

    assert_eq!(harness.nodes.load("n1").await.unwrap().cluster, "c");
    assert_eq!(
        harness.clusters.load("c").await.unwrap().nodes,
        vec!["n0", "n1"]
    );
}
