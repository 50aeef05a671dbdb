use crate::{
    core::domain::{
        error::DevbaoError,
        model::{
            instance_config::{ConfigOption, DevConfig},
            listener::Listener,
            node::{ENV_ADDR, ENV_TOKEN},
            storage::Storage,
        },
        value_object::ProductType,
    },
    lifecycle::application::response::node_response::NodeState,
    tests::support::{FAKE_BINARY, FAKE_PID, Harness},
};
use std::collections::BTreeMap;
use std::path::PathBuf;

fn dev_options() -> Vec<ConfigOption> {
    vec![ConfigOption::Dev(DevConfig {
        token: "devroot".into(),
        address: "127.0.0.1:8200".into(),
        tls: false,
    })]
}

fn raft_options(address: &str) -> Vec<ConfigOption> {
    vec![
        ConfigOption::Listener(Listener::tcp(address)),
        ConfigOption::Storage(Storage::Raft),
    ]
}

#[tokio::test]
async fn test_started_dev_node_exports_address_and_token() {
    let harness = Harness::stopped();
    let mut node = harness
        .nodes
        .build("dev", ProductType::Auto, dev_options())
        .await
        .unwrap();
    harness.nodes.start(&mut node).await.unwrap();

    let env = harness.nodes.env(&node).unwrap();
    let expected = BTreeMap::from([
        (ENV_ADDR.to_string(), "http://127.0.0.1:8200".to_string()),
        (ENV_TOKEN.to_string(), "devroot".to_string()),
    ]);
    assert_eq!(env, expected);

    let stored = harness.nodes.load("dev").await.unwrap();
    assert_eq!(stored.pid(), FAKE_PID);
    assert_eq!(stored.exec.unwrap().binary, PathBuf::from(FAKE_BINARY));
}

#[tokio::test]
async fn test_start_renders_production_configuration() {
    let harness = Harness::stopped();
    let mut node = harness
        .nodes
        .build("n0", ProductType::OpenBao, raft_options("127.0.0.1:8200"))
        .await
        .unwrap();
    harness.nodes.start(&mut node).await.unwrap();

    let directory = harness.nodes.directory("n0");
    let config = std::fs::read_to_string(directory.join("config.hcl")).unwrap();
    assert!(config.contains("storage \"raft\""));
    assert!(config.contains("cluster_addr = \"https://127.0.0.1:8201\""));
    assert!(config.contains("api_addr = \"http://127.0.0.1:8200\""));

    let exec = node.exec.unwrap();
    assert_eq!(exec.connection_address, "127.0.0.1:8200");
    assert!(exec.args.iter().any(|a| a.starts_with("-config=")));
}

#[tokio::test]
async fn test_clean_twice_succeeds() {
    let harness = Harness::stopped();
    harness
        .nodes
        .build("n0", ProductType::OpenBao, raft_options("127.0.0.1:8200"))
        .await
        .unwrap();

    let first = harness.nodes.clean("n0", false).await.unwrap();
    assert!(first.removed);
    assert!(!harness.nodes.exists("n0").await);

    let second = harness.nodes.clean("n0", false).await.unwrap();
    assert!(!second.removed);
    assert!(second.warnings.is_empty());
}

#[tokio::test]
async fn test_kill_forgets_process() {
    let harness = Harness::running();
    let mut node = harness
        .nodes
        .build("n0", ProductType::OpenBao, raft_options("127.0.0.1:8200"))
        .await
        .unwrap();
    harness.nodes.start(&mut node).await.unwrap();
    assert!(harness.nodes.is_running(&node));

    harness.nodes.kill(&mut node).await.unwrap();
    assert!(node.exec.is_none());
    assert!(harness.nodes.load("n0").await.unwrap().exec.is_none());
}

#[tokio::test]
async fn test_resume_refuses_running_node() {
    let harness = Harness::running();
    let mut node = harness
        .nodes
        .build("n0", ProductType::OpenBao, raft_options("127.0.0.1:8200"))
        .await
        .unwrap();
    harness.nodes.start(&mut node).await.unwrap();

    let err = harness.nodes.resume(&mut node).await.unwrap_err();
    assert!(matches!(err, DevbaoError::StateConflict(_)));
}

#[tokio::test]
async fn test_resume_dev_node_warns_about_lost_state() {
    let harness = Harness::stopped();
    let mut node = harness
        .nodes
        .build("dev", ProductType::Auto, dev_options())
        .await
        .unwrap();

    let outcome = harness.nodes.resume(&mut node).await.unwrap();
    assert_eq!(outcome.warnings.len(), 1);
    assert!(outcome.warnings[0].contains("dev mode"));
    assert_eq!(node.pid(), FAKE_PID);
}

#[tokio::test]
async fn test_rebuild_hands_over_process_snapshot() {
    let harness = Harness::running();
    let mut node = harness
        .nodes
        .build("n0", ProductType::OpenBao, raft_options("127.0.0.1:8200"))
        .await
        .unwrap();
    harness.nodes.start(&mut node).await.unwrap();

    let rebuilt = harness
        .nodes
        .build("n0", ProductType::OpenBao, raft_options("127.0.0.1:8300"))
        .await
        .unwrap();
    assert_eq!(rebuilt.pid(), FAKE_PID);
    assert!(rebuilt.token.is_empty());
}

#[tokio::test]
async fn test_clean_cluster_member_requires_force() {
    let harness = Harness::stopped();
    let mut node = harness
        .nodes
        .build("n0", ProductType::OpenBao, raft_options("127.0.0.1:8200"))
        .await
        .unwrap();
    node.cluster = "c".into();
    harness.nodes.save(&node).await.unwrap();

    let err = harness.nodes.clean("n0", false).await.unwrap_err();
    assert!(matches!(err, DevbaoError::StateConflict(_)));
    assert!(harness.nodes.exists("n0").await);

    assert!(harness.nodes.clean("n0", true).await.unwrap().removed);
}

#[tokio::test]
async fn test_forced_clean_tolerates_corrupt_record() {
    let harness = Harness::stopped();
    let directory = harness.workspace.node_dir("broken");
    std::fs::create_dir_all(&directory).unwrap();
    std::fs::write(directory.join("node.json"), "{not json").unwrap();

    assert!(harness.nodes.clean("broken", false).await.is_err());

    let outcome = harness.nodes.clean("broken", true).await.unwrap();
    assert!(outcome.removed);
    assert_eq!(outcome.warnings.len(), 1);
}

#[tokio::test]
async fn test_list_reports_state_and_unreadable_records() {
    let harness = Harness::stopped();
    harness
        .nodes
        .build("a", ProductType::OpenBao, raft_options("127.0.0.1:8200"))
        .await
        .unwrap();
    let broken = harness.workspace.node_dir("b");
    std::fs::create_dir_all(&broken).unwrap();
    std::fs::write(broken.join("node.json"), "[]").unwrap();

    let summaries = harness.nodes.list().await.unwrap();
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].name, "a");
    assert_eq!(summaries[0].state, NodeState::Stopped);
    assert_eq!(summaries[1].state, NodeState::Unreadable);
}

#[tokio::test]
async fn test_load_rejects_path_traversal() {
    let harness = Harness::stopped();
    let err = harness.nodes.load("../etc").await.unwrap_err();
    assert!(matches!(err, DevbaoError::Validation { .. }));
}

#[tokio::test]
async fn test_build_rejects_missing_storage() {
    let harness = Harness::stopped();
    let err = harness
        .nodes
        .build(
            "n0",
            ProductType::OpenBao,
            vec![ConfigOption::Listener(Listener::tcp("127.0.0.1:8200"))],
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("n0"));
    assert!(!harness.nodes.exists("n0").await);
}

#[tokio::test]
async fn test_logs_of_missing_file_are_empty() {
    let harness = Harness::stopped();
    let node = harness
        .nodes
        .build("n0", ProductType::OpenBao, raft_options("127.0.0.1:8200"))
        .await
        .unwrap();
    std::fs::write(
        harness.workspace.node_log("n0"),
        "one\ntwo\nthree\n",
    )
    .unwrap();

    assert_eq!(harness.nodes.logs(&node, false, 2).await.unwrap(), "two\nthree");
    assert_eq!(harness.nodes.logs(&node, true, 10).await.unwrap(), "");
}
