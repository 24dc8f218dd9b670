//! Integration tests for distlog nodes
//!
//! Runs real nodes on loopback ports and drives them over TCP.

use std::time::Duration;

use tempfile::TempDir;

use distlog_core::{CallerIdentity, ServiceError};
use distlog_node::{MembershipEvent, Node, NodeConfig, NodeError, PeerConfig};
use distlog_transport::LogClient;

const TIMEOUT: Duration = Duration::from_secs(5);

fn node_config(dir: &TempDir, name: &str) -> NodeConfig {
    NodeConfig::with_data_dir(dir.path())
        .with_name(name)
        .with_bind_addr("127.0.0.1:0")
        .with_connect_timeout(Duration::from_secs(1))
}

async fn start_node(config: NodeConfig) -> (Node, String) {
    let node = Node::new(config).await.unwrap();
    let addr = node.start().await.unwrap().to_string();
    (node, addr)
}

async fn client(addr: &str, identity: &str) -> LogClient {
    LogClient::connect(addr, CallerIdentity::new(identity), TIMEOUT)
        .await
        .unwrap()
}

async fn wait_for_offset(node: &Node, next: u64) {
    tokio::time::timeout(TIMEOUT, async {
        while node.log().next_offset().unwrap() < next {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_static_peer_replication() {
    let (dir_a, dir_b) = (TempDir::new().unwrap(), TempDir::new().unwrap());
    let (node_a, addr_a) = start_node(node_config(&dir_a, "a")).await;

    let mut producer = client(&addr_a, "root").await;
    assert_eq!(producer.produce("first").await.unwrap(), 0);
    assert_eq!(producer.produce("second").await.unwrap(), 1);

    let config_b = node_config(&dir_b, "b").with_peer(PeerConfig::new("a", addr_a.clone()));
    let (node_b, addr_b) = start_node(config_b).await;
    assert!(node_b.replicator().is_replicating("a"));

    wait_for_offset(&node_b, 2).await;

    // Records produced after the stream opened arrive too
    assert_eq!(producer.produce("third").await.unwrap(), 2);
    wait_for_offset(&node_b, 3).await;

    let mut reader = client(&addr_b, "root").await;
    for (offset, value) in ["first", "second", "third"].iter().enumerate() {
        let record = reader.consume(offset as u64).await.unwrap();
        assert_eq!(record.value.as_ref(), value.as_bytes());
    }

    node_b.stop().await.unwrap();
    node_a.stop().await.unwrap();
}

#[tokio::test]
async fn test_membership_events_drive_replication() {
    let (dir_a, dir_b) = (TempDir::new().unwrap(), TempDir::new().unwrap());
    let (node_a, addr_a) = start_node(node_config(&dir_a, "a")).await;
    let (node_b, _) = start_node(node_config(&dir_b, "b")).await;

    let mut producer = client(&addr_a, "root").await;
    producer.produce("hello").await.unwrap();

    let events = node_b.membership_events();
    events
        .send(MembershipEvent::Joined {
            name: "a".into(),
            addr: addr_a.clone(),
        })
        .await
        .unwrap();
    wait_for_offset(&node_b, 1).await;

    events
        .send(MembershipEvent::Left { name: "a".into() })
        .await
        .unwrap();
    tokio::time::timeout(TIMEOUT, async {
        while node_b.replicator().is_replicating("a") {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    producer.produce("after leave").await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(node_b.log().next_offset().unwrap(), 1);

    node_b.stop().await.unwrap();
    node_a.stop().await.unwrap();
}

#[tokio::test]
async fn test_unreachable_peer_deregisters() {
    let dir = TempDir::new().unwrap();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead = listener.local_addr().unwrap().to_string();
    drop(listener);

    let config = node_config(&dir, "b").with_peer(PeerConfig::new("dead", dead));
    let (node, _) = start_node(config).await;

    tokio::time::timeout(TIMEOUT, async {
        while node.replicator().is_replicating("dead") {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    node.stop().await.unwrap();
}

#[tokio::test]
async fn test_acl_policy_over_the_wire() {
    let dir = TempDir::new().unwrap();
    let policy = dir.path().join("policy.toml");
    std::fs::write(
        &policy,
        r#"
        [[rule]]
        subject = "root"
        object = "*"
        action = "*"

        [[rule]]
        subject = "reader"
        object = "*"
        action = "consume"
        "#,
    )
    .unwrap();

    let (node, addr) = start_node(node_config(&dir, "a").with_acl_policy(&policy)).await;

    let mut root = client(&addr, "root").await;
    assert_eq!(root.produce("hello world").await.unwrap(), 0);

    let mut reader = client(&addr, "reader").await;
    assert_eq!(reader.consume(0).await.unwrap().value.as_ref(), b"hello world");
    assert!(reader.produce("nope").await.unwrap_err().is_permission_denied());

    let mut nobody = client(&addr, "nobody").await;
    assert!(nobody.consume(0).await.unwrap_err().is_permission_denied());

    assert_eq!(
        root.consume(1).await.unwrap_err(),
        ServiceError::OffsetOutOfRange { offset: 1 }
    );
    assert_eq!(node.log().next_offset().unwrap(), 1);

    node.stop().await.unwrap();
}

#[tokio::test]
async fn test_restart_keeps_records() {
    let dir = TempDir::new().unwrap();
    {
        let (node, addr) = start_node(node_config(&dir, "a")).await;
        let mut producer = client(&addr, "root").await;
        for value in ["a", "b", "c"] {
            producer.produce(value).await.unwrap();
        }
        node.stop().await.unwrap();
        assert!(matches!(node.local_addr(), Err(NodeError::NotStarted)));
    }

    let (node, addr) = start_node(node_config(&dir, "a")).await;
    let mut producer = client(&addr, "root").await;
    assert_eq!(producer.produce("d").await.unwrap(), 3);
    assert_eq!(producer.consume(0).await.unwrap().value.as_ref(), b"a");

    node.stop().await.unwrap();
}
