use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use lanmesh_api::{ApiState, NodeIdentity};
use lanmesh_core::Role;
use lanmesh_services::{DiscoveryStats, Registry};

use crate::*;

struct Api {
    base: String,
    registry: Registry,
    shutdown: broadcast::Sender<()>,
    task: tokio::task::JoinHandle<anyhow::Result<()>>,
    _dir: tempfile::TempDir,
}

async fn start_api() -> Api {
    let dir = tempfile::tempdir().unwrap();
    let registry = Registry::open(&dir.path().join("hosts.db")).unwrap();
    let state = ApiState {
        registry: registry.clone(),
        stats: Arc::new(DiscoveryStats::default()),
        identity: NodeIdentity {
            mac_address: "aa:bb:cc:dd:ee:99".into(),
            ip_address: "127.0.0.1".into(),
            hostname: "self".into(),
        },
        role: Role::Both,
        started_at: Instant::now(),
    };
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}/api", listener.local_addr().unwrap());
    let (shutdown, _) = broadcast::channel(1);
    let task = tokio::spawn(lanmesh_api::serve_on(listener, state, shutdown.subscribe()));

    Api {
        base,
        registry,
        shutdown,
        task,
        _dir: dir,
    }
}

impl Api {
    async fn stop(self) {
        let _ = self.shutdown.send(());
        self.task.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn test_api_lists_active_hosts() {
    let api = start_api().await;
    api.registry
        .upsert(&metadata("aa:bb:cc:dd:ee:01", "192.168.1.10", "host-a"))
        .unwrap();

    let body: Value = reqwest::get(format!("{}/hosts/active", api.base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let hosts = body["hosts"].as_array().unwrap();
    assert_eq!(hosts.len(), 1);
    assert_eq!(hosts[0]["metadata"]["hostname"], "host-a");
    assert_eq!(hosts[0]["packet_count"], 1);
    assert_eq!(hosts[0]["active"], true);

    let status: Value = reqwest::get(format!("{}/status", api.base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["hosts"]["total"], 1);
    assert_eq!(status["role"], "both");

    api.stop().await;
}

#[tokio::test]
async fn test_api_mark_key_pushed() {
    let api = start_api().await;
    api.registry
        .upsert(&metadata("aa:bb:cc:dd:ee:01", "192.168.1.10", "host-a"))
        .unwrap();
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/hosts/aa:bb:cc:dd:ee:01/key-pushed", api.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let record: Value = resp.json().await.unwrap();
    assert_eq!(record["ssh_key_pushed"], true);
    assert!(record["pushed_at"].is_u64());

    let resp = client
        .post(format!("{}/hosts/aa:bb:cc:dd:ee:ff/key-pushed", api.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "host aa:bb:cc:dd:ee:ff not found");
    assert_eq!(api.registry.get_all().unwrap().len(), 1);

    api.stop().await;
}
