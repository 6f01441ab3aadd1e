//! Integration test for the agent's reconciliation loop.
//!
//! Runs the real `run` loop under paused virtual time and checks that the
//! agent registers itself, picks up a published update, and stops cleanly
//! on shutdown. Phase-by-phase behavior is covered by the unit tests; this
//! exercises the tick/notification/shutdown plumbing around them.

use std::sync::Arc;
use std::time::Duration;

use rollout_agent::config::Config;
use rollout_agent::health::{HealthCheck, MockHealthCheck};
use rollout_agent::reconciler::AgentReconciler;
use rollout_agent::updater::{MockUpdateApi, UpdateApi};
use rollout_id::NodeName;
use rollout_record::{MemoryStore, Phase, RecordStore};
use tokio::sync::watch;

fn config() -> Config {
    Config {
        node_name: "worker-0".parse().unwrap(),
        partition: "default".parse().unwrap(),
        update_api_url: "http://127.0.0.1:4518".to_string(),
        reconcile_interval_secs: 1,
        conflict_retry_limit: 5,
        log_level: "debug".to_string(),
    }
}

#[tokio::test(start_paused = true)]
async fn reconciliation_loop_runs_until_shutdown() {
    let store = Arc::new(MemoryStore::new());
    let update_api = Arc::new(MockUpdateApi::new("1.0.0".parse().unwrap()));
    let health = Arc::new(MockHealthCheck::healthy());
    let node: NodeName = "worker-0".parse().unwrap();

    let agent = AgentReconciler::new(
        &config(),
        Arc::clone(&store) as Arc<dyn RecordStore>,
        Arc::clone(&update_api) as Arc<dyn UpdateApi>,
        health as Arc<dyn HealthCheck>,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        agent.run(shutdown_rx).await;
    });

    // First ticks: the agent registers its record and finds nothing to do.
    tokio::time::sleep(Duration::from_secs(5)).await;
    let read = store.get(&node).await.unwrap();
    assert_eq!(read.record.phase, Phase::Idle);
    assert_eq!(read.record.current_version.as_str(), "1.0.0");

    // An update appears; within a few ticks the agent surfaces it and
    // queues for admission.
    update_api.publish("2.0.0".parse().unwrap());
    tokio::time::sleep(Duration::from_secs(5)).await;
    let read = store.get(&node).await.unwrap();
    assert_eq!(read.record.phase, Phase::WaitingForAdmission);
    assert!(read.record.waiting_since.is_some());

    // The agent must not go further without the coordinator.
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(
        store.get(&node).await.unwrap().record.phase,
        Phase::WaitingForAdmission
    );

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}
