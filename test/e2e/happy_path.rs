//! End-to-end happy path test.
//!
//! Two nodes in one partition with a single concurrency slot, driven
//! deterministically by stepping the agent and coordinator reconcilers by
//! hand against a shared record store:
//!
//! 1. Both agents register and discover the same update
//! 2. Both queue for admission
//! 3. The coordinator admits the longest waiter, cordons and drains it
//! 4. That agent stages, reboots, verifies, and completes
//! 5. The coordinator releases it and admits the second node
//! 6. The second node finishes; the fleet ends idle on the new version
//!
//! ## Running
//!
//! ```bash
//! cargo test -p rollout-e2e --test happy_path
//! ```

use std::sync::Arc;

use rollout_agent::config::Config as AgentConfig;
use rollout_agent::health::{HealthCheck, MockHealthCheck};
use rollout_agent::reconciler::AgentReconciler;
use rollout_agent::updater::{MockUpdateApi, UpdateApi};
use rollout_coordinator::cluster::{ClusterApi, MockClusterApi};
use rollout_coordinator::config::Config as CoordinatorConfig;
use rollout_coordinator::reconciler::CoordinatorReconciler;
use rollout_id::NodeName;
use rollout_record::{MemoryStore, Phase, RecordStore};

struct Node {
    name: NodeName,
    update_api: Arc<MockUpdateApi>,
    agent: AgentReconciler,
}

fn node(store: &Arc<MemoryStore>, name: &str) -> Node {
    let config = AgentConfig {
        node_name: name.parse().unwrap(),
        partition: "default".parse().unwrap(),
        update_api_url: "http://127.0.0.1:4518".to_string(),
        reconcile_interval_secs: 30,
        conflict_retry_limit: 5,
        log_level: "debug".to_string(),
    };
    let update_api = Arc::new(MockUpdateApi::new("1.0.0".parse().unwrap()));
    let health = Arc::new(MockHealthCheck::healthy());
    let agent = AgentReconciler::new(
        &config,
        Arc::clone(store) as Arc<dyn RecordStore>,
        Arc::clone(&update_api) as Arc<dyn UpdateApi>,
        health as Arc<dyn HealthCheck>,
    );
    Node {
        name: config.node_name,
        update_api,
        agent,
    }
}

async fn phase(store: &MemoryStore, node: &NodeName) -> Phase {
    store.get(node).await.unwrap().record.phase
}

/// Walk one admitted node from updating to completed.
async fn finish_update(store: &MemoryStore, node: &Node) {
    assert_eq!(phase(store, &node.name).await, Phase::Updating);
    node.agent.reconcile_once().await.unwrap(); // stage -> rebooting
    node.update_api.finish_reboot();
    node.agent.reconcile_once().await.unwrap(); // applied -> verifying
    node.agent.reconcile_once().await.unwrap(); // healthy -> completed
    assert_eq!(phase(store, &node.name).await, Phase::Completed);
}

#[tokio::test]
async fn e2e_happy_path_serial_rollout() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".into()),
        )
        .with_test_writer()
        .try_init();

    let store = Arc::new(MemoryStore::new());
    let cluster = Arc::new(MockClusterApi::new());

    let coordinator_config = CoordinatorConfig {
        max_concurrent_per_partition: 1,
        drain_timeout_secs: 30,
        cluster_api_url: "http://127.0.0.1:8080".to_string(),
        reconcile_interval_secs: 15,
        conflict_retry_limit: 5,
        log_level: "debug".to_string(),
    };
    let coordinator = CoordinatorReconciler::new(
        &coordinator_config,
        Arc::clone(&store) as Arc<dyn RecordStore>,
        Arc::clone(&cluster) as Arc<dyn ClusterApi>,
    );

    let first = node(&store, "worker-a");
    let second = node(&store, "worker-b");

    // ===========================================================================
    // Step 1: Registration
    // ===========================================================================
    first.agent.reconcile_once().await.unwrap();
    second.agent.reconcile_once().await.unwrap();
    assert_eq!(phase(&store, &first.name).await, Phase::Idle);
    assert_eq!(phase(&store, &second.name).await, Phase::Idle);

    // A coordinator pass over an idle fleet does nothing.
    coordinator.reconcile_all().await.unwrap();
    assert_eq!(phase(&store, &first.name).await, Phase::Idle);

    // ===========================================================================
    // Step 2: Update published, both nodes queue up
    // ===========================================================================
    first.update_api.publish("2.0.0".parse().unwrap());
    second.update_api.publish("2.0.0".parse().unwrap());

    first.agent.reconcile_once().await.unwrap(); // idle -> update_available
    first.agent.reconcile_once().await.unwrap(); // -> waiting_for_admission
    second.agent.reconcile_once().await.unwrap();
    second.agent.reconcile_once().await.unwrap();

    assert_eq!(phase(&store, &first.name).await, Phase::WaitingForAdmission);
    assert_eq!(phase(&store, &second.name).await, Phase::WaitingForAdmission);

    // ===========================================================================
    // Step 3: Coordinator admits exactly one node
    // ===========================================================================
    let stats = coordinator.reconcile_all().await.unwrap();
    assert_eq!(stats.admitted, 1);

    assert_eq!(phase(&store, &first.name).await, Phase::Updating);
    assert_eq!(phase(&store, &second.name).await, Phase::WaitingForAdmission);
    assert!(cluster.is_cordoned(&first.name));
    assert!(!cluster.is_cordoned(&second.name));

    // The waiting agent sits still; the slot holder's record is untouched
    // by further coordinator passes.
    second.agent.reconcile_once().await.unwrap();
    coordinator.reconcile_all().await.unwrap();
    assert_eq!(phase(&store, &second.name).await, Phase::WaitingForAdmission);

    // ===========================================================================
    // Step 4: First node updates and completes
    // ===========================================================================
    finish_update(&store, &first).await;

    // ===========================================================================
    // Step 5: Release and next admission happen in one pass
    // ===========================================================================
    let stats = coordinator.reconcile_all().await.unwrap();
    assert_eq!(stats.released, 1);
    assert_eq!(stats.admitted, 1);

    let released = store.get(&first.name).await.unwrap().record;
    assert_eq!(released.phase, Phase::Idle);
    assert_eq!(released.current_version.as_str(), "2.0.0");
    assert!(released.desired_version.is_none());
    assert!(!cluster.is_cordoned(&first.name));

    assert_eq!(phase(&store, &second.name).await, Phase::Updating);
    assert!(cluster.is_cordoned(&second.name));

    // ===========================================================================
    // Step 6: Second node finishes; fleet is idle on the new version
    // ===========================================================================
    finish_update(&store, &second).await;
    coordinator.reconcile_all().await.unwrap();

    for versioned in store.list().await.unwrap() {
        assert_eq!(versioned.record.phase, Phase::Idle);
        assert_eq!(versioned.record.current_version.as_str(), "2.0.0");
        assert!(versioned.record.desired_version.is_none());
        assert!(versioned.record.waiting_since.is_none());
    }
    assert!(!cluster.is_cordoned(&first.name));
    assert!(!cluster.is_cordoned(&second.name));

    // One cordon/drain/uncordon per node for the whole rollout.
    for name in [&first.name, &second.name] {
        assert_eq!(cluster.cordon_calls(name), 1);
        assert_eq!(cluster.drain_calls(name), 1);
        assert_eq!(cluster.uncordon_calls(name), 1);
    }
}
