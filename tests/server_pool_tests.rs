/// Server pool membership tests
///
/// Failure handling, the recovery timer, updates and disposal.
/// Run with: cargo test --test server_pool_tests

use memcluster::{
    AuthConfig, ClusterConfig, ClusterError, Endpoint, Node, ServerPool, SimulatedNode,
    SimulatedNodeFactory,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn ep(s: &str) -> Endpoint {
    s.parse().unwrap()
}

fn eps(list: &str) -> Vec<Endpoint> {
    Endpoint::parse_list(list).unwrap()
}

fn config() -> ClusterConfig {
    ClusterConfig::new().dead_timeout(Duration::from_secs(1))
}

fn started_pool(list: &str) -> (ServerPool, Arc<SimulatedNodeFactory>) {
    let factory = Arc::new(SimulatedNodeFactory::new());
    let pool = ServerPool::new(&config(), factory.clone()).unwrap();
    pool.start(eps(list)).unwrap();
    (pool, factory)
}

fn node(factory: &SimulatedNodeFactory, s: &str) -> Arc<SimulatedNode> {
    factory.latest(&ep(s)).unwrap()
}

fn endpoints_of(nodes: &[Arc<dyn Node>]) -> HashSet<String> {
    nodes.iter().map(|n| n.endpoint().to_string()).collect()
}

#[tokio::test]
async fn test_locate_only_returns_working_nodes() {
    let (pool, factory) = started_pool("a:1,b:1,c:1");

    node(&factory, "b:1").fail();

    for i in 0..500 {
        let located = pool.locate(&format!("key-{}", i)).unwrap();
        assert!(located.is_alive());
        assert_ne!(located.endpoint(), &ep("b:1"));
    }
    assert_eq!(endpoints_of(&pool.working_nodes()).len(), 2);
}

#[tokio::test]
async fn test_all_nodes_dead_locates_nothing() {
    let (pool, factory) = started_pool("a:1,b:1");

    node(&factory, "a:1").fail();
    node(&factory, "b:1").fail();

    assert!(pool.locate("key").is_none());
    assert!(pool.working_nodes().is_empty());
    assert_eq!(pool.stats().dead_nodes, 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_node_is_resurrected_by_timer() {
    let (pool, factory) = started_pool("a:1,b:1");
    let a = node(&factory, "a:1");

    a.fail();
    assert_eq!(endpoints_of(&pool.working_nodes()), HashSet::from(["b:1".to_string()]));
    assert!(pool.stats().timer_armed);

    // First tick: still unreachable, timer rescheduled.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(a.ping_count(), 1);
    assert!(!a.is_alive());
    assert!(pool.stats().timer_armed);

    // Second tick: back online.
    a.set_reachable(true);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(a.ping_count(), 2);
    assert!(a.is_alive());
    assert_eq!(pool.working_nodes().len(), 2);
    assert!(!pool.stats().timer_armed);

    // Timer stays idle with no dead nodes.
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(a.ping_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_second_failure_does_not_restart_timer() {
    let (pool, factory) = started_pool("a:1,b:1,c:1");

    node(&factory, "a:1").fail();
    tokio::time::sleep(Duration::from_millis(600)).await;
    node(&factory, "b:1").fail();
    assert_eq!(pool.working_nodes().len(), 1);

    // One timer for both nodes, firing one dead_timeout after the first failure.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(node(&factory, "a:1").ping_count(), 1);
    assert_eq!(node(&factory, "b:1").ping_count(), 1);
}

#[tokio::test]
async fn test_update_keeps_dead_node_instance() {
    let (pool, factory) = started_pool("a:1,b:1,c:1");
    let dead_c = node(&factory, "c:1");
    let old_a = node(&factory, "a:1");
    dead_c.fail();

    for round in 0..3 {
        pool.update(eps("a:1,b:1,c:1")).unwrap();

        assert!(Arc::ptr_eq(&node(&factory, "c:1"), &dead_c), "round {}", round);
        assert_eq!(pool.nodes().len(), 3);
        assert_eq!(pool.working_nodes().len(), 2);
        assert!(pool.stats().timer_armed);
    }

    // Only the alive endpoints were rebuilt.
    assert_eq!(factory.created_count(), 3 + 3 * 2);
    assert_eq!(dead_c.dispose_count(), 0);
    assert_eq!(old_a.dispose_count(), 1);
}

#[tokio::test]
async fn test_update_disposes_removed_nodes() {
    let (pool, factory) = started_pool("a:1,b:1");
    let b = node(&factory, "b:1");

    pool.update(eps("a:1")).unwrap();

    assert_eq!(b.dispose_count(), 1);
    assert_eq!(endpoints_of(&pool.nodes()), HashSet::from(["a:1".to_string()]));
    for i in 0..100 {
        assert_eq!(pool.locate(&format!("k{}", i)).unwrap().endpoint(), &ep("a:1"));
    }
}

#[tokio::test]
async fn test_update_to_empty_set() {
    let (pool, factory) = started_pool("a:1,b:1");

    pool.update(Vec::new()).unwrap();

    assert!(pool.locate("key").is_none());
    assert!(pool.nodes().is_empty());
    assert!(factory.created().iter().all(|n| n.dispose_count() == 1));
}

#[tokio::test]
async fn test_update_skips_endpoints_the_factory_rejects() {
    let (pool, factory) = started_pool("a:1");
    factory.reject(&ep("b:1"));

    pool.update(eps("a:1,b:1,c:1")).unwrap();

    assert_eq!(
        endpoints_of(&pool.working_nodes()),
        HashSet::from(["a:1".to_string(), "c:1".to_string()])
    );
}

#[tokio::test]
async fn test_update_cancels_timer_when_dead_node_leaves() {
    let (pool, factory) = started_pool("a:1,b:1");
    let a = node(&factory, "a:1");
    a.fail();
    assert!(pool.stats().timer_armed);

    pool.update(eps("b:1,c:1")).unwrap();

    assert!(!pool.stats().timer_armed);
    assert_eq!(a.dispose_count(), 1);
    assert_eq!(pool.stats().dead_nodes, 0);
}

#[tokio::test]
async fn test_failure_of_replaced_node_is_ignored() {
    let (pool, factory) = started_pool("a:1,b:1");
    let old_a = node(&factory, "a:1").as_node();

    pool.update(eps("a:1,b:1")).unwrap();
    pool.on_node_failure(&old_a);

    assert_eq!(pool.working_nodes().len(), 2);
    assert!(!pool.stats().timer_armed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_updates_never_mix_sets() {
    let (pool, _factory) = started_pool("a:1,b:1");
    let first: HashSet<String> = ["a:1", "b:1"].iter().map(|s| s.to_string()).collect();
    let second: HashSet<String> = ["c:1", "d:1", "e:1"].iter().map(|s| s.to_string()).collect();

    let mut handles = vec![];
    for task_id in 0..4 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..50 {
                let list = if (task_id + i) % 2 == 0 { "a:1,b:1" } else { "c:1,d:1,e:1" };
                pool.update(eps(list)).unwrap();
                tokio::task::yield_now().await;
            }
        }));
    }

    for _ in 0..4 {
        let pool = pool.clone();
        let first = first.clone();
        let second = second.clone();
        handles.push(tokio::spawn(async move {
            for _ in 0..500 {
                let seen = endpoints_of(&pool.working_nodes());
                // Nodes of a superseded set may already be disposed, so a
                // snapshot can shrink but never mixes two sets.
                assert!(
                    seen.is_subset(&first) || seen.is_subset(&second),
                    "mixed membership: {:?}",
                    seen
                );
                tokio::task::yield_now().await;
            }
        }));
    }

    let all: HashSet<String> = first.union(&second).cloned().collect();
    for reader in 0..4 {
        let pool = pool.clone();
        let all = all.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..500 {
                // Each lookup resolves against one published locator.
                if let Some(node) = pool.locate(&format!("key-{}-{}", reader, i)) {
                    let endpoint = node.endpoint().to_string();
                    assert!(all.contains(&endpoint), "unknown endpoint {}", endpoint);
                }
                tokio::task::yield_now().await;
            }
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn test_dispose_with_pending_timer() {
    let (pool, factory) = started_pool("a:1,b:1");
    let a = node(&factory, "a:1");
    a.fail();
    a.set_reachable(true);

    pool.dispose();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(a.ping_count(), 0);
    assert!(pool.is_disposed());
    assert!(!pool.stats().timer_armed);
    assert!(factory.created().iter().all(|n| n.dispose_count() == 1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_dispose_releases_once() {
    let (pool, factory) = started_pool("a:1,b:1,c:1");

    let mut handles = vec![];
    for _ in 0..8 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move { pool.dispose() }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert!(factory.created().iter().all(|n| n.dispose_count() == 1));
    assert!(pool.locate("key").is_none());
}

#[tokio::test]
async fn test_operations_after_dispose() {
    let (pool, factory) = started_pool("a:1");
    let a = node(&factory, "a:1").as_node();
    pool.dispose();

    pool.on_node_failure(&a);
    pool.resurrection_check().await;

    assert_eq!(pool.update(eps("b:1")), Err(ClusterError::PoolDisposed));
    assert_eq!(pool.start(eps("b:1")), Err(ClusterError::PoolDisposed));
    assert!(pool.working_nodes().is_empty());
    assert!(!pool.stats().timer_armed);
}

#[tokio::test]
async fn test_manual_resurrection_check() {
    let (pool, factory) = started_pool("a:1,b:1");
    let b = node(&factory, "b:1");
    b.fail();
    b.set_reachable(true);

    pool.resurrection_check().await;

    assert!(b.is_alive());
    assert_eq!(pool.working_nodes().len(), 2);
    assert!(!pool.stats().timer_armed);
}

#[tokio::test]
async fn test_reported_failure_then_resurrection() {
    let (pool, factory) = started_pool("a:1,b:1");
    let a = node(&factory, "a:1");

    // Reported by the transport while the node still answers pings.
    pool.on_node_failure(&a.as_node());
    assert_eq!(endpoints_of(&pool.working_nodes()), HashSet::from(["b:1".to_string()]));
    assert!(pool.stats().timer_armed);
    assert_eq!(pool.stats().dead_nodes, 1);

    pool.resurrection_check().await;

    assert_eq!(a.ping_count(), 1);
    assert_eq!(
        endpoints_of(&pool.working_nodes()),
        HashSet::from(["a:1".to_string(), "b:1".to_string()])
    );
    assert!(!pool.stats().timer_armed);
}

#[tokio::test]
async fn test_binary_pool_shares_authenticator() {
    let transport = Arc::new(SimulatedNodeFactory::new());
    let config = config().authentication(AuthConfig::plain("user", "pass"));
    let pool = ServerPool::binary(&config, transport.clone()).unwrap();
    pool.start(eps("a:1,b:1,c:1")).unwrap();
    pool.update(eps("a:1,b:1,c:1,d:1")).unwrap();

    let nodes = transport.created();
    assert_eq!(nodes.len(), 7);
    let shared = nodes[0].authenticator().unwrap();
    assert_eq!(shared.initial_response(), b"\0user\0pass".to_vec());
    for node in &nodes[1..] {
        assert!(Arc::ptr_eq(node.authenticator().unwrap(), shared));
    }
}
