//! Integration tests for the circuit pool
//!
//! A scripted controller stands in for Tor so the pool's selection,
//! expiry and rotation rules can be exercised without a daemon.

use anyhow::{bail, Result};
use arachne::tor::{
    BuiltCircuit, CircuitControl, CircuitPolicy, CircuitState, ClientSettings, TorManager,
    UserAgents,
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct ScriptedControl {
    next_id: u32,
    fail: bool,
    closed: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl CircuitControl for ScriptedControl {
    async fn build_circuit(&mut self) -> Result<BuiltCircuit> {
        if self.fail {
            bail!("EXTENDCIRCUIT failed");
        }
        self.next_id += 1;
        Ok(BuiltCircuit {
            id: self.next_id.to_string(),
            path: vec!["GUARD".into(), "MIDDLE".into(), "EXIT".into()],
        })
    }

    async fn close_circuit(&mut self, id: &str) -> Result<()> {
        self.closed.lock().unwrap().push(id.to_string());
        Ok(())
    }
}

fn settings() -> ClientSettings {
    ClientSettings {
        socks_addr: "127.0.0.1:9050".into(),
        timeout: Duration::from_secs(30),
        user_agents: UserAgents::default(),
    }
}

fn manager(max_circuits: usize, policy: CircuitPolicy) -> TorManager<ScriptedControl> {
    TorManager::new(ScriptedControl::default(), policy, max_circuits, settings())
}

#[tokio::test]
async fn test_initialize_respects_limit() {
    let mut pool = manager(10, CircuitPolicy::default());
    assert_eq!(pool.initialize().await, 3);

    let mut small = manager(2, CircuitPolicy::default());
    assert_eq!(small.initialize().await, 2);
    assert_eq!(small.stats().total_circuits, 2);
}

#[tokio::test]
async fn test_reuses_healthy_circuit_unless_fresh_required() {
    let mut pool = manager(10, CircuitPolicy::default());
    pool.initialize().await;

    let first = pool.get_circuit(false).await.unwrap();
    let again = pool.get_circuit(false).await.unwrap();
    assert_eq!(first.id, "1");
    assert_eq!(again.id, "1");
    assert_eq!(again.request_count, 2);

    let fresh = pool.get_circuit(true).await.unwrap();
    assert_eq!(fresh.id, "2");
    assert_eq!(fresh.request_count, 1);
}

#[tokio::test]
async fn test_overused_circuit_is_skipped() {
    let policy = CircuitPolicy {
        lifetime: Duration::from_secs(600),
        max_requests: 2,
    };
    let mut pool = manager(10, policy);
    pool.initialize().await;

    for _ in 0..3 {
        assert_eq!(pool.get_circuit(false).await.unwrap().id, "1");
    }
    assert_eq!(pool.get_circuit(false).await.unwrap().id, "2");
    assert_eq!(pool.stats().healthy_circuits, 2);
}

#[tokio::test]
async fn test_recycled_degraded_circuit_is_active_again() {
    let policy = CircuitPolicy {
        lifetime: Duration::from_secs(600),
        max_requests: 1,
    };
    let mut pool = manager(1, policy);
    pool.initialize().await;

    pool.get_circuit(false).await.unwrap();
    pool.get_circuit(false).await.unwrap();

    // Over budget and marked degraded, but the only circuit left to recycle
    let recycled = pool.get_circuit(false).await.unwrap();
    assert_eq!(recycled.id, "1");
    assert_eq!(recycled.request_count, 3);
    assert_eq!(recycled.state, CircuitState::Active);
}

#[tokio::test(start_paused = true)]
async fn test_recycles_least_recently_used_at_limit() {
    let mut pool = manager(2, CircuitPolicy::default());
    pool.initialize().await;

    assert_eq!(pool.get_circuit(false).await.unwrap().id, "1");
    tokio::time::advance(Duration::from_secs(1)).await;
    assert_eq!(pool.get_circuit(true).await.unwrap().id, "2");
    tokio::time::advance(Duration::from_secs(1)).await;

    // Nothing fresh and no room to build: oldest use wins
    let recycled = pool.get_circuit(true).await.unwrap();
    assert_eq!(recycled.id, "1");
    assert_eq!(pool.stats().total_circuits, 2);
}

#[tokio::test(start_paused = true)]
async fn test_expired_circuits_are_replaced() {
    let policy = CircuitPolicy {
        lifetime: Duration::from_secs(60),
        max_requests: 100,
    };
    let mut pool = manager(3, policy);
    pool.initialize().await;

    tokio::time::advance(Duration::from_secs(61)).await;
    let circuit = pool.get_circuit(false).await.unwrap();
    assert_eq!(circuit.id, "4");

    let stats = pool.stats();
    assert_eq!(stats.active_circuits, 1);
    assert_eq!(stats.healthy_circuits, 1);
}

#[tokio::test]
async fn test_mark_dead_drops_circuit_and_session() {
    let mut pool = manager(10, CircuitPolicy::default());
    pool.initialize().await;

    let (circuit, _client) = pool.session().await.unwrap();
    assert_eq!(pool.stats().sessions_cached, 1);

    pool.mark_circuit_dead(&circuit.id);
    let stats = pool.stats();
    assert_eq!(stats.active_circuits, 2);
    assert_eq!(stats.healthy_circuits, 2);
    assert_eq!(stats.sessions_cached, 0);

    assert_eq!(pool.get_circuit(false).await.unwrap().id, "2");
}

#[tokio::test]
async fn test_session_client_is_cached_per_circuit() {
    let mut pool = manager(10, CircuitPolicy::default());
    pool.initialize().await;

    let (a, _) = pool.session().await.unwrap();
    let (b, _) = pool.session().await.unwrap();
    assert_eq!(a.id, b.id);
    assert_eq!(pool.stats().sessions_cached, 1);
}

#[tokio::test]
async fn test_rotate_all_closes_and_rebuilds() {
    let control = ScriptedControl::default();
    let closed = Arc::clone(&control.closed);
    let mut pool = TorManager::new(control, CircuitPolicy::default(), 10, settings());
    pool.initialize().await;
    pool.session().await.unwrap();

    assert_eq!(pool.rotate_all().await, 3);

    let mut closed = closed.lock().unwrap().clone();
    closed.sort();
    assert_eq!(closed, vec!["1", "2", "3"]);

    let stats = pool.stats();
    assert_eq!(stats.total_circuits, 3);
    assert_eq!(stats.sessions_cached, 0);
    assert_eq!(pool.get_circuit(false).await.unwrap().id, "4");
}

#[tokio::test]
async fn test_build_failures_leave_pool_empty() {
    let control = ScriptedControl {
        fail: true,
        ..Default::default()
    };
    let mut pool = TorManager::new(control, CircuitPolicy::default(), 10, settings());

    assert_eq!(pool.initialize().await, 0);
    assert!(pool.get_circuit(false).await.is_none());
    assert!(pool.session().await.is_err());
}
