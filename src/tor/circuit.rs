//! Circuit bookkeeping

use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

/// Lifecycle state of a tracked circuit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Built, not used yet
    Fresh,
    /// Handed out at least once
    Active,
    /// Over its request budget; recycled only as a last resort
    Degraded,
    /// Expired or failed; never handed out again
    Dead,
}

/// A circuit built through the control port
#[derive(Debug, Clone)]
pub struct Circuit {
    pub id: String,
    pub state: CircuitState,
    pub created_at: Instant,
    pub request_count: u32,
    pub last_used: Option<Instant>,
    /// Guard relay fingerprint
    pub entry_node: Option<String>,
    pub exit_node: Option<String>,
}

impl Circuit {
    pub fn new(id: String, path: &[String]) -> Self {
        Self {
            id,
            state: CircuitState::Fresh,
            created_at: Instant::now(),
            request_count: 0,
            last_used: None,
            entry_node: path.first().cloned(),
            exit_node: path.last().cloned(),
        }
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Count one use
    pub fn touch(&mut self) {
        self.request_count += 1;
        self.last_used = Some(Instant::now());
    }
}

/// Limits after which a circuit stops being handed out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitPolicy {
    pub lifetime: Duration,
    pub max_requests: u32,
}

impl Default for CircuitPolicy {
    fn default() -> Self {
        Self {
            lifetime: Duration::from_secs(600),
            max_requests: 100,
        }
    }
}

impl CircuitPolicy {
    pub fn is_expired(&self, circuit: &Circuit) -> bool {
        circuit.age() > self.lifetime
    }

    pub fn is_overused(&self, circuit: &Circuit) -> bool {
        circuit.request_count > self.max_requests
    }

    pub fn is_healthy(&self, circuit: &Circuit) -> bool {
        circuit.state != CircuitState::Dead && !self.is_expired(circuit) && !self.is_overused(circuit)
    }
}
