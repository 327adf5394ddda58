//! Circuit pool with rotation and per-circuit HTTP sessions
//!
//! The manager tracks circuits built through the control port, hands out
//! healthy ones, retires expired or failed ones, and keeps one HTTP client
//! per circuit. Each client authenticates to the SOCKS port with its own
//! credentials so Tor isolates its streams from every other client's.

use super::circuit::{Circuit, CircuitPolicy, CircuitState};
use super::control::TorController;
use super::launch::TorProcess;
use super::user_agents::UserAgents;
use crate::config::{Config, TorConfig};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Circuits built when the manager starts
const INITIAL_CIRCUITS: usize = 3;

/// A circuit as reported by the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltCircuit {
    pub id: String,
    /// Relay fingerprints, guard first
    pub path: Vec<String>,
}

/// Circuit operations the manager needs from Tor
#[async_trait]
pub trait CircuitControl: Send {
    async fn build_circuit(&mut self) -> Result<BuiltCircuit>;
    async fn close_circuit(&mut self, id: &str) -> Result<()>;
}

/// Settings for the per-circuit HTTP clients
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// `host:port` of Tor's SOCKS listener
    pub socks_addr: String,
    pub timeout: Duration,
    pub user_agents: UserAgents,
}

/// Snapshot of the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TorStats {
    pub total_circuits: usize,
    pub active_circuits: usize,
    pub healthy_circuits: usize,
    pub sessions_cached: usize,
}

/// Manages circuits and their HTTP sessions
pub struct TorManager<C: CircuitControl> {
    control: C,
    policy: CircuitPolicy,
    max_circuits: usize,
    circuits: HashMap<String, Circuit>,
    /// Usable circuit ids, oldest first
    active: Vec<String>,
    sessions: HashMap<String, reqwest::Client>,
    client_settings: ClientSettings,
    /// Changes on every rotation so old SOCKS credentials are never reused
    isolation_nonce: String,
    process: Option<TorProcess>,
}

impl<C: CircuitControl> TorManager<C> {
    pub fn new(
        control: C,
        policy: CircuitPolicy,
        max_circuits: usize,
        client_settings: ClientSettings,
    ) -> Self {
        Self {
            control,
            policy,
            max_circuits: max_circuits.max(1),
            circuits: HashMap::new(),
            active: Vec::new(),
            sessions: HashMap::new(),
            client_settings,
            isolation_nonce: crate::util::rand::token(12),
            process: None,
        }
    }

    /// Attach a Tor process to stop together with the manager
    pub fn with_process(mut self, process: TorProcess) -> Self {
        self.process = Some(process);
        self
    }

    pub fn policy(&self) -> CircuitPolicy {
        self.policy
    }

    /// Build the initial set of circuits; failed builds are skipped
    pub async fn initialize(&mut self) -> usize {
        let target = INITIAL_CIRCUITS.min(self.max_circuits);
        let mut built = 0;
        for _ in 0..target {
            if let Some(id) = self.create_circuit().await {
                debug!("Created initial circuit {}", id);
                built += 1;
            }
        }
        info!("Initialized {}/{} circuits", built, target);
        built
    }

    async fn create_circuit(&mut self) -> Option<String> {
        match self.control.build_circuit().await {
            Ok(built) => {
                let circuit = Circuit::new(built.id.clone(), &built.path);
                self.circuits.insert(built.id.clone(), circuit);
                self.active.push(built.id.clone());
                Some(built.id)
            },
            Err(e) => {
                error!("Failed to create circuit: {:#}", e);
                None
            },
        }
    }

    /// Retire dead and expired circuits; flag over-used ones as degraded
    fn cleanup(&mut self) {
        let mut retired = Vec::new();
        for (id, circuit) in self.circuits.iter_mut() {
            if circuit.state == CircuitState::Dead {
                retired.push(id.clone());
            } else if self.policy.is_expired(circuit) {
                circuit.state = CircuitState::Dead;
                retired.push(id.clone());
            } else if self.policy.is_overused(circuit) {
                circuit.state = CircuitState::Degraded;
            }
        }
        // Closed lazily; streams may still be using them
        self.active.retain(|id| !retired.contains(id));
    }

    /// Hand out a circuit for the next request
    ///
    /// Prefers the first healthy circuit (unused ones only when
    /// `require_fresh`), then builds a new one while under the limit, and
    /// finally recycles the least recently used one.
    pub async fn get_circuit(&mut self, require_fresh: bool) -> Option<Circuit> {
        self.cleanup();

        let policy = self.policy;
        let pick = self.active.iter().find(|id| {
            self.circuits.get(*id).is_some_and(|c| {
                policy.is_healthy(c) && !(require_fresh && c.request_count > 0)
            })
        });
        if let Some(id) = pick.cloned() {
            return self.use_circuit(&id);
        }

        if self.active.len() < self.max_circuits {
            if let Some(id) = self.create_circuit().await {
                return self.use_circuit(&id);
            }
        }

        let oldest = self
            .active
            .iter()
            .min_by_key(|id| self.circuits.get(*id).and_then(|c| c.last_used))
            .cloned();
        match oldest {
            Some(id) => {
                debug!("Recycling least recently used circuit {}", id);
                self.use_circuit(&id)
            },
            None => {
                warn!("No circuits available");
                None
            },
        }
    }

    fn use_circuit(&mut self, id: &str) -> Option<Circuit> {
        let circuit = self.circuits.get_mut(id)?;
        circuit.touch();
        if circuit.state != CircuitState::Dead {
            circuit.state = CircuitState::Active;
        }
        Some(circuit.clone())
    }

    /// Retire a circuit after a timeout or error
    pub fn mark_circuit_dead(&mut self, id: &str) {
        if let Some(circuit) = self.circuits.get_mut(id) {
            circuit.state = CircuitState::Dead;
            self.active.retain(|a| a != id);
            self.sessions.remove(id);
            debug!("Circuit {} marked dead", id);
        }
    }

    /// Retire every circuit, drop all sessions, and build a fresh set
    pub async fn rotate_all(&mut self) -> usize {
        warn!("Rotating all circuits");
        let ids: Vec<String> = self.circuits.keys().cloned().collect();
        for id in &ids {
            self.mark_circuit_dead(id);
            if let Err(e) = self.control.close_circuit(id).await {
                debug!("Closing circuit {} failed: {}", id, e);
            }
        }
        self.circuits.clear();
        self.sessions.clear();
        self.isolation_nonce = crate::util::rand::token(12);
        self.initialize().await
    }

    /// HTTP client bound to `circuit`'s SOCKS credentials
    pub fn http_client(&mut self, circuit: &Circuit) -> Result<reqwest::Client> {
        if let Some(client) = self.sessions.get(&circuit.id) {
            return Ok(client.clone());
        }

        let proxy_url = format!(
            "socks5h://arachne-{}:{}@{}",
            circuit.id, self.isolation_nonce, self.client_settings.socks_addr
        );
        let proxy = reqwest::Proxy::all(&proxy_url).context("Invalid SOCKS proxy address")?;

        let client = reqwest::Client::builder()
            .proxy(proxy)
            .default_headers(browser_headers(self.client_settings.user_agents.random()))
            .timeout(self.client_settings.timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .context("Failed to build HTTP client")?;

        self.sessions.insert(circuit.id.clone(), client.clone());
        Ok(client)
    }

    /// Circuit plus its client in one step
    pub async fn session(&mut self) -> Result<(Circuit, reqwest::Client)> {
        let circuit = self
            .get_circuit(false)
            .await
            .context("No available circuits")?;
        let client = self.http_client(&circuit)?;
        Ok((circuit, client))
    }

    pub fn stats(&self) -> TorStats {
        TorStats {
            total_circuits: self.circuits.len(),
            active_circuits: self.active.len(),
            healthy_circuits: self
                .circuits
                .values()
                .filter(|c| self.policy.is_healthy(c))
                .count(),
            sessions_cached: self.sessions.len(),
        }
    }

    /// Drop sessions and stop an owned Tor process
    pub async fn stop(&mut self) -> Result<()> {
        info!("Stopping Tor manager...");
        self.sessions.clear();
        self.active.clear();
        if let Some(process) = self.process.take() {
            process.stop().await?;
        }
        info!("Tor manager stopped");
        Ok(())
    }
}

fn browser_headers(user_agent: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(user_agent) {
        headers.insert(USER_AGENT, value);
    }
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
    headers.insert(
        "Upgrade-Insecure-Requests",
        HeaderValue::from_static("1"),
    );
    headers
}

/// Connect to (or launch) Tor and build the initial circuits
pub async fn create_tor_manager(config: &Config) -> Result<TorManager<TorController>> {
    let tor = &config.tor;
    let (controller, process) = match TorController::connect(tor).await {
        Ok(controller) => (controller, None),
        Err(e) if tor.launch_if_missing => {
            info!("No Tor controller available ({:#}), launching Tor", e);
            let process = TorProcess::launch(tor).await?;
            let controller = connect_with_retry(tor).await?;
            (controller, Some(process))
        },
        Err(e) => return Err(e),
    };

    let policy = CircuitPolicy {
        lifetime: Duration::from_secs(tor.circuit_lifetime_secs()),
        max_requests: tor.max_requests_per_circuit,
    };
    let settings = ClientSettings {
        socks_addr: tor.socks_addr(),
        timeout: Duration::from_secs(config.discovery.request_timeout_secs),
        user_agents: UserAgents::load(config.discovery.user_agents_file.as_deref())?,
    };

    let mut manager = TorManager::new(controller, policy, tor.circuit_count, settings);
    if let Some(process) = process {
        manager = manager.with_process(process);
    }
    manager.initialize().await;
    Ok(manager)
}

async fn connect_with_retry(tor: &TorConfig) -> Result<TorController> {
    let mut last_err = None;
    for attempt in 0..5 {
        match TorController::connect(tor).await {
            Ok(controller) => return Ok(controller),
            Err(e) => {
                debug!("Control port not ready (attempt {}): {}", attempt + 1, e);
                last_err = Some(e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            },
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Control port unreachable")))
}
