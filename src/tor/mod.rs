//! Tor daemon interaction
//!
//! Control-port client, optional private Tor process, and the circuit
//! pool that hands out isolated HTTP sessions.

pub mod circuit;
pub mod control;
pub mod launch;
pub mod manager;
pub mod user_agents;

pub use circuit::{Circuit, CircuitPolicy, CircuitState};
pub use control::TorController;
pub use launch::TorProcess;
pub use manager::{
    create_tor_manager, BuiltCircuit, CircuitControl, ClientSettings, TorManager, TorStats,
};
pub use user_agents::UserAgents;
