//! Launching a private Tor process
//!
//! Used when no Tor daemon answers on the control port.

use crate::config::TorConfig;
use anyhow::{bail, Context, Result};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info};

/// Time allowed for Tor to bootstrap
const BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(300);

/// A Tor process owned by this program
#[derive(Debug)]
pub struct TorProcess {
    child: Child,
}

/// Command-line arguments equivalent to the torrc we need
pub fn tor_args(config: &TorConfig) -> Vec<String> {
    let pairs = [
        ("SocksPort", config.socks_port.to_string()),
        ("ControlPort", config.control_port.to_string()),
        ("CookieAuthentication", "1".to_string()),
        ("DataDirectory", config.data_dir.display().to_string()),
        ("MaxCircuitDirtiness", config.circuit_lifetime_secs().to_string()),
        ("MaxClientCircuitsPending", config.circuit_count.to_string()),
        ("UseEntryGuards", "1".to_string()),
        ("NumEntryGuards", config.entry_guards.to_string()),
    ];
    pairs
        .into_iter()
        .flat_map(|(k, v)| [format!("--{}", k), v])
        .collect()
}

impl TorProcess {
    /// Start Tor and wait until it reports full bootstrap
    pub async fn launch(config: &TorConfig) -> Result<Self> {
        info!("Starting new Tor process ({})", config.tor_binary);
        std::fs::create_dir_all(&config.data_dir).with_context(|| {
            format!("Failed to create Tor data dir {}", config.data_dir.display())
        })?;

        let mut child = Command::new(&config.tor_binary)
            .args(tor_args(config))
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn {}", config.tor_binary))?;

        let stdout = child.stdout.take().context("Tor stdout not captured")?;
        let mut lines = BufReader::new(stdout).lines();

        let bootstrapped = tokio::time::timeout(BOOTSTRAP_TIMEOUT, async {
            while let Some(line) = lines.next_line().await? {
                debug!("TOR: {}", line);
                if line.contains("Bootstrapped 100%") {
                    return Ok::<bool, std::io::Error>(true);
                }
            }
            Ok(false)
        })
        .await;

        match bootstrapped {
            Ok(Ok(true)) => {},
            Ok(Ok(false)) => bail!("Tor exited before bootstrapping"),
            Ok(Err(e)) => return Err(e).context("Failed reading Tor output"),
            Err(_) => bail!("Tor did not bootstrap within {:?}", BOOTSTRAP_TIMEOUT),
        }

        // Keep draining stdout so Tor never blocks on a full pipe
        tokio::spawn(async move {
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("TOR: {}", line);
            }
        });

        info!("Tor process started with PID {:?}", child.id());
        Ok(Self { child })
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Terminate the process and reap it
    pub async fn stop(mut self) -> Result<()> {
        debug!("Stopping Tor process {:?}", self.pid());
        self.child.kill().await.context("Failed to stop Tor")?;
        info!("Tor process stopped");
        Ok(())
    }
}
