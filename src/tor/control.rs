//! Tor Control Port client
//!
//! Communicates with the local Tor daemon via the control protocol.

use super::manager::{BuiltCircuit, CircuitControl};
use crate::config::TorConfig;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Common cookie file locations
const COOKIE_PATHS: &[&str] = &[
    "/run/tor/control.authcookie",
    "/var/run/tor/control.authcookie",
    "/var/lib/tor/control_auth_cookie",
];

/// Per-line read timeout
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// A complete control-port reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Status code of the final line
    pub code: u16,
    /// Reply lines without their `NNN-`/`NNN+`/`NNN ` prefix; a data
    /// block is folded into its keyword line, joined with `\n`
    pub lines: Vec<String>,
}

impl Reply {
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Value of `key=value` in a GETINFO-style reply
    pub fn value(&self, key: &str) -> Option<&str> {
        let prefix = format!("{}=", key);
        self.lines.iter().find_map(|line| {
            line.strip_prefix(&prefix)
                .map(|v| v.strip_prefix('\n').unwrap_or(v))
        })
    }

    /// Text of the final line
    pub fn message(&self) -> &str {
        self.lines.last().map(String::as_str).unwrap_or("")
    }
}

/// Read one reply from the control port
///
/// Format: `250-key=value` mid lines, `250+key=` opening a data block that
/// ends with `.`, and a final `NNN text` line. Asynchronous `650` events
/// are skipped.
pub async fn read_reply<R>(reader: &mut R) -> Result<Reply>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = Vec::new();
    let mut data_block: Option<String> = None;

    loop {
        let mut line = String::new();
        let bytes_read = match tokio::time::timeout(READ_TIMEOUT, reader.read_line(&mut line)).await
        {
            Ok(result) => result?,
            Err(_) => {
                warn!("Timeout waiting for Tor response after {} lines", lines.len());
                bail!("Timeout waiting for Tor response");
            },
        };
        if bytes_read == 0 {
            bail!("Tor control connection closed mid-reply");
        }
        let line = line.trim_end_matches(['\r', '\n']);

        if let Some(block) = data_block.as_mut() {
            if line == "." {
                if let Some(done) = data_block.take() {
                    lines.push(done);
                }
            } else {
                // Leading dots are escaped by doubling
                let line = line.strip_prefix('.').filter(|l| l.starts_with('.')).unwrap_or(line);
                block.push('\n');
                block.push_str(line);
            }
            continue;
        }

        if line.len() < 4 || !line.is_char_boundary(3) {
            bail!("Malformed control reply line: {:?}", line);
        }
        let code: u16 = line[..3]
            .parse()
            .with_context(|| format!("Malformed status code in {:?}", line))?;
        let separator = line.as_bytes()[3];
        let text = line[4..].to_string();

        if code == 650 {
            debug!("Skipping async event: {}", text);
            continue;
        }

        match separator {
            b'-' => lines.push(text),
            b'+' => data_block = Some(text),
            b' ' => {
                lines.push(text);
                return Ok(Reply { code, lines });
            },
            _ => bail!("Malformed control reply line: {:?}", line),
        }
    }
}

/// Parse the circuit id out of an `EXTENDED <id>` reply
pub fn parse_extended(reply: &Reply) -> Result<String> {
    reply
        .lines
        .iter()
        .find_map(|line| line.strip_prefix("EXTENDED "))
        .and_then(|rest| rest.split_whitespace().next())
        .map(str::to_string)
        .context("EXTENDCIRCUIT reply missing circuit id")
}

/// Relay fingerprints along circuit `id` in `GETINFO circuit-status` output
///
/// Lines look like `12 BUILT $FP1~nick1,$FP2~nick2,$FP3 BUILD_FLAGS=...`.
pub fn parse_circuit_path(circuit_status: &str, id: &str) -> Option<Vec<String>> {
    circuit_status.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        if fields.next()? != id {
            return None;
        }
        let _status = fields.next()?;
        let path = match fields.next() {
            Some(p) if !p.contains('=') => p,
            _ => return Some(Vec::new()),
        };
        Some(
            path.split(',')
                .map(|hop| {
                    let hop = hop.trim_start_matches('$');
                    hop.split(['~', '=']).next().unwrap_or(hop).to_string()
                })
                .collect(),
        )
    })
}

/// Connection to Tor control port
pub struct TorController {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TorController {
    /// Connect to Tor control port and authenticate
    pub async fn connect(config: &TorConfig) -> Result<Self> {
        let addr = format!("{}:{}", config.control_host, config.control_port);
        debug!("Connecting to Tor control port: {}", addr);

        let stream = TcpStream::connect(&addr)
            .await
            .with_context(|| format!("Failed to connect to Tor at {}", addr))?;
        let (read_half, writer) = stream.into_split();

        let mut controller = Self {
            reader: BufReader::new(read_half),
            writer,
        };

        if let Some(password) = &config.control_password {
            controller.authenticate_password(password).await?;
        } else {
            let mut cookies: Vec<PathBuf> = COOKIE_PATHS.iter().map(PathBuf::from).collect();
            cookies.insert(0, config.data_dir.join("control_auth_cookie"));
            controller.authenticate_cookie(&cookies).await?;
        }

        info!("Connected to Tor controller on {}", addr);
        Ok(controller)
    }

    /// Authenticate with password (hex-encoded for HashedControlPassword)
    async fn authenticate_password(&mut self, password: &str) -> Result<()> {
        let password_hex = data_encoding::HEXLOWER.encode(password.as_bytes());
        self.command(&format!("AUTHENTICATE {}", password_hex))
            .await
            .context("Tor password authentication failed")?;
        Ok(())
    }

    /// Authenticate with the first cookie file Tor accepts, then null auth
    async fn authenticate_cookie(&mut self, paths: &[PathBuf]) -> Result<()> {
        for path in paths {
            if let Ok(cookie) = std::fs::read(path) {
                let cookie_hex = data_encoding::HEXLOWER.encode(&cookie);
                match self.command(&format!("AUTHENTICATE {}", cookie_hex)).await {
                    Ok(_) => {
                        debug!("Authenticated with cookie from {}", path.display());
                        return Ok(());
                    },
                    Err(e) => {
                        debug!("Cookie auth failed with {}: {}", path.display(), e);
                        continue;
                    },
                }
            }
        }

        debug!("Trying null authentication");
        self.command("AUTHENTICATE")
            .await
            .context("Tor authentication failed")?;
        Ok(())
    }

    /// Send a command and read its reply; error replies become errors
    pub async fn command(&mut self, cmd: &str) -> Result<Reply> {
        let preview: String = cmd.chars().take(100).collect();
        if preview.starts_with("AUTHENTICATE ") {
            debug!("Sending Tor command: AUTHENTICATE ****");
        } else {
            debug!("Sending Tor command: {}", preview);
        }

        self.writer.write_all(cmd.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await?;
        self.writer.flush().await?;

        let reply = read_reply(&mut self.reader).await?;
        if !reply.is_ok() {
            bail!("Tor control error: {} {}", reply.code, reply.message());
        }
        Ok(reply)
    }

    /// Get information about the Tor daemon
    pub async fn get_info(&mut self, keyword: &str) -> Result<String> {
        let reply = self.command(&format!("GETINFO {}", keyword)).await?;
        reply
            .value(keyword)
            .map(str::to_string)
            .with_context(|| format!("GETINFO reply missing {}", keyword))
    }

    /// Check if Tor is fully bootstrapped
    pub async fn is_bootstrapped(&mut self) -> Result<bool> {
        let phase = self.get_info("status/bootstrap-phase").await?;
        Ok(phase.contains("PROGRESS=100"))
    }

    /// Tor version string
    pub async fn version(&mut self) -> Result<String> {
        self.get_info("version").await
    }

    /// Build a new circuit with Tor-chosen relays
    pub async fn extend_circuit(&mut self) -> Result<String> {
        let reply = self.command("EXTENDCIRCUIT 0").await?;
        parse_extended(&reply)
    }

    /// Relay fingerprints of circuit `id` (empty while still building)
    pub async fn circuit_path(&mut self, id: &str) -> Result<Vec<String>> {
        let status = self.get_info("circuit-status").await?;
        Ok(parse_circuit_path(&status, id).unwrap_or_default())
    }

    pub async fn close_circuit(&mut self, id: &str) -> Result<()> {
        self.command(&format!("CLOSECIRCUIT {}", id)).await?;
        Ok(())
    }

    /// Ask Tor to use clean circuits for new streams
    pub async fn signal_newnym(&mut self) -> Result<()> {
        self.command("SIGNAL NEWNYM").await?;
        info!("Sent NEWNYM");
        Ok(())
    }

    /// Bytes (read, written) through Tor since it started
    pub async fn traffic(&mut self) -> Result<(u64, u64)> {
        let read = self.get_info("traffic/read").await?;
        let written = self.get_info("traffic/written").await?;
        Ok((
            read.trim().parse().context("Invalid traffic/read")?,
            written.trim().parse().context("Invalid traffic/written")?,
        ))
    }
}

#[async_trait]
impl CircuitControl for TorController {
    async fn build_circuit(&mut self) -> Result<BuiltCircuit> {
        let id = self.extend_circuit().await?;
        let path = match self.circuit_path(&id).await {
            Ok(path) => path,
            Err(e) => {
                debug!("Could not read path for circuit {}: {}", id, e);
                Vec::new()
            },
        };
        Ok(BuiltCircuit { id, path })
    }

    async fn close_circuit(&mut self, id: &str) -> Result<()> {
        TorController::close_circuit(self, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn parse(raw: &str) -> Result<Reply> {
        let mut reader = BufReader::new(raw.as_bytes());
        read_reply(&mut reader).await
    }

    #[tokio::test]
    async fn test_simple_ok() {
        let reply = parse("250 OK\r\n").await.unwrap();
        assert_eq!(reply.code, 250);
        assert!(reply.is_ok());
        assert_eq!(reply.message(), "OK");
    }

    #[tokio::test]
    async fn test_multiline_getinfo() {
        let reply = parse("250-version=0.4.8.9\r\n250 OK\r\n").await.unwrap();
        assert_eq!(reply.value("version"), Some("0.4.8.9"));
    }

    #[tokio::test]
    async fn test_data_block() {
        let raw = "250+circuit-status=\r\n\
                   1 BUILT $AAAA~alpha,$BBBB~beta,$CCCC~gamma PURPOSE=GENERAL\r\n\
                   2 EXTENDED $DDDD~delta PURPOSE=GENERAL\r\n\
                   .\r\n\
                   250 OK\r\n";
        let reply = parse(raw).await.unwrap();
        let status = reply.value("circuit-status").unwrap();
        assert_eq!(status.lines().count(), 2);
        assert_eq!(
            parse_circuit_path(status, "1").unwrap(),
            vec!["AAAA", "BBBB", "CCCC"]
        );
        assert_eq!(parse_circuit_path(status, "2").unwrap(), vec!["DDDD"]);
        assert!(parse_circuit_path(status, "3").is_none());
    }

    #[tokio::test]
    async fn test_error_reply() {
        let reply = parse("552 Unrecognized key \"bogus\"\r\n").await.unwrap();
        assert_eq!(reply.code, 552);
        assert!(!reply.is_ok());
    }

    #[tokio::test]
    async fn test_skips_async_events() {
        let reply = parse("650 CIRC 5 BUILT\r\n250 EXTENDED 7\r\n").await.unwrap();
        assert_eq!(parse_extended(&reply).unwrap(), "7");
    }

    #[tokio::test]
    async fn test_truncated_reply_is_error() {
        assert!(parse("250-version=1\r\n").await.is_err());
        assert!(parse("25\r\n").await.is_err());
    }

    #[test]
    fn test_path_for_launched_circuit() {
        assert_eq!(
            parse_circuit_path("4 LAUNCHED BUILD_FLAGS=NEED_CAPACITY", "4").unwrap(),
            Vec::<String>::new()
        );
    }
}
