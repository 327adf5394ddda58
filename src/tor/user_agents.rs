//! Browser user agent pool

use anyhow::{Context, Result};
use std::path::Path;

const BUILTIN: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:109.0) Gecko/20100101 Firefox/119.0",
    "Mozilla/5.0 (Windows NT 10.0; rv:115.0) Gecko/20100101 Firefox/115.0",
];

/// User agents to rotate through
#[derive(Debug, Clone)]
pub struct UserAgents(Vec<String>);

impl Default for UserAgents {
    fn default() -> Self {
        Self(BUILTIN.iter().map(|s| s.to_string()).collect())
    }
}

impl UserAgents {
    /// One agent per line; blank lines and `#` comments are ignored
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read user agents file {}", path.display()))?;
        let agents: Vec<String> = contents
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_string)
            .collect();
        if agents.is_empty() {
            anyhow::bail!("User agents file {} is empty", path.display());
        }
        Ok(Self(agents))
    }

    /// Pool from an optional file, falling back to the built-in list
    pub fn load(path: Option<&Path>) -> Result<Self> {
        path.map_or_else(|| Ok(Self::default()), Self::from_file)
    }

    pub fn random(&self) -> &str {
        crate::util::rand::choose(&self.0)
            .map(String::as_str)
            .unwrap_or(BUILTIN[0])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_pool() {
        let agents = UserAgents::default();
        assert_eq!(agents.len(), BUILTIN.len());
        assert!(BUILTIN.contains(&agents.random()));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agents.txt");
        std::fs::write(&path, "# agents\nAgentA/1.0\n\nAgentB/2.0\n").unwrap();
        let agents = UserAgents::load(Some(&path)).unwrap();
        assert_eq!(agents.len(), 2);
        assert!(agents.random().starts_with("Agent"));

        std::fs::write(&path, "# nothing\n").unwrap();
        assert!(UserAgents::from_file(&path).is_err());
    }
}
