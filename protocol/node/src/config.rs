use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use serde::{Deserialize, Serialize};

#[derive(Parser, Debug, Default)]
#[command(name = "lumera-node")]
#[command(about = "Single-operator devnet node running the supernode audit module", long_about = None)]
pub struct Cli {
    /// YAML config file; command-line flags override its values
    #[arg(long, env = "LUMERA_NODE_CONFIG")]
    pub config: Option<PathBuf>,

    /// RPC listen address (e.g., 0.0.0.0:8545)
    #[arg(long, env = "LUMERA_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// Block interval in milliseconds
    #[arg(long, env = "LUMERA_BLOCK_TIME_MS")]
    pub block_time_ms: Option<u64>,

    /// JSON genesis file; a devnet genesis is used when absent
    #[arg(long, env = "GENESIS_PATH")]
    pub genesis: Option<PathBuf>,

    /// tracing-subscriber env filter directive
    #[arg(long, env = "LUMERA_LOG")]
    pub log_filter: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub listen: SocketAddr,
    pub block_time_ms: u64,
    pub genesis: Option<PathBuf>,
    pub mempool_limit: usize,
    pub max_txs_per_block: usize,
    pub log_filter: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8545)),
            block_time_ms: 1_000,
            genesis: None,
            mempool_limit: 10_000,
            max_txs_per_block: 1_000,
            log_filter: "info".into(),
        }
    }
}

impl NodeConfig {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading node config {}", path.display()))?;
        let config: NodeConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing node config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Config file (or defaults) with command-line overrides applied.
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let mut config = match &cli.config {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        if let Some(listen) = cli.listen {
            config.listen = listen;
        }
        if let Some(block_time_ms) = cli.block_time_ms {
            config.block_time_ms = block_time_ms;
        }
        if let Some(genesis) = &cli.genesis {
            config.genesis = Some(genesis.clone());
        }
        if let Some(filter) = &cli.log_filter {
            config.log_filter = filter.clone();
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.block_time_ms == 0 {
            anyhow::bail!("block_time_ms must be positive");
        }
        if self.mempool_limit == 0 || self.max_txs_per_block == 0 {
            anyhow::bail!("mempool_limit and max_txs_per_block must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_fills_missing_fields_with_defaults() {
        let config: NodeConfig =
            serde_yaml::from_str("block_time_ms: 250\nlisten: 127.0.0.1:9000\n").unwrap();
        assert_eq!(config.block_time_ms, 250);
        assert_eq!(config.listen, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.mempool_limit, NodeConfig::default().mempool_limit);
        assert!(config.genesis.is_none());
    }

    #[test]
    fn flags_override_file() {
        let path = std::env::temp_dir().join(format!("lumera-node-{}.yaml", std::process::id()));
        fs::write(&path, "block_time_ms: 250\nlog_filter: debug\n").unwrap();
        let cli = Cli {
            config: Some(path.clone()),
            block_time_ms: Some(50),
            ..Cli::default()
        };
        let config = NodeConfig::load(&cli).unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(config.block_time_ms, 50);
        assert_eq!(config.log_filter, "debug");
    }

    #[test]
    fn zero_block_time_is_rejected() {
        let cli = Cli {
            block_time_ms: Some(0),
            ..Cli::default()
        };
        assert!(NodeConfig::load(&cli).is_err());
    }
}
