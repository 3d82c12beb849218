// Node configuration (spec §6). Loading is a thin JSON reader; the CLI
// entry point decides what to do about a missing file.

use crate::error::{NodeError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_root() -> PathBuf {
    PathBuf::from("./data")
}

fn default_flush_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_ticket_ttl() -> Duration {
    Duration::from_secs(30)
}

fn default_reserve_ttl() -> Duration {
    Duration::from_secs(120)
}

fn default_peers() -> Vec<String> {
    (0..crate::healing::TOTAL_PEERS)
        .map(|i| format!("127.0.0.1:{}", 8000 + i))
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Working directory root; `Data/` and `Folders/` live under it.
    pub root: PathBuf,
    /// This node's id, 0..24.
    pub node_id: u8,
    /// Coin id this node authenticates (protocol routing check).
    pub coin_id: u8,
    /// Addresses of all 25 peers in the healing cohort, indexed by peer id.
    pub peers: Vec<String>,
    /// 16-byte administrative key.
    pub admin_key: [u8; 16],
    /// This node's private key, handed to the payment oracle on a
    /// marketplace `buy` so it can verify the payment was made to us.
    pub payment_private_key: [u8; 32],
    pub flush_interval: Duration,
    pub ticket_ttl: Duration,
    pub reservation_ttl: Duration,
    pub max_cached_pages: usize,
    pub listen_address: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            node_id: 0,
            coin_id: 1,
            peers: default_peers(),
            admin_key: [0u8; 16],
            payment_private_key: [0u8; 32],
            flush_interval: default_flush_interval(),
            ticket_ttl: default_ticket_ttl(),
            reservation_ttl: default_reserve_ttl(),
            max_cached_pages: 4096,
            listen_address: "0.0.0.0:8080".to_string(),
        }
    }
}

impl NodeConfig {
    /// Load from a JSON file. A malformed file is an error; a missing file
    /// is the caller's problem, not this function's (see SPEC_FULL.md).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| NodeError::Configuration(format!("{}: {}", path.as_ref().display(), e)))?;
        let config: NodeConfig = serde_json::from_str(&text)?;
        if config.node_id as usize >= crate::healing::TOTAL_PEERS {
            return Err(NodeError::Configuration(format!(
                "node_id {} out of range 0..{}",
                config.node_id,
                crate::healing::TOTAL_PEERS
            )));
        }
        Ok(config)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join("Data")
    }

    pub fn folders_dir(&self) -> PathBuf {
        self.root.join("Folders")
    }
}
