use crate::consensus::constants::{ConsensusConstants, MAINNET, TEST_CONSTANTS};
use dg_node_logger::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fs;
use std::io::{Error, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    #[default]
    Simulator,
}
impl Network {
    pub fn consensus_constants(&self) -> Arc<ConsensusConstants> {
        match self {
            Network::Mainnet => Arc::new(MAINNET.clone()),
            Network::Testnet | Network::Simulator => Arc::new(TEST_CONSTANTS.clone()),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct NodeConfig {
    pub database_path: PathBuf,
    #[serde(default)]
    pub network: Network,
    #[serde(default)]
    pub mempool: MempoolConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct MempoolConfig {
    /// Percent of the block cost limit a block built from the mempool may use.
    pub max_block_clvm_cost_ratio: u64,
    pub max_pending_bundles: usize,
}
impl Default for MempoolConfig {
    fn default() -> Self {
        MempoolConfig {
            max_block_clvm_cost_ratio: 50,
            max_pending_bundles: 1000,
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct SyncConfig {
    pub batch_size: u32,
}
impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig { batch_size: 32 }
    }
}

impl NodeConfig {
    pub fn save_as_yaml<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        fs::write(
            path.as_ref(),
            serde_yaml::to_string(&self)
                .map_err(|e| Error::new(ErrorKind::Other, format!("{:?}", e)))?,
        )
    }
}

impl TryFrom<&Path> for NodeConfig {
    type Error = Error;
    fn try_from(value: &Path) -> Result<Self, Self::Error> {
        serde_yaml::from_str::<NodeConfig>(&fs::read_to_string(value)?)
            .map_err(|e| Error::new(ErrorKind::Other, format!("{:?}", e)))
    }
}
impl TryFrom<&PathBuf> for NodeConfig {
    type Error = Error;
    fn try_from(value: &PathBuf) -> Result<Self, Self::Error> {
        Self::try_from(value.as_path())
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            database_path: PathBuf::from("db/blockchain_v2.sqlite"),
            network: Network::default(),
            mempool: MempoolConfig::default(),
            sync: SyncConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[test]
fn test_config_yaml() {
    let path = std::env::temp_dir().join(format!("node_config_{}.yaml", std::process::id()));
    let config = NodeConfig {
        network: Network::Mainnet,
        ..Default::default()
    };
    config.save_as_yaml(&path).unwrap();
    let loaded = NodeConfig::try_from(&path).unwrap();
    let _ = fs::remove_file(&path);
    assert_eq!(config, loaded);
    let partial: NodeConfig = serde_yaml::from_str("database_path: /tmp/a.sqlite\n").unwrap();
    assert_eq!(partial.network, Network::Simulator);
    assert_eq!(partial.sync.batch_size, 32);
}
