//! Node Configuration
//!
//! Loaded from an optional JSON file; missing fields fall back to the
//! Sepolia <-> Arc testnet deployment.

use anyhow::Context;
use bridge_types::{Amount, ChainConfig, EvmAddress, LiquidityEntry, MethodProfile};
use protocol_adapters::{attestation::DEFAULT_ATTESTATION_URL, custodial::DEFAULT_CUSTODIAL_URL, StatusPollConfig};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::{Path, PathBuf}, time::Duration};

/// Environment variable holding the custodial bridge API key
pub const CUSTODIAL_API_KEY_ENV: &str = "CUSTODIAL_API_KEY";

/// Environment variable overriding the operator account
pub const OPERATOR_ACCOUNT_ENV: &str = "OPERATOR_ACCOUNT";

/// Node configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeConfig {
    /// HTTP API bind address
    pub http_addr: String,
    /// WebSocket bind address
    pub ws_addr: String,
    /// Directory of the transfer store
    pub data_dir: PathBuf,
    /// Source chain for execute requests that name none
    pub default_source_chain: String,
    pub chains: Vec<ChainConfig>,
    pub liquidity: Vec<LiquidityEntry>,
    pub profiles: ProfilesConfig,
    pub attestation: AttestationConfig,
    pub custodial: CustodialConfig,
    pub receipts: ReceiptConfig,
    /// Account that submits `receiveMessage` on destination chains
    pub operator_account: Option<EvmAddress>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilesConfig {
    pub native_messaging: MethodProfile,
    pub custodial: MethodProfile,
}

impl Default for ProfilesConfig {
    fn default() -> Self {
        Self {
            native_messaging: MethodProfile::native_messaging(),
            custodial: MethodProfile::custodial(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AttestationConfig {
    pub url: String,
    pub poll_interval_secs: u64,
    pub max_attempts: u32,
}

impl Default for AttestationConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_ATTESTATION_URL.to_string(),
            poll_interval_secs: 10,
            max_attempts: 30,
        }
    }
}

impl AttestationConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CustodialConfig {
    pub base_url: String,
    pub polling: StatusPollConfig,
}

impl Default for CustodialConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_CUSTODIAL_URL.to_string(),
            polling: StatusPollConfig::default(),
        }
    }
}

/// Transaction receipt polling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReceiptConfig {
    pub poll_interval_ms: u64,
    pub max_polls: u32,
}

impl Default for ReceiptConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            max_polls: 180,
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            http_addr: "127.0.0.1:3001".to_string(),
            ws_addr: "127.0.0.1:3002".to_string(),
            data_dir: PathBuf::from("./data"),
            default_source_chain: "sepolia".to_string(),
            chains: vec![sepolia(), arc()],
            liquidity: vec![
                pool("sepolia", "USDC", 500_000),
                pool("sepolia", "EURC", 250_000),
                pool("arc", "USDC", 300_000),
                pool("arc", "EURC", 150_000),
            ],
            profiles: ProfilesConfig::default(),
            attestation: AttestationConfig::default(),
            custodial: CustodialConfig::default(),
            receipts: ReceiptConfig::default(),
            operator_account: None,
        }
    }
}

impl NodeConfig {
    /// Read a JSON config file, or the defaults when no path is given
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Cross-field checks serde cannot express
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chains.is_empty() {
            anyhow::bail!("no chains configured");
        }
        for chain in &self.chains {
            if let Some(counterpart) = &chain.counterpart {
                if !self.chains.iter().any(|c| &c.key == counterpart) {
                    anyhow::bail!("chain {} names unknown counterpart {}", chain.key, counterpart);
                }
            }
        }
        if !self.chains.iter().any(|c| c.key == self.default_source_chain) {
            anyhow::bail!("default source chain {} is not configured", self.default_source_chain);
        }
        if self.attestation.max_attempts == 0 {
            anyhow::bail!("attestation.maxAttempts must be at least 1");
        }
        Ok(())
    }
}

fn address(hex: &str) -> EvmAddress {
    EvmAddress::parse(hex).unwrap_or(EvmAddress::ZERO)
}

fn pool(chain: &str, token: &str, whole: u64) -> LiquidityEntry {
    LiquidityEntry {
        chain: chain.to_string(),
        token: token.to_string(),
        available: Amount::from_whole(whole),
        utilization_rate: 0.5,
    }
}

fn sepolia() -> ChainConfig {
    let mut tokens = BTreeMap::new();
    tokens.insert("USDC".to_string(), address("0x1c7d4b196cb0c7b01d743fbc6116a902379c7238"));
    tokens.insert("EURC".to_string(), address("0x08210f9170f89ab7658f0b5e3ff39b0e03c594d4"));
    ChainConfig {
        key: "sepolia".to_string(),
        chain_id: 11_155_111,
        display_name: "Ethereum Sepolia".to_string(),
        rpc_endpoint: "https://ethereum-sepolia-rpc.publicnode.com".to_string(),
        tokens,
        bridge_contract: address("0x9f3b8679c73c2fef8b59b4f3444d4e156fb70aa5"),
        message_transmitter: address("0x7865fafc2db2093669d92c0f33aeef291086befd"),
        cctp_domain: 0,
        confirmations: 2,
        counterpart: Some("arc".to_string()),
        supports_burn_mint: true,
    }
}

fn arc() -> ChainConfig {
    let mut tokens = BTreeMap::new();
    tokens.insert("USDC".to_string(), address("0x3600000000000000000000000000000000000000"));
    tokens.insert("EURC".to_string(), address("0x89b50855aa3be2f677cd6303cec089b5f319d72a"));
    ChainConfig {
        key: "arc".to_string(),
        chain_id: 0x5afe,
        display_name: "Arc Testnet".to_string(),
        rpc_endpoint: "https://rpc.testnet.arc.network".to_string(),
        tokens,
        bridge_contract: address("0x8fe6b999dc680ccfdd5bf7eb0974218be2542daa"),
        message_transmitter: address("0xe737e5cebeeba77efe34d4aa090756590b1ce275"),
        cctp_domain: 26,
        confirmations: 1,
        counterpart: Some("sepolia".to_string()),
        supports_burn_mint: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_is_the_testnet_deployment() {
        let config = NodeConfig::default();
        config.validate().unwrap();

        assert_eq!(config.chains.len(), 2);
        for chain in &config.chains {
            assert_ne!(chain.bridge_contract, EvmAddress::ZERO);
            assert_ne!(chain.message_transmitter, EvmAddress::ZERO);
            assert!(chain.tokens.values().all(|a| *a != EvmAddress::ZERO));
        }
        assert_eq!(config.attestation.max_attempts, 30);
        assert_eq!(config.attestation.poll_interval(), Duration::from_secs(10));
        assert_eq!(config.liquidity.len(), 4);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("node.json");
        std::fs::write(
            &path,
            r#"{
                "httpAddr": "0.0.0.0:8080",
                "attestation": { "maxAttempts": 5 },
                "operatorAccount": "0x1c7D4B196Cb0C7B01d743Fbc6116a902379C7238"
            }"#,
        )
        .unwrap();

        let config = NodeConfig::load(Some(&path)).unwrap();
        assert_eq!(config.http_addr, "0.0.0.0:8080");
        assert_eq!(config.attestation.max_attempts, 5);
        assert_eq!(config.attestation.poll_interval_secs, 10);
        assert_eq!(config.chains, NodeConfig::default().chains);
        assert!(config.operator_account.is_some());
    }

    #[test]
    fn test_rejects_dangling_counterpart() {
        let mut config = NodeConfig::default();
        config.chains.truncate(1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(NodeConfig::load(Some(&dir.path().join("absent.json"))).is_err());
    }
}
