//! Chain registry and liquidity snapshot
//!
//! Both are loaded once at startup and shared read-only (behind `Arc`) by the
//! optimizer, the adapters and the API.

use crate::{address::EvmAddress, amount::Amount};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Static configuration of one chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainConfig {
    /// Short registry key, e.g. `sepolia`
    pub key: String,
    /// EVM chain id
    pub chain_id: u64,
    pub display_name: String,
    pub rpc_endpoint: String,
    /// Token contract per symbol (upper-case)
    pub tokens: BTreeMap<String, EvmAddress>,
    /// Token messenger contract: approval spender and `depositForBurn` target
    pub bridge_contract: EvmAddress,
    /// Message transmitter contract: emits `MessageSent`, receives `receiveMessage`
    pub message_transmitter: EvmAddress,
    /// Burn/mint messaging domain id
    pub cctp_domain: u32,
    /// Block confirmations required before a transaction counts as final
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
    /// Counterpart chain used when a request does not name a destination
    #[serde(default)]
    pub counterpart: Option<String>,
    pub supports_burn_mint: bool,
}

fn default_confirmations() -> u64 {
    1
}

impl ChainConfig {
    /// Token contract address for a symbol (case-insensitive)
    pub fn token_address(&self, symbol: &str) -> Option<&EvmAddress> {
        self.tokens.get(&symbol.to_ascii_uppercase())
    }

    pub fn has_token(&self, symbol: &str) -> bool {
        self.token_address(symbol).is_some()
    }

    /// Chain id in the `0x`-prefixed form wallets report
    pub fn chain_id_hex(&self) -> String {
        format!("{:#x}", self.chain_id)
    }
}

/// Immutable registry of configured chains
#[derive(Debug, Clone, Default)]
pub struct ChainRegistry {
    chains: BTreeMap<String, ChainConfig>,
}

impl ChainRegistry {
    pub fn new(chains: impl IntoIterator<Item = ChainConfig>) -> Self {
        Self {
            chains: chains
                .into_iter()
                .map(|c| (c.key.to_ascii_lowercase(), c))
                .collect(),
        }
    }

    /// Get a chain by registry key
    pub fn get(&self, key: &str) -> Option<&ChainConfig> {
        self.chains.get(&key.to_ascii_lowercase())
    }

    /// Resolve a chain reference
    ///
    /// Accepts the registry key, the chain id (`0xaa36a7` or `11155111`) or the
    /// display name, all matched whole.
    pub fn resolve(&self, reference: &str) -> Option<&ChainConfig> {
        let needle = reference.trim().to_ascii_lowercase();
        if needle.is_empty() {
            return None;
        }

        if let Some(chain) = self.chains.get(&needle) {
            return Some(chain);
        }

        let chain_id = match needle.strip_prefix("0x") {
            Some(hex) => u64::from_str_radix(hex, 16).ok(),
            None => needle.parse::<u64>().ok(),
        };
        if let Some(id) = chain_id {
            return self.chains.values().find(|c| c.chain_id == id);
        }

        self.chains
            .values()
            .find(|c| c.display_name.eq_ignore_ascii_case(&needle))
    }

    /// The configured counterpart of `chain`
    pub fn counterpart_of(&self, chain: &ChainConfig) -> Option<&ChainConfig> {
        chain.counterpart.as_deref().and_then(|key| self.get(key))
    }

    pub fn chains(&self) -> impl Iterator<Item = &ChainConfig> {
        self.chains.values()
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

/// Liquidity of one (chain, token) pool
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolLiquidity {
    pub available: Amount,
    pub utilization_rate: f64,
}

/// Config entry for the liquidity snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiquidityEntry {
    pub chain: String,
    pub token: String,
    pub available: Amount,
    #[serde(default = "default_utilization")]
    pub utilization_rate: f64,
}

fn default_utilization() -> f64 {
    0.5
}

/// Read-only liquidity snapshot keyed by (chain key, token symbol)
#[derive(Debug, Clone, Default)]
pub struct LiquiditySnapshot {
    pools: HashMap<(String, String), PoolLiquidity>,
}

impl LiquiditySnapshot {
    pub fn new(entries: impl IntoIterator<Item = LiquidityEntry>) -> Self {
        Self {
            pools: entries
                .into_iter()
                .map(|e| {
                    (
                        (e.chain.to_ascii_lowercase(), e.token.to_ascii_uppercase()),
                        PoolLiquidity {
                            available: e.available,
                            utilization_rate: e.utilization_rate,
                        },
                    )
                })
                .collect(),
        }
    }

    pub fn get(&self, chain: &str, token: &str) -> Option<&PoolLiquidity> {
        self.pools
            .get(&(chain.to_ascii_lowercase(), token.to_ascii_uppercase()))
    }

    /// Available liquidity, zero for unknown pools
    pub fn available(&self, chain: &str, token: &str) -> Amount {
        self.get(chain, token).map(|p| p.available).unwrap_or(Amount::ZERO)
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(key: &str, id: u64, name: &str, counterpart: &str) -> ChainConfig {
        ChainConfig {
            key: key.to_string(),
            chain_id: id,
            display_name: name.to_string(),
            rpc_endpoint: format!("http://{}.invalid", key),
            tokens: BTreeMap::new(),
            bridge_contract: EvmAddress::ZERO,
            message_transmitter: EvmAddress::ZERO,
            cctp_domain: 0,
            confirmations: 1,
            counterpart: Some(counterpart.to_string()),
            supports_burn_mint: true,
        }
    }

    #[test]
    fn test_resolve_by_key_id_and_name() {
        let registry = ChainRegistry::new([
            chain("sepolia", 11_155_111, "Ethereum Sepolia", "arc"),
            chain("arc", 0x5afe, "Arc Testnet", "sepolia"),
        ]);

        assert_eq!(registry.resolve("sepolia").unwrap().key, "sepolia");
        assert_eq!(registry.resolve("0xaa36a7").unwrap().key, "sepolia");
        assert_eq!(registry.resolve("11155111").unwrap().key, "sepolia");
        assert_eq!(registry.resolve("0x5afe").unwrap().key, "arc");
        assert_eq!(registry.resolve("Arc Testnet").unwrap().key, "arc");
        assert_eq!(registry.resolve("Ethereum Sepolia").unwrap().key, "sepolia");
        assert!(registry.resolve("0x1").is_none());
        assert!(registry.resolve("polygon").is_none());
        assert!(registry.resolve("").is_none());
    }

    #[test]
    fn test_resolve_rejects_names_embedding_a_key() {
        let registry = ChainRegistry::new([
            chain("sepolia", 11_155_111, "Ethereum Sepolia", "arc"),
            chain("arc", 0x5afe, "Arc Testnet", "sepolia"),
        ]);

        for reference in ["search", "polygon-archive", "arcturus", "sepolia-fork", "Arc"] {
            let resolved = registry.resolve(reference).map(|c| c.key.as_str());
            let expected = (reference == "Arc").then_some("arc");
            assert_eq!(resolved, expected, "reference {:?}", reference);
        }
    }

    #[test]
    fn test_counterpart() {
        let registry = ChainRegistry::new([
            chain("sepolia", 11_155_111, "Ethereum Sepolia", "arc"),
            chain("arc", 0x5afe, "Arc Testnet", "sepolia"),
        ]);
        let sepolia = registry.get("sepolia").unwrap();
        assert_eq!(registry.counterpart_of(sepolia).unwrap().key, "arc");
        assert_eq!(sepolia.chain_id_hex(), "0xaa36a7");
    }

    #[test]
    fn test_liquidity_lookup_is_case_insensitive() {
        let snapshot = LiquiditySnapshot::new([LiquidityEntry {
            chain: "arc".to_string(),
            token: "usdc".to_string(),
            available: Amount::from_whole(300_000),
            utilization_rate: 0.5,
        }]);
        assert_eq!(snapshot.available("ARC", "USDC"), Amount::from_whole(300_000));
        assert_eq!(snapshot.available("arc", "EURC"), Amount::ZERO);
        assert!(snapshot.get("sepolia", "USDC").is_none());
    }
}
