//! Chain JSON-RPC access
//!
//! Transactions go out through `eth_sendTransaction`, so the node signs with
//! its managed account. Receipts are polled until the chain's required
//! confirmation depth is reached; a failed receipt is replayed with
//! `eth_call` at the same block to recover the revert reason.

use crate::{
    abi,
    error::{AdapterError, AdapterResult},
};
use async_trait::async_trait;
use bridge_types::{to_hex_prefixed, Amount, EvmAddress};
use jsonrpsee::{
    core::{client::ClientT, ClientError},
    http_client::{HttpClient, HttpClientBuilder},
    rpc_params,
};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Event log emitted by a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub address: EvmAddress,
    pub topics: Vec<[u8; 32]>,
    pub data: Vec<u8>,
}

/// Receipt of a confirmed, successful transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: String,
    pub block_number: u64,
    /// Depth observed when the wait returned
    pub confirmations: u64,
    pub logs: Vec<LogEntry>,
}

/// Read/write access to one chain
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// ERC-20 `balanceOf`
    async fn token_balance(&self, token: EvmAddress, owner: EvmAddress) -> AdapterResult<Amount>;

    /// ERC-20 `allowance`
    async fn allowance(
        &self,
        token: EvmAddress,
        owner: EvmAddress,
        spender: EvmAddress,
    ) -> AdapterResult<Amount>;

    /// Submit a transaction signed by the node-managed `from` account
    async fn send_transaction(
        &self,
        from: EvmAddress,
        to: EvmAddress,
        data: Vec<u8>,
    ) -> AdapterResult<String>;

    /// Wait until `tx_hash` is included and `confirmations` deep
    ///
    /// Returns `AdapterError::Reverted` if the transaction failed on chain.
    async fn wait_for_receipt(&self, tx_hash: &str, confirmations: u64) -> AdapterResult<TxReceipt>;
}

/// Receipt polling bounds
///
/// Running out of polls is an `AdapterError::Timeout`, which the burn/mint
/// adapter reports as in transit once the burn has been sent.
#[derive(Debug, Clone, Copy)]
pub struct ReceiptPolicy {
    pub poll_interval: Duration,
    pub max_polls: u32,
}

impl Default for ReceiptPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            max_polls: 180,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLog {
    address: String,
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default)]
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    transaction_hash: String,
    status: Option<String>,
    block_number: Option<String>,
    #[serde(default)]
    logs: Vec<RawLog>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTransaction {
    from: String,
    to: Option<String>,
    input: String,
}

fn parse_quantity(value: &str) -> AdapterResult<u64> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    u64::from_str_radix(digits, 16)
        .map_err(|_| AdapterError::Decode(format!("invalid quantity {:?}", value)))
}

fn parse_topic(value: &str) -> AdapterResult<[u8; 32]> {
    abi::parse_hex(value)
        .and_then(|bytes| <[u8; 32]>::try_from(bytes).ok())
        .ok_or_else(|| AdapterError::Decode(format!("invalid topic {:?}", value)))
}

impl RawLog {
    fn into_entry(self) -> AdapterResult<LogEntry> {
        let address = EvmAddress::parse(&self.address.to_ascii_lowercase())
            .map_err(|e| AdapterError::Decode(e.to_string()))?;
        let topics = self
            .topics
            .iter()
            .map(|t| parse_topic(t))
            .collect::<AdapterResult<Vec<_>>>()?;
        let data = abi::parse_hex(&self.data)
            .ok_or_else(|| AdapterError::Decode("invalid log data".to_string()))?;
        Ok(LogEntry {
            address,
            topics,
            data,
        })
    }
}

fn rpc_error(err: ClientError) -> AdapterError {
    match err {
        ClientError::Call(call) => {
            let message = call.message().to_string();
            if message.to_ascii_lowercase().contains("revert") {
                AdapterError::Reverted {
                    tx_hash: None,
                    reason: message,
                }
            } else {
                AdapterError::Rpc(message)
            }
        }
        ClientError::RequestTimeout => AdapterError::Timeout("rpc request".to_string()),
        ClientError::ParseError(e) => AdapterError::Decode(e.to_string()),
        other => AdapterError::Transport(other.to_string()),
    }
}

/// `ChainRpc` over an Ethereum JSON-RPC HTTP endpoint
pub struct EvmRpcClient {
    client: HttpClient,
    endpoint: String,
    policy: ReceiptPolicy,
}

impl EvmRpcClient {
    pub fn new(endpoint: &str, policy: ReceiptPolicy) -> AdapterResult<Self> {
        let client = HttpClientBuilder::default()
            .request_timeout(Duration::from_secs(30))
            .build(endpoint)
            .map_err(|e| AdapterError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            policy,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn call(&self, to: EvmAddress, data: Vec<u8>) -> AdapterResult<Vec<u8>> {
        let request = json!({ "to": to.to_checksum(), "data": to_hex_prefixed(&data) });
        let result: String = self
            .client
            .request("eth_call", rpc_params![request, "latest"])
            .await
            .map_err(rpc_error)?;
        abi::parse_hex(&result).ok_or_else(|| AdapterError::Decode("invalid eth_call result".into()))
    }

    async fn call_uint(&self, to: EvmAddress, data: Vec<u8>) -> AdapterResult<Amount> {
        let output = self.call(to, data).await?;
        abi::word(&output, 0)
            .and_then(abi::decode_uint)
            .map(Amount::from_units)
            .ok_or_else(|| AdapterError::Decode("expected a uint256 return value".into()))
    }

    pub async fn block_number(&self) -> AdapterResult<u64> {
        let head: String = self
            .client
            .request("eth_blockNumber", rpc_params![])
            .await
            .map_err(rpc_error)?;
        parse_quantity(&head)
    }

    async fn receipt(&self, tx_hash: &str) -> AdapterResult<Option<RawReceipt>> {
        self.client
            .request("eth_getTransactionReceipt", rpc_params![tx_hash])
            .await
            .map_err(rpc_error)
    }

    /// Re-run a failed transaction at its block to recover the revert reason
    async fn replay_revert(&self, tx_hash: &str, block_number: u64) -> AdapterError {
        let fallback = AdapterError::Reverted {
            tx_hash: Some(tx_hash.to_string()),
            reason: "transaction reverted".to_string(),
        };

        let tx: Option<RawTransaction> = match self
            .client
            .request("eth_getTransactionByHash", rpc_params![tx_hash])
            .await
        {
            Ok(tx) => tx,
            Err(e) => {
                tracing::debug!(tx_hash, error = %e, "Could not fetch reverted transaction");
                return fallback;
            }
        };
        let Some(tx) = tx else {
            return fallback;
        };

        let request = json!({ "from": tx.from, "to": tx.to, "data": tx.input });
        let block = format!("{:#x}", block_number);
        match self
            .client
            .request::<String, _>("eth_call", rpc_params![request, block])
            .await
            .map_err(rpc_error)
        {
            Err(AdapterError::Reverted { reason, .. }) | Err(AdapterError::Rpc(reason)) => {
                AdapterError::Reverted {
                    tx_hash: Some(tx_hash.to_string()),
                    reason,
                }
            }
            _ => fallback,
        }
    }
}

#[async_trait]
impl ChainRpc for EvmRpcClient {
    async fn token_balance(&self, token: EvmAddress, owner: EvmAddress) -> AdapterResult<Amount> {
        self.call_uint(token, abi::balance_of(owner)).await
    }

    async fn allowance(
        &self,
        token: EvmAddress,
        owner: EvmAddress,
        spender: EvmAddress,
    ) -> AdapterResult<Amount> {
        self.call_uint(token, abi::allowance(owner, spender)).await
    }

    async fn send_transaction(
        &self,
        from: EvmAddress,
        to: EvmAddress,
        data: Vec<u8>,
    ) -> AdapterResult<String> {
        let tx = json!({
            "from": from.to_checksum(),
            "to": to.to_checksum(),
            "data": to_hex_prefixed(&data),
        });
        let hash: String = self
            .client
            .request("eth_sendTransaction", rpc_params![tx])
            .await
            .map_err(rpc_error)?;
        tracing::debug!(endpoint = %self.endpoint, tx_hash = %hash, "Transaction submitted");
        Ok(hash)
    }

    async fn wait_for_receipt(&self, tx_hash: &str, confirmations: u64) -> AdapterResult<TxReceipt> {
        let required = confirmations.max(1);

        for attempt in 1..=self.policy.max_polls {
            match self.receipt(tx_hash).await {
                Ok(Some(raw)) => {
                    let block_number = raw
                        .block_number
                        .as_deref()
                        .map(parse_quantity)
                        .transpose()?;

                    // Pending receipts from some nodes carry no block yet
                    if let Some(block_number) = block_number {
                        if raw.status.as_deref() == Some("0x0") {
                            return Err(self.replay_revert(tx_hash, block_number).await);
                        }

                        let head = self.block_number().await?;
                        let depth = head.saturating_sub(block_number) + 1;
                        if depth >= required {
                            let logs = raw
                                .logs
                                .into_iter()
                                .map(RawLog::into_entry)
                                .collect::<AdapterResult<Vec<_>>>()?;
                            return Ok(TxReceipt {
                                tx_hash: raw.transaction_hash,
                                block_number,
                                confirmations: depth,
                                logs,
                            });
                        }
                        tracing::trace!(tx_hash, depth, required, "Waiting for confirmations");
                    }
                }
                Ok(None) => {}
                Err(e) if e.is_transient() => {
                    tracing::warn!(tx_hash, attempt, error = %e, "Receipt poll failed, retrying");
                }
                Err(e) => return Err(e),
            }

            tokio::time::sleep(self.policy.poll_interval).await;
        }

        Err(AdapterError::Timeout(format!(
            "transaction {} not confirmed after {} polls",
            tx_hash, self.policy.max_polls
        )))
    }
}

/// Find the payload of the `MessageSent(bytes)` event emitted by `transmitter`
pub fn find_message_sent(logs: &[LogEntry], transmitter: EvmAddress) -> Option<Vec<u8>> {
    let topic = abi::event_topic(abi::MESSAGE_SENT);
    logs.iter()
        .filter(|log| log.address == transmitter)
        .find(|log| log.topics.first() == Some(&topic))
        .and_then(|log| abi::decode_bytes(&log.data, 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("0x10").unwrap(), 16);
        assert_eq!(parse_quantity("0x0").unwrap(), 0);
        assert!(parse_quantity("0xzz").is_err());
    }

    #[test]
    fn test_find_message_sent() {
        let transmitter = EvmAddress::from_bytes([0x78; 20]);
        let other = EvmAddress::from_bytes([0x01; 20]);
        let message = vec![0x42; 40];
        let data = abi::encode(&[abi::Token::Bytes(message.clone())]);
        let topic = abi::event_topic(abi::MESSAGE_SENT);

        let logs = vec![
            LogEntry {
                address: other,
                topics: vec![topic],
                data: abi::encode(&[abi::Token::Bytes(vec![0x00; 4])]),
            },
            LogEntry {
                address: transmitter,
                topics: vec![[0u8; 32]],
                data: Vec::new(),
            },
            LogEntry {
                address: transmitter,
                topics: vec![topic],
                data,
            },
        ];

        assert_eq!(find_message_sent(&logs, transmitter), Some(message));
        assert_eq!(find_message_sent(&logs[..2], transmitter), None);
    }

    #[test]
    fn test_raw_receipt_decodes() {
        let raw: RawReceipt = serde_json::from_value(json!({
            "transactionHash": "0xabc",
            "status": "0x1",
            "blockNumber": "0x1b4",
            "logs": [{
                "address": "0x7865fafc2db2093669d92c0f33aeef291086befd",
                "topics": ["0x8c5261668696ce22758910d05bab8f186d6eb247ceac2af2e82c7dc17669b036"],
                "data": "0x"
            }]
        }))
        .unwrap();
        assert_eq!(raw.block_number.as_deref().map(parse_quantity).unwrap().unwrap(), 436);
        let entry = raw.logs.into_iter().next().unwrap().into_entry().unwrap();
        assert_eq!(entry.topics.len(), 1);
        assert!(entry.data.is_empty());
    }
}
