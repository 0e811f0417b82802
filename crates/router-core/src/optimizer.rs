//! Route optimizer
//!
//! Validates a transfer request, asks every eligible adapter for a quote and
//! ranks them. Reads only the injected registry and liquidity snapshot; no
//! side effects.

use bridge_types::{
    Amount, BridgeError, BridgeMethod, BridgeResult, ChainConfig, ChainRegistry, EvmAddress,
    LiquiditySnapshot, ProtocolAdapter, RankedQuotes, RouteQuote, TransferRequest,
};
use std::sync::Arc;

/// Unvalidated route request as received from a caller
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteRequest {
    /// Chain key, hex or decimal chain id, or display name
    pub source_chain: String,
    /// Defaults to the source chain's configured counterpart
    pub destination_chain: Option<String>,
    pub token: String,
    /// Decimal amount in whole tokens
    pub amount: String,
    pub from_address: String,
    pub to_address: String,
}

pub struct RouteOptimizer {
    registry: Arc<ChainRegistry>,
    liquidity: Arc<LiquiditySnapshot>,
    adapters: Vec<Arc<dyn ProtocolAdapter>>,
}

impl RouteOptimizer {
    pub fn new(
        registry: Arc<ChainRegistry>,
        liquidity: Arc<LiquiditySnapshot>,
        adapters: Vec<Arc<dyn ProtocolAdapter>>,
    ) -> Self {
        Self {
            registry,
            liquidity,
            adapters,
        }
    }

    pub fn registry(&self) -> &ChainRegistry {
        &self.registry
    }

    pub fn liquidity(&self) -> &LiquiditySnapshot {
        &self.liquidity
    }

    /// Validate, quote and rank
    pub fn optimize(&self, request: &RouteRequest) -> BridgeResult<RankedQuotes> {
        let (request, destination) = self.validate(request)?;
        let available = self
            .liquidity
            .available(&destination.key, &request.token);

        let quotes: Vec<RouteQuote> = self
            .eligible(&request)
            .map(|adapter| adapter.quote(&request, destination, available))
            .collect();

        tracing::debug!(
            source = %request.source_chain,
            destination = %request.destination_chain,
            token = %request.token,
            amount = %request.amount,
            quotes = quotes.len(),
            "Quoted route"
        );

        let description = format!(
            "{} from {} to {}",
            request.token, request.source_chain, request.destination_chain
        );
        RankedQuotes::rank(request, quotes).ok_or(BridgeError::UnsupportedRoute(description))
    }

    /// Optimize, then take the quote for `method` (or the chosen one)
    pub fn select(
        &self,
        request: &RouteRequest,
        method: Option<BridgeMethod>,
    ) -> BridgeResult<(TransferRequest, RouteQuote)> {
        let ranked = self.optimize(request)?;
        let quote = match method {
            Some(method) => ranked.quote_for(method).cloned().ok_or_else(|| {
                BridgeError::UnsupportedRoute(format!(
                    "{} is not available for {} from {} to {}",
                    method,
                    ranked.request.token,
                    ranked.request.source_chain,
                    ranked.request.destination_chain
                ))
            })?,
            None => ranked.chosen.clone(),
        };
        Ok((ranked.request, quote))
    }

    fn eligible<'a>(
        &'a self,
        request: &'a TransferRequest,
    ) -> impl Iterator<Item = &'a Arc<dyn ProtocolAdapter>> + 'a {
        let source = self.registry.get(&request.source_chain);
        let destination = self.registry.get(&request.destination_chain);
        self.adapters.iter().filter(move |adapter| match (source, destination) {
            (Some(source), Some(destination)) => {
                adapter.supports(source, destination, &request.token)
            }
            _ => false,
        })
    }

    /// Input validation runs before any adapter is consulted
    fn validate(&self, request: &RouteRequest) -> BridgeResult<(TransferRequest, &ChainConfig)> {
        let from_address = EvmAddress::parse(&request.from_address)?;
        let to_address = EvmAddress::parse(&request.to_address)?;
        let amount = Amount::parse(&request.amount)?;
        if amount.is_zero() {
            return Err(BridgeError::InvalidRequest(
                "Amount must be greater than zero".to_string(),
            ));
        }

        let token = request.token.trim().to_ascii_uppercase();
        if token.is_empty() || !token.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(BridgeError::InvalidRequest(format!(
                "Invalid token symbol: {:?}",
                request.token
            )));
        }

        let source = self
            .registry
            .resolve(&request.source_chain)
            .ok_or_else(|| BridgeError::UnsupportedChain(request.source_chain.clone()))?;

        let destination = match request.destination_chain.as_deref() {
            Some(reference) if !reference.trim().is_empty() => self
                .registry
                .resolve(reference)
                .ok_or_else(|| BridgeError::UnsupportedChain(reference.to_string()))?,
            _ => self.registry.counterpart_of(source).ok_or_else(|| {
                BridgeError::UnsupportedRoute(format!("{} has no counterpart chain", source.key))
            })?,
        };
        if destination.key == source.key {
            return Err(BridgeError::UnsupportedRoute(format!(
                "source and destination are both {}",
                source.key
            )));
        }

        Ok((
            TransferRequest {
                source_chain: source.key.clone(),
                destination_chain: destination.key.clone(),
                token,
                amount,
                from_address,
                to_address,
            },
            destination,
        ))
    }
}
