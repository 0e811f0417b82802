//! Bridging methods, quotes and ranking

use crate::{
    amount::{Amount, FeeRate},
    chain::ChainConfig,
    transfer::TransferRequest,
    TOKEN_UNIT,
};
use serde::{Deserialize, Serialize, Serializer};
use std::{cmp::Ordering, fmt};

/// Closed set of supported bridging methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BridgeMethod {
    /// Burn on source, attest off-chain, mint on destination
    #[serde(rename = "CCTP", alias = "NativeMessaging", alias = "cctp")]
    NativeMessaging,
    /// Single call to a custodial bridge API
    #[serde(rename = "Bridge Kit", alias = "Custodial", alias = "BridgeKit")]
    Custodial,
}

impl BridgeMethod {
    pub const ALL: [BridgeMethod; 2] = [BridgeMethod::NativeMessaging, BridgeMethod::Custodial];

    /// Wire name, also used as the final ranking tie-break
    pub fn name(&self) -> &'static str {
        match self {
            BridgeMethod::NativeMessaging => "CCTP",
            BridgeMethod::Custodial => "Bridge Kit",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        let normalized: String = name
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "cctp" | "nativemessaging" => Some(BridgeMethod::NativeMessaging),
            "bridgekit" | "custodial" => Some(BridgeMethod::Custodial),
            _ => None,
        }
    }
}

impl fmt::Display for BridgeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How comfortably the destination pool absorbs the requested amount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LiquidityTier {
    Low,
    Medium,
    High,
}

impl LiquidityTier {
    /// High above 10x the amount, Medium if the pool covers it, Low otherwise
    pub fn classify(available: Amount, requested: Amount) -> Self {
        match requested.checked_mul(10) {
            Some(ten_x) if available > ten_x => LiquidityTier::High,
            _ if available >= requested => LiquidityTier::Medium,
            _ => LiquidityTier::Low,
        }
    }
}

/// Estimated settlement time window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DurationRange {
    pub min_secs: u64,
    pub max_secs: u64,
}

impl DurationRange {
    pub const fn minutes(min: u64, max: u64) -> Self {
        Self {
            min_secs: min * 60,
            max_secs: max * 60,
        }
    }

    /// Shorter ranges first: by upper bound, then lower bound
    pub fn faster_cmp(&self, other: &Self) -> Ordering {
        self.max_secs
            .cmp(&other.max_secs)
            .then(self.min_secs.cmp(&other.min_secs))
    }
}

impl fmt::Display for DurationRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.min_secs % 60 == 0 && self.max_secs % 60 == 0 {
            write!(f, "{}-{} minutes", self.min_secs / 60, self.max_secs / 60)
        } else {
            write!(f, "{}-{} seconds", self.min_secs, self.max_secs)
        }
    }
}

/// Fee and latency profile of a bridging method
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodProfile {
    pub method: BridgeMethod,
    pub fee_rate: FeeRate,
    /// Intrinsic preference in whole tokens; the fee is subtracted from it
    pub baseline_score: u32,
    pub duration: DurationRange,
}

impl MethodProfile {
    pub fn native_messaging() -> Self {
        Self {
            method: BridgeMethod::NativeMessaging,
            fee_rate: FeeRate::from_ppm(1_000),
            baseline_score: 100,
            duration: DurationRange::minutes(5, 10),
        }
    }

    pub fn custodial() -> Self {
        Self {
            method: BridgeMethod::Custodial,
            fee_rate: FeeRate::from_ppm(2_000),
            baseline_score: 90,
            duration: DurationRange::minutes(10, 15),
        }
    }
}

/// Route score in micro-units of the source token; higher is better
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Score(i128);

impl Score {
    /// Baseline minus the absolute fee
    pub fn from_baseline(baseline: u32, fee: Amount) -> Self {
        let fee = i128::try_from(fee.units()).unwrap_or(i128::MAX);
        Score((baseline as i128 * TOKEN_UNIT as i128).saturating_sub(fee))
    }

    pub fn micros(&self) -> i128 {
        self.0
    }

    pub fn as_f64(&self) -> f64 {
        self.0 as f64 / TOKEN_UNIT as f64
    }
}

impl Serialize for Score {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_f64())
    }
}

/// A non-binding fee/time estimate for one method
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteQuote {
    pub method: BridgeMethod,
    /// Destination chain registry key
    pub destination_chain: String,
    pub destination_chain_name: String,
    pub token: String,
    /// Fee in source token units
    pub estimated_fee: Amount,
    pub estimated_duration: DurationRange,
    pub liquidity_tier: LiquidityTier,
    pub score: Score,
}

impl RouteQuote {
    /// Price a request with a method profile
    pub fn build(
        profile: &MethodProfile,
        request: &TransferRequest,
        destination: &ChainConfig,
        available_liquidity: Amount,
    ) -> Self {
        let fee = request.amount.apply_rate(profile.fee_rate);
        Self {
            method: profile.method,
            destination_chain: destination.key.clone(),
            destination_chain_name: destination.display_name.clone(),
            token: request.token.clone(),
            estimated_fee: fee,
            estimated_duration: profile.duration,
            liquidity_tier: LiquidityTier::classify(available_liquidity, request.amount),
            score: Score::from_baseline(profile.baseline_score, fee),
        }
    }

    /// Ranking order: score descending, shorter duration, then method name
    pub fn rank_cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .cmp(&self.score)
            .then_with(|| self.estimated_duration.faster_cmp(&other.estimated_duration))
            .then_with(|| self.method.name().cmp(other.method.name()))
    }
}

/// Optimizer result: the automatic choice plus the alternatives
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedQuotes {
    /// The validated request, destination resolved
    pub request: TransferRequest,
    pub chosen: RouteQuote,
    pub alternatives: Vec<RouteQuote>,
}

impl RankedQuotes {
    /// Rank quotes; `None` when there is nothing to choose from
    pub fn rank(request: TransferRequest, mut quotes: Vec<RouteQuote>) -> Option<Self> {
        quotes.sort_by(RouteQuote::rank_cmp);
        let mut iter = quotes.into_iter();
        let chosen = iter.next()?;
        Some(Self {
            request,
            chosen,
            alternatives: iter.collect(),
        })
    }

    /// All quotes in rank order
    pub fn iter(&self) -> impl Iterator<Item = &RouteQuote> {
        std::iter::once(&self.chosen).chain(self.alternatives.iter())
    }

    /// Quote for a specific method, for callers overriding the automatic choice
    pub fn quote_for(&self, method: BridgeMethod) -> Option<&RouteQuote> {
        self.iter().find(|q| q.method == method)
    }
}
