//! Event types flowing through the engine
//!
//! `LogBatch` comes in from the log source, `NewPoolEvent` is the classified
//! candidate, and `EngineEvent` goes out on the notification channel. Engine
//! events are data for alerting sinks, not UI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::filter::FilterVerdict;
use crate::monitor::TriggeringTrade;
use crate::triggers::TriggerReason;

/// One ordered batch of raw log lines from a single observed transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogBatch {
    /// Venue name the batch was tagged with at the source
    pub venue: String,
    /// Raw log lines in arrival order
    pub lines: Vec<String>,
    /// Block/slot the transaction landed in
    pub block: u64,
    /// Transaction reference (signature)
    pub tx_ref: String,
    pub timestamp: DateTime<Utc>,
}

/// A classified, enriched new-pool candidate
///
/// Immutable once produced; consumed exactly once by the entry decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPoolEvent {
    pub venue: String,
    pub asset_id: String,
    pub quote_asset_id: String,
    /// Creator wallet; extraction is best-effort and may be absent
    pub creator: Option<String>,
    pub creation_block: u64,
    pub creation_timestamp: DateTime<Utc>,
    pub creation_tx_ref: String,
    /// Declared initial liquidity in USD, as reported by the source
    pub initial_liquidity_usd: f64,
    pub initial_market_cap_usd: f64,
    pub holder_count: u32,
    pub dev_holding_pct: f64,
    pub transaction_count: u32,
    pub has_website: bool,
    pub has_social_links: bool,
    pub creator_verified: bool,
    /// Filter-pipeline verdict, attached once evaluated
    pub verdict: Option<FilterVerdict>,
}

impl NewPoolEvent {
    /// Build a bare candidate from classifier output; market fields start at
    /// their unknown values and are filled by enrichment before filtering
    pub fn from_classification(
        venue: &str,
        asset_id: String,
        quote_asset_id: String,
        creator: Option<String>,
        block: u64,
        tx_ref: String,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            venue: venue.to_string(),
            asset_id,
            quote_asset_id,
            creator,
            creation_block: block,
            creation_timestamp: timestamp,
            creation_tx_ref: tx_ref,
            initial_liquidity_usd: 0.0,
            initial_market_cap_usd: 0.0,
            holder_count: 0,
            dev_holding_pct: 0.0,
            transaction_count: 0,
            has_website: false,
            has_social_links: false,
            creator_verified: false,
            verdict: None,
        }
    }
}

/// Structured notifications produced by the engine
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A classified candidate was rejected before entry
    CandidateRejected {
        asset_id: String,
        venue: String,
        reason: String,
    },
    /// A buy confirmed and a snipe is now active
    SnipeOpened {
        asset_id: String,
        venue: String,
        entry_price: f64,
        quantity: f64,
        cost_sol: f64,
        tx_ref: String,
    },
    /// A buy failed after exhausting retries; no position was opened
    BuyFailed {
        asset_id: String,
        reason: String,
    },
    /// Post-entry observation window started for a token
    MonitoringStarted {
        asset_id: String,
        window_secs: u64,
        expires_at: DateTime<Utc>,
    },
    /// Hostile early activity detected inside the observation window
    SniperDetected {
        asset_id: String,
        trade: TriggeringTrade,
    },
    /// An exit trigger fired and the sell confirmed
    AutoSellExecuted {
        asset_id: String,
        reason: TriggerReason,
        quantity: f64,
        proceeds_sol: f64,
        realized_pnl_sol: f64,
        tx_ref: String,
    },
    /// A sell failed; the position stays active and is re-evaluated next tick
    SellFailed {
        asset_id: String,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_starts_unenriched() {
        let event = NewPoolEvent::from_classification(
            "pumpfun",
            "mint".into(),
            "quote".into(),
            None,
            100,
            "sig".into(),
            Utc::now(),
        );
        assert_eq!(event.holder_count, 0);
        assert!(event.verdict.is_none());
        assert!(!event.creator_verified);
    }
}
