//! Execution gateway and price oracle seams
//!
//! The engine never constructs, signs or broadcasts transactions itself. It
//! talks to an opaque, possibly-failing, possibly-slow gateway behind these
//! traits, and a real implementation (RPC, bundle relay) plugs in here. A
//! paper-trading implementation ships for dry-run mode and tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Result of a confirmed buy
#[derive(Debug, Clone)]
pub struct BuyFill {
    pub tx_ref: String,
    pub filled_quantity: f64,
    pub filled_price: f64,
    /// Actual SOL cost including fees
    pub cost_sol: f64,
    /// Block the fill landed in
    pub block: u64,
}

/// Result of a confirmed sell
#[derive(Debug, Clone)]
pub struct SellReceipt {
    pub tx_ref: String,
    pub proceeds_sol: f64,
    pub filled_price: f64,
    pub block: u64,
}

/// A price observation from the valuation oracle
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PriceQuote {
    Price(f64),
    /// The oracle has no fresh price. Transient; never a state transition.
    Stale,
}

/// Declared market data for a freshly created pool, used to enrich
/// candidates before filtering
#[derive(Debug, Clone, Copy, Default)]
pub struct MarketSnapshot {
    pub liquidity_usd: f64,
    pub market_cap_usd: f64,
    pub holder_count: u32,
    pub dev_holding_pct: f64,
    pub transaction_count: u32,
    pub has_website: bool,
    pub has_social_links: bool,
    pub creator_verified: bool,
}

/// Source of declared pool metadata (holder counts, liquidity, socials)
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn snapshot(&self, asset_id: &str) -> Option<MarketSnapshot>;
}

/// Opaque buy/sell execution service
#[async_trait]
pub trait ExecutionGateway: Send + Sync {
    async fn buy(
        &self,
        asset_id: &str,
        sol_amount: f64,
        slippage_bps: u32,
        priority_fee_lamports: u64,
    ) -> Result<BuyFill>;

    async fn sell(&self, asset_id: &str, quantity: f64, slippage_bps: u32) -> Result<SellReceipt>;
}

/// Live price and block-height source
#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn current_price(&self, asset_id: &str) -> PriceQuote;

    async fn current_block(&self) -> u64;
}

/// In-memory gateway and oracle for dry-run mode and tests.
///
/// Prices are set by the test or fed from classified trade flow; fills are
/// instant at the posted price with a small simulated fee.
pub struct PaperGateway {
    prices: Mutex<HashMap<String, f64>>,
    snapshots: Mutex<HashMap<String, MarketSnapshot>>,
    block: AtomicU64,
    fill_counter: AtomicU64,
    /// Flat fee charged per fill, in SOL
    fee_sol: f64,
    /// When set, every buy/sell fails with this reason (failure injection)
    fail_reason: Mutex<Option<String>>,
}

impl PaperGateway {
    pub fn new() -> Self {
        Self {
            prices: Mutex::new(HashMap::new()),
            snapshots: Mutex::new(HashMap::new()),
            block: AtomicU64::new(1),
            fill_counter: AtomicU64::new(0),
            fee_sol: 0.0005,
            fail_reason: Mutex::new(None),
        }
    }

    /// Post a price for an asset
    pub fn set_price(&self, asset_id: &str, price: f64) {
        self.prices
            .lock()
            .expect("paper price lock poisoned")
            .insert(asset_id.to_string(), price);
    }

    /// Post declared pool metadata for an asset
    pub fn set_snapshot(&self, asset_id: &str, snapshot: MarketSnapshot) {
        self.snapshots
            .lock()
            .expect("paper snapshot lock poisoned")
            .insert(asset_id.to_string(), snapshot);
    }

    pub fn set_block(&self, block: u64) {
        self.block.store(block, Ordering::SeqCst);
    }

    pub fn advance_block(&self) -> u64 {
        self.block.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Make every subsequent order fail with the given reason
    pub fn inject_failure(&self, reason: Option<&str>) {
        *self.fail_reason.lock().expect("paper fail lock poisoned") =
            reason.map(|r| r.to_string());
    }

    fn price_of(&self, asset_id: &str) -> Option<f64> {
        self.prices
            .lock()
            .expect("paper price lock poisoned")
            .get(asset_id)
            .copied()
    }

    fn next_tx_ref(&self, kind: &str) -> String {
        let n = self.fill_counter.fetch_add(1, Ordering::SeqCst);
        format!("paper-{}-{}", kind, n)
    }
}

impl Default for PaperGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionGateway for PaperGateway {
    async fn buy(
        &self,
        asset_id: &str,
        sol_amount: f64,
        _slippage_bps: u32,
        _priority_fee_lamports: u64,
    ) -> Result<BuyFill> {
        if let Some(reason) = self.fail_reason.lock().expect("paper fail lock poisoned").clone() {
            return Err(Error::BuyFailed {
                asset: asset_id.to_string(),
                reason,
            });
        }

        let price = self.price_of(asset_id).ok_or_else(|| Error::BuyFailed {
            asset: asset_id.to_string(),
            reason: "no paper price posted".into(),
        })?;

        let cost_sol = sol_amount + self.fee_sol;
        let filled_quantity = sol_amount / price;
        let fill = BuyFill {
            tx_ref: self.next_tx_ref("buy"),
            filled_quantity,
            filled_price: price,
            cost_sol,
            block: self.block.load(Ordering::SeqCst),
        };

        info!(
            asset = %asset_id,
            price,
            quantity = filled_quantity,
            "Paper buy filled"
        );
        Ok(fill)
    }

    async fn sell(&self, asset_id: &str, quantity: f64, _slippage_bps: u32) -> Result<SellReceipt> {
        if let Some(reason) = self.fail_reason.lock().expect("paper fail lock poisoned").clone() {
            return Err(Error::SellFailed {
                asset: asset_id.to_string(),
                reason,
            });
        }

        let price = self.price_of(asset_id).ok_or_else(|| Error::SellFailed {
            asset: asset_id.to_string(),
            reason: "no paper price posted".into(),
        })?;

        let proceeds_sol = (quantity * price - self.fee_sol).max(0.0);
        let receipt = SellReceipt {
            tx_ref: self.next_tx_ref("sell"),
            proceeds_sol,
            filled_price: price,
            block: self.block.load(Ordering::SeqCst),
        };

        debug!(asset = %asset_id, price, quantity, "Paper sell filled");
        Ok(receipt)
    }
}

#[async_trait]
impl PriceOracle for PaperGateway {
    async fn current_price(&self, asset_id: &str) -> PriceQuote {
        match self.price_of(asset_id) {
            Some(price) => PriceQuote::Price(price),
            None => PriceQuote::Stale,
        }
    }

    async fn current_block(&self) -> u64 {
        self.block.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketDataSource for PaperGateway {
    async fn snapshot(&self, asset_id: &str) -> Option<MarketSnapshot> {
        self.snapshots
            .lock()
            .expect("paper snapshot lock poisoned")
            .get(asset_id)
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_paper_buy_and_sell() {
        let gateway = PaperGateway::new();
        gateway.set_price("mint", 0.5);

        let fill = gateway.buy("mint", 1.0, 2500, 100_000).await.unwrap();
        assert_eq!(fill.filled_price, 0.5);
        assert!((fill.filled_quantity - 2.0).abs() < 1e-9);
        assert!(fill.cost_sol > 1.0);

        let receipt = gateway.sell("mint", 2.0, 2500).await.unwrap();
        assert!(receipt.proceeds_sol < 1.0);
        assert!(receipt.proceeds_sol > 0.99);
    }

    #[tokio::test]
    async fn test_stale_quote_without_price() {
        let gateway = PaperGateway::new();
        assert_eq!(gateway.current_price("unknown").await, PriceQuote::Stale);

        gateway.set_price("mint", 1.0);
        assert_eq!(
            gateway.current_price("mint").await,
            PriceQuote::Price(1.0)
        );
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let gateway = PaperGateway::new();
        gateway.set_price("mint", 1.0);
        gateway.inject_failure(Some("congestion"));

        assert!(gateway.buy("mint", 1.0, 2500, 0).await.is_err());
        assert!(gateway.sell("mint", 1.0, 2500).await.is_err());

        gateway.inject_failure(None);
        assert!(gateway.buy("mint", 1.0, 2500, 0).await.is_ok());
    }
}
