//! The snipe engine
//!
//! One `SnipeEngine` instance owns its policy, venue registry, ledger and
//! monitor table. Nothing here is global: independent engines (per strategy,
//! per test) can run side by side. The entry path is
//! classify -> enrich -> filter -> admit -> buy; open positions are driven
//! by one valuation ticker per token plus the monitor's notice channel.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use backoff::{future::retry, Error as BackoffError, ExponentialBackoffBuilder};

use crate::error::{Error, Result};
use crate::events::{EngineEvent, LogBatch, NewPoolEvent};
use crate::filter;
use crate::gateway::{ExecutionGateway, MarketDataSource, PriceOracle, PriceQuote};
use crate::ledger::SnipeLedger;
use crate::monitor::{MonitorNotice, SniperMonitor, StatusReport, TradeActivity};
use crate::policy::Policy;
use crate::triggers::{self, ExitDecision, MarketObservation, PriceTick, TriggerReason};
use crate::venue::{classifier, VenueRegistry};

/// What the engine did with one ingested log batch
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// Policy disabled or venue not targeted
    Ignored,
    /// Classifier did not recognize a pool creation; dropped silently
    NotNewPool,
    /// Classified but rejected by timing, filters or safety limits
    Rejected(String),
    /// Admitted but the buy failed after retries; no position opened
    BuyFailed(String),
    /// Position opened and monitoring started
    Opened(String),
}

/// Detection and risk-management engine instance
pub struct SnipeEngine {
    policy: Arc<Policy>,
    venues: VenueRegistry,
    ledger: Arc<SnipeLedger>,
    monitor: Arc<SniperMonitor>,
    gateway: Arc<dyn ExecutionGateway>,
    oracle: Arc<dyn PriceOracle>,
    market_data: Option<Arc<dyn MarketDataSource>>,
    events: broadcast::Sender<EngineEvent>,
    position_tickers: DashMap<String, CancellationToken>,
    observations: DashMap<String, MarketObservation>,
    shutdown: CancellationToken,
}

impl SnipeEngine {
    /// Build an engine. The policy is validated here; a policy that fails
    /// validation never activates an engine.
    pub fn new(
        policy: Policy,
        venues: VenueRegistry,
        gateway: Arc<dyn ExecutionGateway>,
        oracle: Arc<dyn PriceOracle>,
    ) -> Result<Self> {
        policy.validate().map_err(|e| Error::Policy(e.to_string()))?;

        // Every targeted venue must have a registered vocabulary
        for venue in &policy.targeting.target_venues {
            venues.get(venue)?;
        }

        let (events, _) = broadcast::channel(1024);
        Ok(Self {
            policy: Arc::new(policy),
            venues,
            ledger: Arc::new(SnipeLedger::new()),
            monitor: Arc::new(SniperMonitor::new()),
            gateway,
            oracle,
            market_data: None,
            events,
            position_tickers: DashMap::new(),
            observations: DashMap::new(),
            shutdown: CancellationToken::new(),
        })
    }

    /// Attach a source of declared pool metadata for candidate enrichment
    pub fn with_market_data(mut self, source: Arc<dyn MarketDataSource>) -> Self {
        self.market_data = Some(source);
        self
    }

    /// Subscribe to engine notifications
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn ledger(&self) -> &SnipeLedger {
        &self.ledger
    }

    /// Monitoring status for a token (`not_found` for untracked tokens)
    pub fn monitor_status(&self, asset_id: &str) -> StatusReport {
        self.monitor.status(asset_id)
    }

    /// Cancel local monitoring for a token without touching its last status
    pub fn stop_monitoring(&self, asset_id: &str) {
        self.monitor.stop(asset_id);
    }

    /// Feed an observed trade on a monitored token (push path)
    pub fn observe_trade(&self, trade: &TradeActivity) {
        self.monitor.observe_trade(trade);
    }

    /// Report external anti-rug observations (dev sold %, liquidity % of
    /// peak) for a token; consumed by the next trigger evaluation
    pub fn report_observation(&self, asset_id: &str, observation: MarketObservation) {
        self.observations.insert(asset_id.to_string(), observation);
    }

    /// Run the engine over a batch channel until the channel closes or
    /// shutdown is requested
    pub async fn run(self: Arc<Self>, mut batches: mpsc::Receiver<LogBatch>) {
        self.clone().spawn_notice_pump();

        info!(
            venues = ?self.policy.targeting.target_venues,
            "Engine running"
        );
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                batch = batches.recv() => match batch {
                    Some(batch) => {
                        if let Err(e) = self.ingest(&batch).await {
                            error!(error = %e, "Batch ingestion failed");
                        }
                    }
                    None => break,
                },
            }
        }
        info!("Engine stopped");
    }

    /// Stop all background work. In-flight evaluations complete and their
    /// results are discarded.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.monitor.stop_all();
        for entry in self.position_tickers.iter() {
            entry.value().cancel();
        }
        self.position_tickers.clear();
    }

    /// Process one venue-tagged log batch end to end
    pub async fn ingest(self: &Arc<Self>, batch: &LogBatch) -> Result<IngestOutcome> {
        self.ledger.record_event_seen();

        if !self.policy.enabled {
            return Ok(IngestOutcome::Ignored);
        }
        if !self
            .policy
            .targeting
            .target_venues
            .iter()
            .any(|v| v == &batch.venue)
        {
            return Ok(IngestOutcome::Ignored);
        }

        let spec = self.venues.get(&batch.venue)?;
        let classification = classifier::classify(&spec, &batch.lines);
        if !classification.is_new_pool {
            // Ambiguous or unrelated batches are dropped, not errored
            return Ok(IngestOutcome::NotNewPool);
        }

        let asset_id = match classification.asset_id {
            Some(id) => id,
            None => return Ok(IngestOutcome::NotNewPool),
        };
        let mut event = NewPoolEvent::from_classification(
            &batch.venue,
            asset_id.clone(),
            classification
                .quote_asset_id
                .unwrap_or_else(|| spec.primary_quote_mint().to_string()),
            classification.creator,
            batch.block,
            batch.tx_ref.clone(),
            batch.timestamp,
        );

        info!(
            asset = %asset_id,
            venue = %batch.venue,
            block = batch.block,
            "New pool detected"
        );

        if let Some(source) = &self.market_data {
            if let Some(snapshot) = source.snapshot(&asset_id).await {
                event.initial_liquidity_usd = snapshot.liquidity_usd;
                event.initial_market_cap_usd = snapshot.market_cap_usd;
                event.holder_count = snapshot.holder_count;
                event.dev_holding_pct = snapshot.dev_holding_pct;
                event.transaction_count = snapshot.transaction_count;
                event.has_website = snapshot.has_website;
                event.has_social_links = snapshot.has_social_links;
                event.creator_verified = snapshot.creator_verified;
            }
        }

        if self.policy.targeting.verified_creators_only && !event.creator_verified {
            return Ok(self.reject(&event, "creator not verified"));
        }

        // Timing window relative to the creation block
        let current_block = self.oracle.current_block().await;
        let age = current_block.saturating_sub(event.creation_block);
        let min_delay = if self.policy.timing.snipe_block_zero {
            self.policy.timing.min_block_delay
        } else {
            self.policy.timing.min_block_delay.max(1)
        };
        if age < min_delay || age > self.policy.timing.max_block_delay {
            return Ok(self.reject(
                &event,
                &format!("outside timing window: age {} blocks", age),
            ));
        }

        let verdict = filter::evaluate(&event, &self.policy.entry);
        let passed = verdict.passed;
        let reason = format!("filters failed: {:?}", verdict.failed_filters());
        event.verdict = Some(verdict);
        if !passed {
            return Ok(self.reject(&event, &reason));
        }

        self.open_snipe(event).await
    }

    fn reject(&self, event: &NewPoolEvent, reason: &str) -> IngestOutcome {
        self.ledger.record_event_filtered();
        debug!(asset = %event.asset_id, reason, "Candidate rejected");
        let _ = self.events.send(EngineEvent::CandidateRejected {
            asset_id: event.asset_id.clone(),
            venue: event.venue.clone(),
            reason: reason.to_string(),
        });
        IngestOutcome::Rejected(reason.to_string())
    }

    /// Admit, buy and open a position for a passing candidate
    async fn open_snipe(self: &Arc<Self>, event: NewPoolEvent) -> Result<IngestOutcome> {
        let exec = &self.policy.execution;
        let quote_amount = if exec.buy_amount_sol > 0.0 {
            exec.buy_amount_sol
        } else {
            exec.buy_amount_usdc
        };

        // Admission is atomic: all safety checks and the budget reservation
        // happen under one lock in the ledger
        if let Err(e) = self.ledger.try_admit(
            &event.asset_id,
            &event.venue,
            event.creator.as_deref(),
            quote_amount,
            &self.policy.safety,
        ) {
            if e.is_safety_violation() {
                warn!(asset = %event.asset_id, reason = %e, "Entry blocked by safety limit");
                return Ok(self.reject(&event, &e.to_string()));
            }
            return Err(e);
        }

        self.ledger.mark_executing(&event.asset_id);
        let asset_id = event.asset_id.clone();
        let fill = {
            let gateway = Arc::clone(&self.gateway);
            let asset = asset_id.clone();
            let slippage = exec.slippage_bps;
            let priority_fee = exec.priority_fee_lamports;
            self.call_with_retry(move || {
                let gateway = Arc::clone(&gateway);
                let asset = asset.clone();
                async move { gateway.buy(&asset, quote_amount, slippage, priority_fee).await }
            })
            .await
        };

        let fill = match fill {
            Ok(fill) => fill,
            Err(e) => {
                // A failed buy leaves no open position and refunds budget
                self.ledger.release(&asset_id);
                error!(asset = %asset_id, error = %e, "Buy failed, no position opened");
                let _ = self.events.send(EngineEvent::BuyFailed {
                    asset_id: asset_id.clone(),
                    reason: e.to_string(),
                });
                return Ok(IngestOutcome::BuyFailed(e.to_string()));
            }
        };

        let snipe = self.ledger.confirm_open(
            &asset_id,
            fill.block,
            fill.filled_price,
            fill.filled_quantity,
            fill.cost_sol,
            &fill.tx_ref,
            self.policy.exit.take_profit_pct,
            self.policy.exit.stop_loss_pct,
        )?;

        let _ = self.events.send(EngineEvent::SnipeOpened {
            asset_id: asset_id.clone(),
            venue: event.venue.clone(),
            entry_price: snipe.entry_price,
            quantity: snipe.quantity,
            cost_sol: snipe.cost_sol,
            tx_ref: snipe.entry_tx_ref.clone(),
        });

        if self.policy.monitoring.enabled {
            let session = self.monitor.start(
                &asset_id,
                fill.block,
                event.creator.clone(),
                &self.policy.monitoring,
            );
            let _ = self.events.send(EngineEvent::MonitoringStarted {
                asset_id: asset_id.clone(),
                window_secs: self.policy.monitoring.window_secs,
                expires_at: session.expires_at,
            });
        }

        self.spawn_position_ticker(asset_id.clone());
        Ok(IngestOutcome::Opened(asset_id))
    }

    /// Per-token valuation ticker driving trigger evaluation
    fn spawn_position_ticker(self: &Arc<Self>, asset_id: String) {
        let token = CancellationToken::new();
        if let Some(old) = self.position_tickers.insert(asset_id.clone(), token.clone()) {
            old.cancel();
        }

        let engine = Arc::clone(self);
        let interval_ms = self.policy.monitoring.poll_interval_ms;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_millis(interval_ms));
            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = engine.shutdown.cancelled() => return,
                    _ = ticker.tick() => {
                        if engine.evaluate_position(&asset_id).await {
                            engine.position_tickers.remove(&asset_id);
                            return;
                        }
                    }
                }
            }
        });
    }

    /// One tick for one position. Returns true when the position is gone
    /// and the ticker should stop.
    async fn evaluate_position(self: &Arc<Self>, asset_id: &str) -> bool {
        let price = match self.oracle.current_price(asset_id).await {
            PriceQuote::Price(price) => price,
            PriceQuote::Stale => {
                // Transient: skip this tick, never a state transition
                debug!(asset = %asset_id, "Stale price, skipping tick");
                return false;
            }
        };

        // Recording the price first keeps the trailing peak current
        let snipe = match self.ledger.observe_price(asset_id, price) {
            Some(snipe) => snipe,
            // Gone entirely, or an exit claim is in flight elsewhere
            None => return self.ledger.get(asset_id).is_none(),
        };

        let observation = self
            .observations
            .get(asset_id)
            .map(|o| *o.value())
            .unwrap_or_default();

        let block = self.oracle.current_block().await;
        let tick = PriceTick::now(price, block);
        let decision = triggers::evaluate(
            &snipe,
            &self.policy.exit,
            &self.policy.advanced,
            &tick,
            &observation,
        );

        if let Some(decision) = decision {
            self.execute_exit(asset_id, decision).await
        } else {
            false
        }
    }

    /// Liquidate per an exit decision. Returns true when fully closed.
    /// Exits are never gated on budget or concurrency limits.
    async fn execute_exit(self: &Arc<Self>, asset_id: &str, decision: ExitDecision) -> bool {
        // Claim the exit first: the price ticker, the sniper-notice pump and
        // manual sells can all race here, and only one order may go out
        let snipe = match self.ledger.begin_exit(asset_id) {
            Some(snipe) => snipe,
            None => return self.ledger.get(asset_id).is_none(),
        };
        let quantity = snipe.quantity * decision.sell_fraction;

        info!(
            asset = %asset_id,
            reason = %decision.reason,
            quantity,
            "Exit trigger fired"
        );

        let receipt = {
            let gateway = Arc::clone(&self.gateway);
            let asset = asset_id.to_string();
            let slippage = self.policy.execution.slippage_bps;
            self.call_with_retry(move || {
                let gateway = Arc::clone(&gateway);
                let asset = asset.clone();
                async move { gateway.sell(&asset, quantity, slippage).await }
            })
            .await
        };

        let receipt = match receipt {
            Ok(receipt) => receipt,
            Err(e) => {
                // A failed sell releases the claim and leaves the position
                // active; the next tick re-evaluates and tries again
                self.ledger.abort_exit(asset_id);
                warn!(asset = %asset_id, error = %e, "Sell failed, position stays active");
                let _ = self.events.send(EngineEvent::SellFailed {
                    asset_id: asset_id.to_string(),
                    reason: e.to_string(),
                });
                return false;
            }
        };

        let pnl = match self.ledger.apply_exit(
            asset_id,
            quantity,
            receipt.proceeds_sol,
            receipt.filled_price,
            receipt.block,
            &receipt.tx_ref,
            decision.reason,
        ) {
            Ok(pnl) => pnl,
            Err(e) => {
                error!(asset = %asset_id, error = %e, "Exit bookkeeping failed");
                return true;
            }
        };

        let _ = self.events.send(EngineEvent::AutoSellExecuted {
            asset_id: asset_id.to_string(),
            reason: decision.reason,
            quantity,
            proceeds_sol: receipt.proceeds_sol,
            realized_pnl_sol: pnl,
            tx_ref: receipt.tx_ref.clone(),
        });

        let fully_closed = self.ledger.get(asset_id).is_none();
        if fully_closed {
            // The position is done: drop its session and observations so the
            // monitor table does not accumulate one entry per token sniped
            self.monitor.remove(asset_id);
            self.observations.remove(asset_id);
        }
        fully_closed
    }

    /// Operator-initiated sell of a fraction of an open position
    pub async fn manual_sell(self: &Arc<Self>, asset_id: &str, fraction: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&fraction) || fraction == 0.0 {
            return Err(Error::Internal(format!(
                "sell fraction must be in (0, 1], got {}",
                fraction
            )));
        }
        if self.ledger.get(asset_id).is_none() {
            return Err(Error::SnipeNotFound(asset_id.to_string()));
        }
        self.execute_exit(
            asset_id,
            ExitDecision {
                reason: TriggerReason::Manual,
                sell_fraction: fraction,
            },
        )
        .await;
        Ok(())
    }

    /// Pump monitor notices into protective exits and engine events
    fn spawn_notice_pump(self: Arc<Self>) {
        let mut notices = self.monitor.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = self.shutdown.cancelled() => return,
                    notice = notices.recv() => match notice {
                        Ok(MonitorNotice::SniperDetected { asset_id, trade }) => {
                            let _ = self.events.send(EngineEvent::SniperDetected {
                                asset_id: asset_id.clone(),
                                trade,
                            });
                            // Protective auto-sell, immediately rather than
                            // waiting for the next valuation tick
                            self.execute_exit(
                                &asset_id,
                                ExitDecision {
                                    reason: TriggerReason::Sniper,
                                    sell_fraction: self.policy.exit.sell_percent_on_trigger
                                        / 100.0,
                                },
                            )
                            .await;
                        }
                        Ok(MonitorNotice::DevSellObserved { asset_id, .. }) => {
                            // Flag for the dev-sell trigger on the next tick
                            self.observations
                                .entry(asset_id)
                                .or_default()
                                .dev_sell_observed = true;
                        }
                        Ok(MonitorNotice::Expired { asset_id }) => {
                            debug!(asset = %asset_id, "Observation window expired");
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(missed = n, "Notice pump lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => return,
                    },
                }
            }
        });
    }

    /// Call a gateway operation with the policy's retry settings. Transient
    /// failures are retried up to `max_retries` with exponential backoff.
    async fn call_with_retry<T, Op, Fut>(&self, mut op: Op) -> Result<T>
    where
        Op: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        if !self.policy.advanced.retry_on_fail || self.policy.advanced.max_retries == 0 {
            return op().await;
        }

        let max_retries = self.policy.advanced.max_retries;
        let mut attempt = 0u32;
        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(std::time::Duration::from_millis(
                self.policy.advanced.retry_delay_ms,
            ))
            .with_max_elapsed_time(None)
            .build();

        retry(backoff, || {
            attempt += 1;
            let this_attempt = attempt;
            let fut = op();
            async move {
                match fut.await {
                    Ok(v) => Ok(v),
                    Err(e) if e.is_retryable() && this_attempt <= max_retries => {
                        warn!(attempt = this_attempt, error = %e, "Gateway call failed, retrying");
                        Err(BackoffError::transient(e))
                    }
                    Err(e) => Err(BackoffError::permanent(e)),
                }
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{MarketSnapshot, PaperGateway};
    use crate::ledger::SnipeStatus;
    use crate::venue::VenueRegistry;
    use chrono::Utc;

    const MINT: &str = "7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU";
    const CREATOR: &str = "DfMxre4cKmvogbLrPigxmibVTTQDuzjdXojWzjCXXhzj";

    fn create_batch(mint: &str, block: u64) -> LogBatch {
        LogBatch {
            venue: "pumpfun".into(),
            lines: vec![
                "Program 6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P invoke [1]".into(),
                "Program log: Instruction: Create".into(),
                format!("Program log: mint: {}", mint),
                format!("Program log: creator: {}", CREATOR),
                "Program 6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P success".into(),
            ],
            block,
            tx_ref: "creation-sig".into(),
            timestamp: Utc::now(),
        }
    }

    fn fast_policy() -> Policy {
        let mut policy = Policy::default();
        policy.safety.cooldown_secs = 0;
        policy.monitoring.poll_interval_ms = 10;
        policy.advanced.retry_delay_ms = 1;
        policy
    }

    fn engine_with(policy: Policy) -> (Arc<SnipeEngine>, Arc<PaperGateway>) {
        let paper = Arc::new(PaperGateway::new());
        let engine = SnipeEngine::new(
            policy,
            VenueRegistry::builtin(),
            paper.clone(),
            paper.clone(),
        )
        .unwrap()
        .with_market_data(paper.clone());
        (Arc::new(engine), paper)
    }

    #[test]
    fn test_invalid_policy_never_activates() {
        let mut policy = Policy::default();
        policy.targeting.target_venues.clear();
        let paper = Arc::new(PaperGateway::new());
        let result = SnipeEngine::new(
            policy,
            VenueRegistry::builtin(),
            paper.clone(),
            paper.clone(),
        );
        assert!(matches!(result, Err(Error::Policy(_))));
    }

    #[test]
    fn test_unregistered_target_venue_rejected() {
        let mut policy = Policy::default();
        policy.targeting.target_venues = vec!["meteora".into()];
        let paper = Arc::new(PaperGateway::new());
        let result = SnipeEngine::new(
            policy,
            VenueRegistry::builtin(),
            paper.clone(),
            paper.clone(),
        );
        assert!(matches!(result, Err(Error::UnknownVenue(_))));
    }

    #[tokio::test]
    async fn test_end_to_end_open() {
        let (engine, paper) = engine_with(fast_policy());
        paper.set_price(MINT, 0.001);
        paper.set_block(100);

        let outcome = engine.ingest(&create_batch(MINT, 100)).await.unwrap();
        assert_eq!(outcome, IngestOutcome::Opened(MINT.to_string()));

        let snipe = engine.ledger().get(MINT).unwrap();
        assert_eq!(snipe.status, SnipeStatus::Success);
        assert_eq!(snipe.entry_price, 0.001);

        // Monitoring session runs for the new token
        let report = engine.monitor_status(MINT);
        assert_eq!(report.status, crate::monitor::MonitorStatus::Monitoring);

        engine.shutdown();
    }

    #[tokio::test]
    async fn test_non_creation_batch_dropped() {
        let (engine, paper) = engine_with(fast_policy());
        paper.set_block(100);

        let batch = LogBatch {
            venue: "pumpfun".into(),
            lines: vec![
                "Program log: Instruction: Buy".into(),
                "Program 6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P success".into(),
            ],
            block: 100,
            tx_ref: "sig".into(),
            timestamp: Utc::now(),
        };
        assert_eq!(engine.ingest(&batch).await.unwrap(), IngestOutcome::NotNewPool);
        assert_eq!(engine.ledger().stats().events_seen, 1);
    }

    #[tokio::test]
    async fn test_untargeted_venue_ignored() {
        let mut policy = fast_policy();
        policy.targeting.target_venues = vec!["raydium".into()];
        let (engine, paper) = engine_with(policy);
        paper.set_block(100);

        let outcome = engine.ingest(&create_batch(MINT, 100)).await.unwrap();
        assert_eq!(outcome, IngestOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_filter_rejection_emits_event() {
        let mut policy = fast_policy();
        policy.entry.min_liquidity_usd = 1_000.0;
        let (engine, paper) = engine_with(policy);
        paper.set_price(MINT, 0.001);
        paper.set_block(100);
        // No snapshot posted: declared liquidity stays 0 and fails the floor

        let mut events = engine.subscribe();
        let outcome = engine.ingest(&create_batch(MINT, 100)).await.unwrap();
        assert!(matches!(outcome, IngestOutcome::Rejected(_)));
        assert_eq!(engine.ledger().stats().events_filtered, 1);

        match events.recv().await.unwrap() {
            EngineEvent::CandidateRejected { asset_id, .. } => assert_eq!(asset_id, MINT),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_snapshot_enrichment_passes_filters() {
        let mut policy = fast_policy();
        policy.entry.min_liquidity_usd = 1_000.0;
        policy.entry.require_social_links = true;
        let (engine, paper) = engine_with(policy);
        paper.set_price(MINT, 0.001);
        paper.set_block(100);
        paper.set_snapshot(
            MINT,
            MarketSnapshot {
                liquidity_usd: 5_000.0,
                has_social_links: true,
                ..Default::default()
            },
        );

        let outcome = engine.ingest(&create_batch(MINT, 100)).await.unwrap();
        assert_eq!(outcome, IngestOutcome::Opened(MINT.to_string()));
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_stale_candidate_rejected_by_timing() {
        let (engine, paper) = engine_with(fast_policy());
        paper.set_price(MINT, 0.001);
        paper.set_block(200);

        // Created at block 100, seen at 200: far past max_block_delay
        let outcome = engine.ingest(&create_batch(MINT, 100)).await.unwrap();
        assert!(matches!(outcome, IngestOutcome::Rejected(_)));
    }

    #[tokio::test]
    async fn test_failed_buy_leaves_no_position() {
        let (engine, paper) = engine_with(fast_policy());
        paper.set_price(MINT, 0.001);
        paper.set_block(100);
        paper.inject_failure(Some("congestion"));

        let outcome = engine.ingest(&create_batch(MINT, 100)).await.unwrap();
        assert!(matches!(outcome, IngestOutcome::BuyFailed(_)));
        assert!(engine.ledger().get(MINT).is_none());
        assert_eq!(engine.ledger().stats().snipe_failures, 1);

        // Budget was refunded: the same candidate can be admitted again
        paper.inject_failure(None);
        let outcome = engine.ingest(&create_batch(MINT, 100)).await.unwrap();
        assert_eq!(outcome, IngestOutcome::Opened(MINT.to_string()));
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_emergency_stop_blocks_entry() {
        let mut policy = fast_policy();
        policy.safety.emergency_stop = true;
        let (engine, paper) = engine_with(policy);
        paper.set_price(MINT, 0.001);
        paper.set_block(100);

        let outcome = engine.ingest(&create_batch(MINT, 100)).await.unwrap();
        assert!(matches!(outcome, IngestOutcome::Rejected(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_profit_auto_sell() {
        let (engine, paper) = engine_with(fast_policy());
        paper.set_price(MINT, 1.0);
        paper.set_block(100);

        let outcome = engine.ingest(&create_batch(MINT, 100)).await.unwrap();
        assert_eq!(outcome, IngestOutcome::Opened(MINT.to_string()));

        let mut events = engine.subscribe();

        // Default take-profit is 50%: 1.6 clears it
        paper.set_price(MINT, 1.6);
        tokio::time::advance(std::time::Duration::from_millis(50)).await;

        // Let the ticker task run
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        let mut sold = false;
        while let Ok(event) = events.try_recv() {
            if let EngineEvent::AutoSellExecuted { reason, realized_pnl_sol, .. } = event {
                assert_eq!(reason, TriggerReason::TakeProfit);
                assert!(realized_pnl_sol > 0.0);
                sold = true;
            }
        }
        assert!(sold, "expected an auto-sell event");
        assert!(engine.ledger().get(MINT).is_none());
        assert_eq!(engine.ledger().history().len(), 1);
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_failed_sell_keeps_position_active() {
        let (engine, paper) = engine_with(fast_policy());
        paper.set_price(MINT, 1.0);
        paper.set_block(100);
        engine.ingest(&create_batch(MINT, 100)).await.unwrap();

        paper.set_price(MINT, 2.0);
        paper.inject_failure(Some("congestion"));

        let closed = engine
            .execute_exit(
                MINT,
                ExitDecision {
                    reason: TriggerReason::TakeProfit,
                    sell_fraction: 1.0,
                },
            )
            .await;
        assert!(!closed);

        let snipe = engine.ledger().get(MINT).unwrap();
        assert_eq!(snipe.status, SnipeStatus::Success);
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_concurrent_exit_paths_sell_once() {
        let (engine, paper) = engine_with(fast_policy());
        paper.set_price(MINT, 1.0);
        paper.set_block(100);
        engine.ingest(&create_batch(MINT, 100)).await.unwrap();
        paper.set_price(MINT, 2.0);

        // Ticker and sniper-notice paths racing on the same position:
        // only one claims the exit, so exactly one sell order goes out
        let ticker_path = engine.clone();
        let notice_path = engine.clone();
        tokio::join!(
            ticker_path.execute_exit(
                MINT,
                ExitDecision {
                    reason: TriggerReason::TakeProfit,
                    sell_fraction: 1.0,
                },
            ),
            notice_path.execute_exit(
                MINT,
                ExitDecision {
                    reason: TriggerReason::Sniper,
                    sell_fraction: 1.0,
                },
            ),
        );

        assert!(engine.ledger().get(MINT).is_none());
        assert_eq!(engine.ledger().history().len(), 1);

        // The monitoring session is gone with the position
        assert_eq!(
            engine.monitor_status(MINT).status,
            crate::monitor::MonitorStatus::NotFound
        );
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_manual_sell() {
        let (engine, paper) = engine_with(fast_policy());
        paper.set_price(MINT, 1.0);
        paper.set_block(100);
        engine.ingest(&create_batch(MINT, 100)).await.unwrap();

        engine.manual_sell(MINT, 0.5).await.unwrap();
        let snipe = engine.ledger().get(MINT).unwrap();
        assert!(snipe.quantity > 0.0);

        assert!(matches!(
            engine.manual_sell("unknown", 1.0).await,
            Err(Error::SnipeNotFound(_))
        ));
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_sniper_detection_forces_protective_exit() {
        let (engine, paper) = engine_with(fast_policy());
        paper.set_price(MINT, 1.0);
        paper.set_block(100);
        engine.ingest(&create_batch(MINT, 100)).await.unwrap();
        engine.clone().spawn_notice_pump();

        let mut events = engine.subscribe();

        engine.observe_trade(&TradeActivity {
            asset_id: MINT.into(),
            actor: "whale".into(),
            is_sell: true,
            sol_amount: 5.0,
            token_amount: 1_000.0,
            supply_pct: None,
            block: 101,
            at: Utc::now(),
        });

        // Sniper detection then the protective sell
        let mut detected = false;
        let mut sold = false;
        for _ in 0..4 {
            match tokio::time::timeout(std::time::Duration::from_secs(1), events.recv()).await {
                Ok(Ok(EngineEvent::SniperDetected { asset_id, .. })) => {
                    assert_eq!(asset_id, MINT);
                    detected = true;
                }
                Ok(Ok(EngineEvent::AutoSellExecuted { reason, .. })) => {
                    assert_eq!(reason, TriggerReason::Sniper);
                    sold = true;
                    break;
                }
                _ => break,
            }
        }
        assert!(detected);
        assert!(sold);
        assert!(engine.ledger().get(MINT).is_none());
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_max_concurrent_respected_across_candidates() {
        const MINT2: &str = "9n4nbM75f5Ui33ZbPYXn59EwSgE8CGsHtAeTH5YFeJ9E";
        let mut policy = fast_policy();
        policy.safety.max_concurrent_snipes = 1;
        let (engine, paper) = engine_with(policy);
        paper.set_price(MINT, 1.0);
        paper.set_price(MINT2, 1.0);
        paper.set_block(100);

        assert_eq!(
            engine.ingest(&create_batch(MINT, 100)).await.unwrap(),
            IngestOutcome::Opened(MINT.to_string())
        );
        assert!(matches!(
            engine.ingest(&create_batch(MINT2, 100)).await.unwrap(),
            IngestOutcome::Rejected(_)
        ));
        engine.shutdown();
    }
}
