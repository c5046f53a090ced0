//! Per-token post-entry monitoring sessions
//!
//! After a buy confirms, a session watches the token for a bounded window
//! and flags hostile early activity (a "sniper": a large, rapid sell) so the
//! engine can exit protectively. Detection is push-driven through
//! [`SniperMonitor::observe_trade`]; consumers poll [`SniperMonitor::status`]
//! or subscribe to the notice channel.
//!
//! State machine per token:
//!
//! ```text
//! monitoring ──first hostile trade──> triggered   (terminal)
//! monitoring ──window elapsed──────> expired      (terminal)
//! monitoring ──unrecoverable fail──> error        (terminal)
//! ```
//!
//! The triggered transition is one-way and idempotent: only the first
//! hostile trade's details are recorded, later detections do not re-fire.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::policy::MonitoringConfig;

/// Session status as seen by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorStatus {
    Monitoring,
    Triggered,
    Expired,
    /// No session exists for the queried token
    NotFound,
    Error,
}

impl MonitorStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, MonitorStatus::Monitoring)
    }
}

/// Details of the first trade that triggered a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggeringTrade {
    pub actor: String,
    pub sol_amount: f64,
    pub tokens_sold: f64,
    pub proceeds_sol: f64,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// A trade observed on a monitored token
#[derive(Debug, Clone)]
pub struct TradeActivity {
    pub asset_id: String,
    pub actor: String,
    pub is_sell: bool,
    pub sol_amount: f64,
    pub token_amount: f64,
    /// Fraction of total supply this trade moved, when known
    pub supply_pct: Option<f64>,
    pub block: u64,
    pub at: DateTime<Utc>,
}

/// One monitoring session
#[derive(Debug, Clone)]
pub struct MonitorSession {
    pub asset_id: String,
    pub status: MonitorStatus,
    pub started_at: DateTime<Utc>,
    pub start_block: u64,
    pub expires_at: DateTime<Utc>,
    /// Snapshot of the config in force when the session started
    pub config: MonitoringConfig,
    /// Creator wallet, for dev-sell attribution
    pub creator: Option<String>,
    pub triggering_trade: Option<TriggeringTrade>,
    pub error: Option<String>,
}

impl MonitorSession {
    /// A session bounded only by a block count has no wall-clock expiry;
    /// its window closes when observed blocks pass `start + window_blocks`
    fn time_bounded(&self) -> bool {
        self.config.window_secs > 0 || self.config.window_blocks == 0
    }
}

/// Status snapshot returned to pollers
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub status: MonitorStatus,
    pub remaining_secs: i64,
    pub triggered: bool,
    pub trade: Option<TriggeringTrade>,
}

/// Notices pushed on the monitor's broadcast channel
#[derive(Debug, Clone)]
pub enum MonitorNotice {
    SniperDetected {
        asset_id: String,
        trade: TriggeringTrade,
    },
    /// The creator wallet sold inside the window (tracked separately: it
    /// feeds the dev-sell exit trigger even below hostile thresholds)
    DevSellObserved {
        asset_id: String,
        trade: TriggeringTrade,
    },
    Expired {
        asset_id: String,
    },
}

/// Monitor owning all active sessions and their tickers
pub struct SniperMonitor {
    sessions: DashMap<String, MonitorSession>,
    tickers: DashMap<String, CancellationToken>,
    notices: broadcast::Sender<MonitorNotice>,
}

impl SniperMonitor {
    pub fn new() -> Self {
        let (notices, _) = broadcast::channel(256);
        Self {
            sessions: DashMap::new(),
            tickers: DashMap::new(),
            notices,
        }
    }

    /// Subscribe to monitor notices
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorNotice> {
        self.notices.subscribe()
    }

    /// Start monitoring a token. Replaces any previous session for it.
    pub fn start(
        self: &Arc<Self>,
        asset_id: &str,
        start_block: u64,
        creator: Option<String>,
        config: &MonitoringConfig,
    ) -> MonitorSession {
        let now = Utc::now();
        let session = MonitorSession {
            asset_id: asset_id.to_string(),
            status: MonitorStatus::Monitoring,
            started_at: now,
            start_block,
            expires_at: now + Duration::seconds(config.window_secs as i64),
            config: config.clone(),
            creator,
            triggering_trade: None,
            error: None,
        };

        // Cancel any stale ticker for the same token
        if let Some((_, old)) = self.tickers.remove(asset_id) {
            old.cancel();
        }
        self.sessions.insert(asset_id.to_string(), session.clone());

        let token = CancellationToken::new();
        self.tickers.insert(asset_id.to_string(), token.clone());
        self.spawn_ticker(asset_id.to_string(), token);

        info!(
            asset = %asset_id,
            window_secs = config.window_secs,
            "Monitoring started"
        );
        session
    }

    /// Periodic expiry check. Detection itself is push-driven; this ticker
    /// only moves an untriggered session to expired once its window passes.
    fn spawn_ticker(self: &Arc<Self>, asset_id: String, token: CancellationToken) {
        let monitor = Arc::clone(self);
        let interval_ms = monitor
            .sessions
            .get(&asset_id)
            .map(|s| s.config.poll_interval_ms)
            .unwrap_or(1000);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_millis(interval_ms));
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!(asset = %asset_id, "Monitor ticker cancelled");
                        return;
                    }
                    _ = ticker.tick() => {
                        if monitor.check_expiry(&asset_id) {
                            return;
                        }
                    }
                }
            }
        });
    }

    /// Returns true when the session reached a terminal state
    fn check_expiry(&self, asset_id: &str) -> bool {
        let mut session = match self.sessions.get_mut(asset_id) {
            Some(s) => s,
            None => return true,
        };

        if session.status.is_terminal() {
            return true;
        }

        if session.time_bounded() && Utc::now() >= session.expires_at {
            session.status = MonitorStatus::Expired;
            drop(session);
            info!(asset = %asset_id, "Monitoring window expired without trigger");
            let _ = self.notices.send(MonitorNotice::Expired {
                asset_id: asset_id.to_string(),
            });
            return true;
        }
        false
    }

    /// Feed one observed trade into the matching session, if any.
    /// Returns the notice that was emitted, for callers that want it inline.
    pub fn observe_trade(&self, trade: &TradeActivity) -> Option<MonitorNotice> {
        let mut session = self.sessions.get_mut(&trade.asset_id)?;

        if session.status != MonitorStatus::Monitoring {
            // One-way transitions: repeated detections do not re-fire
            return None;
        }

        if session.time_bounded() && Utc::now() >= session.expires_at {
            return None;
        }
        if session.config.window_blocks > 0
            && trade.block > session.start_block + session.config.window_blocks
        {
            // Blocks moved past the window: the session is over
            session.status = MonitorStatus::Expired;
            drop(session);
            let _ = self.notices.send(MonitorNotice::Expired {
                asset_id: trade.asset_id.clone(),
            });
            return None;
        }

        if !trade.is_sell {
            return None;
        }

        let is_dev = session
            .creator
            .as_deref()
            .map(|c| c == trade.actor)
            .unwrap_or(false);

        let over_sol = trade.sol_amount >= session.config.hostile_sell_sol;
        let over_supply = trade
            .supply_pct
            .map(|pct| pct >= session.config.hostile_supply_pct)
            .unwrap_or(false);

        if !over_sol && !over_supply && !is_dev {
            return None;
        }

        let reason = if is_dev {
            "dev_sell".to_string()
        } else if over_sol {
            format!("sell {:.3} SOL over threshold", trade.sol_amount)
        } else {
            format!("sell moved {:.2}% of supply", trade.supply_pct.unwrap_or(0.0))
        };

        let detail = TriggeringTrade {
            actor: trade.actor.clone(),
            sol_amount: trade.sol_amount,
            tokens_sold: trade.token_amount,
            proceeds_sol: trade.sol_amount,
            reason,
            at: trade.at,
        };

        // A dev sell below hostile thresholds does not trigger the session;
        // it is reported for the dev-sell exit trigger only
        if !over_sol && !over_supply {
            drop(session);
            let notice = MonitorNotice::DevSellObserved {
                asset_id: trade.asset_id.clone(),
                trade: detail,
            };
            let _ = self.notices.send(notice.clone());
            return Some(notice);
        }

        session.status = MonitorStatus::Triggered;
        session.triggering_trade = Some(detail.clone());
        drop(session);

        warn!(
            asset = %trade.asset_id,
            actor = %trade.actor,
            sol = trade.sol_amount,
            "Sniper detected"
        );

        // Dev sells over threshold count as snipers too; the detail's reason
        // carries the dev attribution for the exit trigger
        let notice = MonitorNotice::SniperDetected {
            asset_id: trade.asset_id.clone(),
            trade: detail,
        };
        let _ = self.notices.send(notice.clone());
        Some(notice)
    }

    /// Current status for a token. Computes expiry lazily so pollers see
    /// `expired` even between ticker runs.
    pub fn status(&self, asset_id: &str) -> StatusReport {
        let mut session = match self.sessions.get_mut(asset_id) {
            Some(s) => s,
            None => {
                return StatusReport {
                    status: MonitorStatus::NotFound,
                    remaining_secs: 0,
                    triggered: false,
                    trade: None,
                }
            }
        };

        let now = Utc::now();
        if session.status == MonitorStatus::Monitoring
            && session.time_bounded()
            && now >= session.expires_at
        {
            session.status = MonitorStatus::Expired;
        }

        StatusReport {
            status: session.status,
            remaining_secs: (session.expires_at - now).num_seconds().max(0),
            triggered: session.status == MonitorStatus::Triggered,
            trade: session.triggering_trade.clone(),
        }
    }

    /// Mark a session as failed (unrecoverable lookup/monitoring error)
    pub fn mark_error(&self, asset_id: &str, message: &str) {
        if let Some(mut session) = self.sessions.get_mut(asset_id) {
            if !session.status.is_terminal() {
                session.status = MonitorStatus::Error;
                session.error = Some(message.to_string());
            }
        }
        if let Some((_, token)) = self.tickers.remove(asset_id) {
            token.cancel();
        }
    }

    /// Cancel local observation for a token without rewriting its last
    /// known status. The session record stays queryable.
    pub fn stop(&self, asset_id: &str) {
        if let Some((_, token)) = self.tickers.remove(asset_id) {
            token.cancel();
            debug!(asset = %asset_id, "Monitoring stopped");
        }
    }

    /// Drop a session entirely
    pub fn remove(&self, asset_id: &str) {
        self.stop(asset_id);
        self.sessions.remove(asset_id);
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Stop every ticker (engine shutdown)
    pub fn stop_all(&self) {
        for entry in self.tickers.iter() {
            entry.value().cancel();
        }
        self.tickers.clear();
    }
}

impl Default for SniperMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(window_secs: u64) -> MonitoringConfig {
        MonitoringConfig {
            enabled: true,
            window_secs,
            window_blocks: 0,
            hostile_sell_sol: 0.5,
            hostile_supply_pct: 2.0,
            poll_interval_ms: 10,
        }
    }

    fn sell(asset: &str, actor: &str, sol: f64) -> TradeActivity {
        TradeActivity {
            asset_id: asset.into(),
            actor: actor.into(),
            is_sell: true,
            sol_amount: sol,
            token_amount: 1_000.0,
            supply_pct: None,
            block: 10,
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_not_found_for_untracked_token() {
        let monitor = Arc::new(SniperMonitor::new());
        let report = monitor.status("unknown");
        assert_eq!(report.status, MonitorStatus::NotFound);
    }

    #[tokio::test]
    async fn test_hostile_sell_triggers_once() {
        let monitor = Arc::new(SniperMonitor::new());
        monitor.start("mint", 1, None, &config(60));

        // Small sell: no trigger
        assert!(monitor.observe_trade(&sell("mint", "whale", 0.1)).is_none());
        assert_eq!(monitor.status("mint").status, MonitorStatus::Monitoring);

        // Hostile sell triggers
        let notice = monitor.observe_trade(&sell("mint", "whale", 1.0)).unwrap();
        assert!(matches!(notice, MonitorNotice::SniperDetected { .. }));

        let report = monitor.status("mint");
        assert_eq!(report.status, MonitorStatus::Triggered);
        assert!(report.triggered);
        let trade = report.trade.unwrap();
        assert_eq!(trade.actor, "whale");
        assert_eq!(trade.sol_amount, 1.0);

        // Idempotent: a second hostile sell does not re-fire or overwrite
        assert!(monitor.observe_trade(&sell("mint", "whale2", 2.0)).is_none());
        assert_eq!(monitor.status("mint").trade.unwrap().actor, "whale");
    }

    #[tokio::test]
    async fn test_buys_never_trigger() {
        let monitor = Arc::new(SniperMonitor::new());
        monitor.start("mint", 1, None, &config(60));

        let mut buy = sell("mint", "whale", 5.0);
        buy.is_sell = false;
        assert!(monitor.observe_trade(&buy).is_none());
        assert_eq!(monitor.status("mint").status, MonitorStatus::Monitoring);
    }

    #[tokio::test]
    async fn test_supply_pct_threshold() {
        let monitor = Arc::new(SniperMonitor::new());
        monitor.start("mint", 1, None, &config(60));

        let mut trade = sell("mint", "whale", 0.01);
        trade.supply_pct = Some(5.0);
        let notice = monitor.observe_trade(&trade).unwrap();
        assert!(matches!(notice, MonitorNotice::SniperDetected { .. }));
    }

    #[tokio::test]
    async fn test_dev_sell_below_threshold_reports_without_trigger() {
        let monitor = Arc::new(SniperMonitor::new());
        monitor.start("mint", 1, Some("dev".into()), &config(60));

        let notice = monitor.observe_trade(&sell("mint", "dev", 0.05)).unwrap();
        assert!(matches!(notice, MonitorNotice::DevSellObserved { .. }));
        // Session itself stays in monitoring
        assert_eq!(monitor.status("mint").status, MonitorStatus::Monitoring);

        // Over-threshold dev sell does trigger
        let notice = monitor.observe_trade(&sell("mint", "dev", 1.0)).unwrap();
        assert!(matches!(notice, MonitorNotice::SniperDetected { .. }));
    }

    #[tokio::test]
    async fn test_expiry_is_terminal() {
        let monitor = Arc::new(SniperMonitor::new());
        monitor.start("mint", 1, None, &config(0));

        // Window of zero seconds: expired immediately on first poll
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let report = monitor.status("mint");
        assert_eq!(report.status, MonitorStatus::Expired);

        // Hostile sell after expiry does not transition out of expired
        assert!(monitor.observe_trade(&sell("mint", "whale", 5.0)).is_none());
        assert_eq!(monitor.status("mint").status, MonitorStatus::Expired);
    }

    #[tokio::test]
    async fn test_block_window() {
        let monitor = Arc::new(SniperMonitor::new());
        let mut cfg = config(3600);
        cfg.window_blocks = 5;
        monitor.start("mint", 100, None, &cfg);

        let mut trade = sell("mint", "whale", 5.0);
        trade.block = 104;
        assert!(monitor.observe_trade(&trade).is_some());
        assert_eq!(monitor.status("mint").status, MonitorStatus::Triggered);

        // A fresh session whose window the chain has already passed
        monitor.start("mint2", 100, None, &cfg);
        let mut late = sell("mint2", "whale", 5.0);
        late.block = 106; // past start_block + window_blocks
        assert!(monitor.observe_trade(&late).is_none());
        assert_eq!(monitor.status("mint2").status, MonitorStatus::Expired);
    }

    #[tokio::test]
    async fn test_block_only_window_has_no_wall_clock_expiry() {
        let monitor = Arc::new(SniperMonitor::new());
        let mut cfg = config(0);
        cfg.window_blocks = 100;
        monitor.start("mint", 1, None, &cfg);

        // No wall-clock bound: the session stays live despite window_secs = 0
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(monitor.status("mint").status, MonitorStatus::Monitoring);

        // A hostile sell inside the block window still triggers
        let mut trade = sell("mint", "whale", 5.0);
        trade.block = 101;
        let notice = monitor.observe_trade(&trade).unwrap();
        assert!(matches!(notice, MonitorNotice::SniperDetected { .. }));
    }

    #[tokio::test]
    async fn test_stop_preserves_status() {
        let monitor = Arc::new(SniperMonitor::new());
        monitor.start("mint", 1, None, &config(60));
        monitor.observe_trade(&sell("mint", "whale", 5.0));

        monitor.stop("mint");
        // Status untouched by stop
        assert_eq!(monitor.status("mint").status, MonitorStatus::Triggered);

        monitor.remove("mint");
        assert_eq!(monitor.status("mint").status, MonitorStatus::NotFound);
    }

    #[tokio::test]
    async fn test_error_state() {
        let monitor = Arc::new(SniperMonitor::new());
        monitor.start("mint", 1, None, &config(60));
        monitor.mark_error("mint", "lookup failed");

        let report = monitor.status("mint");
        assert_eq!(report.status, MonitorStatus::Error);
        assert!(report.trade.is_none());
    }

    #[tokio::test]
    async fn test_notice_channel() {
        let monitor = Arc::new(SniperMonitor::new());
        let mut rx = monitor.subscribe();

        monitor.start("mint", 1, None, &config(60));
        monitor.observe_trade(&sell("mint", "whale", 5.0));

        match rx.recv().await.unwrap() {
            MonitorNotice::SniperDetected { asset_id, trade } => {
                assert_eq!(asset_id, "mint");
                assert_eq!(trade.actor, "whale");
            }
            other => panic!("unexpected notice: {:?}", other),
        }
    }
}
