//! Session ledger: active snipes, closed history, aggregate stats
//!
//! The ledger is the engine's only shared mutable state besides the monitor
//! table. All mutation goes through one lock so entry admission (budget,
//! concurrency, cooldown, blacklists) is atomic with respect to concurrently
//! arriving candidates.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::policy::SafetyLimits;
use crate::triggers::TriggerReason;

/// Live status of a snipe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnipeStatus {
    /// Admitted, buy not yet submitted
    Pending,
    /// Buy submitted, awaiting fill
    Executing,
    /// Position open
    Success,
    /// Buy failed after retries
    Failed,
    /// Fully liquidated
    Sold,
}

/// Precomputed exit price levels, fixed at entry
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TriggerThresholds {
    pub take_profit_price: f64,
    pub stop_loss_price: f64,
}

impl TriggerThresholds {
    pub fn from_entry(entry_price: f64, take_profit_pct: f64, stop_loss_pct: f64) -> Self {
        Self {
            take_profit_price: entry_price * (1.0 + take_profit_pct / 100.0),
            stop_loss_price: entry_price * (1.0 - stop_loss_pct / 100.0),
        }
    }
}

/// An open position created by a confirmed buy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveSnipe {
    pub id: Uuid,
    pub asset_id: String,
    pub venue: String,
    pub creator: Option<String>,
    pub status: SnipeStatus,
    pub entry_block: u64,
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    /// Tokens currently held
    pub quantity: f64,
    /// SOL cost of the remaining holdings
    pub cost_sol: f64,
    pub entry_tx_ref: String,
    /// Updated on every valuation tick
    pub current_price: f64,
    /// Highest price seen since entry, monotone non-decreasing
    pub peak_price: f64,
    pub thresholds: TriggerThresholds,
}

impl ActiveSnipe {
    pub fn current_value_sol(&self) -> f64 {
        self.quantity * self.current_price
    }

    pub fn unrealized_pnl_sol(&self) -> f64 {
        self.current_value_sol() - self.cost_sol
    }

    pub fn unrealized_pnl_pct(&self) -> f64 {
        if self.cost_sol == 0.0 {
            return 0.0;
        }
        (self.unrealized_pnl_sol() / self.cost_sol) * 100.0
    }

    /// Record a price observation; the peak only ever moves up
    pub fn observe_price(&mut self, price: f64) {
        self.current_price = price;
        if price > self.peak_price {
            self.peak_price = price;
        }
    }
}

/// Closed-out projection of a snipe, append-only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnipeHistory {
    pub id: Uuid,
    pub asset_id: String,
    pub venue: String,
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_time: DateTime<Utc>,
    pub exit_block: u64,
    pub exit_price: f64,
    pub exit_tx_ref: String,
    pub trigger_reason: TriggerReason,
    pub sold_quantity: f64,
    pub realized_pnl_sol: f64,
    pub hold_secs: i64,
}

/// Aggregate counters for one engine run; reset on restart
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionStats {
    pub snipe_attempts: u32,
    pub snipe_successes: u32,
    pub snipe_failures: u32,
    pub total_spent_sol: f64,
    pub total_returned_sol: f64,
    pub realized_pnl_sol: f64,
    pub best_trade_pct: f64,
    pub worst_trade_pct: f64,
    pub winning_trades: u32,
    pub closed_trades: u32,
    pub total_hold_secs: i64,
    pub events_seen: u64,
    pub events_filtered: u64,
}

impl SessionStats {
    pub fn record_close(&mut self, pnl_sol: f64, pnl_pct: f64, hold_secs: i64) {
        self.closed_trades += 1;
        if pnl_sol > 0.0 {
            self.winning_trades += 1;
        }
        self.realized_pnl_sol += pnl_sol;
        self.total_hold_secs += hold_secs;
        if self.closed_trades == 1 {
            self.best_trade_pct = pnl_pct;
            self.worst_trade_pct = pnl_pct;
        } else {
            self.best_trade_pct = self.best_trade_pct.max(pnl_pct);
            self.worst_trade_pct = self.worst_trade_pct.min(pnl_pct);
        }
    }

    pub fn average_hold_secs(&self) -> f64 {
        if self.closed_trades == 0 {
            return 0.0;
        }
        self.total_hold_secs as f64 / self.closed_trades as f64
    }

    /// Fraction of closed trades that realized a profit, in [0, 1]
    pub fn win_rate(&self) -> f64 {
        if self.closed_trades == 0 {
            return 0.0;
        }
        self.winning_trades as f64 / self.closed_trades as f64
    }
}

struct LedgerInner {
    active: HashMap<String, ActiveSnipe>,
    history: Vec<SnipeHistory>,
    stats: SessionStats,
    /// SOL reserved or spent against today's budget
    spent_today_sol: f64,
    budget_day: NaiveDate,
    last_entry_at: Option<DateTime<Utc>>,
}

/// Ledger of active snipes, history and session stats
pub struct SnipeLedger {
    inner: Mutex<LedgerInner>,
}

impl SnipeLedger {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LedgerInner {
                active: HashMap::new(),
                history: Vec::new(),
                stats: SessionStats::default(),
                spent_today_sol: 0.0,
                budget_day: Utc::now().date_naive(),
                last_entry_at: None,
            }),
        }
    }

    /// Atomically check all safety limits and reserve budget for one entry.
    /// On success a `Pending` snipe is inserted; a failed buy must call
    /// [`release`](Self::release) to refund the reservation.
    pub fn try_admit(
        &self,
        asset_id: &str,
        venue: &str,
        creator: Option<&str>,
        cost_sol: f64,
        limits: &SafetyLimits,
    ) -> Result<Uuid> {
        let mut inner = self.inner.lock().expect("ledger lock poisoned");
        let now = Utc::now();

        // Budget day rollover at UTC midnight
        let today = now.date_naive();
        if today != inner.budget_day {
            info!(spent = inner.spent_today_sol, "Daily budget reset");
            inner.budget_day = today;
            inner.spent_today_sol = 0.0;
        }

        if limits.emergency_stop {
            return Err(Error::EmergencyStop);
        }

        if limits.token_blacklist.iter().any(|t| t == asset_id) {
            return Err(Error::Blacklisted {
                kind: "token",
                address: asset_id.to_string(),
            });
        }

        if let Some(creator) = creator {
            if limits.creator_blacklist.iter().any(|c| c == creator) {
                return Err(Error::Blacklisted {
                    kind: "creator",
                    address: creator.to_string(),
                });
            }
        }

        let open_count = inner
            .active
            .values()
            .filter(|s| s.status != SnipeStatus::Failed && s.status != SnipeStatus::Sold)
            .count();
        if open_count >= limits.max_concurrent_snipes {
            return Err(Error::MaxConcurrentReached {
                current: open_count,
                max: limits.max_concurrent_snipes,
            });
        }

        if cost_sol > limits.max_snipe_sol {
            return Err(Error::MaxSnipeSizeExceeded {
                amount: cost_sol,
                max: limits.max_snipe_sol,
            });
        }

        if inner.spent_today_sol + cost_sol > limits.daily_budget_sol {
            return Err(Error::DailyBudgetExhausted {
                spent: inner.spent_today_sol,
                buy: cost_sol,
                budget: limits.daily_budget_sol,
            });
        }

        if let Some(last) = inner.last_entry_at {
            let elapsed = (now - last).num_seconds().max(0) as u64;
            if elapsed < limits.cooldown_secs {
                return Err(Error::CooldownActive {
                    remaining_secs: limits.cooldown_secs - elapsed,
                });
            }
        }

        // All checks passed: reserve inside the same critical section
        let id = Uuid::new_v4();
        inner.spent_today_sol += cost_sol;
        inner.last_entry_at = Some(now);
        inner.stats.snipe_attempts += 1;
        inner.active.insert(
            asset_id.to_string(),
            ActiveSnipe {
                id,
                asset_id: asset_id.to_string(),
                venue: venue.to_string(),
                creator: creator.map(|c| c.to_string()),
                status: SnipeStatus::Pending,
                entry_block: 0,
                entry_time: now,
                entry_price: 0.0,
                quantity: 0.0,
                cost_sol,
                entry_tx_ref: String::new(),
                current_price: 0.0,
                peak_price: 0.0,
                thresholds: TriggerThresholds {
                    take_profit_price: 0.0,
                    stop_loss_price: 0.0,
                },
            },
        );

        Ok(id)
    }

    /// Mark an admitted snipe as submitted to the gateway
    pub fn mark_executing(&self, asset_id: &str) {
        let mut inner = self.inner.lock().expect("ledger lock poisoned");
        if let Some(snipe) = inner.active.get_mut(asset_id) {
            snipe.status = SnipeStatus::Executing;
        }
    }

    /// Promote an admitted snipe to an open position after the buy fills
    pub fn confirm_open(
        &self,
        asset_id: &str,
        entry_block: u64,
        entry_price: f64,
        quantity: f64,
        actual_cost_sol: f64,
        tx_ref: &str,
        take_profit_pct: f64,
        stop_loss_pct: f64,
    ) -> Result<ActiveSnipe> {
        let mut inner = self.inner.lock().expect("ledger lock poisoned");

        // Reconcile the reservation against the actual fill cost
        let snipe = inner
            .active
            .get_mut(asset_id)
            .ok_or_else(|| Error::SnipeNotFound(asset_id.to_string()))?;
        let reserved = snipe.cost_sol;

        snipe.status = SnipeStatus::Success;
        snipe.entry_block = entry_block;
        snipe.entry_price = entry_price;
        snipe.quantity = quantity;
        snipe.cost_sol = actual_cost_sol;
        snipe.entry_tx_ref = tx_ref.to_string();
        snipe.current_price = entry_price;
        snipe.peak_price = entry_price;
        snipe.thresholds =
            TriggerThresholds::from_entry(entry_price, take_profit_pct, stop_loss_pct);
        let opened = snipe.clone();

        inner.spent_today_sol += actual_cost_sol - reserved;
        inner.stats.snipe_successes += 1;
        inner.stats.total_spent_sol += actual_cost_sol;

        info!(
            asset = %asset_id,
            price = entry_price,
            cost = actual_cost_sol,
            "Snipe opened"
        );
        Ok(opened)
    }

    /// Remove a snipe whose buy failed and refund its budget reservation.
    /// Returns the released record, marked `Failed`.
    pub fn release(&self, asset_id: &str) -> Option<ActiveSnipe> {
        let mut inner = self.inner.lock().expect("ledger lock poisoned");
        let mut snipe = inner.active.remove(asset_id)?;
        snipe.status = SnipeStatus::Failed;
        inner.spent_today_sol = (inner.spent_today_sol - snipe.cost_sol).max(0.0);
        inner.stats.snipe_failures += 1;
        debug!(asset = %asset_id, "Snipe released, budget refunded");
        Some(snipe)
    }

    /// Atomically claim an open snipe for liquidation. Only one caller wins
    /// the `Success -> Executing` transition; concurrent exit paths (price
    /// ticker, sniper notice, manual sell) get `None` and back off.
    pub fn begin_exit(&self, asset_id: &str) -> Option<ActiveSnipe> {
        let mut inner = self.inner.lock().expect("ledger lock poisoned");
        let snipe = inner.active.get_mut(asset_id)?;
        if snipe.status != SnipeStatus::Success {
            return None;
        }
        snipe.status = SnipeStatus::Executing;
        Some(snipe.clone())
    }

    /// Return a claimed exit to the open state after a failed sell
    pub fn abort_exit(&self, asset_id: &str) {
        let mut inner = self.inner.lock().expect("ledger lock poisoned");
        if let Some(snipe) = inner.active.get_mut(asset_id) {
            if snipe.status == SnipeStatus::Executing {
                snipe.status = SnipeStatus::Success;
            }
        }
    }

    /// Update the live price for a snipe; the peak only moves up
    pub fn observe_price(&self, asset_id: &str, price: f64) -> Option<ActiveSnipe> {
        let mut inner = self.inner.lock().expect("ledger lock poisoned");
        let snipe = inner.active.get_mut(asset_id)?;
        if snipe.status != SnipeStatus::Success {
            return None;
        }
        snipe.observe_price(price);
        Some(snipe.clone())
    }

    /// Apply a confirmed exit fill. Partial exits leave the snipe active with
    /// reduced size; a full exit moves it to history. Returns realized P&L.
    #[allow(clippy::too_many_arguments)]
    pub fn apply_exit(
        &self,
        asset_id: &str,
        sold_quantity: f64,
        proceeds_sol: f64,
        exit_price: f64,
        exit_block: u64,
        exit_tx_ref: &str,
        reason: TriggerReason,
    ) -> Result<f64> {
        let mut inner = self.inner.lock().expect("ledger lock poisoned");
        let now = Utc::now();

        let snipe = inner
            .active
            .get_mut(asset_id)
            .ok_or_else(|| Error::SnipeNotFound(asset_id.to_string()))?;

        let sold = sold_quantity.min(snipe.quantity);
        let sold_ratio = if snipe.quantity > 0.0 {
            sold / snipe.quantity
        } else {
            1.0
        };
        let cost_basis = snipe.cost_sol * sold_ratio;
        let pnl = proceeds_sol - cost_basis;
        let pnl_pct = if cost_basis > 0.0 {
            (pnl / cost_basis) * 100.0
        } else {
            0.0
        };

        snipe.quantity -= sold;
        snipe.cost_sol -= cost_basis;

        let fully_closed = snipe.quantity <= f64::EPSILON;
        if fully_closed {
            snipe.status = SnipeStatus::Sold;
        } else {
            // A partial exit releases the claim; the position is open again
            snipe.status = SnipeStatus::Success;
        }

        let record = SnipeHistory {
            id: snipe.id,
            asset_id: snipe.asset_id.clone(),
            venue: snipe.venue.clone(),
            entry_time: snipe.entry_time,
            entry_price: snipe.entry_price,
            exit_time: now,
            exit_block,
            exit_price,
            exit_tx_ref: exit_tx_ref.to_string(),
            trigger_reason: reason,
            sold_quantity: sold,
            realized_pnl_sol: pnl,
            hold_secs: (now - snipe.entry_time).num_seconds(),
        };
        let hold_secs = record.hold_secs;

        if fully_closed {
            inner.active.remove(asset_id);
            info!(asset = %asset_id, pnl, reason = %reason, "Snipe closed");
        } else {
            info!(
                asset = %asset_id,
                sold,
                pnl,
                reason = %reason,
                "Partial exit, snipe remains active"
            );
        }

        inner.history.push(record);
        inner.stats.total_returned_sol += proceeds_sol;
        inner.stats.record_close(pnl, pnl_pct, hold_secs);

        Ok(pnl)
    }

    pub fn get(&self, asset_id: &str) -> Option<ActiveSnipe> {
        let inner = self.inner.lock().expect("ledger lock poisoned");
        inner.active.get(asset_id).cloned()
    }

    pub fn active_snipes(&self) -> Vec<ActiveSnipe> {
        let inner = self.inner.lock().expect("ledger lock poisoned");
        inner.active.values().cloned().collect()
    }

    pub fn history(&self) -> Vec<SnipeHistory> {
        let inner = self.inner.lock().expect("ledger lock poisoned");
        inner.history.clone()
    }

    pub fn stats(&self) -> SessionStats {
        let inner = self.inner.lock().expect("ledger lock poisoned");
        inner.stats.clone()
    }

    pub fn total_unrealized_pnl_sol(&self) -> f64 {
        let inner = self.inner.lock().expect("ledger lock poisoned");
        inner
            .active
            .values()
            .filter(|s| s.status == SnipeStatus::Success)
            .map(|s| s.unrealized_pnl_sol())
            .sum()
    }

    pub fn record_event_seen(&self) {
        let mut inner = self.inner.lock().expect("ledger lock poisoned");
        inner.stats.events_seen += 1;
    }

    pub fn record_event_filtered(&self) {
        let mut inner = self.inner.lock().expect("ledger lock poisoned");
        inner.stats.events_filtered += 1;
    }
}

impl Default for SnipeLedger {
    fn default() -> Self {
        Self::new()
    }
}
