//! Exit trigger evaluation
//!
//! Pure decision logic: given an open snipe, the policy's exit rules and the
//! latest market observation, decide whether to liquidate and how much.
//! Evaluation order matters: anti-rug is protective and takes precedence
//! over dev-sell and all price-based triggers, including its sell sizing.
//! Once any trigger fires and the position fully closes, the snipe leaves
//! the active set and nothing here runs for it again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::{ActiveSnipe, SnipeStatus};
use crate::policy::{AdvancedConfig, ExitRules};

/// Why an exit fired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
    TakeProfit,
    StopLoss,
    TrailingStop,
    TimeBox,
    DevSell,
    AntiRug,
    /// Hostile early sell flagged by the monitoring session
    Sniper,
    /// Operator-initiated sell, not a policy trigger
    Manual,
}

impl std::fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerReason::TakeProfit => write!(f, "take_profit"),
            TriggerReason::StopLoss => write!(f, "stop_loss"),
            TriggerReason::TrailingStop => write!(f, "trailing_stop"),
            TriggerReason::TimeBox => write!(f, "time_box"),
            TriggerReason::DevSell => write!(f, "dev_sell"),
            TriggerReason::AntiRug => write!(f, "anti_rug"),
            TriggerReason::Sniper => write!(f, "sniper_detected"),
            TriggerReason::Manual => write!(f, "manual"),
        }
    }
}

/// The decision to liquidate part of a position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitDecision {
    pub reason: TriggerReason,
    /// Fraction of current holdings to sell, in (0, 1]
    pub sell_fraction: f64,
}

/// One valuation tick for a position
#[derive(Debug, Clone, Copy)]
pub struct PriceTick {
    pub price: f64,
    pub block: u64,
    pub at: DateTime<Utc>,
}

impl PriceTick {
    pub fn now(price: f64, block: u64) -> Self {
        Self {
            price,
            block,
            at: Utc::now(),
        }
    }
}

/// Non-price market conditions observed since the last tick
#[derive(Debug, Clone, Copy, Default)]
pub struct MarketObservation {
    /// Percentage of the dev's original holdings sold so far
    pub dev_sold_pct: Option<f64>,
    /// Current liquidity as a percentage of its peak
    pub liquidity_pct_of_peak: Option<f64>,
    /// The creator wallet was seen disposing of holdings
    pub dev_sell_observed: bool,
}

/// Evaluate all exit triggers for one open snipe on one tick.
///
/// The caller must have recorded the tick's price on the snipe first
/// (so the trailing peak is already up to date). Exits are never gated on
/// budget or concurrency limits: those apply at entry only.
pub fn evaluate(
    snipe: &ActiveSnipe,
    exit: &ExitRules,
    advanced: &AdvancedConfig,
    tick: &PriceTick,
    observation: &MarketObservation,
) -> Option<ExitDecision> {
    // Inert once the position is no longer open
    if snipe.status != SnipeStatus::Success || snipe.quantity <= 0.0 {
        return None;
    }

    let normal_fraction = exit.sell_percent_on_trigger / 100.0;

    // Anti-rug first: overrides ordering and sizing of every other trigger
    if advanced.anti_rug_enabled {
        let dev_rug = observation
            .dev_sold_pct
            .map(|pct| pct > advanced.anti_rug_max_dev_sell_pct)
            .unwrap_or(false);
        let liquidity_rug = observation
            .liquidity_pct_of_peak
            .map(|pct| pct < advanced.anti_rug_min_liquidity_pct)
            .unwrap_or(false);

        if dev_rug || liquidity_rug {
            return Some(ExitDecision {
                reason: TriggerReason::AntiRug,
                sell_fraction: advanced.anti_rug_sell_percent / 100.0,
            });
        }
    }

    if exit.sell_on_dev_sell && observation.dev_sell_observed {
        return Some(ExitDecision {
            reason: TriggerReason::DevSell,
            sell_fraction: normal_fraction,
        });
    }

    if !exit.auto_sell_enabled {
        return None;
    }

    // Take-profit: current >= entry * (1 + tp%)
    if tick.price >= snipe.thresholds.take_profit_price {
        return Some(ExitDecision {
            reason: TriggerReason::TakeProfit,
            sell_fraction: normal_fraction,
        });
    }

    // Stop-loss: current <= entry * (1 - sl%)
    if tick.price <= snipe.thresholds.stop_loss_price {
        return Some(ExitDecision {
            reason: TriggerReason::StopLoss,
            sell_fraction: normal_fraction,
        });
    }

    // Trailing stop: fires once price drops strictly below the peak-derived
    // floor. At exactly the floor it holds.
    if exit.trailing_stop_enabled {
        let floor = snipe.peak_price * (1.0 - exit.trailing_stop_pct / 100.0);
        if tick.price < floor {
            return Some(ExitDecision {
                reason: TriggerReason::TrailingStop,
                sell_fraction: normal_fraction,
            });
        }
    }

    // Time box, by blocks or wall clock, whichever is configured
    if exit.sell_after_blocks > 0 && tick.block >= snipe.entry_block + exit.sell_after_blocks {
        return Some(ExitDecision {
            reason: TriggerReason::TimeBox,
            sell_fraction: normal_fraction,
        });
    }
    if exit.sell_after_seconds > 0 {
        let held = (tick.at - snipe.entry_time).num_seconds().max(0) as u64;
        if held >= exit.sell_after_seconds {
            return Some(ExitDecision {
                reason: TriggerReason::TimeBox,
                sell_fraction: normal_fraction,
            });
        }
    }

    None
}
