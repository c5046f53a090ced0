//! Snipe policy: declarative entry/exit configuration with validation
//!
//! A `Policy` is immutable once the engine starts. Changing behavior means
//! building a new `Policy` and restarting the engine with it.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// Master policy describing when to enter, how to size, and when to exit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    /// Master enable flag - a disabled policy rejects every candidate
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub entry: EntryFilters,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub exit: ExitRules,
    #[serde(default)]
    pub safety: SafetyLimits,
    #[serde(default)]
    pub targeting: TargetingConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub advanced: AdvancedConfig,
}

/// Post-entry observation window and hostile-trade thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Observation window length in seconds
    #[serde(default = "default_monitor_window_secs")]
    pub window_secs: u64,
    /// Observation window in blocks; 0 means wall-clock only
    #[serde(default)]
    pub window_blocks: u64,
    /// A sell at or above this SOL size inside the window is hostile
    #[serde(default = "default_hostile_sell_sol")]
    pub hostile_sell_sol: f64,
    /// A sell of at least this % of supply inside the window is hostile
    #[serde(default = "default_hostile_supply_pct")]
    pub hostile_supply_pct: f64,
    /// Session status/price poll cadence
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// Entry timing window relative to pool creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Buy in the creation block itself when possible
    #[serde(default = "default_true")]
    pub snipe_block_zero: bool,
    /// Minimum blocks after creation before entering
    #[serde(default)]
    pub min_block_delay: u64,
    /// Maximum blocks after creation; older pools are stale candidates
    #[serde(default = "default_max_block_delay")]
    pub max_block_delay: u64,
}

/// Entry filters evaluated by the filter pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryFilters {
    #[serde(default)]
    pub min_holder_count: u32,
    #[serde(default = "default_max_holder_count")]
    pub max_holder_count: u32,
    #[serde(default)]
    pub min_dev_holding_pct: f64,
    #[serde(default = "default_max_dev_holding")]
    pub max_dev_holding_pct: f64,
    #[serde(default)]
    pub min_transaction_count: u32,
    #[serde(default)]
    pub min_liquidity_usd: f64,
    #[serde(default = "default_max_liquidity_usd")]
    pub max_liquidity_usd: f64,
    #[serde(default)]
    pub min_market_cap_usd: f64,
    #[serde(default = "default_max_market_cap_usd")]
    pub max_market_cap_usd: f64,
    /// Require at least one social link (twitter/telegram)
    #[serde(default)]
    pub require_social_links: bool,
    /// Require a website link
    #[serde(default)]
    pub require_website: bool,
    /// Require a verified creator identity
    #[serde(default)]
    pub require_verified_creator: bool,
}

/// Execution sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Buy amount in SOL (primary quote unit)
    #[serde(default = "default_buy_amount_sol")]
    pub buy_amount_sol: f64,
    /// Buy amount in the alternate quote unit (USDC); 0 means unused
    #[serde(default)]
    pub buy_amount_usdc: f64,
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: u32,
    #[serde(default = "default_priority_fee")]
    pub priority_fee_lamports: u64,
}

/// Exit rules driving the trigger engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitRules {
    #[serde(default = "default_true")]
    pub auto_sell_enabled: bool,
    #[serde(default = "default_take_profit_pct")]
    pub take_profit_pct: f64,
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: f64,
    #[serde(default = "default_true")]
    pub trailing_stop_enabled: bool,
    #[serde(default = "default_trailing_stop_pct")]
    pub trailing_stop_pct: f64,
    /// Sell after this many blocks regardless of price; 0 disables
    #[serde(default)]
    pub sell_after_blocks: u64,
    /// Sell after this many seconds regardless of price; 0 disables
    #[serde(default)]
    pub sell_after_seconds: u64,
    /// Exit when the creator wallet disposes of its holdings
    #[serde(default = "default_true")]
    pub sell_on_dev_sell: bool,
    /// Fraction of current holdings to liquidate per trigger
    #[serde(default = "default_sell_percent")]
    pub sell_percent_on_trigger: f64,
}

/// Hard safety limits checked atomically at entry-decision time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyLimits {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_snipes: usize,
    #[serde(default = "default_daily_budget")]
    pub daily_budget_sol: f64,
    #[serde(default = "default_max_snipe_sol")]
    pub max_snipe_sol: f64,
    /// Engaged = reject all new entries (open positions still exit normally)
    #[serde(default)]
    pub emergency_stop: bool,
    /// Minimum seconds between consecutive entries
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(default)]
    pub token_blacklist: Vec<String>,
    #[serde(default)]
    pub creator_blacklist: Vec<String>,
}

/// Which venues and creators are targeted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetingConfig {
    /// Venue names to watch (must match registered venue specs)
    #[serde(default = "default_target_venues")]
    pub target_venues: Vec<String>,
    #[serde(default)]
    pub verified_creators_only: bool,
}

/// Anti-rug and execution retry knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvancedConfig {
    #[serde(default = "default_true")]
    pub anti_rug_enabled: bool,
    /// Dev selling more than this % of its holdings triggers anti-rug
    #[serde(default = "default_anti_rug_dev_sell")]
    pub anti_rug_max_dev_sell_pct: f64,
    /// Liquidity falling below this % of its peak triggers anti-rug
    #[serde(default = "default_anti_rug_liquidity")]
    pub anti_rug_min_liquidity_pct: f64,
    /// Anti-rug liquidates this fraction (overrides sell_percent_on_trigger)
    #[serde(default = "default_anti_rug_sell_percent")]
    pub anti_rug_sell_percent: f64,
    /// Bundle buy + protective setup atomically where the gateway supports it
    #[serde(default)]
    pub atomic_execution: bool,
    #[serde(default = "default_true")]
    pub retry_on_fail: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay between retry attempts
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

// Default value functions

fn default_true() -> bool {
    true
}

fn default_max_block_delay() -> u64 {
    5
}

fn default_max_holder_count() -> u32 {
    u32::MAX
}

fn default_max_dev_holding() -> f64 {
    100.0
}

fn default_max_liquidity_usd() -> f64 {
    f64::MAX
}

fn default_max_market_cap_usd() -> f64 {
    f64::MAX
}

fn default_buy_amount_sol() -> f64 {
    0.05
}

fn default_slippage_bps() -> u32 {
    2500
}

fn default_priority_fee() -> u64 {
    100_000
}

fn default_take_profit_pct() -> f64 {
    50.0
}

fn default_stop_loss_pct() -> f64 {
    30.0
}

fn default_trailing_stop_pct() -> f64 {
    15.0
}

fn default_sell_percent() -> f64 {
    100.0
}

fn default_max_concurrent() -> usize {
    3
}

fn default_daily_budget() -> f64 {
    1.0
}

fn default_max_snipe_sol() -> f64 {
    0.5
}

fn default_cooldown_secs() -> u64 {
    30
}

fn default_target_venues() -> Vec<String> {
    vec!["pumpfun".into()]
}

fn default_monitor_window_secs() -> u64 {
    120
}

fn default_hostile_sell_sol() -> f64 {
    0.5
}

fn default_hostile_supply_pct() -> f64 {
    2.0
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_anti_rug_dev_sell() -> f64 {
    50.0
}

fn default_anti_rug_liquidity() -> f64 {
    50.0
}

fn default_anti_rug_sell_percent() -> f64 {
    100.0
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    250
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            snipe_block_zero: true,
            min_block_delay: 0,
            max_block_delay: default_max_block_delay(),
        }
    }
}

impl Default for EntryFilters {
    fn default() -> Self {
        Self {
            min_holder_count: 0,
            max_holder_count: default_max_holder_count(),
            min_dev_holding_pct: 0.0,
            max_dev_holding_pct: default_max_dev_holding(),
            min_transaction_count: 0,
            min_liquidity_usd: 0.0,
            max_liquidity_usd: default_max_liquidity_usd(),
            min_market_cap_usd: 0.0,
            max_market_cap_usd: default_max_market_cap_usd(),
            require_social_links: false,
            require_website: false,
            require_verified_creator: false,
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            buy_amount_sol: default_buy_amount_sol(),
            buy_amount_usdc: 0.0,
            slippage_bps: default_slippage_bps(),
            priority_fee_lamports: default_priority_fee(),
        }
    }
}

impl Default for ExitRules {
    fn default() -> Self {
        Self {
            auto_sell_enabled: true,
            take_profit_pct: default_take_profit_pct(),
            stop_loss_pct: default_stop_loss_pct(),
            trailing_stop_enabled: true,
            trailing_stop_pct: default_trailing_stop_pct(),
            sell_after_blocks: 0,
            sell_after_seconds: 0,
            sell_on_dev_sell: true,
            sell_percent_on_trigger: default_sell_percent(),
        }
    }
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            max_concurrent_snipes: default_max_concurrent(),
            daily_budget_sol: default_daily_budget(),
            max_snipe_sol: default_max_snipe_sol(),
            emergency_stop: false,
            cooldown_secs: default_cooldown_secs(),
            token_blacklist: vec![],
            creator_blacklist: vec![],
        }
    }
}

impl Default for TargetingConfig {
    fn default() -> Self {
        Self {
            target_venues: default_target_venues(),
            verified_creators_only: false,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_secs: default_monitor_window_secs(),
            window_blocks: 0,
            hostile_sell_sol: default_hostile_sell_sol(),
            hostile_supply_pct: default_hostile_supply_pct(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        Self {
            anti_rug_enabled: true,
            anti_rug_max_dev_sell_pct: default_anti_rug_dev_sell(),
            anti_rug_min_liquidity_pct: default_anti_rug_liquidity(),
            anti_rug_sell_percent: default_anti_rug_sell_percent(),
            atomic_execution: false,
            retry_on_fail: true,
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            enabled: true,
            timing: TimingConfig::default(),
            entry: EntryFilters::default(),
            execution: ExecutionConfig::default(),
            exit: ExitRules::default(),
            safety: SafetyLimits::default(),
            targeting: TargetingConfig::default(),
            monitoring: MonitoringConfig::default(),
            advanced: AdvancedConfig::default(),
        }
    }
}

impl Policy {
    /// Load a policy from file and environment variables, then validate it
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix SNIPER_)
            .add_source(
                config::Environment::with_prefix("SNIPER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build policy configuration")?;

        let policy: Policy = settings
            .try_deserialize()
            .context("Failed to deserialize policy")?;

        policy.validate()?;

        Ok(policy)
    }

    /// Build a named preset merged over defaults
    pub fn preset(name: &str) -> Result<Self> {
        let mut policy = Policy::default();
        match name {
            "aggressive" => {
                policy.execution.buy_amount_sol = 0.1;
                policy.execution.slippage_bps = 4000;
                policy.exit.take_profit_pct = 100.0;
                policy.exit.stop_loss_pct = 50.0;
                policy.exit.trailing_stop_pct = 25.0;
                policy.safety.max_concurrent_snipes = 5;
                policy.safety.daily_budget_sol = 2.0;
                policy.safety.cooldown_secs = 10;
                policy.entry.min_liquidity_usd = 0.0;
            }
            "conservative" => {
                policy.execution.buy_amount_sol = 0.02;
                policy.execution.slippage_bps = 1000;
                policy.exit.take_profit_pct = 30.0;
                policy.exit.stop_loss_pct = 15.0;
                policy.exit.trailing_stop_pct = 10.0;
                policy.safety.max_concurrent_snipes = 1;
                policy.safety.daily_budget_sol = 0.5;
                policy.safety.cooldown_secs = 120;
                policy.entry.min_liquidity_usd = 5_000.0;
                policy.entry.min_holder_count = 10;
                policy.entry.require_social_links = true;
                policy.advanced.anti_rug_max_dev_sell_pct = 25.0;
            }
            other => return Err(Error::UnknownPreset(other.to_string())),
        }
        // Presets are built from trusted values but validate anyway
        policy.validate().map_err(|e| Error::Policy(e.to_string()))?;
        Ok(policy)
    }

    /// Validate policy values before activation
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.execution.buy_amount_sol <= 0.0 && self.execution.buy_amount_usdc <= 0.0 {
            anyhow::bail!("one of buy_amount_sol or buy_amount_usdc must be positive");
        }

        if self.execution.slippage_bps < 100 || self.execution.slippage_bps > 5000 {
            anyhow::bail!(
                "slippage_bps must be between 100 (1%) and 5000 (50%), got {}",
                self.execution.slippage_bps
            );
        }

        if self.exit.take_profit_pct <= 0.0 {
            anyhow::bail!("take_profit_pct must be positive");
        }

        if self.exit.stop_loss_pct <= 0.0 || self.exit.stop_loss_pct > 100.0 {
            anyhow::bail!("stop_loss_pct must be in (0, 100]");
        }

        if self.exit.trailing_stop_enabled
            && (self.exit.trailing_stop_pct <= 0.0 || self.exit.trailing_stop_pct >= 100.0)
        {
            anyhow::bail!("trailing_stop_pct must be in (0, 100)");
        }

        if self.exit.sell_percent_on_trigger <= 0.0 || self.exit.sell_percent_on_trigger > 100.0 {
            anyhow::bail!("sell_percent_on_trigger must be in (0, 100]");
        }

        if self.safety.max_concurrent_snipes < 1 {
            anyhow::bail!("max_concurrent_snipes must be at least 1");
        }

        if self.safety.daily_budget_sol <= 0.0 {
            anyhow::bail!("daily_budget_sol must be positive");
        }

        if self.safety.max_snipe_sol <= 0.0 {
            anyhow::bail!("max_snipe_sol must be positive");
        }

        if self.targeting.target_venues.is_empty() {
            anyhow::bail!("target_venues must not be empty");
        }

        if self.advanced.anti_rug_enabled {
            if self.advanced.anti_rug_max_dev_sell_pct <= 0.0
                || self.advanced.anti_rug_max_dev_sell_pct > 100.0
            {
                anyhow::bail!("anti_rug_max_dev_sell_pct must be in (0, 100]");
            }
            if self.advanced.anti_rug_min_liquidity_pct < 0.0
                || self.advanced.anti_rug_min_liquidity_pct >= 100.0
            {
                anyhow::bail!("anti_rug_min_liquidity_pct must be in [0, 100)");
            }
        }

        if self.monitoring.enabled {
            if self.monitoring.window_secs == 0 && self.monitoring.window_blocks == 0 {
                anyhow::bail!("monitoring window must be non-zero in seconds or blocks");
            }
            if self.monitoring.poll_interval_ms == 0 {
                anyhow::bail!("poll_interval_ms must be positive");
            }
        }

        if self.timing.min_block_delay > self.timing.max_block_delay {
            anyhow::bail!("min_block_delay cannot exceed max_block_delay");
        }

        // Blacklist entries must at least look like addresses
        for addr in self
            .safety
            .token_blacklist
            .iter()
            .chain(self.safety.creator_blacklist.iter())
        {
            if addr.len() < 32 || addr.len() > 44 {
                anyhow::bail!("Invalid blacklist address: {}", addr);
            }
        }

        Ok(())
    }

    /// Get masked policy summary for display
    pub fn masked_display(&self) -> String {
        format!(
            r#"Policy:
  enabled: {}
  Execution:
    buy_amount: {} SOL / {} USDC
    slippage: {}bps
  Entry:
    liquidity: {}..{} USD
    holders: {}..{}
    dev_holding: {}%..{}%
    require_social: {} / website: {} / verified: {}
  Exit:
    auto_sell: {}
    take_profit: {}%
    stop_loss: {}%
    trailing_stop: {} ({}%)
    time_box: {} blocks / {}s
    sell_on_dev_sell: {}
  Safety:
    max_concurrent: {}
    daily_budget: {} SOL
    max_snipe: {} SOL
    cooldown: {}s
    emergency_stop: {}
  Targeting:
    venues: {:?}
  Anti-rug:
    enabled: {} (dev_sell>{}%, liquidity<{}% of peak)
"#,
            self.enabled,
            self.execution.buy_amount_sol,
            self.execution.buy_amount_usdc,
            self.execution.slippage_bps,
            self.entry.min_liquidity_usd,
            display_bound(self.entry.max_liquidity_usd),
            self.entry.min_holder_count,
            display_bound_u32(self.entry.max_holder_count),
            self.entry.min_dev_holding_pct,
            self.entry.max_dev_holding_pct,
            self.entry.require_social_links,
            self.entry.require_website,
            self.entry.require_verified_creator,
            self.exit.auto_sell_enabled,
            self.exit.take_profit_pct,
            self.exit.stop_loss_pct,
            self.exit.trailing_stop_enabled,
            self.exit.trailing_stop_pct,
            self.exit.sell_after_blocks,
            self.exit.sell_after_seconds,
            self.exit.sell_on_dev_sell,
            self.safety.max_concurrent_snipes,
            self.safety.daily_budget_sol,
            self.safety.max_snipe_sol,
            self.safety.cooldown_secs,
            self.safety.emergency_stop,
            self.targeting.target_venues,
            self.advanced.anti_rug_enabled,
            self.advanced.anti_rug_max_dev_sell_pct,
            self.advanced.anti_rug_min_liquidity_pct,
        )
    }
}

fn display_bound(v: f64) -> String {
    if v == f64::MAX {
        "inf".into()
    } else {
        v.to_string()
    }
}

fn display_bound_u32(v: u32) -> String {
    if v == u32::MAX {
        "inf".into()
    } else {
        v.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_validates() {
        let policy = Policy::default();
        assert!(policy.validate().is_ok());
        assert_eq!(policy.execution.slippage_bps, 2500);
        assert_eq!(policy.safety.max_concurrent_snipes, 3);
    }

    #[test]
    fn test_rejects_zero_buy_amounts() {
        let mut policy = Policy::default();
        policy.execution.buy_amount_sol = 0.0;
        policy.execution.buy_amount_usdc = 0.0;
        assert!(policy.validate().is_err());

        policy.execution.buy_amount_usdc = 10.0;
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_rejects_slippage_out_of_range() {
        let mut policy = Policy::default();
        policy.execution.slippage_bps = 50;
        assert!(policy.validate().is_err());

        policy.execution.slippage_bps = 5001;
        assert!(policy.validate().is_err());

        policy.execution.slippage_bps = 100;
        assert!(policy.validate().is_ok());

        policy.execution.slippage_bps = 5000;
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_rejects_stop_loss_out_of_range() {
        let mut policy = Policy::default();
        policy.exit.stop_loss_pct = 0.0;
        assert!(policy.validate().is_err());

        policy.exit.stop_loss_pct = 100.5;
        assert!(policy.validate().is_err());

        policy.exit.stop_loss_pct = 100.0;
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_rejects_empty_target_venues() {
        let mut policy = Policy::default();
        policy.targeting.target_venues.clear();
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_daily_budget() {
        let mut policy = Policy::default();
        policy.safety.daily_budget_sol = 0.0;
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_presets() {
        let aggressive = Policy::preset("aggressive").unwrap();
        let conservative = Policy::preset("conservative").unwrap();

        assert!(aggressive.execution.buy_amount_sol > conservative.execution.buy_amount_sol);
        assert!(aggressive.safety.max_concurrent_snipes > conservative.safety.max_concurrent_snipes);
        assert!(conservative.entry.require_social_links);

        assert!(matches!(
            Policy::preset("yolo"),
            Err(Error::UnknownPreset(_))
        ));
    }

    #[test]
    fn test_preset_merges_over_defaults() {
        let preset = Policy::preset("aggressive").unwrap();
        // Untouched fields keep their defaults
        assert_eq!(preset.execution.priority_fee_lamports, 100_000);
        assert!(preset.exit.sell_on_dev_sell);
    }
}
