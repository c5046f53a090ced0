//! Error types for the sniper engine

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the sniper engine
#[derive(Error, Debug)]
pub enum Error {
    // Policy errors - fatal at startup, the engine never activates
    #[error("Policy error: {0}")]
    Policy(String),

    #[error("Unknown policy preset: {0}")]
    UnknownPreset(String),

    // Venue vocabulary errors
    #[error("Unknown venue: {0}")]
    UnknownVenue(String),

    #[error("Invalid venue spec: {0}")]
    InvalidVenueSpec(String),

    // Execution gateway errors
    #[error("Buy failed for {asset}: {reason}")]
    BuyFailed { asset: String, reason: String },

    #[error("Sell failed for {asset}: {reason}")]
    SellFailed { asset: String, reason: String },

    #[error("Gateway timeout after {0}ms")]
    GatewayTimeout(u64),

    // Snipe ledger errors
    #[error("Snipe not found: {0}")]
    SnipeNotFound(String),

    // Safety limit errors
    #[error("Emergency stop engaged")]
    EmergencyStop,

    #[error("Max concurrent snipes reached: {current}/{max}")]
    MaxConcurrentReached { current: usize, max: usize },

    #[error("Daily budget exhausted: spent {spent}SOL + buy {buy}SOL > budget {budget}SOL")]
    DailyBudgetExhausted { spent: f64, buy: f64, budget: f64 },

    #[error("Max snipe size exceeded: {amount}SOL > max {max}SOL")]
    MaxSnipeSizeExceeded { amount: f64, max: f64 },

    #[error("Cooldown active: {remaining_secs}s remaining")]
    CooldownActive { remaining_secs: u64 },

    #[error("Blacklisted {kind}: {address}")]
    Blacklisted { kind: &'static str, address: String },

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::BuyFailed { .. } | Error::SellFailed { .. } | Error::GatewayTimeout(_)
        )
    }

    /// Check if this error is a safety violation (entry rejected, never retried)
    pub fn is_safety_violation(&self) -> bool {
        matches!(
            self,
            Error::EmergencyStop
                | Error::MaxConcurrentReached { .. }
                | Error::DailyBudgetExhausted { .. }
                | Error::MaxSnipeSizeExceeded { .. }
                | Error::CooldownActive { .. }
                | Error::Blacklisted { .. }
        )
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}
