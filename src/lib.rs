//! New-pool detection and auto-sell risk engine
//!
//! Classifies venue log batches into pool-creation events, filters
//! candidates against an entry policy, admits buys under hard safety
//! budgets, and manages open positions with exit triggers and post-entry
//! sniper monitoring.

pub mod cli;
pub mod engine;
pub mod error;
pub mod events;
pub mod filter;
pub mod gateway;
pub mod ledger;
pub mod monitor;
pub mod policy;
pub mod triggers;
pub mod venue;

// Re-export commonly used types
pub use engine::{IngestOutcome, SnipeEngine};
pub use error::{Error, Result};
pub use policy::Policy;
