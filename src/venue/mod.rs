//! Venue vocabularies for log classification
//!
//! Each venue (launch program) has its own instruction-marker vocabulary and
//! deny-list, but all venues share the classifier algorithm in
//! [`classifier`]. Specs are plain serde data so new venues can be added from
//! a JSON file without code changes.

pub mod classifier;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::error::{Error, Result};

/// A known quote asset for a venue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteAsset {
    pub symbol: String,
    pub mint: String,
}

/// Classification vocabulary for one venue program
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueSpec {
    /// Venue name, referenced by `Policy::targeting::target_venues`
    pub name: String,
    /// The venue program address
    pub program_id: String,
    /// Log-line substrings marking a pool-create/initialize instruction
    pub create_markers: Vec<String>,
    /// Log-line substrings marking successful program execution
    pub success_markers: Vec<String>,
    /// Known infrastructure/program/system addresses that can never be the
    /// new asset (sysvars, routers, token programs, quote mints, ...)
    #[serde(default)]
    pub deny_list: Vec<String>,
    /// Quote assets recognized for this venue
    pub quote_assets: Vec<QuoteAsset>,
    /// Symbol of the quote asset assumed when no quote mint appears in logs
    pub primary_quote: String,
}

impl VenueSpec {
    /// Check whether an address is denied as an asset candidate.
    /// The venue program itself and all quote mints are always denied.
    pub fn denies(&self, address: &str) -> bool {
        address == self.program_id
            || self.quote_assets.iter().any(|q| q.mint == address)
            || self.deny_list.iter().any(|d| d == address)
    }

    /// The primary quote asset mint for this venue
    pub fn primary_quote_mint(&self) -> &str {
        self.quote_assets
            .iter()
            .find(|q| q.symbol == self.primary_quote)
            .map(|q| q.mint.as_str())
            .unwrap_or_default()
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidVenueSpec("empty venue name".into()));
        }
        if self.program_id.len() < 32 || self.program_id.len() > 44 {
            return Err(Error::InvalidVenueSpec(format!(
                "{}: invalid program_id {}",
                self.name, self.program_id
            )));
        }
        if self.create_markers.is_empty() {
            return Err(Error::InvalidVenueSpec(format!(
                "{}: no create markers",
                self.name
            )));
        }
        if self.success_markers.is_empty() {
            return Err(Error::InvalidVenueSpec(format!(
                "{}: no success markers",
                self.name
            )));
        }
        if !self
            .quote_assets
            .iter()
            .any(|q| q.symbol == self.primary_quote)
        {
            return Err(Error::InvalidVenueSpec(format!(
                "{}: primary_quote {} not in quote_assets",
                self.name, self.primary_quote
            )));
        }
        Ok(())
    }
}

/// Well-known infrastructure addresses shared by every built-in venue
const COMMON_DENY_LIST: &[&str] = &[
    // System + token programs
    "11111111111111111111111111111111",
    "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA",
    "ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL",
    "ComputeBudget111111111111111111111111111111",
    // Metadata program
    "metaqbxxUerdq28cj1RbAWkYQm3ybzjb6a8bt518x1s",
    // Sysvars
    "SysvarRent111111111111111111111111111111111",
    "SysvarC1ock11111111111111111111111111111111",
    // DEX/router programs that show up in the same transactions
    "675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8",
    "5Q544fKrFoe6tsEbD7S8EmxGTJYAKtTVhAW5Q5pge4j1",
    "srmqPvymJeFKQ4zGQed1GFppgkRHL9kaELCbyksJtPX",
    "JUP6LkbZbjS1jKKwapdHNy74zcZ3tLUZoi5QNyVTaV4",
    // Pump.fun bonding curve program
    "6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P",
    // Quote mints
    "So11111111111111111111111111111111111111112",
    "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v",
    "Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB",
];

fn common_deny_list() -> Vec<String> {
    COMMON_DENY_LIST.iter().map(|s| s.to_string()).collect()
}

fn sol_usdc_quotes() -> Vec<QuoteAsset> {
    vec![
        QuoteAsset {
            symbol: "SOL".into(),
            mint: "So11111111111111111111111111111111111111112".into(),
        },
        QuoteAsset {
            symbol: "USDC".into(),
            mint: "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v".into(),
        },
        QuoteAsset {
            symbol: "USDT".into(),
            mint: "Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB".into(),
        },
    ]
}

/// Built-in pump.fun bonding curve vocabulary
pub fn pumpfun_spec() -> VenueSpec {
    VenueSpec {
        name: "pumpfun".into(),
        program_id: "6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P".into(),
        create_markers: vec![
            "Instruction: Create".into(),
            "Instruction: InitializeMint2".into(),
        ],
        success_markers: vec![
            "Program 6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P success".into(),
        ],
        deny_list: common_deny_list(),
        quote_assets: sol_usdc_quotes(),
        primary_quote: "SOL".into(),
    }
}

/// Built-in Raydium AMM v4 vocabulary (the second event grammar)
pub fn raydium_spec() -> VenueSpec {
    VenueSpec {
        name: "raydium".into(),
        program_id: "675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8".into(),
        create_markers: vec![
            "Instruction: Initialize2".into(),
            "initialize2: InitializeInstruction2".into(),
            "init_pc_amount".into(),
        ],
        success_markers: vec![
            "Program 675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8 success".into(),
        ],
        deny_list: common_deny_list(),
        quote_assets: sol_usdc_quotes(),
        primary_quote: "SOL".into(),
    }
}

/// Registry of venue specs keyed by name
#[derive(Debug, Clone)]
pub struct VenueRegistry {
    specs: HashMap<String, Arc<VenueSpec>>,
}

impl VenueRegistry {
    /// Registry preloaded with the built-in venues
    pub fn builtin() -> Self {
        let mut specs = HashMap::new();
        for spec in [pumpfun_spec(), raydium_spec()] {
            specs.insert(spec.name.clone(), Arc::new(spec));
        }
        Self { specs }
    }

    /// Empty registry
    pub fn empty() -> Self {
        Self {
            specs: HashMap::new(),
        }
    }

    /// Register (or override) a venue spec
    pub fn register(&mut self, spec: VenueSpec) -> Result<()> {
        spec.validate()?;
        self.specs.insert(spec.name.clone(), Arc::new(spec));
        Ok(())
    }

    /// Load specs from a JSON file and merge them over the current set
    pub async fn load_file<P: AsRef<Path>>(&mut self, path: P) -> Result<usize> {
        let data = tokio::fs::read_to_string(path.as_ref()).await?;
        let specs: Vec<VenueSpec> = serde_json::from_str(&data)?;
        let count = specs.len();
        for spec in specs {
            info!(venue = %spec.name, "Loaded venue spec from file");
            self.register(spec)?;
        }
        Ok(count)
    }

    pub fn get(&self, name: &str) -> Result<Arc<VenueSpec>> {
        self.specs
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownVenue(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.specs.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

impl Default for VenueRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builtin_registry() {
        let registry = VenueRegistry::builtin();
        assert_eq!(registry.names(), vec!["pumpfun", "raydium"]);

        let pump = registry.get("pumpfun").unwrap();
        assert!(pump.denies(&pump.program_id));
        assert!(pump.denies("So11111111111111111111111111111111111111112"));
        assert!(!pump.denies("7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgHkv"));
    }

    #[test]
    fn test_unknown_venue() {
        let registry = VenueRegistry::builtin();
        assert!(matches!(
            registry.get("meteora"),
            Err(Error::UnknownVenue(_))
        ));
    }

    #[test]
    fn test_primary_quote_mint() {
        let spec = pumpfun_spec();
        assert_eq!(
            spec.primary_quote_mint(),
            "So11111111111111111111111111111111111111112"
        );
    }

    #[test]
    fn test_spec_validation() {
        let mut registry = VenueRegistry::empty();

        let mut spec = pumpfun_spec();
        spec.create_markers.clear();
        assert!(registry.register(spec).is_err());

        let mut spec = pumpfun_spec();
        spec.primary_quote = "BTC".into();
        assert!(registry.register(spec).is_err());

        assert!(registry.register(pumpfun_spec()).is_ok());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_load_file_overrides_builtin() {
        let mut spec = pumpfun_spec();
        spec.create_markers.push("Instruction: CreateV2".into());
        let json = serde_json::to_string(&vec![spec]).unwrap();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let mut registry = VenueRegistry::builtin();
        let count = registry.load_file(file.path()).await.unwrap();
        assert_eq!(count, 1);
        assert_eq!(registry.len(), 2);

        let pump = registry.get("pumpfun").unwrap();
        assert!(pump
            .create_markers
            .iter()
            .any(|m| m == "Instruction: CreateV2"));
    }
}
