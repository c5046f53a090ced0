//! Entry filter pipeline
//!
//! Evaluates a classified new-pool candidate against the policy's entry
//! filters. Every configured filter is evaluated and recorded even after one
//! fails - the trace must stay complete for audit, so short-circuiting is
//! deliberately not done here.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::events::NewPoolEvent;
use crate::policy::EntryFilters;

/// Outcome of one filter check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterCheck {
    pub filter_name: String,
    pub passed: bool,
    /// Observed value, stringified for the trace
    pub observed: String,
    /// Threshold the value was compared against
    pub threshold: String,
}

/// Complete pipeline verdict: overall pass plus the per-filter trace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterVerdict {
    pub passed: bool,
    pub trace: Vec<FilterCheck>,
}

impl FilterVerdict {
    /// Names of the filters that failed, for logging
    pub fn failed_filters(&self) -> Vec<&str> {
        self.trace
            .iter()
            .filter(|c| !c.passed)
            .map(|c| c.filter_name.as_str())
            .collect()
    }
}

/// Evaluate a candidate against the entry filters
pub fn evaluate(event: &NewPoolEvent, filters: &EntryFilters) -> FilterVerdict {
    let mut trace = Vec::with_capacity(8);

    trace.push(range_check(
        "holder_count",
        event.holder_count as f64,
        filters.min_holder_count as f64,
        filters.max_holder_count as f64,
    ));

    trace.push(range_check(
        "dev_holding_pct",
        event.dev_holding_pct,
        filters.min_dev_holding_pct,
        filters.max_dev_holding_pct,
    ));

    trace.push(floor_check(
        "transaction_count",
        event.transaction_count as f64,
        filters.min_transaction_count as f64,
    ));

    trace.push(range_check(
        "liquidity_usd",
        event.initial_liquidity_usd,
        filters.min_liquidity_usd,
        filters.max_liquidity_usd,
    ));

    trace.push(range_check(
        "market_cap_usd",
        event.initial_market_cap_usd,
        filters.min_market_cap_usd,
        filters.max_market_cap_usd,
    ));

    trace.push(presence_check(
        "social_links",
        event.has_social_links,
        filters.require_social_links,
    ));

    trace.push(presence_check(
        "website",
        event.has_website,
        filters.require_website,
    ));

    trace.push(presence_check(
        "verified_creator",
        event.creator_verified,
        filters.require_verified_creator,
    ));

    let passed = trace.iter().all(|c| c.passed);

    if !passed {
        debug!(
            asset = %event.asset_id,
            failed = ?trace.iter().filter(|c| !c.passed).map(|c| c.filter_name.as_str()).collect::<Vec<_>>(),
            "Candidate failed entry filters"
        );
    }

    FilterVerdict { passed, trace }
}

fn range_check(name: &str, observed: f64, min: f64, max: f64) -> FilterCheck {
    FilterCheck {
        filter_name: name.to_string(),
        passed: observed >= min && observed <= max,
        observed: format_num(observed),
        threshold: format!("{}..{}", format_num(min), format_num(max)),
    }
}

fn floor_check(name: &str, observed: f64, min: f64) -> FilterCheck {
    FilterCheck {
        filter_name: name.to_string(),
        passed: observed >= min,
        observed: format_num(observed),
        threshold: format!(">={}", format_num(min)),
    }
}

fn presence_check(name: &str, present: bool, required: bool) -> FilterCheck {
    FilterCheck {
        filter_name: name.to_string(),
        passed: !required || present,
        observed: present.to_string(),
        threshold: if required {
            "required".into()
        } else {
            "optional".into()
        },
    }
}

fn format_num(v: f64) -> String {
    if v == f64::MAX {
        "inf".into()
    } else if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{:.2}", v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn test_event() -> NewPoolEvent {
        NewPoolEvent {
            venue: "pumpfun".into(),
            asset_id: "mint".into(),
            quote_asset_id: "quote".into(),
            creator: Some("creator".into()),
            creation_block: 1,
            creation_timestamp: Utc::now(),
            creation_tx_ref: "sig".into(),
            initial_liquidity_usd: 10_000.0,
            initial_market_cap_usd: 50_000.0,
            holder_count: 25,
            dev_holding_pct: 8.0,
            transaction_count: 40,
            has_website: true,
            has_social_links: true,
            creator_verified: false,
            verdict: None,
        }
    }

    #[test]
    fn test_default_filters_pass() {
        let verdict = evaluate(&test_event(), &EntryFilters::default());
        assert!(verdict.passed);
        assert_eq!(verdict.trace.len(), 8);
        assert!(verdict.trace.iter().all(|c| c.passed));
    }

    #[test]
    fn test_failed_filter_rejects() {
        let mut filters = EntryFilters::default();
        filters.min_liquidity_usd = 20_000.0;

        let verdict = evaluate(&test_event(), &filters);
        assert!(!verdict.passed);
        assert_eq!(verdict.failed_filters(), vec!["liquidity_usd"]);
    }

    #[test]
    fn test_trace_is_complete_after_failure() {
        // Two failing filters: the trace must still carry all checks
        let mut filters = EntryFilters::default();
        filters.min_holder_count = 100;
        filters.max_dev_holding_pct = 5.0;

        let verdict = evaluate(&test_event(), &filters);
        assert!(!verdict.passed);
        assert_eq!(verdict.trace.len(), 8);
        assert_eq!(
            verdict.failed_filters(),
            vec!["holder_count", "dev_holding_pct"]
        );
    }

    #[test]
    fn test_presence_filters() {
        let mut filters = EntryFilters::default();
        filters.require_verified_creator = true;

        let verdict = evaluate(&test_event(), &filters);
        assert!(!verdict.passed);
        assert_eq!(verdict.failed_filters(), vec!["verified_creator"]);

        // Not required means the check passes regardless
        filters.require_verified_creator = false;
        assert!(evaluate(&test_event(), &filters).passed);
    }

    #[test]
    fn test_verdict_survives_serde() {
        // The verdict travels inside NewPoolEvent, which is deserializable
        let verdict = evaluate(&test_event(), &EntryFilters::default());
        let json = serde_json::to_string(&verdict).unwrap();
        let back: FilterVerdict = serde_json::from_str(&json).unwrap();
        assert!(back.passed);
        assert_eq!(back.trace.len(), verdict.trace.len());
        assert_eq!(back.trace[0].filter_name, "holder_count");
    }

    #[test]
    fn test_trace_records_observed_and_threshold() {
        let mut filters = EntryFilters::default();
        filters.min_transaction_count = 50;

        let verdict = evaluate(&test_event(), &filters);
        let check = verdict
            .trace
            .iter()
            .find(|c| c.filter_name == "transaction_count")
            .unwrap();
        assert!(!check.passed);
        assert_eq!(check.observed, "40");
        assert_eq!(check.threshold, ">=50");
    }
}
