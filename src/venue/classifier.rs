//! Heuristic log classifier for new-pool detection
//!
//! Takes one batch of raw log lines from a venue-tagged transaction and
//! decides whether it is a genuine pool-creation event. Stateless: every
//! batch is classified on its own, so calls are safe to parallelize.
//!
//! A batch only counts as a creation event when BOTH hold:
//!   1. a line matches one of the venue's create/initialize markers, and
//!   2. a line marks the venue program's execution as successful.
//! Either alone is rejected - failed transactions still log the instruction
//! marker, and unrelated transactions mention the program without creating
//! anything.
//!
//! Asset extraction is heuristic by construction. The fallback tiers below
//! (keyed lines, then program-emitted lines, then the whole batch) mirror
//! how these venues actually log today; if no candidate survives the
//! deny-list, the whole detection is downgraded to "not a new pool".

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, trace};

use crate::venue::VenueSpec;

lazy_static! {
    /// Address-shaped token: base58 alphabet, plausible pubkey length
    static ref ADDRESS_RE: Regex =
        Regex::new(r"[1-9A-HJ-NP-Za-km-z]{32,44}").expect("valid address regex");

    /// Keyed asset lines: `mint: <addr>`, `token=<addr>`, `base_mint: <addr>`...
    static ref KEYED_ASSET_RE: Regex = Regex::new(
        r#"(?i)\b(?:mint|token|base_mint|token_mint|asset|ca)["\s]*[:=]["\s]*([1-9A-HJ-NP-Za-km-z]{32,44})"#
    )
    .expect("valid keyed asset regex");

    /// Keyed creator lines: `creator: <addr>`, `dev=<addr>`, `deployer: <addr>`...
    static ref KEYED_CREATOR_RE: Regex = Regex::new(
        r#"(?i)\b(?:creator|dev|deployer|user|authority|payer)["\s]*[:=]["\s]*([1-9A-HJ-NP-Za-km-z]{32,44})"#
    )
    .expect("valid keyed creator regex");
}

/// Longest run of one repeated character before an address is considered
/// structurally bogus (padding, sysvar-style vanity addresses).
const MAX_REPEAT_RUN: usize = 7;

/// Classifier output for one log batch
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// True only when markers matched AND a valid asset id was resolved
    pub is_new_pool: bool,
    /// The newly created asset mint
    pub asset_id: Option<String>,
    /// Quote asset mint the pool is priced in
    pub quote_asset_id: Option<String>,
    /// Pool creator wallet, best-effort
    pub creator: Option<String>,
}

impl Classification {
    fn not_new_pool() -> Self {
        Self {
            is_new_pool: false,
            asset_id: None,
            quote_asset_id: None,
            creator: None,
        }
    }
}

/// Classify one raw log batch against a venue vocabulary
pub fn classify(spec: &VenueSpec, lines: &[String]) -> Classification {
    let has_create_marker = lines
        .iter()
        .any(|line| spec.create_markers.iter().any(|m| line.contains(m.as_str())));

    let has_success = lines
        .iter()
        .any(|line| spec.success_markers.iter().any(|m| line.contains(m.as_str())));

    // Both conditions are required; either alone is a false positive source
    if !has_create_marker || !has_success {
        trace!(
            venue = %spec.name,
            has_create_marker,
            has_success,
            "Batch rejected before extraction"
        );
        return Classification::not_new_pool();
    }

    let asset_id = match extract_asset(spec, lines) {
        Some(asset) => asset,
        None => {
            // Markers matched but no resolvable asset: downgrade, not error
            debug!(
                venue = %spec.name,
                "Create markers matched but no asset candidate survived"
            );
            return Classification::not_new_pool();
        }
    };

    let quote_asset_id = extract_quote(spec, lines);
    let creator = extract_creator(spec, lines, &asset_id);

    Classification {
        is_new_pool: true,
        asset_id: Some(asset_id),
        quote_asset_id: Some(quote_asset_id),
        creator,
    }
}

/// Extract the new asset id, trying each tier in priority order
fn extract_asset(spec: &VenueSpec, lines: &[String]) -> Option<String> {
    // Tier 1: explicit keyed lines (`mint: <addr>`)
    for line in lines {
        for cap in KEYED_ASSET_RE.captures_iter(line) {
            let candidate = &cap[1];
            if is_valid_candidate(spec, candidate) {
                trace!(candidate, "Asset resolved from keyed line");
                return Some(candidate.to_string());
            }
        }
    }

    // Tier 2: program-emitted log lines, excluding instruction-marker lines
    for line in lines {
        if !is_program_emitted(line) || is_marker_line(spec, line) {
            continue;
        }
        if let Some(candidate) = first_valid_address(spec, line) {
            trace!(candidate, "Asset resolved from program log line");
            return Some(candidate);
        }
    }

    // Tier 3: last resort, scan the whole batch. Known-fragile: an unrelated
    // account in the same transaction can be picked up here (see DESIGN.md).
    for line in lines {
        if is_marker_line(spec, line) {
            continue;
        }
        if let Some(candidate) = first_valid_address(spec, line) {
            trace!(candidate, "Asset resolved from full-batch scan");
            return Some(candidate);
        }
    }

    None
}

/// Quote asset by substring containment over the venue's known quote mints
fn extract_quote(spec: &VenueSpec, lines: &[String]) -> String {
    for quote in &spec.quote_assets {
        if lines.iter().any(|line| line.contains(quote.mint.as_str())) {
            return quote.mint.clone();
        }
    }
    spec.primary_quote_mint().to_string()
}

/// Best-effort creator extraction from keyed lines; may legitimately be None
fn extract_creator(spec: &VenueSpec, lines: &[String], asset_id: &str) -> Option<String> {
    for line in lines {
        for cap in KEYED_CREATOR_RE.captures_iter(line) {
            let candidate = &cap[1];
            if candidate != asset_id && is_valid_candidate(spec, candidate) {
                return Some(candidate.to_string());
            }
        }
    }
    None
}

/// First address-shaped token in a line that survives validation
fn first_valid_address(spec: &VenueSpec, line: &str) -> Option<String> {
    ADDRESS_RE
        .find_iter(line)
        .map(|m| m.as_str())
        .find(|candidate| is_valid_candidate(spec, candidate))
        .map(|s| s.to_string())
}

/// A candidate is valid when it is structurally a pubkey and not denied
fn is_valid_candidate(spec: &VenueSpec, candidate: &str) -> bool {
    is_address_shaped(candidate) && !spec.denies(candidate)
}

/// Structural check: decodes to exactly 32 bytes, no long repeated runs
fn is_address_shaped(candidate: &str) -> bool {
    if candidate.len() < 32 || candidate.len() > 44 {
        return false;
    }

    if longest_repeat_run(candidate) > MAX_REPEAT_RUN {
        return false;
    }

    match bs58::decode(candidate).into_vec() {
        Ok(bytes) => bytes.len() == 32,
        Err(_) => false,
    }
}

fn longest_repeat_run(s: &str) -> usize {
    let mut longest = 0;
    let mut current = 0;
    let mut prev = None;
    for c in s.chars() {
        if Some(c) == prev {
            current += 1;
        } else {
            current = 1;
            prev = Some(c);
        }
        longest = longest.max(current);
    }
    longest
}

/// Lines emitted by a program rather than by the runtime itself
fn is_program_emitted(line: &str) -> bool {
    line.contains("Program log:") || line.contains("Program data:")
}

/// Lines carrying an instruction marker (excluded from address scanning so
/// the marker text itself is never misread as data)
fn is_marker_line(spec: &VenueSpec, line: &str) -> bool {
    spec.create_markers.iter().any(|m| line.contains(m.as_str()))
}
