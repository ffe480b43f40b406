use crate::filter::config::WEIGHT_SCALE;
use crate::filter::rdns::ReverseVerifier;
use crate::filter::types::{BotMap, BotRecord, Verdict};
use crate::filter::window::CountsWindow;
use crate::limits::Limits;

/// Reason stand-in when FCrDNS could not produce a verified hostname.
pub const UNKNOWN_HOST: &str = "UNKNOWN REVERSE DOMAIN NAME";

/// Examines a closed window and records offenders into the bot set.
///
/// Two passes in deterministic address order:
///
/// - **Pass 1 — one-URI abuse**: addresses that hit exactly one distinct
///   target during the window, measured against the one-URI limit. Hammering
///   a single URI is the classic dumb-bot signature and gets the lower bar.
/// - **Pass 2 — total abuse**: every address, measured against the
///   request-count limit. Addresses already in the bot set (including pass-1
///   additions) are skipped.
///
/// A candidate over its limit is only spared when FCrDNS verifies it as a
/// whitelisted search-engine crawler. A verified non-crawler hostname lands
/// in the reason text; an unverified candidate is recorded with
/// [`UNKNOWN_HOST`].
///
/// Returns the newly created records (the bot set is updated in place).
pub fn detect(
    window:   &CountsWindow,
    limits:   &Limits,
    verifier: &dyn ReverseVerifier,
    bots:     &mut BotMap,
    now:      u64,
) -> Vec<BotRecord> {
    let mut added = Vec::new();

    // ── Pass 1: one-URI abuse ────────────────────────────────────────────────

    for (addr, targets) in &window.addr_uri_count {
        if targets.len() != 1 || bots.contains_key(addr) {
            continue;
        }
        let Some(centi) = targets.values().next() else {
            continue;
        };
        let load = centi / WEIGHT_SCALE;
        let country = window_country(window, addr);
        if load <= limits.one_uri.resolve(addr, &country) {
            continue;
        }
        let Some(host) = offender_host(verifier, addr) else {
            continue; // verified crawler
        };
        record(
            bots,
            &mut added,
            addr,
            &country,
            load,
            format!("ONE_URI_COUNT from {host}"),
            limits,
            now,
        );
    }

    // ── Pass 2: total abuse ──────────────────────────────────────────────────

    for (addr, centi) in &window.addr_count {
        if bots.contains_key(addr) {
            continue;
        }
        let load = centi / WEIGHT_SCALE;
        let country = window_country(window, addr);
        if load <= limits.request.resolve(addr, &country) {
            continue;
        }
        let Some(host) = offender_host(verifier, addr) else {
            continue;
        };
        record(
            bots,
            &mut added,
            addr,
            &country,
            load,
            format!("REQUEST_COUNT from {host}"),
            limits,
            now,
        );
    }

    added
}

/// Country code for threshold resolution, upper-cased to match table keys.
fn window_country(window: &CountsWindow, addr: &str) -> String {
    window
        .country
        .get(addr)
        .map(|c| c.to_ascii_uppercase())
        .unwrap_or_default()
}

/// Maps the FCrDNS verdict to the hostname used in the reason text.
/// `None` means the candidate is a whitelisted crawler and must be spared.
fn offender_host(verifier: &dyn ReverseVerifier, addr: &str) -> Option<String> {
    match verifier.verify(addr) {
        Verdict::Whitelisted => None,
        Verdict::VerifiedOther(host) => Some(host),
        Verdict::Unverified => Some(UNKNOWN_HOST.to_string()),
    }
}

#[allow(clippy::too_many_arguments)]
fn record(
    bots:    &mut BotMap,
    added:   &mut Vec<BotRecord>,
    addr:    &str,
    country: &str,
    load:    u64,
    reason:  String,
    limits:  &Limits,
    now:     u64,
) {
    let duration = limits.block.resolve(addr, country);
    let rec = BotRecord {
        addr:        addr.to_string(),
        block_until: now.saturating_add(duration),
        country:     country.to_string(),
        load,
        reason,
    };
    bots.insert(addr.to_string(), rec.clone());
    added.push(rec);
}
