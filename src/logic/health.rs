use super::types::{HealthReport, MinerId, Query};
use crate::utils::constants::{DAY_SECONDS, HISTORY_START_TIMESTAMP};
use std::collections::BTreeMap;

/// History older than this many days earns no recency credit.
const RECENCY_HORIZON_DAYS: u64 = 10;

const AMOUNT_WEIGHT: f64 = 0.6;
const RECENCY_WEIGHT: f64 = 0.4;

/// Miners split by whether their synced history can answer `query`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MinerSelection {
    pub healthy: Vec<MinerId>,
    /// Miners that reported a history ending before the query, or did not report at all.
    pub excluded: Vec<MinerId>,
    /// Health score in [0, 1] of every miner that reported.
    pub scores: BTreeMap<MinerId, f64>,
}

/// Keep the miners whose report covers `query`.
///
/// `reports` holds one entry per checked miner, `None` for a miner that failed the check.
pub fn select_healthy(query: &Query, reports: &BTreeMap<MinerId, Option<HealthReport>>, now: u64) -> MinerSelection {
    let reported: BTreeMap<MinerId, HealthReport> =
        reports.iter().filter_map(|(miner, report)| report.map(|report| (*miner, report))).collect();

    let mut selection = MinerSelection { scores: health_scores(&reported, now), ..Default::default() };
    for (miner, report) in reports {
        match report {
            Some(report) if report.covers(query) => selection.healthy.push(*miner),
            _ => selection.excluded.push(*miner),
        }
    }
    selection
}

/// Score each report on how much history it holds relative to the best reporter (60%) and on
/// how close its sync point is to `now` (40%, falling to zero over ten days).
pub fn health_scores(reports: &BTreeMap<MinerId, HealthReport>, now: u64) -> BTreeMap<MinerId, f64> {
    let span = |report: &HealthReport| report.completed_until.saturating_sub(HISTORY_START_TIMESTAMP) as f64;
    let Some(longest) = reports.values().map(span).reduce(f64::max) else {
        return BTreeMap::new();
    };

    let horizon = (RECENCY_HORIZON_DAYS * DAY_SECONDS) as f64;
    reports
        .iter()
        .map(|(miner, report)| {
            let amount = if longest > 0.0 { span(report) / longest } else { 1.0 };
            let lag = now.saturating_sub(report.completed_until) as f64;
            let recency = ((horizon - lag) / horizon).clamp(0.0, 1.0);
            (*miner, (amount * AMOUNT_WEIGHT + recency * RECENCY_WEIGHT).clamp(0.0, 1.0))
        })
        .collect()
}
