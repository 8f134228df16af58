// ⚖️ Category Aggregator - 20 raw sectors → 4 categories → tract totals
//
// Following the reconciliation formula:
//   C000 = makers + services + professions + support   (for every block)
//
// If that does not hold, every downstream ratio is wrong, so the run stops
// here instead of producing a plausible-looking map.

use crate::crosswalk::Crosswalk;
use crate::error::{PipelineError, Result};
use crate::join::{JoinStage, JoinStats};
use crate::records::{AggregatedTractRecord, BlockRecord, CategoryCounts, GeoId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::info;

/// How many offending block ids an integrity error lists
const MAX_REPORTED_BLOCKS: usize = 5;

// ============================================================================
// RECONCILIATION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub blocks_checked: usize,
    pub mismatched_blocks: usize,
    /// Sum over blocks of (C000 - aggregated total)
    pub net_discrepancy: i128,
    /// First few offending block ids
    pub examples: Vec<GeoId>,
}

impl ReconciliationReport {
    pub fn is_balanced(&self) -> bool {
        self.mismatched_blocks == 0
    }

    pub fn summary(&self) -> String {
        format!(
            "{} blocks checked, {} mismatched, net discrepancy {}",
            self.blocks_checked, self.mismatched_blocks, self.net_discrepancy
        )
    }
}

/// Compare each block's stated total with its aggregated categories
pub fn reconcile(blocks: &[BlockRecord]) -> ReconciliationReport {
    let mut mismatched_blocks = 0;
    let mut net_discrepancy = 0i128;
    let mut examples = Vec::new();

    for block in blocks {
        let diff = block.discrepancy();
        if diff != 0 {
            mismatched_blocks += 1;
            net_discrepancy += diff;
            if examples.len() < MAX_REPORTED_BLOCKS {
                examples.push(block.block_id.clone());
            }
        }
    }

    ReconciliationReport {
        blocks_checked: blocks.len(),
        mismatched_blocks,
        net_discrepancy,
        examples,
    }
}

/// Reconcile and turn any mismatch into a fatal error
pub fn ensure_reconciled(year: u16, blocks: &[BlockRecord]) -> Result<ReconciliationReport> {
    let report = reconcile(blocks);
    if report.is_balanced() {
        return Ok(report);
    }

    let ids: Vec<String> = report.examples.iter().map(|id| id.to_string()).collect();
    Err(PipelineError::DataIntegrity(format!(
        "{}: category sums do not match C000 for {} of {} blocks (net discrepancy {}); e.g. {}",
        year,
        report.mismatched_blocks,
        report.blocks_checked,
        report.net_discrepancy,
        ids.join(", ")
    )))
}

// ============================================================================
// TRACT AGGREGATION
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct AggregationOutput {
    pub year: u16,
    /// Sorted by tract id; tracts with no matched block are absent
    pub tracts: Vec<AggregatedTractRecord>,
    pub join: JoinStats,
    pub reconciliation: ReconciliationReport,
}

/// Reconcile, inner-join blocks to the crosswalk, sum per tract
///
/// Blocks without a crosswalk entry are dropped and counted in `join`.
pub fn aggregate_tracts(year: u16, blocks: &[BlockRecord], crosswalk: &Crosswalk) -> Result<AggregationOutput> {
    let reconciliation = ensure_reconciled(year, blocks)?;
    ensure_unique_blocks(year, blocks)?;

    let mut by_tract: BTreeMap<GeoId, CategoryCounts> = BTreeMap::new();
    let mut matched = 0usize;

    for block in blocks {
        let Some(tract_id) = crosswalk.tract_for(&block.block_id) else {
            continue;
        };
        matched += 1;

        let entry = by_tract.entry(tract_id.clone()).or_default();
        let sum = block
            .aggregate()
            .and_then(|counts| entry.checked_add(&counts))
            .ok_or_else(|| overflow(year, &format!("tract {}", tract_id)))?;
        *entry = sum;
    }

    // Blocks are unique, so every matched block hit a distinct crosswalk row
    let join = JoinStats::new(JoinStage::BlockToTract { year }, blocks.len(), crosswalk.len(), matched, matched);

    let tracts: Vec<AggregatedTractRecord> = by_tract
        .into_iter()
        .map(|(tract_id, counts)| AggregatedTractRecord { tract_id, counts })
        .collect();

    info!(year, blocks = blocks.len(), matched, tracts = tracts.len(), "aggregated blocks to tracts");

    Ok(AggregationOutput {
        year,
        tracts,
        join,
        reconciliation,
    })
}

fn overflow(year: u16, what: &str) -> PipelineError {
    PipelineError::DataIntegrity(format!("{}: job counts for {} overflow a 64-bit total", year, what))
}

fn ensure_unique_blocks(year: u16, blocks: &[BlockRecord]) -> Result<()> {
    let mut seen = HashSet::with_capacity(blocks.len());
    for block in blocks {
        if !seen.insert(&block.block_id) {
            return Err(PipelineError::DataIntegrity(format!(
                "{}: block {} appears more than once",
                year, block.block_id
            )));
        }
    }
    Ok(())
}

// ============================================================================
// REGION TOTALS
// ============================================================================

/// Region-wide category totals for one year
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearTotals {
    pub year: u16,
    pub counts: CategoryCounts,
}

impl YearTotals {
    pub fn all(&self) -> u64 {
        self.counts.total()
    }

    /// Share of the region's jobs in each category, None with no jobs
    pub fn share(&self, category: crate::records::Category) -> Option<f64> {
        let all = self.all();
        (all > 0).then(|| self.counts.get(category) as f64 / all as f64)
    }
}

/// Sum of every tract in one year's aggregation
pub fn region_totals(output: &AggregationOutput) -> Result<YearTotals> {
    let counts = sum_tracts(&output.tracts).ok_or_else(|| overflow(output.year, "the region"))?;

    Ok(YearTotals {
        year: output.year,
        counts,
    })
}

/// Element-wise sum of tract counts, None on overflow
pub fn sum_tracts(tracts: &[AggregatedTractRecord]) -> Option<CategoryCounts> {
    tracts
        .iter()
        .try_fold(CategoryCounts::default(), |acc, t| acc.checked_add(&t.counts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crosswalk::{filter_crosswalk, BAY_AREA_COUNTIES};
    use crate::records::{Category, CrosswalkEntry, RAW_CATEGORY_COUNT};

    fn block(id: &str, pairs: &[(usize, u64)], total: u64) -> BlockRecord {
        let mut raw = [0u64; RAW_CATEGORY_COUNT];
        for (cns, value) in pairs {
            raw[cns - 1] = *value;
        }
        BlockRecord {
            block_id: GeoId::parse(id).unwrap(),
            raw,
            total_jobs: total,
        }
    }

    fn crosswalk(rows: &[(&str, &str)]) -> Crosswalk {
        let entries: Vec<CrosswalkEntry> = rows
            .iter()
            .map(|(b, t)| CrosswalkEntry {
                block_id: GeoId::parse(b).unwrap(),
                tract_id: GeoId::parse(t).unwrap(),
                county_fips: 6075,
            })
            .collect();
        filter_crosswalk(&entries, &BAY_AREA_COUNTIES).unwrap()
    }

    #[test]
    fn test_two_blocks_one_tract() {
        let blocks = vec![
            block("101", &[(1, 10)], 10),
            block("102", &[(1, 5), (7, 5)], 10),
        ];
        let cw = crosswalk(&[("101", "T1"), ("102", "T1")]);

        let out = aggregate_tracts(2015, &blocks, &cw).unwrap();

        assert_eq!(out.tracts.len(), 1);
        let t = &out.tracts[0];
        assert_eq!(t.tract_id.as_str(), "T1");
        assert_eq!(t.counts.makers, 15);
        assert_eq!(t.counts.services, 5);
        assert_eq!(t.counts.professions, 0);
        assert_eq!(t.counts.support, 0);
        assert_eq!(t.total(), 20);
        assert!(out.join.is_lossless());
    }

    #[test]
    fn test_unmatched_block_is_dropped_and_counted() {
        let blocks = vec![
            block("101", &[(1, 10)], 10),
            block("102", &[(9, 4)], 4),
            block("999", &[(15, 100)], 100), // no crosswalk row
        ];
        let cw = crosswalk(&[("101", "T1"), ("102", "T2")]);

        let out = aggregate_tracts(2015, &blocks, &cw).unwrap();

        assert_eq!(out.tracts.len(), 2);
        assert_eq!(out.join.dropped_left, 1);
        assert_eq!(out.join.matched_rows, 2);
        let grand: u64 = out.tracts.iter().map(|t| t.total()).sum();
        assert_eq!(grand, 14);
        assert!(out.tracts.iter().all(|t| t.counts.support == 0));
    }

    #[test]
    fn test_crosswalk_rows_without_jobs_are_counted_right() {
        let blocks = vec![block("101", &[(1, 1)], 1)];
        let cw = crosswalk(&[("101", "T1"), ("102", "T1"), ("103", "T2")]);

        let out = aggregate_tracts(2002, &blocks, &cw).unwrap();

        assert_eq!(out.join.dropped_right, 2);
        // T2 had no matched block so it is absent, not zero
        assert_eq!(out.tracts.len(), 1);
    }

    #[test]
    fn test_mismatched_total_aborts() {
        let blocks = vec![
            block("101", &[(1, 10)], 10),
            block("102", &[(1, 5)], 6),
        ];
        let cw = crosswalk(&[("101", "T1"), ("102", "T1")]);

        let err = aggregate_tracts(2015, &blocks, &cw).unwrap_err();
        assert!(err.is_data_integrity());
        assert!(err.to_string().contains("102"));
    }

    #[test]
    fn test_offsetting_mismatches_still_abort() {
        // Net discrepancy is zero but two blocks are wrong
        let blocks = vec![
            block("101", &[(1, 10)], 11),
            block("102", &[(1, 10)], 9),
        ];

        let report = reconcile(&blocks);
        assert_eq!(report.net_discrepancy, 0);
        assert_eq!(report.mismatched_blocks, 2);
        assert!(ensure_reconciled(2015, &blocks).is_err());
    }

    #[test]
    fn test_duplicate_block_aborts() {
        let blocks = vec![block("101", &[(1, 1)], 1), block("0101", &[(1, 1)], 1)];
        let cw = crosswalk(&[("101", "T1")]);

        let err = aggregate_tracts(2015, &blocks, &cw).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_tract_overflow_is_integrity_error() {
        let half = u64::MAX / 2 + 1;
        let blocks = vec![block("101", &[(1, half)], half), block("102", &[(7, half)], half)];
        let cw = crosswalk(&[("101", "T1"), ("102", "T1")]);

        let err = aggregate_tracts(2015, &blocks, &cw).unwrap_err();

        assert!(err.is_data_integrity());
        assert!(err.to_string().contains("overflow"));
    }

    #[test]
    fn test_huge_stated_total_is_reported_not_wrapped() {
        let blocks = vec![block("101", &[(1, 1)], u64::MAX)];

        let report = reconcile(&blocks);

        assert_eq!(report.net_discrepancy, i128::from(u64::MAX) - 1);
        assert!(ensure_reconciled(2015, &blocks).is_err());
    }

    #[test]
    fn test_region_totals() {
        let blocks = vec![
            block("101", &[(1, 10)], 10),
            block("102", &[(1, 5), (7, 5)], 10),
            block("103", &[(10, 20)], 20),
        ];
        let cw = crosswalk(&[("101", "T1"), ("102", "T1"), ("103", "T2")]);
        let out = aggregate_tracts(2010, &blocks, &cw).unwrap();

        let totals = region_totals(&out).unwrap();

        assert_eq!(totals.year, 2010);
        assert_eq!(totals.counts.makers, 15);
        assert_eq!(totals.counts.services, 5);
        assert_eq!(totals.counts.professions, 20);
        assert_eq!(totals.all(), 40);
        assert_eq!(totals.share(Category::Professions), Some(0.5));
    }
}
