// 📐 Location Quotient Calculator
//
//   region_share[c] = Σ tracts c / Σ tracts total
//   LQ[tract][c]    = (tract[c] / tract[total]) / region_share[c]
//
// LQ = 1 means the tract's mix matches the region, > 1 over-represented,
// < 1 under-represented. Undefined (None) when the tract has no jobs or the
// region has no jobs in that category.

use crate::aggregation::sum_tracts;
use crate::error::{PipelineError, Result};
use crate::records::{AggregatedTractRecord, ByCategory, CategoryCounts, LocationQuotientRecord, Quotient};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Region-wide reference distribution for one year
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionProfile {
    pub year: u16,
    pub totals: CategoryCounts,
    /// Fraction of all region jobs in each category (sums to 1.0)
    pub shares: ByCategory<f64>,
}

impl RegionProfile {
    /// Fails when the region has no jobs at all
    pub fn from_tracts(year: u16, tracts: &[AggregatedTractRecord]) -> Result<Self> {
        let totals = sum_tracts(tracts).ok_or_else(|| {
            PipelineError::DataIntegrity(format!("{}: region job counts overflow a 64-bit total", year))
        })?;

        let all = totals.total();
        if all == 0 {
            return Err(PipelineError::DataIntegrity(format!(
                "{}: region has no jobs across {} tracts, location quotients are undefined",
                year,
                tracts.len()
            )));
        }

        let all = all as f64;
        let shares = totals.map(|count| count as f64 / all);

        Ok(RegionProfile { year, totals, shares })
    }

    /// Location quotient of one tract's counts against this region
    pub fn quotients(&self, counts: &CategoryCounts) -> ByCategory<Quotient> {
        let total = counts.total();
        ByCategory::from_fn(|c| {
            let share = self.shares.get(c);
            if total == 0 || share == 0.0 {
                return None;
            }
            Some(counts.get(c) as f64 / total as f64 / share)
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuotientOutput {
    pub region: RegionProfile,
    /// Same order as the input tracts
    pub records: Vec<LocationQuotientRecord>,
}

/// Location quotients for every tract of one year
pub fn compute_location_quotients(year: u16, tracts: &[AggregatedTractRecord]) -> Result<QuotientOutput> {
    let region = RegionProfile::from_tracts(year, tracts)?;

    for (category, share) in region.shares.iter() {
        debug!(year, %category, share, "region share");
    }

    let records: Vec<LocationQuotientRecord> = tracts
        .iter()
        .map(|t| LocationQuotientRecord {
            tract_id: t.tract_id.clone(),
            year,
            counts: t.counts,
            lq: region.quotients(&t.counts),
        })
        .collect();

    let undefined = records
        .iter()
        .filter(|r| r.lq.iter().any(|(_, q)| q.is_none()))
        .count();
    info!(year, tracts = records.len(), undefined, "location quotients computed");

    Ok(QuotientOutput { region, records })
}
