// ⏰ Temporal Differencer - LQ change between two independent snapshots
//
// Each year is computed against its own region profile; this stage only
// lines the two snapshots up by tract and subtracts.
//
//   delta[c] = current[c] - baseline[c]     (undefined if either side is)

use crate::error::{PipelineError, Result};
use crate::join::{JoinStage, JoinStats};
use crate::records::{ByCategory, GeoId, LocationQuotientRecord, LqChangeRecord, YearPair};
use std::collections::HashMap;
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeOutput {
    pub years: YearPair,
    /// In the order of the current-year input
    pub records: Vec<LqChangeRecord>,
    pub join: JoinStats,
}

/// Inner join current ⋈ baseline on tract id and difference every category
///
/// Tracts present in only one year are dropped; `join` says how many.
pub fn difference(current: &[LocationQuotientRecord], baseline: &[LocationQuotientRecord]) -> Result<ChangeOutput> {
    let years = YearPair {
        baseline: single_year(baseline, "baseline")?,
        current: single_year(current, "current")?,
    };

    let baseline_by_tract: HashMap<&GeoId, &LocationQuotientRecord> =
        baseline.iter().map(|r| (&r.tract_id, r)).collect();

    let records: Vec<LqChangeRecord> = current
        .iter()
        .filter_map(|cur| {
            let base = baseline_by_tract.get(&cur.tract_id)?;
            Some(LqChangeRecord {
                tract_id: cur.tract_id.clone(),
                years,
                counts: cur.counts,
                current: cur.lq,
                baseline: base.lq,
                delta: ByCategory::from_fn(|c| match (cur.lq.get(c), base.lq.get(c)) {
                    (Some(now), Some(then)) => Some(now - then),
                    _ => None,
                }),
            })
        })
        .collect();

    let join = JoinStats::new(
        JoinStage::YearAlignment {
            baseline: years.baseline,
            current: years.current,
        },
        current.len(),
        baseline.len(),
        records.len(),
        records.len(),
    );

    info!(
        baseline = years.baseline,
        current = years.current,
        tracts = records.len(),
        "location quotient change computed"
    );

    Ok(ChangeOutput { years, records, join })
}

/// Every record of a snapshot must come from the same year
fn single_year(records: &[LocationQuotientRecord], side: &str) -> Result<u16> {
    let Some(first) = records.first() else {
        return Err(PipelineError::DataIntegrity(format!("{} snapshot has no tracts", side)));
    };

    if let Some(other) = records.iter().find(|r| r.year != first.year) {
        return Err(PipelineError::DataIntegrity(format!(
            "{} snapshot mixes years {} and {}",
            side, first.year, other.year
        )));
    }

    Ok(first.year)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{CategoryCounts, Quotient};

    fn lq(id: &str, year: u16, values: [Quotient; 4]) -> LocationQuotientRecord {
        LocationQuotientRecord {
            tract_id: GeoId::parse(id).unwrap(),
            year,
            counts: CategoryCounts {
                makers: 1,
                services: 1,
                professions: 1,
                support: 1,
            },
            lq: ByCategory {
                makers: values[0],
                services: values[1],
                professions: values[2],
                support: values[3],
            },
        }
    }

    #[test]
    fn test_delta_per_category() {
        let current = vec![lq("T1", 2015, [Some(1.5), Some(0.5), Some(1.0), Some(2.0)])];
        let baseline = vec![lq("T1", 2002, [Some(1.0), Some(1.0), Some(1.0), Some(0.5)])];

        let out = difference(&current, &baseline).unwrap();
        let r = &out.records[0];

        assert_eq!(out.years, YearPair { baseline: 2002, current: 2015 });
        assert_eq!(r.delta.makers, Some(0.5));
        assert_eq!(r.delta.services, Some(-0.5));
        assert_eq!(r.delta.professions, Some(0.0));
        assert_eq!(r.delta.support, Some(1.5));
        assert_eq!(r.current.makers, Some(1.5));
        assert_eq!(r.baseline.makers, Some(1.0));
        assert!(out.join.is_lossless());
    }

    #[test]
    fn test_undefined_propagates() {
        let current = vec![lq("T1", 2015, [None, Some(1.0), Some(1.0), Some(1.0)])];
        let baseline = vec![lq("T1", 2002, [Some(1.0), None, Some(1.0), Some(1.0)])];

        let r = &difference(&current, &baseline).unwrap().records[0];

        assert_eq!(r.delta.makers, None);
        assert_eq!(r.delta.services, None);
        assert_eq!(r.delta.professions, Some(0.0));
    }

    #[test]
    fn test_tracts_in_one_year_only_are_dropped() {
        let current = vec![
            lq("T1", 2015, [Some(1.0); 4]),
            lq("T2", 2015, [Some(1.0); 4]),
            lq("NEW", 2015, [Some(1.0); 4]),
        ];
        let baseline = vec![
            lq("T1", 2002, [Some(1.0); 4]),
            lq("T2", 2002, [Some(1.0); 4]),
            lq("GONE", 2002, [Some(1.0); 4]),
        ];

        let out = difference(&current, &baseline).unwrap();

        assert_eq!(out.records.len(), 2);
        assert_eq!(out.join.dropped_left, 1);
        assert_eq!(out.join.dropped_right, 1);
        assert!(out.records.iter().all(|r| r.tract_id.as_str() != "NEW"));
    }

    #[test]
    fn test_antisymmetric() {
        let a = vec![lq("T1", 2015, [Some(1.3), Some(0.7), None, Some(0.1)])];
        let b = vec![lq("T1", 2002, [Some(0.9), Some(1.1), Some(1.0), Some(0.4)])];

        let ab = &difference(&a, &b).unwrap().records[0];
        let ba = &difference(&b, &a).unwrap().records[0];

        for (category, delta) in ab.delta.iter() {
            assert_eq!(delta.map(|d| -d), ba.delta.get(category));
        }
    }

    #[test]
    fn test_mixed_years_rejected() {
        let current = vec![lq("T1", 2015, [Some(1.0); 4]), lq("T2", 2014, [Some(1.0); 4])];
        let baseline = vec![lq("T1", 2002, [Some(1.0); 4])];

        assert!(difference(&current, &baseline).is_err());
    }
}
