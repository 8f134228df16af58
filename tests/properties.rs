// Property-based tests for aggregation, quotients, differencing and binning.
// CI: 256 cases (default). Soak: PROPTEST_CASES=10000 cargo test --release

use std::collections::HashMap;

use jobs_lq::{
    aggregate_tracts, compute_location_quotients, difference, filter_crosswalk, qcut, AggregatedTractRecord,
    BlockRecord, Category, CategoryCounts, Crosswalk, CrosswalkEntry, GeoId, LqChangeRecord, QUINTILES,
};
use proptest::prelude::*;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

fn config_256() -> ProptestConfig {
    ProptestConfig {
        cases: std::env::var("PROPTEST_CASES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(256),
        failure_persistence: None,
        ..ProptestConfig::default()
    }
}

const TRACTS: usize = 8;
const COUNTY: u32 = 6001;

// ---------------------------------------------------------------------------
// Generators
// ---------------------------------------------------------------------------

/// Raw sector counts, mostly small, often zero
fn arb_raw() -> impl Strategy<Value = [u64; 20]> {
    prop::array::uniform20(prop_oneof![2 => Just(0u64), 3 => 0u64..500])
}

/// Blocks with a tract index; index == TRACTS means "not in the crosswalk"
fn arb_blocks() -> impl Strategy<Value = Vec<(usize, [u64; 20])>> {
    prop::collection::vec((0..=TRACTS, arb_raw()), 1..60)
}

fn arb_counts() -> impl Strategy<Value = CategoryCounts> {
    (0u64..5_000, 0u64..5_000, 0u64..5_000, 0u64..5_000).prop_map(|(makers, services, professions, support)| {
        CategoryCounts {
            makers,
            services,
            professions,
            support,
        }
    })
}

fn arb_tracts() -> impl Strategy<Value = Vec<AggregatedTractRecord>> {
    prop::collection::vec(arb_counts(), 1..40).prop_map(|counts| {
        counts
            .into_iter()
            .enumerate()
            .map(|(i, counts)| AggregatedTractRecord {
                tract_id: GeoId::parse(&format!("T{}", i)).unwrap(),
                counts,
            })
            .collect()
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn build(blocks: &[(usize, [u64; 20])]) -> (Vec<BlockRecord>, Crosswalk) {
    let records: Vec<BlockRecord> = blocks
        .iter()
        .enumerate()
        .map(|(i, (_, raw))| BlockRecord {
            block_id: GeoId::parse(&format!("B{}", i)).unwrap(),
            raw: *raw,
            total_jobs: raw.iter().sum(),
        })
        .collect();

    let entries: Vec<CrosswalkEntry> = blocks
        .iter()
        .enumerate()
        .filter(|(_, (tract, _))| *tract < TRACTS)
        .map(|(i, (tract, _))| CrosswalkEntry {
            block_id: GeoId::parse(&format!("B{}", i)).unwrap(),
            tract_id: GeoId::parse(&format!("T{}", tract)).unwrap(),
            county_fips: COUNTY,
        })
        .collect();

    (records, filter_crosswalk(&entries, &[COUNTY]).unwrap())
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * b.abs().max(1.0)
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(config_256())]

    #[test]
    fn category_sum_equals_matched_block_totals(blocks in arb_blocks()) {
        let (records, crosswalk) = build(&blocks);
        let out = aggregate_tracts(2015, &records, &crosswalk).unwrap();

        let mut expected: HashMap<String, u64> = HashMap::new();
        for (tract, raw) in &blocks {
            if *tract < TRACTS {
                *expected.entry(format!("T{}", tract)).or_default() += raw.iter().sum::<u64>();
            }
        }

        prop_assert_eq!(out.tracts.len(), expected.len());
        for tract in &out.tracts {
            prop_assert_eq!(tract.counts.total(), expected[tract.tract_id.as_str()]);
        }

        // unmatched blocks never reach a tract
        let unmatched = blocks.iter().filter(|(t, _)| *t == TRACTS).count();
        prop_assert_eq!(out.join.dropped_left, unmatched);
    }
}

// ---------------------------------------------------------------------------
// Location quotients
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(config_256())]

    #[test]
    fn quotients_recover_tract_total(tracts in arb_tracts()) {
        prop_assume!(tracts.iter().any(|t| t.total() > 0));
        let out = compute_location_quotients(2015, &tracts).unwrap();

        for record in out.records.iter().filter(|r| r.total() > 0) {
            let total = record.total() as f64;
            let recovered: f64 = Category::ALL
                .iter()
                .map(|&c| record.lq.get(c).map(|lq| lq * out.region.shares.get(c) * total).unwrap_or(0.0))
                .sum();
            prop_assert!(close(recovered, total), "recovered {} of {}", recovered, total);
        }
    }

    #[test]
    fn weighted_average_quotient_is_one(tracts in arb_tracts()) {
        prop_assume!(tracts.iter().any(|t| t.total() > 0));
        let out = compute_location_quotients(2015, &tracts).unwrap();
        let region_total: f64 = out.records.iter().map(|r| r.total() as f64).sum();

        for category in Category::ALL {
            if out.region.shares.get(category) == 0.0 {
                continue;
            }
            let weighted: f64 = out
                .records
                .iter()
                .filter_map(|r| r.lq.get(category).map(|lq| lq * r.total() as f64))
                .sum();
            prop_assert!(close(weighted / region_total, 1.0), "{} average {}", category, weighted / region_total);
        }
    }

    #[test]
    fn differencing_is_antisymmetric(a in arb_tracts(), b in arb_tracts()) {
        prop_assume!(a.iter().any(|t| t.total() > 0) && b.iter().any(|t| t.total() > 0));
        let lq_a = compute_location_quotients(2002, &a).unwrap().records;
        let lq_b = compute_location_quotients(2015, &b).unwrap().records;

        let forward = difference(&lq_b, &lq_a).unwrap();
        let backward = difference(&lq_a, &lq_b).unwrap();
        prop_assert_eq!(forward.records.len(), backward.records.len());

        let backward_by_tract: HashMap<&GeoId, &LqChangeRecord> =
            backward.records.iter().map(|r| (&r.tract_id, r)).collect();

        for record in &forward.records {
            let other = backward_by_tract[&record.tract_id];
            for category in Category::ALL {
                prop_assert_eq!(record.delta.get(category), other.delta.get(category).map(|d| -d));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Quintiles
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(config_256())]

    #[test]
    fn quintiles_partition_defined_values(
        values in prop::collection::hash_set(0u32..1_000_000, 5..200),
        undefined in 0usize..5,
    ) {
        let mut densities: Vec<Option<f64>> = values.iter().map(|v| Some(*v as f64)).collect();
        densities.extend(std::iter::repeat(None).take(undefined));

        let bins = qcut(&densities, QUINTILES).unwrap();

        let mut counts = [0usize; QUINTILES];
        for (density, bin) in densities.iter().zip(&bins) {
            match (density, bin) {
                (Some(_), Some(b)) => counts[*b] += 1,
                (None, None) => {}
                other => prop_assert!(false, "density/bin mismatch {:?}", other),
            }
        }

        let expected = values.len() as f64 / QUINTILES as f64;
        for count in counts {
            prop_assert!((count as f64 - expected).abs() <= 1.0, "counts {:?} for {} values", counts, values.len());
        }
    }
}
