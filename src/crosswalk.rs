// 🗺️ Crosswalk Filter - block → tract lookup for the target region
//
// The published crosswalk covers the whole state; only blocks in the
// county allow-list survive, and only the block/tract columns are kept.

use crate::error::{PipelineError, Result};
use crate::records::{CrosswalkEntry, GeoId};
use std::collections::HashMap;
use tracing::info;

/// County FIPS codes of the nine-county SF Bay Area
///
/// Alameda, Contra Costa, Marin, Napa, San Francisco, San Mateo,
/// Santa Clara, Solano, Sonoma
pub const BAY_AREA_COUNTIES: [u32; 9] = [6001, 6013, 6041, 6055, 6075, 6081, 6085, 6095, 6097];

/// Filtered block → tract mapping
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Crosswalk {
    tracts_by_block: HashMap<GeoId, GeoId>,
}

impl Crosswalk {
    pub fn tract_for(&self, block_id: &GeoId) -> Option<&GeoId> {
        self.tracts_by_block.get(block_id)
    }

    pub fn len(&self) -> usize {
        self.tracts_by_block.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracts_by_block.is_empty()
    }

    /// Number of distinct tracts reachable through the crosswalk
    pub fn tract_count(&self) -> usize {
        let mut tracts: Vec<&GeoId> = self.tracts_by_block.values().collect();
        tracts.sort();
        tracts.dedup();
        tracts.len()
    }
}

/// Keep entries in `counties`, project to block → tract
///
/// Repeated identical rows collapse; a block pointing at two different
/// tracts is a data integrity error.
pub fn filter_crosswalk(entries: &[CrosswalkEntry], counties: &[u32]) -> Result<Crosswalk> {
    let mut tracts_by_block: HashMap<GeoId, GeoId> = HashMap::new();

    for entry in entries.iter().filter(|e| counties.contains(&e.county_fips)) {
        match tracts_by_block.get(&entry.block_id) {
            Some(existing) if existing != &entry.tract_id => {
                return Err(PipelineError::DataIntegrity(format!(
                    "block {} maps to tracts {} and {}",
                    entry.block_id, existing, entry.tract_id
                )));
            }
            Some(_) => {}
            None => {
                tracts_by_block.insert(entry.block_id.clone(), entry.tract_id.clone());
            }
        }
    }

    let crosswalk = Crosswalk { tracts_by_block };
    info!(
        input_rows = entries.len(),
        blocks = crosswalk.len(),
        tracts = crosswalk.tract_count(),
        counties = counties.len(),
        "crosswalk filtered"
    );

    Ok(crosswalk)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(block: &str, tract: &str, county: u32) -> CrosswalkEntry {
        CrosswalkEntry {
            block_id: GeoId::parse(block).unwrap(),
            tract_id: GeoId::parse(tract).unwrap(),
            county_fips: county,
        }
    }

    #[test]
    fn test_filter_keeps_only_allowed_counties() {
        let entries = vec![
            entry("060014001001000", "06001400100", 6001), // Alameda
            entry("060750101001000", "06075010100", 6075), // San Francisco
            entry("060370101001000", "06037010100", 6037), // Los Angeles
        ];

        let cw = filter_crosswalk(&entries, &BAY_AREA_COUNTIES).unwrap();

        assert_eq!(cw.len(), 2);
        assert_eq!(cw.tract_count(), 2);
        assert!(cw.tract_for(&GeoId::parse("060370101001000").unwrap()).is_none());
        assert_eq!(
            cw.tract_for(&GeoId::parse("60014001001000").unwrap()),
            Some(&GeoId::parse("6001400100").unwrap())
        );
    }

    #[test]
    fn test_duplicate_identical_rows_collapse() {
        let entries = vec![
            entry("1001", "10", 6001),
            entry("1001", "10", 6001),
            entry("1002", "10", 6001),
        ];

        let cw = filter_crosswalk(&entries, &BAY_AREA_COUNTIES).unwrap();
        assert_eq!(cw.len(), 2);
        assert_eq!(cw.tract_count(), 1);
    }

    #[test]
    fn test_conflicting_tracts_fail() {
        let entries = vec![entry("1001", "10", 6001), entry("1001", "11", 6001)];

        let err = filter_crosswalk(&entries, &BAY_AREA_COUNTIES).unwrap_err();
        assert!(err.is_data_integrity());
        assert!(err.to_string().contains("1001"));
    }

    #[test]
    fn test_conflict_outside_region_is_ignored() {
        let entries = vec![entry("1001", "10", 6037), entry("1001", "11", 6037)];

        let cw = filter_crosswalk(&entries, &BAY_AREA_COUNTIES).unwrap();
        assert!(cw.is_empty());
    }
}
