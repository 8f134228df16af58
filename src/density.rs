// 🏙️ Density Quintile Classifier
//
// Joins tract records to their geometry, computes jobs per square mile in
// the state plane projection and buckets tracts into density quintiles.
// Each category's job counts are also split into deciles; a category whose
// counts repeat too often to give ten distinct edges gets no deciles.

use crate::binning::{qcut, DECILES, QUINTILES};
use crate::error::{PipelineError, Result};
use crate::geometry::{LambertConformalConic, TractGeometry};
use crate::join::{JoinStage, JoinStats};
use crate::records::{ByCategory, Category, DensityRecord, GeoId, TractMeasure};
use std::collections::HashMap;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct DensityOutput<R> {
    /// In the order of the input records; tracts without geometry are absent
    pub records: Vec<DensityRecord<R>>,
    pub join: JoinStats,
}

/// `count / area`, None when the ratio is not a finite number
fn per_area(count: u64, area: f64) -> Option<f64> {
    let value = count as f64 / area;
    value.is_finite().then_some(value)
}

/// Count deciles for one category, all None when the edges collapse
fn category_deciles<R: TractMeasure>(records: &[DensityRecord<R>], category: Category) -> Result<Vec<Option<u8>>> {
    let counts: Vec<Option<f64>> = records.iter().map(|r| Some(r.counts().get(category) as f64)).collect();
    match qcut(&counts, DECILES) {
        Ok(bins) => Ok(bins.into_iter().map(|b| b.map(|b| b as u8)).collect()),
        Err(PipelineError::Classification(reason)) => {
            warn!(%category, %reason, "no count deciles");
            Ok(vec![None; records.len()])
        }
        Err(e) => Err(e),
    }
}

/// Inner join records ⋈ geometry, then density and quintile per tract
pub fn classify_density<R>(
    records: &[R],
    geometries: &[TractGeometry],
    projection: &LambertConformalConic,
) -> Result<DensityOutput<R>>
where
    R: TractMeasure + Clone,
{
    let by_tract: HashMap<&GeoId, &TractGeometry> = geometries.iter().map(|g| (&g.tract_id, g)).collect();

    let mut joined = Vec::with_capacity(records.len());
    for record in records {
        let Some(geometry) = by_tract.get(record.tract_id()) else {
            continue;
        };

        let area_sqmi = geometry.projected_area_sqmi(projection)?;
        let counts = record.counts();

        joined.push(DensityRecord {
            record: record.clone(),
            area_sqmi,
            density: per_area(record.total(), area_sqmi),
            category_density: ByCategory::from_fn(|c| per_area(counts.get(c), area_sqmi)),
            quintile: None,
            category_deciles: ByCategory::splat(None),
        });
    }

    let join = JoinStats::new(JoinStage::Geometry, records.len(), geometries.len(), joined.len(), joined.len());

    let densities: Vec<Option<f64>> = joined.iter().map(|r| r.density).collect();
    let quintiles = qcut(&densities, QUINTILES)?;

    let mut deciles = vec![ByCategory::splat(None); joined.len()];
    for category in Category::ALL {
        for (slot, bin) in deciles.iter_mut().zip(category_deciles(&joined, category)?) {
            *slot.get_mut(category) = bin;
        }
    }

    let records: Vec<DensityRecord<R>> = joined
        .into_iter()
        .zip(quintiles.into_iter().zip(deciles))
        .map(|(record, (quintile, category_deciles))| DensityRecord {
            quintile: quintile.map(|q| q as u8),
            category_deciles,
            ..record
        })
        .collect();

    let unclassified = records.iter().filter(|r| r.quintile.is_none()).count();
    info!(tracts = records.len(), unclassified, "density quintiles assigned");

    Ok(DensityOutput { records, join })
}
