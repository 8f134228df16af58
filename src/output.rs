// 💾 Output - CSV and GeoJSON tables
//
// Column names are the contract with the web map (shapefile-era short
// names: make_lq, serv_c, prof_15, ...). Undefined values are written as
// empty CSV fields / JSON null, never as 0 or NaN.
//
// Files are written next to their destination and renamed into place, so a
// failed run never leaves a half-written table behind.

use crate::aggregation::YearTotals;
use crate::error::{PipelineError, Result};
use crate::geometry::{Crs, TractGeometry};
use crate::records::{
    AggregatedTractRecord, ByCategory, Category, DensityRecord, GeoId, LocationQuotientRecord, LqChangeRecord,
    Quotient, TractMeasure, YearPair,
};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Tract id column name (as in the crosswalk)
pub const TRACT_COLUMN: &str = "trct";

// ============================================================================
// CELLS & ROWS
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Count(u64),
    /// None = undefined
    Real(Option<f64>),
    Bin(Option<u8>),
}

impl Cell {
    pub fn to_csv(&self) -> String {
        match self {
            Cell::Text(s) => s.clone(),
            Cell::Count(n) => n.to_string(),
            Cell::Real(Some(v)) => v.to_string(),
            Cell::Bin(Some(b)) => b.to_string(),
            Cell::Real(None) | Cell::Bin(None) => String::new(),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Cell::Text(s) => json!(s),
            Cell::Count(n) => json!(n),
            // serde_json maps non-finite floats to null as well
            Cell::Real(v) => json!(v),
            Cell::Bin(b) => json!(b),
        }
    }
}

/// A record that can be written as one table row
pub trait TableRow {
    /// What the header needs beyond the type (years for differenced tables)
    type Context;

    fn header(ctx: &Self::Context) -> Vec<String>;
    fn cells(&self) -> Vec<Cell>;
}

fn category_columns(suffix: &str) -> Vec<String> {
    Category::ALL
        .iter()
        .map(|c| format!("{}_{}", c.prefix(), suffix))
        .collect()
}

fn quotient_cells(values: &ByCategory<Quotient>) -> impl Iterator<Item = Cell> + '_ {
    values.iter().map(|(_, v)| Cell::Real(v))
}

impl TableRow for AggregatedTractRecord {
    type Context = ();

    fn header(_: &()) -> Vec<String> {
        let mut header = vec![TRACT_COLUMN.to_string()];
        header.extend(Category::ALL.iter().map(|c| c.name().to_string()));
        header.push("total".to_string());
        header
    }

    fn cells(&self) -> Vec<Cell> {
        let mut cells = vec![Cell::Text(self.tract_id.to_string())];
        cells.extend(self.counts.iter().map(|(_, n)| Cell::Count(n)));
        cells.push(Cell::Count(self.total()));
        cells
    }
}

impl TableRow for LocationQuotientRecord {
    type Context = ();

    fn header(_: &()) -> Vec<String> {
        let mut header = vec![TRACT_COLUMN.to_string()];
        header.extend(category_columns("lq"));
        header.push("total".to_string());
        header
    }

    fn cells(&self) -> Vec<Cell> {
        let mut cells = vec![Cell::Text(self.tract_id.to_string())];
        cells.extend(quotient_cells(&self.lq));
        cells.push(Cell::Count(self.total()));
        cells
    }
}

impl TableRow for LqChangeRecord {
    type Context = YearPair;

    fn header(years: &YearPair) -> Vec<String> {
        let mut header = vec![TRACT_COLUMN.to_string()];
        header.extend(category_columns("c"));
        header.extend(category_columns(&YearPair::suffix(years.current)));
        header.extend(category_columns(&YearPair::suffix(years.baseline)));
        header.push("total".to_string());
        header
    }

    fn cells(&self) -> Vec<Cell> {
        let mut cells = vec![Cell::Text(self.tract_id.to_string())];
        cells.extend(quotient_cells(&self.delta));
        cells.extend(quotient_cells(&self.current));
        cells.extend(quotient_cells(&self.baseline));
        cells.push(Cell::Count(self.counts.total()));
        cells
    }
}

impl<R: TableRow> TableRow for DensityRecord<R> {
    type Context = R::Context;

    fn header(ctx: &R::Context) -> Vec<String> {
        let mut header = R::header(ctx);
        header.push("area_sqmi".to_string());
        header.push("density".to_string());
        header.extend(category_columns("sqmi"));
        header.extend(category_columns("dec"));
        header.push("quintile".to_string());
        header
    }

    fn cells(&self) -> Vec<Cell> {
        let mut cells = self.record.cells();
        cells.push(Cell::Real(Some(self.area_sqmi)));
        cells.push(Cell::Real(self.density));
        cells.extend(self.category_density.iter().map(|(_, v)| Cell::Real(v)));
        cells.extend(self.category_deciles.iter().map(|(_, d)| Cell::Bin(d)));
        cells.push(Cell::Bin(self.quintile));
        cells
    }
}

impl TableRow for YearTotals {
    type Context = ();

    fn header(_: &()) -> Vec<String> {
        let mut header = vec!["year".to_string()];
        header.extend(Category::ALL.iter().map(|c| c.name().to_string()));
        header.push("all".to_string());
        header
    }

    fn cells(&self) -> Vec<Cell> {
        let mut cells = vec![Cell::Count(u64::from(self.year))];
        cells.extend(self.counts.iter().map(|(_, n)| Cell::Count(n)));
        cells.push(Cell::Count(self.all()));
        cells
    }
}

// ============================================================================
// ATOMIC WRITES
// ============================================================================

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

/// A fully written sibling file not yet renamed over its destination
///
/// Dropping it without `commit` deletes the sibling, so several outputs can
/// be staged and published only once all of them were written.
#[derive(Debug)]
pub struct StagedFile {
    partial: PathBuf,
    path: PathBuf,
    committed: bool,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rename into place
    pub fn commit(mut self) -> Result<()> {
        fs::rename(&self.partial, &self.path).map_err(|e| PipelineError::output(&self.path, e.to_string()))?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.partial);
        }
    }
}

/// Write through `fill` into `<path>.partial`
pub fn stage<F>(path: &Path, fill: F) -> Result<StagedFile>
where
    F: FnOnce(&mut dyn Write) -> std::io::Result<()>,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| PipelineError::output(path, e.to_string()))?;
    }

    let partial = partial_path(path);
    let written = (|| -> std::io::Result<()> {
        let mut writer = BufWriter::new(fs::File::create(&partial)?);
        fill(&mut writer)?;
        writer.flush()
    })();

    // from here on the guard cleans up the sibling
    let staged = StagedFile {
        partial,
        path: path.to_path_buf(),
        committed: false,
    };
    written.map_err(|e| PipelineError::output(path, e.to_string()))?;
    Ok(staged)
}

/// Write through `fill` into a sibling file, then rename over `path`
pub fn write_atomically<F>(path: &Path, fill: F) -> Result<()>
where
    F: FnOnce(&mut dyn Write) -> std::io::Result<()>,
{
    stage(path, fill)?.commit()
}

// ============================================================================
// CSV
// ============================================================================

pub fn write_csv<R: TableRow>(path: &Path, ctx: &R::Context, rows: &[R]) -> Result<()> {
    stage_csv(path, ctx, rows)?.commit()
}

pub fn stage_csv<R: TableRow>(path: &Path, ctx: &R::Context, rows: &[R]) -> Result<StagedFile> {
    stage(path, |out| {
        let mut writer = csv::Writer::from_writer(out);
        writer.write_record(R::header(ctx))?;
        for row in rows {
            writer.write_record(row.cells().iter().map(Cell::to_csv))?;
        }
        writer.flush()
    })
}

// ============================================================================
// GEOJSON
// ============================================================================

/// FeatureCollection of rows with their tract geometry attached
///
/// Rows without geometry are written with `"geometry": null`.
pub fn geojson_collection<R>(ctx: &R::Context, rows: &[R], geometries: &[TractGeometry]) -> Value
where
    R: TableRow + TractMeasure,
{
    let header = R::header(ctx);
    let by_tract: HashMap<&GeoId, &TractGeometry> = geometries.iter().map(|g| (&g.tract_id, g)).collect();

    let features: Vec<Value> = rows
        .iter()
        .map(|row| {
            let properties: Map<String, Value> = header
                .iter()
                .cloned()
                .zip(row.cells().iter().map(Cell::to_json))
                .collect();
            let geometry = by_tract
                .get(row.tract_id())
                .map(|g| g.to_geojson())
                .unwrap_or(Value::Null);

            json!({ "type": "Feature", "properties": properties, "geometry": geometry })
        })
        .collect();

    let mut collection = json!({ "type": "FeatureCollection", "features": features });
    if let Some(crs) = geometries.first().map(|g| g.crs).filter(|c| *c != Crs::Geographic) {
        collection["crs"] = json!({ "type": "name", "properties": { "name": crs.urn() } });
    }
    collection
}

pub fn write_geojson<R>(path: &Path, ctx: &R::Context, rows: &[R], geometries: &[TractGeometry]) -> Result<()>
where
    R: TableRow + TractMeasure,
{
    stage_geojson(path, ctx, rows, geometries)?.commit()
}

pub fn stage_geojson<R>(path: &Path, ctx: &R::Context, rows: &[R], geometries: &[TractGeometry]) -> Result<StagedFile>
where
    R: TableRow + TractMeasure,
{
    let collection = geojson_collection(ctx, rows, geometries);
    stage_json(path, &collection)
}

pub fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    stage_json(path, value)?.commit()
}

pub fn stage_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<StagedFile> {
    stage(path, |out| {
        serde_json::to_writer_pretty(&mut *out, value)?;
        writeln!(out)
    })
}

/// True when `path` asks for GeoJSON output
pub fn is_geojson_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("geojson") || e.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}
