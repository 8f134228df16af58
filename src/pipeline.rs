// 🚀 Pipeline Driver - crosswalk → aggregate → LQ (per year) → change → density
//
// Every input is opened and parsed before the first stage runs, and output
// is only written once every stage has succeeded. A failed run leaves the
// output directory exactly as it found it.

use crate::aggregation::{aggregate_tracts, region_totals, ReconciliationReport, YearTotals};
use crate::config::{ensure_inputs_exist, wac_path_for, PipelineConfig};
use crate::crosswalk::{filter_crosswalk, Crosswalk};
use crate::density::classify_density;
use crate::error::{PipelineError, Result};
use crate::geometry::{LambertConformalConic, TractGeometry};
use crate::join::{JoinLedger, JoinStats};
use crate::loader::{load_crosswalk, load_tract_geometry, load_wac};
use crate::output::{is_geojson_path, stage_csv, stage_geojson, stage_json, write_csv, StagedFile, TableRow};
use crate::quotient::{compute_location_quotients, QuotientOutput, RegionProfile};
use crate::records::{BlockRecord, TractMeasure, YearPair};
use crate::temporal::difference;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

// ============================================================================
// RUN REPORT
// ============================================================================

/// SHA-256 of one input file as it was read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputFingerprint {
    pub path: PathBuf,
    pub bytes: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearReconciliation {
    pub year: u16,
    pub report: ReconciliationReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DensitySummary {
    pub classified: usize,
    pub unclassified: usize,
}

/// Everything needed to audit one run, written next to the output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub years: YearPair,
    pub counties: Vec<u32>,
    pub inputs: Vec<InputFingerprint>,
    pub output_path: PathBuf,
    pub rows_written: usize,
    pub joins: JoinLedger,
    pub reconciliation: Vec<YearReconciliation>,
    pub regions: Vec<RegionProfile>,
    pub density: Option<DensitySummary>,
}

impl RunReport {
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("Run {}", self.run_id),
            format!("  Years: {} → {}", self.years.baseline, self.years.current),
            format!("  Rows written: {} ({})", self.rows_written, self.output_path.display()),
        ];
        for stats in self.joins.entries() {
            lines.push(format!("  {}", stats.summary()));
        }
        if let Some(density) = &self.density {
            lines.push(format!(
                "  Density quintiles: {} classified, {} unclassified",
                density.classified, density.unclassified
            ));
        }
        lines.join("\n")
    }
}

/// `<output>.report.json`, next to the output file
pub fn report_path(output: &Path) -> PathBuf {
    let mut name = output.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".report.json");
    output.with_file_name(name)
}

// ============================================================================
// FINGERPRINTS
// ============================================================================

pub fn fingerprint(path: &Path) -> Result<InputFingerprint> {
    let file = File::open(path).map_err(|e| PipelineError::config_at(path, format!("cannot open: {}", e)))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    let mut bytes = 0u64;

    loop {
        let n = reader
            .read(&mut buffer)
            .map_err(|e| PipelineError::config_at(path, format!("cannot read: {}", e)))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        bytes += n as u64;
    }

    Ok(InputFingerprint {
        path: path.to_path_buf(),
        bytes,
        sha256: format!("{:x}", hasher.finalize()),
    })
}

fn fingerprint_all(paths: &[PathBuf]) -> Result<Vec<InputFingerprint>> {
    let mut seen: Vec<&PathBuf> = Vec::new();
    let mut prints = Vec::with_capacity(paths.len());
    for path in paths {
        // a template without {year} names the same file twice
        if seen.contains(&path) {
            continue;
        }
        seen.push(path);
        prints.push(fingerprint(path)?);
    }
    Ok(prints)
}

// ============================================================================
// STAGES
// ============================================================================

fn load_filtered_crosswalk(path: &Path, counties: &[u32]) -> Result<Crosswalk> {
    let entries = load_crosswalk(path)?;
    filter_crosswalk(&entries, counties)
}

struct YearSnapshot {
    join: JoinStats,
    reconciliation: YearReconciliation,
    quotients: QuotientOutput,
}

fn snapshot_year(
    year: u16,
    blocks: &[BlockRecord],
    crosswalk: &Crosswalk,
    joins: &mut JoinLedger,
) -> Result<YearSnapshot> {
    let aggregation = aggregate_tracts(year, blocks, crosswalk)?;
    joins.record(aggregation.join.clone());
    let quotients = compute_location_quotients(year, &aggregation.tracts)?;

    Ok(YearSnapshot {
        join: aggregation.join,
        reconciliation: YearReconciliation {
            year,
            report: aggregation.reconciliation,
        },
        quotients,
    })
}

/// CSV, or GeoJSON with geometry attached when the path asks for it
fn stage_table<R>(path: &Path, ctx: &R::Context, rows: &[R], geometries: &[TractGeometry]) -> Result<StagedFile>
where
    R: TableRow + TractMeasure,
{
    if is_geojson_path(path) {
        stage_geojson(path, ctx, rows, geometries)
    } else {
        stage_csv(path, ctx, rows)
    }
}

/// Publish the table, then its report; a report that cannot be published
/// takes the table down with it
fn commit_with_report(table: StagedFile, report: StagedFile) -> Result<()> {
    let table_path = table.path().to_path_buf();
    table.commit()?;
    if let Err(e) = report.commit() {
        let _ = fs::remove_file(&table_path);
        return Err(e);
    }
    Ok(())
}

// ============================================================================
// DRIVERS
// ============================================================================

/// Full two-year run: LQ change per tract, with density when geometry is set
pub fn run(config: &PipelineConfig) -> Result<RunReport> {
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    let years = YearPair {
        baseline: config.year_a,
        current: config.year_b,
    };

    config.validate()?;
    info!(%run_id, baseline = years.baseline, current = years.current, "starting run");

    // 1. Read everything up front
    let inputs = fingerprint_all(&config.input_paths())?;
    let crosswalk = load_filtered_crosswalk(&config.crosswalk_path, &config.counties)?;
    let baseline_blocks = load_wac(&config.wac_path_for(years.baseline))?;
    let current_blocks = load_wac(&config.wac_path_for(years.current))?;
    let geometries = match &config.geometry_path {
        Some(path) => Some(load_tract_geometry(path, &config.geometry_id_field)?),
        None => None,
    };

    // 2. Each year against its own region
    let mut joins = JoinLedger::new();
    let baseline = snapshot_year(years.baseline, &baseline_blocks, &crosswalk, &mut joins)?;
    let current = snapshot_year(years.current, &current_blocks, &crosswalk, &mut joins)?;

    // 3. Change
    let change = difference(&current.quotients.records, &baseline.quotients.records)?;
    joins.record(change.join.clone());

    // 4. Density, staged next to the output until the report is ready too
    let (table, rows_written, density) = match &geometries {
        Some(geometries) => {
            let classified = classify_density(&change.records, geometries, &LambertConformalConic::california_zone3())?;
            joins.record(classified.join.clone());

            let unclassified = classified.records.iter().filter(|r| r.quintile.is_none()).count();
            let summary = DensitySummary {
                classified: classified.records.len() - unclassified,
                unclassified,
            };
            let table = stage_table(&config.output_path, &years, &classified.records, geometries)?;
            (table, classified.records.len(), Some(summary))
        }
        None => {
            let table = stage_table(&config.output_path, &years, &change.records, &[])?;
            (table, change.records.len(), None)
        }
    };

    let report = RunReport {
        run_id,
        started_at,
        finished_at: Utc::now(),
        years,
        counties: config.counties.clone(),
        inputs,
        output_path: config.output_path.clone(),
        rows_written,
        joins,
        reconciliation: vec![baseline.reconciliation, current.reconciliation],
        regions: vec![baseline.quotients.region, current.quotients.region],
        density,
    };
    let staged_report = stage_json(&report_path(&config.output_path), &report)?;
    commit_with_report(table, staged_report)?;

    info!(%run_id, path = %config.output_path.display(), rows = rows_written, "run complete");
    Ok(report)
}

/// Single-year location quotients
#[derive(Debug, Clone, PartialEq)]
pub struct QuotientsJob {
    pub wac_path: PathBuf,
    pub crosswalk_path: PathBuf,
    pub output_path: PathBuf,
    pub year: u16,
    pub counties: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuotientsSummary {
    pub region: RegionProfile,
    pub join: JoinStats,
    pub rows_written: usize,
}

pub fn run_quotients(job: &QuotientsJob) -> Result<QuotientsSummary> {
    if is_geojson_path(&job.output_path) {
        return Err(PipelineError::config_at(
            &job.output_path,
            "single-year quotients are written as CSV only",
        ));
    }
    ensure_inputs_exist(&[job.crosswalk_path.clone(), job.wac_path.clone()])?;

    let crosswalk = load_filtered_crosswalk(&job.crosswalk_path, &job.counties)?;
    let blocks = load_wac(&job.wac_path)?;

    let mut joins = JoinLedger::new();
    let snapshot = snapshot_year(job.year, &blocks, &crosswalk, &mut joins)?;
    stage_table(&job.output_path, &(), &snapshot.quotients.records, &[])?.commit()?;
    let rows_written = snapshot.quotients.records.len();
    info!(path = %job.output_path.display(), rows = rows_written, "output written");

    Ok(QuotientsSummary {
        region: snapshot.quotients.region,
        join: snapshot.join,
        rows_written,
    })
}

/// Region totals for a range of years
#[derive(Debug, Clone, PartialEq)]
pub struct TotalsJob {
    /// Template with `{year}`
    pub wac_table_path: String,
    pub crosswalk_path: PathBuf,
    pub output_path: PathBuf,
    pub years: RangeInclusive<u16>,
    pub counties: Vec<u32>,
}

pub fn run_totals(job: &TotalsJob) -> Result<Vec<YearTotals>> {
    if job.years.is_empty() {
        return Err(PipelineError::config(format!(
            "empty year range {}..={}",
            job.years.start(),
            job.years.end()
        )));
    }

    let mut paths = vec![job.crosswalk_path.clone()];
    paths.extend(job.years.clone().map(|year| wac_path_for(&job.wac_table_path, year)));
    ensure_inputs_exist(&paths)?;

    let crosswalk = load_filtered_crosswalk(&job.crosswalk_path, &job.counties)?;

    let mut totals = Vec::new();
    for year in job.years.clone() {
        let blocks = load_wac(&wac_path_for(&job.wac_table_path, year))?;
        let aggregation = aggregate_tracts(year, &blocks, &crosswalk)?;
        aggregation.join.log();
        let year_totals = region_totals(&aggregation)?;
        info!(year, jobs = year_totals.all(), "region total");
        totals.push(year_totals);
    }

    write_csv(&job.output_path, &(), &totals)?;
    Ok(totals)
}
