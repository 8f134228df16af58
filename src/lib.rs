// Bay Area Jobs Location Quotients - Core Library
// Every pipeline stage, used by the CLI and the integration tests

pub mod error;
pub mod records;
pub mod config;
pub mod loader;
pub mod crosswalk;      // Stage 1: block → tract filter
pub mod join;           // Inner join accounting
pub mod aggregation;    // Stage 2: 20 sectors → 4 categories per tract
pub mod quotient;       // Stage 3: location quotients per year
pub mod temporal;       // Stage 4: LQ change between two years
pub mod geometry;
pub mod binning;
pub mod density;        // Stage 5: jobs per sq mi + quintiles and deciles
pub mod output;
pub mod pipeline;

// Re-export commonly used types
pub use error::{PipelineError, Result};
pub use records::{
    AggregatedTractRecord, BlockRecord, ByCategory, Category, CategoryCounts,
    CrosswalkEntry, DensityRecord, GeoId, LocationQuotientRecord, LqChangeRecord,
    Quotient, TractMeasure, YearPair,
};
pub use config::PipelineConfig;
pub use loader::{load_crosswalk, load_tract_geometry, load_wac};
pub use crosswalk::{filter_crosswalk, Crosswalk, BAY_AREA_COUNTIES};
pub use join::{JoinLedger, JoinStage, JoinStats};
pub use aggregation::{
    aggregate_tracts, region_totals, AggregationOutput, ReconciliationReport, YearTotals,
};
pub use quotient::{compute_location_quotients, QuotientOutput, RegionProfile};
pub use temporal::{difference, ChangeOutput};
pub use geometry::{Crs, LambertConformalConic, Polygon, TractGeometry};
pub use binning::{qcut, DECILES, QUINTILES};
pub use density::{classify_density, DensityOutput};
pub use output::{stage_csv, write_csv, write_geojson, Cell, StagedFile, TableRow};
pub use pipeline::{
    run, run_quotients, run_totals, QuotientsJob, QuotientsSummary, RunReport, TotalsJob,
};
