use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use jobs_lq::{
    run, run_quotients, run_totals, PipelineConfig, QuotientsJob, TotalsJob, BAY_AREA_COUNTIES,
};

#[derive(Parser)]
#[command(name = "jobs-lq")]
#[command(about = "Tract-level employment location quotients for the SF Bay Area")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Two-year LQ change, with density quintiles when geometry is given
    Run(RunArgs),

    /// Location quotients for a single year
    Quotients {
        /// WAC table for the year
        #[arg(long)]
        wac: PathBuf,
        #[arg(long, env = "JOBS_LQ_CROSSWALK")]
        crosswalk: PathBuf,
        #[arg(long)]
        year: u16,
        #[arg(short, long)]
        output: PathBuf,
        /// County FIPS codes (default: the nine Bay Area counties)
        #[arg(long, value_delimiter = ',')]
        counties: Vec<u32>,
    },

    /// Region-wide category totals for a range of years
    Totals {
        /// WAC path template containing {year}
        #[arg(long)]
        wac: String,
        #[arg(long, env = "JOBS_LQ_CROSSWALK")]
        crosswalk: PathBuf,
        #[arg(long)]
        from: u16,
        #[arg(long)]
        to: u16,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long, value_delimiter = ',')]
        counties: Vec<u32>,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    /// TOML config; every flag below overrides it
    #[arg(short, long, env = "JOBS_LQ_CONFIG")]
    config: Option<PathBuf>,

    /// WAC path template containing {year}
    #[arg(long)]
    wac: Option<String>,
    #[arg(long, env = "JOBS_LQ_CROSSWALK")]
    crosswalk: Option<PathBuf>,
    #[arg(long)]
    geometry: Option<PathBuf>,
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Baseline year
    #[arg(long)]
    year_a: Option<u16>,
    /// Current year
    #[arg(long)]
    year_b: Option<u16>,
    #[arg(long, value_delimiter = ',')]
    counties: Vec<u32>,
    #[arg(long)]
    geometry_id_field: Option<String>,
}

impl RunArgs {
    fn into_config(self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_toml_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => {
                let (Some(wac), Some(crosswalk), Some(output), Some(year_a), Some(year_b)) = (
                    self.wac.clone(),
                    self.crosswalk.clone(),
                    self.output.clone(),
                    self.year_a,
                    self.year_b,
                ) else {
                    bail!("without --config, --wac, --crosswalk, --output, --year-a and --year-b are required");
                };
                PipelineConfig::new(wac, crosswalk, output, year_a, year_b)
            }
        };

        // CLI overrides
        if let Some(wac) = self.wac {
            config.wac_table_path = wac;
        }
        if let Some(crosswalk) = self.crosswalk {
            config.crosswalk_path = crosswalk;
        }
        if let Some(geometry) = self.geometry {
            config.geometry_path = Some(geometry);
        }
        if let Some(output) = self.output {
            config.output_path = output;
        }
        if let Some(year_a) = self.year_a {
            config.year_a = year_a;
        }
        if let Some(year_b) = self.year_b {
            config.year_b = year_b;
        }
        if !self.counties.is_empty() {
            config.counties = self.counties;
        }
        if let Some(field) = self.geometry_id_field {
            config.geometry_id_field = field;
        }

        Ok(config)
    }
}

fn counties_or_default(counties: Vec<u32>) -> Vec<u32> {
    if counties.is_empty() {
        BAY_AREA_COUNTIES.to_vec()
    } else {
        counties
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("jobs_lq=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => run_pipeline(args)?,
        Command::Quotients {
            wac,
            crosswalk,
            year,
            output,
            counties,
        } => {
            let job = QuotientsJob {
                wac_path: wac,
                crosswalk_path: crosswalk,
                output_path: output,
                year,
                counties: counties_or_default(counties),
            };
            let summary = run_quotients(&job).context("Single-year quotients failed")?;

            println!("📐 Location Quotients {}", year);
            println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
            println!("✓ {}", summary.join.summary());
            for (category, share) in summary.region.shares.iter() {
                println!("  {:<12} {:>6.2}% of region jobs", category.name(), share * 100.0);
            }
            println!("✅ {} tracts → {}", summary.rows_written, job.output_path.display());
        }
        Command::Totals {
            wac,
            crosswalk,
            from,
            to,
            output,
            counties,
        } => {
            let job = TotalsJob {
                wac_table_path: wac,
                crosswalk_path: crosswalk,
                output_path: output,
                years: from..=to,
                counties: counties_or_default(counties),
            };
            let totals = run_totals(&job).context("Region totals failed")?;

            println!("📊 Region Totals {}-{}", from, to);
            println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
            for year in &totals {
                println!("  {}  {:>10} jobs", year.year, year.all());
            }
            println!("✅ {} years → {}", totals.len(), job.output_path.display());
        }
    }

    Ok(())
}

fn run_pipeline(args: RunArgs) -> Result<()> {
    let config = args.into_config()?;
    info!(
        wac = %config.wac_table_path,
        crosswalk = %config.crosswalk_path.display(),
        output = %config.output_path.display(),
        "configuration loaded"
    );

    println!("🗺️  Bay Area Location Quotients {} → {}", config.year_a, config.year_b);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let report = run(&config).context("Pipeline run failed, no output written")?;

    println!("{}", report.summary());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    if report.joins.total_dropped_left() > 0 {
        println!("⚠️  {} rows dropped by inner joins (see report)", report.joins.total_dropped_left());
    }
    println!("✅ Run complete");

    Ok(())
}
