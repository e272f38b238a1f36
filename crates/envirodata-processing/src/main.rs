//! CLI entry point for environmental data ingestion and analysis.

use anyhow::{Context, Result, anyhow};
use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use dotenv::dotenv;
use envirodata_processing::{
    AnalysisConfig, AnalysisRequest, AnovaGroup, BatchMetadata, IngestConfig, IngestionPipeline,
    IngestionResult, MemoryStore, ReadingFilter, ReadingStore, ReportGenerator,
    StatisticalAnalyzer, StatisticalReport, StudyType, TimeBucket, UploadedFile, preview_file,
};
use std::env;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

const DEFAULT_STORE: &str = "./envirodata_store.json";

/// CLI-compatible study type enum
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliStudyType {
    Baseline,
    Monitoring,
    Compliance,
    Research,
    ImpactAssessment,
    Emergency,
    Other,
}

impl From<CliStudyType> for StudyType {
    fn from(cli: CliStudyType) -> Self {
        match cli {
            CliStudyType::Baseline => StudyType::Baseline,
            CliStudyType::Monitoring => StudyType::Monitoring,
            CliStudyType::Compliance => StudyType::Compliance,
            CliStudyType::Research => StudyType::Research,
            CliStudyType::ImpactAssessment => StudyType::ImpactAssessment,
            CliStudyType::Emergency => StudyType::Emergency,
            CliStudyType::Other => StudyType::Other,
        }
    }
}

/// CLI-compatible trend bucket enum
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliPeriod {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
}

impl From<CliPeriod> for TimeBucket {
    fn from(cli: CliPeriod) -> Self {
        match cli {
            CliPeriod::Daily => TimeBucket::Daily,
            CliPeriod::Weekly => TimeBucket::Weekly,
            CliPeriod::Monthly => TimeBucket::Monthly,
            CliPeriod::Quarterly => TimeBucket::Quarterly,
            CliPeriod::Yearly => TimeBucket::Yearly,
        }
    }
}

/// Analyses selectable with `--analysis`
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CliAnalysis {
    /// Summary statistics per pollutant and location
    Descriptive,
    /// Two-group comparison (needs exactly two --group)
    TTest,
    /// Multi-group comparison (needs at least two --group)
    Anova,
    /// Pollutant and meteorology correlations
    Correlation,
    /// Linear trend over time buckets
    Trend,
    /// Exceedance of regulatory standards
    Compliance,
    /// PCA and k-means clustering
    Multivariate,
}

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Environmental monitoring data ingestion and statistical analysis",
    long_about = "Ingest CSV or Excel monitoring files into a local store and run statistical \
                  analyses over the stored readings.\n\n\
                  ENVIRONMENT VARIABLES:\n  \
                  ENVIRODATA_STORE    Default store path (also read from .env)\n  \
                  RUST_LOG            Overrides --log-level\n\n\
                  EXAMPLES:\n  \
                  # Create a store seeded with the pollutant catalog\n  \
                  envirodata init-store\n\n  \
                  # Ingest a file\n  \
                  envirodata ingest -i march.csv --batch-name \"March survey\" --sampling-date 2024-03-31\n\n  \
                  # Compare two sites\n  \
                  envirodata analyze -a t-test --group \"Site A\" --group \"Site B\"\n\n  \
                  # Everything from a request file, saved as a report\n  \
                  envirodata analyze --requests requests.json --emit-report reports/"
)]
struct Args {
    /// Path to the JSON store snapshot
    ///
    /// Falls back to ENVIRODATA_STORE, then ./envirodata_store.json
    #[arg(short, long, global = true)]
    store: Option<PathBuf>,

    /// Owner whose readings are ingested and analyzed
    #[arg(long, global = true, default_value = "default")]
    owner: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "info")]
    log_level: String,

    /// Suppress progress output (only show warnings, errors and results)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Output JSON to stdout instead of a human-readable summary
    ///
    /// Disables all logs so stdout carries only JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new store file
    InitStore {
        /// Overwrite an existing store
        #[arg(long)]
        force: bool,

        /// Do not seed the default pollutant catalog
        #[arg(long)]
        empty: bool,
    },

    /// Ingest a CSV or Excel file as a new sample batch
    Ingest(IngestArgs),

    /// Show how a file would be read without ingesting it
    Preview {
        /// Path to the CSV or Excel file
        #[arg(short, long)]
        input: PathBuf,

        /// Number of sample rows to show
        #[arg(long, default_value = "10")]
        rows: usize,
    },

    /// Run statistical analyses over stored readings
    Analyze(AnalyzeArgs),
}

#[derive(ClapArgs, Debug)]
struct IngestArgs {
    /// Path to the CSV or Excel file
    #[arg(short, long)]
    input: PathBuf,

    /// Name of the sample batch
    #[arg(long)]
    batch_name: String,

    /// Sampling date (YYYY-MM-DD)
    #[arg(long)]
    sampling_date: NaiveDate,

    #[arg(long)]
    description: Option<String>,

    #[arg(long)]
    project_name: Option<String>,

    #[arg(long)]
    project_code: Option<String>,

    #[arg(long, value_enum, default_value = "monitoring")]
    study_type: CliStudyType,

    /// Fail rows whose location does not exist instead of creating it
    #[arg(long)]
    no_create_locations: bool,

    /// Abort the whole run on the first invalid row
    #[arg(long)]
    strict: bool,

    /// Ingest exact duplicate rows instead of skipping them
    #[arg(long)]
    keep_duplicates: bool,

    /// Maximum accepted file size in megabytes
    #[arg(long, default_value = "10")]
    max_file_size_mb: u64,
}

#[derive(ClapArgs, Debug)]
struct AnalyzeArgs {
    /// JSON file holding a list of analysis requests
    ///
    /// Filters in a request file use ids, not names.
    #[arg(long, conflicts_with = "analysis")]
    requests: Option<PathBuf>,

    /// Analyses to run (repeatable)
    #[arg(short, long, value_enum)]
    analysis: Vec<CliAnalysis>,

    /// Restrict to these pollutants by name (repeatable)
    #[arg(long)]
    pollutant: Vec<String>,

    /// Restrict to these locations by name (repeatable)
    #[arg(long)]
    location: Vec<String>,

    /// Restrict to these batches by name (repeatable)
    #[arg(long)]
    batch: Vec<String>,

    /// First day included (YYYY-MM-DD)
    #[arg(long)]
    from: Option<NaiveDate>,

    /// Last day included (YYYY-MM-DD)
    #[arg(long)]
    to: Option<NaiveDate>,

    /// Group for t-test or ANOVA: `[NAME=]LOCATION[,LOCATION...]` (repeatable)
    #[arg(long)]
    group: Vec<String>,

    /// Factor label used in ANOVA output
    #[arg(long, default_value = "Location")]
    factor_name: String,

    /// Paired t-test
    #[arg(long)]
    paired: bool,

    /// Time bucket for trend analysis
    #[arg(long, value_enum, default_value = "monthly")]
    period: CliPeriod,

    /// Only fit a trend for this pollutant
    #[arg(long)]
    trend_pollutant: Option<String>,

    /// Significance level for all tests
    #[arg(long, default_value = "0.05")]
    alpha: f64,

    /// Seed for k-means initialization
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Write the JSON report into this directory
    #[arg(short = 'r', long)]
    emit_report: Option<PathBuf>,

    /// Base name of the emitted report file
    #[arg(long, default_value = "analysis")]
    report_name: String,
}

/// Initialize the tracing subscriber for logging.
///
/// When `json_output` is true, logging is completely disabled to ensure
/// only JSON is written to stdout.
fn init_logging(level: &str, quiet: bool, json_output: bool) {
    if json_output {
        return;
    }

    use tracing_subscriber::EnvFilter;

    let effective_level = if quiet { "warn" } else { level };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(effective_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    // .env must be loaded before the store path falls back to it
    dotenv().ok();

    let args = Args::parse();
    init_logging(&args.log_level, args.quiet, args.json);

    let store_path = resolve_store_path(args.store.clone());

    match &args.command {
        Command::InitStore { force, empty } => run_init_store(&store_path, *force, *empty, &args),
        Command::Ingest(ingest) => run_ingest(&store_path, ingest, &args),
        Command::Preview { input, rows } => run_preview(input, *rows, &args),
        Command::Analyze(analyze) => run_analyze(&store_path, analyze, &args),
    }
}

fn resolve_store_path(explicit: Option<PathBuf>) -> PathBuf {
    explicit
        .or_else(|| env::var("ENVIRODATA_STORE").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE))
}

fn open_store(path: &Path) -> Result<MemoryStore> {
    if !path.exists() {
        return Err(anyhow!(
            "Store not found: {}. Run `envirodata init-store` first",
            path.display()
        ));
    }
    Ok(MemoryStore::load(path)?)
}

fn run_init_store(path: &Path, force: bool, empty: bool, args: &Args) -> Result<()> {
    if path.exists() && !force {
        return Err(anyhow!(
            "Store already exists: {} (use --force to overwrite)",
            path.display()
        ));
    }

    let store = if empty {
        MemoryStore::new()
    } else {
        MemoryStore::with_default_catalog()
    };
    store.save(path)?;
    let pollutants = store.pollutant_types()?.len();
    info!("Store created: {}", path.display());

    if args.json {
        let summary = serde_json::json!({
            "store": path.display().to_string(),
            "pollutant_types": pollutants,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "Created store {} with {} pollutant types",
            path.display(),
            pollutants
        );
    }
    Ok(())
}

fn run_ingest(store_path: &Path, ingest: &IngestArgs, args: &Args) -> Result<()> {
    let mut store = open_store(store_path)?;

    let config = IngestConfig::builder()
        .create_missing_locations(!ingest.no_create_locations)
        .skip_invalid_rows(!ingest.strict)
        .skip_duplicate_rows(!ingest.keep_duplicates)
        .max_file_size_bytes(megabytes_to_bytes(ingest.max_file_size_mb)?)
        .build()?;

    let mut builder = IngestionPipeline::builder().config(config);
    if !args.quiet && !args.json {
        builder = builder.on_progress(|update| {
            info!(
                "[{:.0}%] {}: {}",
                update.progress * 100.0,
                update.stage.display_name(),
                update.message
            );
        });
    }
    let pipeline = builder.build()?;

    let upload = UploadedFile::from_path(&ingest.input)
        .with_context(|| format!("Input file not readable: {}", ingest.input.display()))?;
    let metadata = BatchMetadata {
        name: ingest.batch_name.clone(),
        sampling_date: ingest.sampling_date,
        description: ingest.description.clone(),
        project_name: ingest.project_name.clone(),
        project_code: ingest.project_code.clone(),
        study_type: ingest.study_type.into(),
    };

    let result = pipeline.process(&mut store, &args.owner, &upload, metadata);

    // The upload log is persisted even when the run failed
    store.save(store_path)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_ingestion_summary(&result, &ingest.input);
    }

    if !result.success {
        let message = result.error.as_deref().unwrap_or("Unknown error");
        error!("Ingestion failed: {}", message);
        return Err(anyhow!("Ingestion failed: {}", message));
    }
    Ok(())
}

fn megabytes_to_bytes(megabytes: u64) -> Result<u64> {
    megabytes
        .checked_mul(1024 * 1024)
        .ok_or_else(|| anyhow!("--max-file-size-mb is too large: {}", megabytes))
}

fn print_ingestion_summary(result: &IngestionResult, input: &Path) {
    println!();
    println!("{}", "=".repeat(80));
    if result.success {
        println!("INGESTION COMPLETE");
    } else {
        println!("INGESTION FAILED");
    }
    println!("{}", "=".repeat(80));
    println!();

    println!("Input:  {}", input.display());
    if let Some(ref batch) = result.batch {
        println!("Batch:  {} ({})", batch.metadata.name, batch.id);
    }
    println!("Status: {:?}", result.status);
    println!();

    println!("Rows:");
    println!("  Processed:  {}", result.processed);
    println!("  Successful: {}", result.successful);
    println!("  Failed:     {}", result.failed);
    println!("  Skipped:    {}", result.skipped);
    println!();

    if let Some(ref message) = result.error {
        println!("Error: {}", message);
        println!();
    }

    if !result.errors.is_empty() {
        println!("Row errors:");
        for message in result.errors.iter().take(10) {
            println!("  - {}", message);
        }
        if result.errors.len() > 10 {
            println!("  ... and {} more errors", result.errors.len() - 10);
        }
        println!();
    }

    if !result.warnings.is_empty() {
        println!("Warnings:");
        for warning in result.warnings.iter().take(10) {
            println!("  ! {}", warning);
        }
        if result.warnings.len() > 10 {
            println!("  ... and {} more warnings", result.warnings.len() - 10);
        }
        println!();
    }

    println!("Use --json for machine-readable output");
    println!("{}", "=".repeat(80));
}

/// Preview a file.
///
/// Uses `println!` for the table since it is the point of the command.
fn run_preview(input: &Path, rows: usize, args: &Args) -> Result<()> {
    let upload = UploadedFile::from_path(input)?;
    let preview = preview_file(&upload, rows)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&preview)?);
        return Ok(());
    }

    println!("\n{}", "=".repeat(80));
    println!("PREVIEW - {}", preview.filename);
    println!("{}\n", "=".repeat(80));

    println!("FILE OVERVIEW");
    println!("{}", "-".repeat(40));
    println!("  Format:  {:?}", preview.format);
    println!("  Rows:    {}", preview.row_count);
    println!("  Columns: {}", preview.columns.len());
    println!();

    println!("COLUMN MAPPING");
    println!("{}", "-".repeat(40));
    for assignment in &preview.column_mapping {
        println!("  {:<20} <- {}", assignment.field.to_string(), assignment.column);
    }
    println!();

    if preview.missing_required.is_empty() {
        println!("  All required columns found");
    } else {
        println!(
            "  WARNING: missing required columns: {}",
            preview.missing_required.join(", ")
        );
    }
    println!();

    println!("SAMPLE ROWS ({})", preview.sample_rows.len());
    println!("{}", "-".repeat(40));
    for row in &preview.sample_rows {
        let cells: Vec<String> = preview
            .columns
            .iter()
            .map(|column| {
                let value = row.get(column).cloned().flatten().unwrap_or_default();
                truncate_str(&value, 14)
            })
            .collect();
        println!("  {}", cells.join(" | "));
    }
    println!("{}", "=".repeat(80));
    Ok(())
}

/// Truncate a string to max characters with ellipsis
fn truncate_str(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

fn run_analyze(store_path: &Path, analyze: &AnalyzeArgs, args: &Args) -> Result<()> {
    let store = open_store(store_path)?;

    let config = AnalysisConfig::builder()
        .significance_level(analyze.alpha)
        .kmeans_seed(analyze.seed)
        .build()?;
    let analyzer = StatisticalAnalyzer::new(&store, args.owner.clone()).with_config(config)?;

    let requests = match &analyze.requests {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Reading request file {}", path.display()))?;
            serde_json::from_str::<Vec<AnalysisRequest>>(&content)
                .with_context(|| format!("Parsing request file {}", path.display()))?
        }
        None => build_requests(&store, &args.owner, analyze)?,
    };
    if requests.is_empty() {
        return Err(anyhow!("No analyses requested. Use --analysis or --requests"));
    }

    info!("Running {} analyses for owner '{}'", requests.len(), args.owner);
    let results = analyzer.run_all(&requests)?;
    let report = ReportGenerator::build_report(&results)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report_summary(&report);
    }

    if let Some(ref dir) = analyze.emit_report {
        let generator = ReportGenerator::new(dir.clone(), None);
        let report_path = generator.write_report_to_file(&report, &analyze.report_name)?;
        if !args.json {
            println!("Report written to: {}", report_path.display());
        }
    }
    Ok(())
}

/// Turn `--analysis` flags and name-based filters into requests.
fn build_requests(
    store: &MemoryStore,
    owner: &str,
    analyze: &AnalyzeArgs,
) -> Result<Vec<AnalysisRequest>> {
    let filter = build_filter(store, owner, analyze)?;
    let mut requests = Vec::new();

    for analysis in &analyze.analysis {
        let request = match analysis {
            CliAnalysis::Descriptive => AnalysisRequest::Descriptive {
                filter: filter.clone(),
            },
            CliAnalysis::TTest => {
                let mut groups = parse_groups(store, owner, &analyze.group, &filter)?;
                if groups.len() != 2 {
                    return Err(anyhow!(
                        "t-test needs exactly two --group options, got {}",
                        groups.len()
                    ));
                }
                let group2 = groups.remove(1).filter;
                let group1 = groups.remove(0).filter;
                AnalysisRequest::TTest {
                    group1,
                    group2,
                    paired: analyze.paired,
                }
            }
            CliAnalysis::Anova => {
                let groups = parse_groups(store, owner, &analyze.group, &filter)?;
                if groups.len() < 2 {
                    warn!("ANOVA requested with fewer than two groups");
                }
                AnalysisRequest::Anova {
                    groups,
                    factor_name: analyze.factor_name.clone(),
                }
            }
            CliAnalysis::Correlation => AnalysisRequest::Correlation {
                filter: filter.clone(),
            },
            CliAnalysis::Trend => AnalysisRequest::Trend {
                filter: filter.clone(),
                period: analyze.period.into(),
                pollutant: analyze.trend_pollutant.clone(),
            },
            CliAnalysis::Compliance => AnalysisRequest::Compliance {
                filter: filter.clone(),
            },
            CliAnalysis::Multivariate => AnalysisRequest::Multivariate {
                filter: filter.clone(),
            },
        };
        requests.push(request);
    }
    Ok(requests)
}

fn build_filter(store: &MemoryStore, owner: &str, analyze: &AnalyzeArgs) -> Result<ReadingFilter> {
    let mut filter = ReadingFilter::default();

    for name in &analyze.pollutant {
        let pollutant = store
            .find_pollutant_by_name(name)?
            .ok_or_else(|| anyhow!("Unknown pollutant: {}", name))?;
        filter.pollutant_types.push(pollutant.id);
    }
    filter.locations = location_ids(store, owner, &analyze.location)?;
    for name in &analyze.batch {
        let batch = store
            .batches()
            .iter()
            .find(|batch| batch.owner == owner && batch.metadata.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| anyhow!("Unknown batch: {}", name))?;
        filter.batches.push(batch.id);
    }

    filter.date_from = analyze
        .from
        .map(|day| Utc.from_utc_datetime(&day.and_time(NaiveTime::MIN)));
    if let Some(day) = analyze.to {
        let end = NaiveTime::from_hms_milli_opt(23, 59, 59, 999)
            .ok_or_else(|| anyhow!("Invalid end-of-day time"))?;
        filter.date_to = Some(Utc.from_utc_datetime(&day.and_time(end)));
    }
    Ok(filter)
}

fn location_ids(store: &MemoryStore, owner: &str, names: &[String]) -> Result<Vec<uuid::Uuid>> {
    names
        .iter()
        .map(|name| {
            store
                .find_location_by_name(owner, name.trim())?
                .map(|location| location.id)
                .ok_or_else(|| anyhow!("Unknown location: {}", name))
        })
        .collect()
}

/// Parse `[NAME=]LOCATION[,LOCATION...]` group specs on top of `base`.
fn parse_groups(
    store: &MemoryStore,
    owner: &str,
    specs: &[String],
    base: &ReadingFilter,
) -> Result<Vec<AnovaGroup>> {
    specs
        .iter()
        .map(|spec| {
            let (name, locations) = match spec.split_once('=') {
                Some((name, locations)) => (Some(name.trim().to_string()), locations),
                None => (None, spec.as_str()),
            };
            let names: Vec<String> = locations
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(String::from)
                .collect();
            if names.is_empty() {
                return Err(anyhow!("Group '{}' names no locations", spec));
            }

            let mut filter = base.clone();
            filter.locations = location_ids(store, owner, &names)?;
            Ok(AnovaGroup {
                name: name.or_else(|| Some(names.join(", "))),
                filter,
            })
        })
        .collect()
}

/// Print a human-readable summary of a report.
fn print_report_summary(report: &StatisticalReport) {
    println!();
    println!("{}", "=".repeat(80));
    println!("{}", report.title.to_uppercase());
    println!("Generated: {}", report.generated_at);
    println!("{}", "=".repeat(80));

    for section in &report.sections {
        println!();
        println!("{}", section.title.to_uppercase());
        println!("{}", "-".repeat(40));
        println!("  {}", section.summary);
        for highlight in &section.highlights {
            println!("  * {}", highlight);
        }
    }

    println!();
    println!("Use --json for machine-readable output");
    println!("Use --emit-report DIR to save the JSON report");
    println!("{}", "=".repeat(80));
}

#[cfg(test)]
mod tests {
    use super::*;
    use envirodata_processing::types::NewLocation;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_truncate_str() {
        assert_eq!(truncate_str("short", 10), "short");
        assert_eq!(truncate_str("a much longer value", 10), "a much ...");
    }

    #[test]
    fn test_megabytes_to_bytes() {
        assert_eq!(megabytes_to_bytes(10).unwrap(), 10 * 1024 * 1024);
        assert!(megabytes_to_bytes(u64::MAX / 1024).is_err());
    }

    #[test]
    fn test_resolve_store_path_prefers_flag() {
        let explicit = PathBuf::from("/tmp/explicit.json");
        assert_eq!(resolve_store_path(Some(explicit.clone())), explicit);
    }

    #[test]
    fn test_parse_groups_with_and_without_names() {
        let mut store = MemoryStore::with_default_catalog();
        for name in ["Site A", "Site B", "Site C"] {
            store
                .create_location(NewLocation {
                    owner: "alice".to_string(),
                    name: name.to_string(),
                    ..Default::default()
                })
                .unwrap();
        }

        let groups = parse_groups(
            &store,
            "alice",
            &["Urban=Site A, Site B".to_string(), "Site C".to_string()],
            &ReadingFilter::default(),
        )
        .unwrap();

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].name.as_deref(), Some("Urban"));
        assert_eq!(groups[0].filter.locations.len(), 2);
        assert_eq!(groups[1].name.as_deref(), Some("Site C"));

        let unknown = parse_groups(&store, "alice", &["Nowhere".to_string()], &ReadingFilter::default());
        assert!(unknown.is_err());
    }
}
