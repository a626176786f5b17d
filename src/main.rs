use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use ntn_consensus::category::Granularity;
use ntn_consensus::config::{AppConfig, accuracy_fraction, validate_agreement_cut, validate_min_elapsed};
use ntn_consensus::consolidate::{AccuracyPolicy, ConsolidateParams};
use ntn_consensus::matrix::ConfusionMatrix;
use ntn_consensus::pipeline::{self, OutputTarget};
use ntn_consensus::reduce::VoteParams;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "ntn-consensus",
    version,
    about = "Volunteer classification consensus and model comparison"
)]
struct Cli {
    /// Config file (defaults to the XDG config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory input file names are resolved against
    #[arg(long, global = true)]
    input_dir: Option<PathBuf>,

    /// Directory output tables are written to
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    /// Category granularity for the whole run
    #[arg(short, long, value_enum, global = true)]
    granularity: Option<GranularityArg>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum GranularityArg {
    /// SKIMMING, CASCADE, THROUGHGOINGTRACK, STARTINGTRACK, STOPPINGTRACK
    #[value(alias = "5")]
    Fine,
    /// SKIMMING, CASCADE, TRACK
    #[value(alias = "3")]
    Coarse,
}

impl From<GranularityArg> for Granularity {
    fn from(arg: GranularityArg) -> Self {
        match arg {
            GranularityArg::Fine => Granularity::Fine,
            GranularityArg::Coarse => Granularity::Coarse,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Reduce raw classifications to one consensus row per subject
    Reduce {
        /// Classification export (CSV)
        classifications: PathBuf,

        /// Matched simulation table with truth labels (CSV)
        matched: PathBuf,

        /// Output file name, without .csv
        #[arg(short, long)]
        output: String,

        /// Minimum volunteer accuracy, percent (0-100)
        #[arg(short, long)]
        accuracy_cut: Option<u32>,
    },

    /// Join consensus with model predictions and score both against truth
    Consolidate {
        /// Consensus table from `reduce` (CSV)
        consensus: PathBuf,

        /// Matched model prediction table (CSV)
        predictions: PathBuf,

        /// Output file name, without .csv
        #[arg(short, long)]
        output: String,

        /// Minimum votes per subject (0 disables)
        #[arg(short, long)]
        retirement_limit: Option<u32>,

        /// Minimum agreement fraction (0.0-1.0)
        #[arg(short, long)]
        agreement_cut: Option<f64>,

        /// Leave accuracy empty instead of 0 when a side is unknown
        #[arg(long)]
        null_unknown_accuracy: bool,
    },

    /// Build consensus-vs-truth and model-vs-truth confusion matrices
    Matrix {
        /// Consolidated table from `consolidate` (CSV)
        consolidated: PathBuf,

        /// Output file name prefix
        #[arg(short, long)]
        output: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    };

    // Resolve settings: CLI > config > defaults
    let input_dir = cli.input_dir.unwrap_or_else(|| config.input_dir());
    let output_dir = cli.output_dir.unwrap_or_else(|| config.output_dir());
    let granularity = cli.granularity.map(Granularity::from).unwrap_or(config.granularity);
    log::info!("Granularity: {}", granularity.label());

    match cli.command {
        Commands::Reduce {
            classifications,
            matched,
            output,
            accuracy_cut,
        } => {
            let accuracy_threshold =
                accuracy_fraction(accuracy_cut.unwrap_or(config.reduce.accuracy_cut))?;
            let min_elapsed_secs = validate_min_elapsed(config.reduce.min_elapsed_secs)?;

            let job = pipeline::ReduceJob {
                annotations: pipeline::resolve(&input_dir, &classifications),
                matched: pipeline::resolve(&input_dir, &matched),
                output: OutputTarget {
                    dir: output_dir,
                    stem: output,
                },
                accuracy_threshold,
                votes: VoteParams {
                    granularity,
                    min_elapsed_secs,
                },
            };

            println!("Reducing... (this might take a couple seconds)");
            let report = pipeline::run_reduce(&job).context("Reduction failed")?;
            println!(
                "Reduction complete: {} subjects, {} votes counted from {} classifications",
                report.subjects, report.votes_counted, report.classifications
            );
            println!(
                "Volunteers: {} of {} trusted",
                report.trusted, report.annotators
            );
            println!(
                "Skipped {}: {} time/metadata, {} untrusted volunteer, {} unknown subject, {} unusable choice",
                report.skipped.total(),
                report.skipped.time,
                report.skipped.user,
                report.skipped.key,
                report.skipped.choice
            );
            if report.unreadable_subjects > 0 {
                println!(
                    "Matched table: {} rows with an unreadable subject_id ignored",
                    report.unreadable_subjects
                );
            }
            println!("Output saved at: {}", report.output.display());
        }

        Commands::Consolidate {
            consensus,
            predictions,
            output,
            retirement_limit,
            agreement_cut,
            null_unknown_accuracy,
        } => {
            let agreement_cut = validate_agreement_cut(
                agreement_cut.unwrap_or(config.consolidate.agreement_cut),
            )?;
            let retirement_limit =
                retirement_limit.unwrap_or(config.consolidate.retirement_limit);
            let unknown_accuracy = if null_unknown_accuracy {
                AccuracyPolicy::Null
            } else {
                config.consolidate.unknown_accuracy
            };

            let job = pipeline::ConsolidateJob {
                consensus: pipeline::resolve(&input_dir, &consensus),
                predictions: pipeline::resolve(&input_dir, &predictions),
                output: OutputTarget {
                    dir: output_dir,
                    stem: output,
                },
                params: ConsolidateParams {
                    granularity,
                    retirement_limit: Some(retirement_limit),
                    agreement_cut,
                    unknown_accuracy,
                },
            };

            println!("Consolidating... (this might take a few seconds)");
            let report = pipeline::run_consolidate(&job).context("Consolidation failed")?;
            println!(
                "Consolidation complete: {} rows ({} below retirement limit, {} below agreement cut)",
                report.rows, report.dropped_retired, report.dropped_agreement
            );
            if report.unreadable_keys > 0 {
                println!(
                    "Ignored {} rows with an unreadable subject_id",
                    report.unreadable_keys
                );
            }
            if report.consensus_only > 0 || report.prediction_only > 0 {
                println!(
                    "Unmatched: {} consensus-only, {} prediction-only subjects",
                    report.consensus_only, report.prediction_only
                );
            }
            println!("Output saved at: {}", report.output.display());
        }

        Commands::Matrix {
            consolidated,
            output,
        } => {
            let job = pipeline::MatrixJob {
                consolidated: pipeline::resolve(&input_dir, &consolidated),
                output: OutputTarget {
                    dir: output_dir,
                    stem: output,
                },
                granularity,
            };

            let report = pipeline::run_matrix(&job).context("Matrix generation failed")?;
            print_matrix("Volunteer consensus vs truth", &report.consensus);
            print_matrix("Model vs truth", &report.model);
            println!("Matrices saved at:");
            println!("  {}", report.consensus_output.display());
            println!("  {}", report.model_output.display());
        }
    }

    Ok(())
}

/// Print raw counts followed by the column-normalized percentages.
fn print_matrix(title: &str, matrix: &ConfusionMatrix) {
    println!("{title} (rows = predicted, columns = truth)");
    println!("{}", "-".repeat(title.len()));
    print!("{matrix}");
    println!();

    let totals = matrix.column_totals();
    for (c, row) in matrix.categories().iter().zip(matrix.percentages()) {
        let cells: Vec<String> = row.iter().map(|p| format!("{p:>6.1}%")).collect();
        println!("{:<20} {}", c.display_name(), cells.join(" "));
    }
    let totals: Vec<String> = totals.iter().map(|t| format!("{t:>7}")).collect();
    println!("{:<20} {}", "n", totals.join(" "));
    println!();
}
