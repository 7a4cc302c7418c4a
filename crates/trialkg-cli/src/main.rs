//! trialkg CLI
//!
//! - `build-graph`: load the configured sources and report graph statistics
//! - `featurize`: one trial (parsed-trial JSON, registry study JSON, or a
//!   registry fetch by NCT id) to arm records
//! - `batch`: a JSONL file of trials, featurized in parallel

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use colored::Colorize;
use serde_json::Value;
use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use trialkg_features::{ArmRecord, TrialPipeline};
use trialkg_graph::{BackgroundKg, KnowledgeGraphBuilder};
use trialkg_ingest::{parse_study, Trial};

mod config;
#[cfg(feature = "registry-http")]
mod registry_http;

use config::TrialkgConfig;

#[derive(Parser)]
#[command(name = "trialkg")]
#[command(
    author,
    version,
    about = "Trial knowledge-graph construction and per-arm feature extraction"
)]
struct Cli {
    /// Configuration file (default: ./trialkg.toml when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory; overrides $TRIALKG_DATA_DIR and the config file.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// More logging (-v debug, -vv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Errors only.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the background knowledge graph and print its statistics.
    BuildGraph {
        /// Print statistics as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Featurize one trial.
    Featurize {
        /// Trial JSON (parsed-trial shape or registry study). `-` reads stdin.
        #[arg(required_unless_present = "nct")]
        input: Option<PathBuf>,

        /// Fetch the study from the public registry instead.
        #[arg(long, conflicts_with = "input")]
        nct: Option<String>,

        /// Output file (default: stdout).
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Attach eligibility-criteria concepts.
        #[arg(long)]
        use_population: bool,
    },

    /// Featurize a JSONL file of trials in parallel.
    Batch {
        input: PathBuf,

        /// Output JSONL file (default: stdout).
        #[arg(short, long)]
        out: Option<PathBuf>,

        #[arg(long)]
        use_population: bool,
    },
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => tracing::Level::ERROR,
        (false, 0) => tracing::Level::INFO,
        (false, 1) => tracing::Level::DEBUG,
        (false, _) => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn build_background(config: &TrialkgConfig) -> Result<Arc<BackgroundKg>> {
    KnowledgeGraphBuilder::new(config.sources.clone())
        .build_shared()
        .context("background knowledge graph build failed")
}

/// Registry study documents are recognized by their `protocolSection`.
fn trial_from_value(value: Value) -> Result<Trial> {
    let trial = if value.get("protocolSection").is_some() {
        parse_study(&value)?
    } else {
        Trial::from_value(value)?
    };
    Ok(trial)
}

fn read_input(input: &Path) -> Result<String> {
    if input == Path::new("-") {
        let mut text = String::new();
        io::Read::read_to_string(&mut io::stdin(), &mut text)?;
        return Ok(text);
    }
    fs::read_to_string(input).with_context(|| format!("failed to read {}", input.display()))
}

#[cfg(feature = "registry-http")]
fn fetch_trial(nct: &str) -> Result<Trial> {
    let study = registry_http::fetch_study(nct, std::time::Duration::from_secs(30))?;
    trial_from_value(study)
}

#[cfg(not(feature = "registry-http"))]
fn fetch_trial(nct: &str) -> Result<Trial> {
    Err(anyhow!(
        "cannot fetch {nct}: built without the `registry-http` feature"
    ))
}

fn output(out: Option<&Path>) -> Result<Box<dyn Write>> {
    Ok(match out {
        Some(path) => Box::new(io::BufWriter::new(
            fs::File::create(path).with_context(|| format!("failed to create {}", path.display()))?,
        )),
        None => Box::new(io::stdout().lock()),
    })
}

fn cmd_build_graph(config: &TrialkgConfig, json: bool) -> Result<()> {
    let started = Instant::now();
    let kg = build_background(config)?;
    let stats = kg.stats();
    if json {
        println!("{}", serde_json::to_string_pretty(stats)?);
        return Ok(());
    }
    eprintln!(
        "{} background graph in {:.2}s",
        "built".green().bold(),
        started.elapsed().as_secs_f64()
    );
    println!("  nodes            {}", stats.nodes);
    println!("  edges            {}", stats.edges);
    println!("    from sources   {}", stats.source_edges);
    println!("    hierarchy      {}", stats.hierarchy_edges);
    println!("    inferred       {}", stats.inferred_edges);
    println!("  merge edges      {}", stats.merge_edges);
    println!("  entity classes   {}", stats.classes);
    println!("  compact ids      {}", stats.compact_ids);
    Ok(())
}

fn cmd_featurize(
    config: &TrialkgConfig,
    input: Option<&Path>,
    nct: Option<&str>,
    out: Option<&Path>,
) -> Result<()> {
    let trial = match (input, nct) {
        (_, Some(nct)) => fetch_trial(nct)?,
        (Some(input), None) => {
            let value: Value = serde_json::from_str(&read_input(input)?)
                .with_context(|| format!("{} is not JSON", input.display()))?;
            trial_from_value(value)?
        }
        (None, None) => return Err(anyhow!("either an input file or --nct is required")),
    };

    let kg = build_background(config)?;
    let pipeline = TrialPipeline::from_config(kg, &config.pipeline)?;
    let nct_id = trial.nct_id.clone();
    let records: Vec<ArmRecord> = pipeline
        .process(trial)
        .with_context(|| format!("featurizing {nct_id} failed"))?;

    let mut w = output(out)?;
    serde_json::to_writer_pretty(&mut w, &records)?;
    writeln!(w)?;
    w.flush()?;
    eprintln!(
        "{} {} ({} arms)",
        "ok".green().bold(),
        nct_id,
        records.len()
    );
    Ok(())
}

fn cmd_batch(config: &TrialkgConfig, input: &Path, out: Option<&Path>) -> Result<()> {
    let file = fs::File::open(input).with_context(|| format!("failed to open {}", input.display()))?;
    let mut trials = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: not JSON", input.display(), idx + 1))?;
        match trial_from_value(value) {
            Ok(trial) => trials.push(trial),
            Err(e) => eprintln!(
                "{} {}:{}: {e:#}",
                "skipped".yellow().bold(),
                input.display(),
                idx + 1
            ),
        }
    }

    let kg = build_background(config)?;
    let pipeline = TrialPipeline::from_config(kg, &config.pipeline)?;
    let items = pipeline.process_batch(trials);

    let mut w = output(out)?;
    for item in &items {
        serde_json::to_writer(&mut w, item)?;
        writeln!(w)?;
    }
    w.flush()?;

    let failed = items.iter().filter(|i| !i.is_ok()).count();
    let summary = format!("{} trials, {} failed", items.len(), failed);
    if failed == 0 {
        eprintln!("{} {summary}", "ok".green().bold());
    } else {
        eprintln!("{} {summary}", "done".yellow().bold());
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let mut config = TrialkgConfig::load(cli.config.as_deref(), cli.data_dir.clone())?;

    match cli.command {
        Commands::BuildGraph { json } => cmd_build_graph(&config, json),
        Commands::Featurize {
            input,
            nct,
            out,
            use_population,
        } => {
            config.pipeline.use_population |= use_population;
            cmd_featurize(&config, input.as_deref(), nct.as_deref(), out.as_deref())
        }
        Commands::Batch {
            input,
            out,
            use_population,
        } => {
            config.pipeline.use_population |= use_population;
            cmd_batch(&config, &input, out.as_deref())
        }
    }
}
