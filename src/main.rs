//! `gmac`: command-line driver for the upper-limb-use pipeline.
//!
//! Reads `<data>/control/{left,right}.csv` and
//! `<data>/patient/{affected,unaffected}.csv` and writes one CSV per limb
//! into the output directory.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use gmac_sensing::dataset::{read_all, LimbRecordings};
use gmac_sensing::features::{RandomTieBreak, TieBreak};
use gmac_sensing::pipeline::{
    extract_features, limb_accl_magnitude, limb_counts, rater_autocorrelation, summarize,
    write_subject_series, PipelineConfig,
};
use gmac_sensing::tilt::tilt_for_all_subjects;
use gmac_sensing::types::{Limb, SubjectId, TimeSeries};

#[derive(Parser, Debug)]
#[command(name = "gmac", version, about = "Upper-limb use analysis of wrist IMU recordings")]
struct Cli {
    /// Directory holding `control/` and `patient/` recordings.
    #[arg(long, short = 'd')]
    data: PathBuf,

    /// Directory the output CSV files are written to.
    #[arg(long, short = 'o', default_value = "out")]
    out: PathBuf,

    /// JSON pipeline configuration; defaults are used when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Windowed features and use labels per segment.
    Features {
        /// Seed for the rater tie-break; random when omitted.
        #[arg(long)]
        seed: Option<u64>,
        /// Add a `uluse_w` column smoothed over this many samples.
        #[arg(long)]
        label_window: Option<usize>,
    },
    /// Activity counts per subject recording.
    Counts {
        /// Smoothed accelerometer magnitude instead of IMU vector-magnitude counts.
        #[arg(long)]
        accl: bool,
    },
    /// Autocorrelation of the rater labels.
    Autocorr,
    /// Forearm tilt from one accelerometer axis.
    Tilt {
        /// Accelerometer channel pointing along the forearm.
        #[arg(long, default_value = "ax")]
        channel: String,
        /// Smoothing window in samples.
        #[arg(long, default_value_t = 10)]
        window: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(
            cli.log_level
                .parse::<tracing_subscriber::filter::LevelFilter>()
                .unwrap_or(tracing_subscriber::filter::LevelFilter::INFO),
        )
        .with_target(false)
        .init();

    info!("gmac v{}", gmac_sensing::VERSION);

    let config = match cli.config.as_deref() {
        Some(path) => PipelineConfig::from_path(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    let raw = read_all(&cli.data)
        .with_context(|| format!("reading recordings under {}", cli.data.display()))?;
    std::fs::create_dir_all(&cli.out)
        .with_context(|| format!("creating output directory {}", cli.out.display()))?;

    match cli.command {
        Command::Features { seed, label_window } => {
            let config = PipelineConfig {
                label_window: label_window.or(config.label_window),
                ..config
            };
            run_features(&raw, &config, seed, &cli.out)
        }
        Command::Counts { accl } => run_counts(&raw, &config, accl, &cli.out),
        Command::Autocorr => run_autocorr(&raw, &config, &cli.out),
        Command::Tilt { channel, window } => run_tilt(&raw, &config, &channel, window, &cli.out),
    }
}

fn create_output(dir: &Path, limb: Limb, suffix: &str) -> Result<BufWriter<File>> {
    let path = dir.join(format!("{limb}_{suffix}.csv"));
    info!("writing {}", path.display());
    let file = File::create(&path).with_context(|| format!("creating {}", path.display()))?;
    Ok(BufWriter::new(file))
}

fn run_features(
    raw: &BTreeMap<Limb, LimbRecordings>,
    config: &PipelineConfig,
    seed: Option<u64>,
    out: &Path,
) -> Result<()> {
    let dataset = summarize(raw, config).context("segmenting recordings")?;
    let mut tie_break: Box<dyn TieBreak> = match seed {
        Some(seed) => Box::new(RandomTieBreak(StdRng::seed_from_u64(seed))),
        None => Box::new(RandomTieBreak::from_thread_rng()),
    };
    let tables = extract_features(&dataset, config, tie_break.as_mut()).context("extracting features")?;
    for (limb, table) in tables {
        table
            .write_csv(create_output(out, limb, "features")?)
            .with_context(|| format!("writing {limb} features"))?;
    }
    Ok(())
}

fn run_counts(
    raw: &BTreeMap<Limb, LimbRecordings>,
    config: &PipelineConfig,
    accl: bool,
    out: &Path,
) -> Result<()> {
    for (&limb, recordings) in raw {
        let (series, suffix) = if accl {
            let mags = limb_accl_magnitude(recordings, config)
                .with_context(|| format!("accelerometer magnitude of {limb}"))?;
            (mags, "accl_magnitude")
        } else {
            let counts = limb_counts(recordings, config)
                .with_context(|| format!("vector magnitude counts of {limb}"))?;
            let series = counts
                .into_iter()
                .map(|(subject, vm)| Ok((subject, vm.to_series()?)))
                .collect::<Result<BTreeMap<SubjectId, TimeSeries>>>()?;
            (series, "counts")
        };
        write_subject_series(&series, create_output(out, limb, suffix)?)
            .with_context(|| format!("writing {limb} {suffix}"))?;
    }
    Ok(())
}

fn run_autocorr(raw: &BTreeMap<Limb, LimbRecordings>, config: &PipelineConfig, out: &Path) -> Result<()> {
    let dataset = summarize(raw, config).context("segmenting recordings")?;
    let summaries = rater_autocorrelation(&dataset, config).context("autocorrelation")?;
    for (limb, summary) in summaries {
        info!(
            "{limb}: {} segments retained, {} discarded",
            summary.retained, summary.discarded
        );
        summary
            .write_csv(create_output(out, limb, "autocorr")?)
            .with_context(|| format!("writing {limb} autocorrelation"))?;
    }
    Ok(())
}

fn run_tilt(
    raw: &BTreeMap<Limb, LimbRecordings>,
    config: &PipelineConfig,
    channel: &str,
    window: usize,
    out: &Path,
) -> Result<()> {
    let dataset = summarize(raw, config).context("segmenting recordings")?;
    for limb in dataset.limbs() {
        let tilts = tilt_for_all_subjects(&dataset, limb, channel, window, config.causal)
            .with_context(|| format!("tilt of {limb}"))?;
        write_subject_series(&tilts, create_output(out, limb, "tilt")?)
            .with_context(|| format!("writing {limb} tilt"))?;
    }
    Ok(())
}
