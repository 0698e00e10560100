// Copyright (c) The drover Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::OutputOpts;
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use drover_junit::{Report, merge, merge_times_only, parse_report};
use drover_runner::{
    config::{MatrixArgs, PlatformArgs},
    shard::{TimingIndex, effective_shard_count, prepend_always_run, shards_by_count},
};
use miette::{IntoDiagnostic, Result, WrapErr};
use serde::Serialize;
use std::fs;

/// A sharding test runner for remote device labs.
///
/// Test targets are balanced into shards using per-test timing from a
/// previous run's JUnit report; each shard runs as one remote job and the
/// resulting reports are merged back into one.
#[derive(Debug, Parser)]
#[command(version, bin_name = "drover")]
pub struct DroverApp {
    #[command(flatten)]
    output: OutputOpts,

    #[command(subcommand)]
    command: Command,
}

impl DroverApp {
    /// Executes the parsed command.
    pub fn exec(self) -> Result<()> {
        self.output.init();
        self.command.exec()
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Compute the shard assignment for a run
    ///
    /// Prints one JSON object per shard: its index, its estimated duration
    /// in seconds, and the targets assigned to it.
    Shard {
        #[command(flatten)]
        run_opts: RunOpts,
    },

    /// Print how many shards a run would use
    ShardCount {
        #[command(flatten)]
        run_opts: RunOpts,
    },

    /// Merge JUnit reports into a single report
    ///
    /// Suites with the same name are combined; aggregate counts are
    /// recomputed from the merged test cases.
    MergeReports {
        /// Where to write the merged report
        #[arg(long, short, value_name = "PATH")]
        output: Utf8PathBuf,

        /// The reports to merge, in shard order
        #[arg(required = true, value_name = "REPORT")]
        reports: Vec<Utf8PathBuf>,
    },

    /// Overlay a previous run's timings onto the current report
    ///
    /// Statuses come from the current report; per-test times come from the
    /// previous one where available. This keeps a timing baseline fresh
    /// across runs.
    MergeTimes {
        /// The current run's report
        #[arg(long, value_name = "PATH")]
        current: Utf8PathBuf,

        /// The previous run's report
        #[arg(long, value_name = "PATH")]
        previous: Utf8PathBuf,

        /// Where to write the result
        #[arg(long, short, value_name = "PATH")]
        output: Utf8PathBuf,
    },
}

impl Command {
    fn exec(self) -> Result<()> {
        match self {
            Command::Shard { run_opts } => {
                let (args, targets, timing) = run_opts.load()?;
                let count = effective_shard_count(&args, &targets, &timing);
                let shards = shards_by_count(&targets, &timing, count).into_diagnostic()?;
                let shards = prepend_always_run(shards, args.test_targets_always_run(), &timing);

                let assignments: Vec<ShardAssignment<'_>> = shards
                    .iter()
                    .enumerate()
                    .map(|(shard, assigned)| ShardAssignment {
                        shard,
                        time: assigned.time,
                        targets: &assigned.targets,
                    })
                    .collect();
                let json = serde_json::to_string_pretty(&assignments).into_diagnostic()?;
                println!("{json}");
                Ok(())
            }
            Command::ShardCount { run_opts } => {
                let (args, targets, timing) = run_opts.load()?;
                println!("{}", effective_shard_count(&args, &targets, &timing));
                Ok(())
            }
            Command::MergeReports { output, reports } => {
                let mut merged: Option<Report> = None;
                for path in &reports {
                    let report = read_report(path)?;
                    merged = Some(match &merged {
                        None => report,
                        Some(acc) => merge(acc, Some(&report)),
                    });
                }
                write_report(&output, &merged.unwrap_or_default())
            }
            Command::MergeTimes {
                current,
                previous,
                output,
            } => {
                let current = read_report(&current)?;
                let previous = read_report(&previous)?;
                write_report(&output, &merge_times_only(&current, Some(&previous)))
            }
        }
    }
}

/// One shard of the computed assignment, as printed by `drover shard`.
#[derive(Debug, Serialize)]
struct ShardAssignment<'a> {
    shard: usize,
    time: f64,
    targets: &'a [String],
}

#[derive(Debug, Args)]
struct RunOpts {
    /// Path to the run configuration file
    #[arg(long, short, value_name = "PATH")]
    config: Utf8PathBuf,

    /// File listing test targets, one per line
    #[arg(long, value_name = "PATH")]
    targets: Utf8PathBuf,

    /// JUnit report supplying per-test timings [default: the configured
    /// timing-report-path]
    #[arg(long, value_name = "PATH")]
    timing: Option<Utf8PathBuf>,
}

impl RunOpts {
    fn load(&self) -> Result<(PlatformArgs, Vec<String>, TimingIndex)> {
        let args = load_args(&self.config)?;
        let raw = fs::read_to_string(&self.targets)
            .into_diagnostic()
            .wrap_err_with(|| format!("failed to read test targets from `{}`", self.targets))?;
        let targets = parse_targets(&raw);
        let timing = load_timing(self.timing.as_deref(), &args)?;
        Ok((args, targets, timing))
    }
}

fn load_args(path: &Utf8Path) -> Result<PlatformArgs> {
    let settings = config::Config::builder()
        .add_source(config::File::from(path.as_std_path()))
        .build()
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to read configuration `{path}`"))?;
    settings
        .try_deserialize()
        .into_diagnostic()
        .wrap_err_with(|| format!("invalid configuration in `{path}`"))
}

fn parse_targets(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_owned)
        .collect()
}

/// Resolves the timing baseline for a run.
///
/// An explicitly passed report must exist. The path from the configuration
/// is allowed to be missing: a first run has no baseline yet, so every test
/// falls back to the default weight.
fn load_timing(explicit: Option<&Utf8Path>, args: &PlatformArgs) -> Result<TimingIndex> {
    let (path, required) = match explicit {
        Some(path) => (Some(path), true),
        None => (args.timing_report_path(), false),
    };
    let Some(path) = path else {
        return Ok(TimingIndex::new());
    };
    if !required && !path.exists() {
        tracing::info!(%path, "no timing report yet, using the default weight for every test");
        return Ok(TimingIndex::new());
    }
    let report = read_report(path)?;
    Ok(TimingIndex::from_report(&report))
}

fn read_report(path: &Utf8Path) -> Result<Report> {
    let raw = fs::read_to_string(path)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to read report from `{path}`"))?;
    parse_report(&raw)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to parse report `{path}`"))
}

fn write_report(path: &Utf8Path, report: &Report) -> Result<()> {
    let xml = report.to_xml_string().into_diagnostic()?;
    fs::write(path, xml)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to write report to `{path}`"))
}
