//! casemerge CLI
//!
//! Sorts CSV case files and combines several of them by key.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use casemerge::combine::{Combine, CombineMode, DatasetOpener, SourceHandle, SourceRole, SourceSpec};
use casemerge::config::{MemoryPolicy, SortConfig};
use casemerge::error::ExecError;
use casemerge::executor::sort::sort_dataset;
use casemerge::executor::{CaseReader, CaseWriter, Dataset};
use casemerge::io::{open_csv, CsvCaseWriter, CsvOpener};
use casemerge::key::SortDirection;
use clap::{Parser, Subcommand};
use log::{LevelFilter, Log, Metadata, Record};
use serde::Deserialize;

#[derive(Parser)]
#[command(name = "casemerge")]
#[command(about = "Sort and combine case files")]
struct Cli {
    /// More diagnostics on stderr (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sort a CSV file by one or more variables
    Sort {
        input: PathBuf,
        /// Sort key entry, NAME or NAME:A / NAME:D
        #[arg(long, required = true, num_args = 1..)]
        by: Vec<String>,
        /// Maximum number of cases held in memory per run
        #[arg(long)]
        buffers: Option<usize>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Combine the files named in a JSON job description
    Combine {
        job: PathBuf,
        /// File standing in for `*` sources
        #[arg(long)]
        active: Option<PathBuf>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Job {
    mode: CombineMode,
    sources: Vec<JobSource>,
    #[serde(default)]
    by: Vec<String>,
    first: Option<String>,
    last: Option<String>,
    #[serde(default)]
    drop: Vec<String>,
    #[serde(default)]
    keep: Vec<String>,
    buffers: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct JobSource {
    file: String,
    #[serde(default)]
    role: SourceRole,
    #[serde(default)]
    rename: BTreeMap<String, String>,
    #[serde(default)]
    drop: Vec<String>,
    #[serde(default)]
    keep: Vec<String>,
    #[serde(rename = "in")]
    in_var: Option<String>,
    #[serde(default)]
    sort: bool,
    encoding: Option<String>,
}

impl JobSource {
    fn spec(&self) -> SourceSpec {
        let mut spec = SourceSpec::new(SourceHandle::parse(&self.file));
        spec.role = self.role;
        spec.rename = self
            .rename
            .iter()
            .map(|(from, to)| (from.clone(), to.clone()))
            .collect();
        spec.drop = self.drop.clone();
        spec.keep = self.keep.clone();
        spec.in_var = self.in_var.clone();
        spec.sort = self.sort;
        spec
    }
}

/// CSV opener that applies the job's per-file encoding overrides.
struct JobOpener {
    inner: CsvOpener,
    encodings: BTreeMap<String, String>,
}

impl DatasetOpener for JobOpener {
    fn open(&mut self, name: &str) -> Result<Dataset, ExecError> {
        let mut dataset = self.inner.open(name)?;
        if let Some(encoding) = self.encodings.get(name) {
            dataset.dict.set_encoding(encoding);
        }
        Ok(dataset)
    }
}

/// Sink for the `log` facade. The binary logs through `log` directly, so
/// its own messages follow `-v` at run time; the library's messages also
/// need the matching `log_*` cargo feature to be compiled in.
struct StderrLogger {
    level: LevelFilter,
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    if log::set_boxed_logger(Box::new(StderrLogger { level })).is_ok() {
        log::set_max_level(level);
    }
}

fn parse_by(entries: &[String]) -> Result<Vec<(String, SortDirection)>, ExecError> {
    entries
        .iter()
        .map(|entry| match entry.split_once(':') {
            Some((name, suffix)) => SortDirection::from_suffix(suffix)
                .map(|d| (name.to_string(), d))
                .ok_or_else(|| ExecError::Config(format!("bad sort direction in {entry:?}"))),
            None => Ok((entry.clone(), SortDirection::Ascending)),
        })
        .collect()
}

fn sort_config(buffers: Option<usize>) -> Result<SortConfig, ExecError> {
    let mut config = SortConfig::from_env()?;
    if let Some(n) = buffers {
        config.policy = MemoryPolicy::FixedSizeLimit(n);
    }
    Ok(config)
}

fn output_stream(path: Option<&Path>) -> Result<Box<dyn Write>, ExecError> {
    Ok(match path {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(io::stdout().lock()),
    })
}

fn write_dataset(mut dataset: Dataset, output: Option<&Path>) -> Result<u64, ExecError> {
    let mut writer = CsvCaseWriter::new(output_stream(output)?, &dataset.dict)?;
    let mut count = 0;
    while let Some(case) = dataset.reader.next()? {
        writer.write(case)?;
        count += 1;
    }
    writer.finish()?;
    Ok(count)
}

fn run_sort(
    input: &Path,
    by: &[String],
    buffers: Option<usize>,
    output: Option<&Path>,
) -> Result<(), ExecError> {
    let by = parse_by(by)?;
    let config = sort_config(buffers)?;
    let sorted = sort_dataset(open_csv(input)?, &by, &config)?;
    let count = write_dataset(sorted, output)?;
    log::info!("sorted {count} cases");
    Ok(())
}

fn run_combine(job_path: &Path, active: Option<&Path>, output: Option<&Path>) -> Result<(), ExecError> {
    let text = std::fs::read_to_string(job_path)?;
    let job: Job = serde_json::from_str(&text)
        .map_err(|e| ExecError::Config(format!("{}: {e}", job_path.display())))?;
    let base = job_path.parent().unwrap_or_else(|| Path::new("."));

    let mut combine = Combine::new(job.mode)
        .by(&parse_by(&job.by)?)
        .drop(&job.drop)
        .keep(&job.keep)
        .sort_config(sort_config(job.buffers)?);
    if let Some(name) = &job.first {
        combine = combine.first(name);
    }
    if let Some(name) = &job.last {
        combine = combine.last(name);
    }
    let mut encodings = BTreeMap::new();
    for source in &job.sources {
        if let Some(encoding) = &source.encoding {
            encodings.insert(source.file.clone(), encoding.clone());
        }
        combine = combine.source(source.spec());
    }

    let active = active.map(open_csv).transpose()?;
    let mut opener = JobOpener {
        inner: CsvOpener::new(base),
        encodings,
    };
    let reader = combine.execute(active, &mut opener)?;
    let mut writer = CsvCaseWriter::new(output_stream(output)?, reader.dictionary())?;
    let (_, warnings) = reader.execute_into(&mut writer)?;
    writer.finish()?;
    for warning in warnings {
        eprintln!("casemerge: warning: {warning}");
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match &cli.command {
        Commands::Sort {
            input,
            by,
            buffers,
            output,
        } => run_sort(input, by, *buffers, output.as_deref()),
        Commands::Combine {
            job,
            active,
            output,
        } => run_combine(job, active.as_deref(), output.as_deref()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("casemerge: {e}");
            ExitCode::FAILURE
        }
    }
}
