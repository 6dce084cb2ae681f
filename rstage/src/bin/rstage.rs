use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use common::trace::{JsonLinesSink, LogSink, TraceEvent, TraceRecord, TraceSink};
use rstage::{ChecksumType, Config, Direction, Engine, FileDescriptor, Summary, TypedError};
use tracing::instrument;

/// Exit code of a batch that ran but left a file failed
const TRANSFER_ERROR_EXIT_CODE: i32 = 12;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "rstage",
    version,
    about = "Stage job input and output files through an external copy tool",
    long_about = "`rstage` copies the files listed in a JSON manifest between remote storage and the job's working directory using `xrdcp` (or a compatible tool).

The manifest is a JSON array of file descriptors. The same array, with each file's `status` and `status_code` filled in, is written to --report (stdout by default) whether the batch succeeds or not.

EXAMPLE:
    # Stage inputs into the current directory, report per-file traces to a log
    rstage in --manifest inputs.json --trace-log traces.jsonl --summary

    # Upload outputs, tolerating storage that cannot checksum uploads
    rstage out --manifest outputs.json --tolerate-unsupported-checksum

EXIT STATUS:
    0   every file transferred (or left for direct access)
    12  a transfer failed; diagnostic and error code are printed to stderr
    1   any other failure (bad manifest, unreadable setup, ...)"
)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand, Debug, Clone)]
enum Command {
    /// Copy input files from remote storage into the working directory
    In(StageArgs),
    /// Copy output files from the working directory to remote storage
    Out(StageArgs),
}

#[derive(clap::Args, Debug, Clone)]
struct StageArgs {
    // Input & output
    /// JSON array of files to stage
    #[arg(long, value_name = "FILE", help_heading = "Input & output")]
    manifest: std::path::PathBuf,

    /// Write the updated manifest here instead of stdout
    #[arg(long, value_name = "FILE", help_heading = "Input & output")]
    report: Option<std::path::PathBuf>,

    /// Append trace reports to this file as JSON lines instead of logging them
    #[arg(long, value_name = "FILE", help_heading = "Input & output")]
    trace_log: Option<std::path::PathBuf>,

    /// Stage-in destination for files without their own working directory
    #[arg(long, value_name = "DIR", default_value = ".", help_heading = "Input & output")]
    workdir: std::path::PathBuf,

    // Copy tool
    /// Copy tool to run
    #[arg(
        long,
        value_name = "PROGRAM",
        default_value = "xrdcp",
        env = "RSTAGE_COPY_TOOL",
        help_heading = "Copy tool"
    )]
    copy_tool: String,

    /// Shell script sourced before every copy tool invocation
    #[arg(long, value_name = "SCRIPT", help_heading = "Copy tool")]
    setup: Option<std::path::PathBuf>,

    /// Checksum to request from the copy tool
    #[arg(
        long,
        value_name = "TYPE",
        default_value_t = ChecksumType::Adler32,
        help_heading = "Copy tool"
    )]
    checksum_type: ChecksumType,

    // Transfer policy
    /// Leave input files marked for direct access in place (stage-in only)
    #[arg(long, help_heading = "Transfer policy")]
    direct_access: bool,

    /// Site reported in traces, defaults to the first file's storage endpoint
    #[arg(
        long,
        value_name = "SITE",
        env = "DQ2_LOCAL_SITE_ID",
        help_heading = "Transfer policy"
    )]
    local_site: Option<String>,

    /// Attempt every file instead of stopping at the first failure
    #[arg(long, help_heading = "Transfer policy")]
    keep_going: bool,

    /// Let copies run without the size-based deadline
    #[arg(long, help_heading = "Transfer policy")]
    no_timeout: bool,

    /// Do not compare reported checksum and size with the manifest
    #[arg(long, help_heading = "Transfer policy")]
    no_verify: bool,

    /// Count uploads the destination could not checksum as transferred (stage-out only)
    #[arg(long, help_heading = "Transfer policy")]
    tolerate_unsupported_checksum: bool,

    // Progress & output
    /// Verbose level (implies "summary"): -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, help_heading = "Progress & output")]
    verbose: u8,

    /// Print summary at the end
    #[arg(long, help_heading = "Progress & output")]
    summary: bool,

    /// Quiet mode, don't report errors
    #[arg(short = 'q', long = "quiet", help_heading = "Progress & output")]
    quiet: bool,

    // Advanced settings
    /// Number of worker threads, 0 means number of cores
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_workers: usize,

    /// Number of blocking worker threads, 0 means Tokio runtime default (512)
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_blocking_threads: usize,
}

impl StageArgs {
    fn config(&self) -> Config {
        Config {
            copy_tool: self.copy_tool.clone(),
            setup: self.setup.as_ref().map(|script| {
                format!(
                    "source {}",
                    common::exec::shell_quote(&script.to_string_lossy())
                )
            }),
            checksum_type: self.checksum_type,
            allow_direct_access: self.direct_access,
            workdir: self.workdir.clone(),
            local_site: self.local_site.clone(),
            enforce_timeout: !self.no_timeout,
            fail_early: !self.keep_going,
            verify_checksum: !self.no_verify,
            tolerate_unsupported_checksum: self.tolerate_unsupported_checksum,
        }
    }
}

/// Result of a batch that ran to completion, possibly with a failed file
struct Outcome {
    summary: Summary,
    failure: Option<TypedError>,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.summary)
    }
}

#[instrument(skip(args))]
async fn async_main(direction: Direction, args: StageArgs) -> Result<Outcome> {
    let config = args.config();
    config
        .validate()
        .map_err(|error| anyhow!("invalid configuration: {error}"))?;
    if let Some(setup) = &args.setup {
        tokio::fs::metadata(setup)
            .await
            .with_context(|| format!("cannot access setup script {setup:?}"))?;
    }
    let manifest = tokio::fs::read_to_string(&args.manifest)
        .await
        .with_context(|| format!("failed reading manifest {:?}", &args.manifest))?;
    let mut files: Vec<FileDescriptor> = serde_json::from_str(&manifest)
        .with_context(|| format!("failed parsing manifest {:?}", &args.manifest))?;
    tracing::info!("{direction} of {} file(s)", files.len());
    let sink: Arc<dyn TraceSink> = match &args.trace_log {
        Some(path) => Arc::new(JsonLinesSink::create(path)?),
        None => Arc::new(LogSink),
    };
    let event_type = match direction {
        Direction::In => "get_sm",
        Direction::Out => "put_sm",
    };
    let mut trace = TraceEvent::with_record(
        sink,
        TraceRecord {
            event_type: Some(event_type.to_string()),
            ..Default::default()
        },
    );
    let engine = Engine::new(config);
    let result = match direction {
        Direction::In => engine.copy_in(&mut files, &mut trace).await,
        Direction::Out => engine.copy_out(&mut files, &mut trace).await,
    };
    tracing::info!("sent {} trace report(s)", trace.sent());
    let report = serde_json::to_string_pretty(&files).context("failed to serialize report")?;
    match &args.report {
        Some(path) => tokio::fs::write(path, report + "\n")
            .await
            .with_context(|| format!("failed writing report {path:?}"))?,
        None => println!("{report}"),
    }
    Ok(Outcome {
        summary: Summary::from_files(&files),
        failure: result.err(),
    })
}

fn main() -> Result<()> {
    let args = Args::parse();
    let (direction, stage_args) = match args.command {
        Command::In(stage_args) => (Direction::In, stage_args),
        Command::Out(stage_args) => (Direction::Out, stage_args),
    };
    let func = {
        let stage_args = stage_args.clone();
        || async_main(direction, stage_args)
    };
    let output = common::OutputConfig {
        quiet: stage_args.quiet,
        verbose: stage_args.verbose,
        print_summary: stage_args.summary,
    };
    let runtime = common::RuntimeConfig {
        max_workers: stage_args.max_workers,
        max_blocking_threads: stage_args.max_blocking_threads,
    };
    match common::run(output, runtime, func) {
        None => std::process::exit(1),
        Some(Outcome {
            failure: Some(error),
            ..
        }) => {
            if !stage_args.quiet {
                eprintln!("{direction} failed: {error}");
            }
            std::process::exit(TRANSFER_ERROR_EXIT_CODE);
        }
        Some(_) => Ok(()),
    }
}
