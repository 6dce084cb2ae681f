//! Shared plumbing for the stage tools
//!
//! - [`run`]: builds the tokio runtime, installs the tracing subscriber and runs
//!   the tool's async entry point
//! - [`exec`]: shell command execution with captured output and deadlines
//! - [`trace`]: trace-report accumulator and sinks

pub mod config;
pub mod exec;
pub mod trace;

pub use config::{OutputConfig, RuntimeConfig};

fn init_tracing(output: &OutputConfig) {
    let directive = if output.quiet && output.verbose == 0 {
        "off"
    } else {
        output.log_directive()
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(directive));
    // stdout is reserved for reports, logs go to stderr
    if let Err(error) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
    {
        eprintln!("failed to initialize logging: {error}");
    }
}

/// Run `func` to completion on a freshly built runtime.
///
/// Returns `None` if the runtime could not be started or `func` failed; the
/// error is printed to stderr unless `output.quiet` is set. On success the
/// summary is printed (to stderr) when requested or when running verbose.
pub fn run<Fut, Summary, Error>(
    output: OutputConfig,
    runtime: RuntimeConfig,
    func: impl FnOnce() -> Fut,
) -> Option<Summary>
where
    Fut: std::future::Future<Output = Result<Summary, Error>>,
    Summary: std::fmt::Display,
    Error: std::fmt::Display,
{
    init_tracing(&output);
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if runtime.max_workers > 0 {
        builder.worker_threads(runtime.max_workers);
    }
    if runtime.max_blocking_threads > 0 {
        builder.max_blocking_threads(runtime.max_blocking_threads);
    }
    let rt = match builder.build() {
        Ok(rt) => rt,
        Err(error) => {
            if !output.quiet {
                eprintln!("failed to start tokio runtime: {error}");
            }
            return None;
        }
    };
    match rt.block_on(func()) {
        Ok(summary) => {
            if output.print_summary || output.verbose > 0 {
                eprintln!("{summary}");
            }
            Some(summary)
        }
        Err(error) => {
            tracing::error!("{error:#}");
            if !output.quiet {
                eprintln!("{error:#}");
            }
            None
        }
    }
}
