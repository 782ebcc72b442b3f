//! CLI subcommand implementations for the casewatch binary.

pub mod output;
pub mod run_cmd;
pub mod serve_cmd;
pub mod show_cmd;

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `casewatch=info`, or `debug` with `-v`.
/// Logs go to stderr so `--json` output on stdout stays parseable.
pub fn init_tracing(verbose: bool, json: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("casewatch={level},casewatch_runtime={level}"))
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    // A second init (tests, embedding) is not an error worth surfacing.
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
