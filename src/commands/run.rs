use crate::config::Config;
use crate::suite::{ReportFormat, SuiteRunner, discover_suites, load_suite, render_report};
use anyhow::Result;
use console::style;
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Suite files, directories or glob patterns
    pub suites: Vec<String>,
    pub format: ReportFormat,
    pub filter: Option<String>,
}

/// Run every selected suite and print the report.
///
/// Returns whether all cases passed; failing cases are not an `Err`.
pub async fn cmd_run(config: &Config, options: &RunOptions) -> Result<bool> {
    let paths = discover_suites(&options.suites)?;

    // Parse everything up front so a typo in the last suite fails before any backend starts
    let suites = paths
        .iter()
        .map(|path| load_suite(path))
        .collect::<Result<Vec<_>>>()?;

    let runner = SuiteRunner::new(config.clone()).with_filter(options.filter.clone());
    let mut outcomes = Vec::with_capacity(suites.len());
    for suite in &suites {
        if options.format == ReportFormat::Human {
            println!(
                "{} {}",
                style("▶").cyan(),
                style(format!("Running {}", suite.name)).bold()
            );
        }
        outcomes.push(runner.run_suite(suite).await?);
    }

    print!("{}", render_report(&outcomes, options.format)?);
    if options.format == ReportFormat::Json {
        println!();
    }

    let failed: usize = outcomes.iter().map(|outcome| outcome.failed()).sum();
    info!("{} suite(s) finished, {} failed case(s)", outcomes.len(), failed);
    Ok(failed == 0)
}
