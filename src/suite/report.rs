use super::execute::{CaseStatus, SuiteOutcome};
use anyhow::Result;
use clap::ValueEnum;
use console::style;
use serde::Serialize;
use std::fmt::Write;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    #[default]
    Human,
    Json,
}

/// JSON report for CI integration
#[derive(Debug, Serialize)]
struct JsonReport<'a> {
    generated_at: String,
    passed: usize,
    failed: usize,
    suites: &'a [SuiteOutcome],
}

pub fn render_report(outcomes: &[SuiteOutcome], format: ReportFormat) -> Result<String> {
    match format {
        ReportFormat::Json => {
            let report = JsonReport {
                generated_at: chrono::Utc::now().to_rfc3339(),
                passed: outcomes.iter().map(SuiteOutcome::passed).sum(),
                failed: outcomes.iter().map(SuiteOutcome::failed).sum(),
                suites: outcomes,
            };
            Ok(serde_json::to_string_pretty(&report)?)
        }
        ReportFormat::Human => Ok(format_human_report(outcomes)),
    }
}

fn format_human_report(outcomes: &[SuiteOutcome]) -> String {
    let mut output = String::new();

    for suite in outcomes {
        let _ = writeln!(
            output,
            "\n📋 {} {}",
            style(&suite.suite).bold(),
            style(format!("({})", suite.path.display())).dim()
        );

        for case in &suite.cases {
            let elapsed = style(format!("({:.1}s)", case.duration_ms as f64 / 1000.0)).dim();
            match &case.status {
                CaseStatus::Passed => {
                    let _ = writeln!(output, "  {} {} {}", style("✓").green(), case.name, elapsed);
                }
                CaseStatus::Failed { message, diff, .. } => {
                    let _ = writeln!(
                        output,
                        "  {} {} {}",
                        style("✗").red(),
                        style(&case.name).red(),
                        elapsed
                    );
                    match diff {
                        Some(diff) => {
                            let headline = message.lines().next().unwrap_or_default();
                            let _ = writeln!(output, "      {}", headline);
                            for line in diff.lines() {
                                let _ = writeln!(output, "      {}", colorize_diff_line(line));
                            }
                        }
                        None => {
                            for line in message.lines() {
                                let _ = writeln!(output, "      {}", style(line).dim());
                            }
                        }
                    }
                }
            }
        }
    }

    let passed: usize = outcomes.iter().map(SuiteOutcome::passed).sum();
    let failed: usize = outcomes.iter().map(SuiteOutcome::failed).sum();
    let summary = format!("{} passed, {} failed", passed, failed);
    let _ = writeln!(
        output,
        "\n{}",
        if failed == 0 {
            style(summary).green().bold()
        } else {
            style(summary).red().bold()
        }
    );

    output
}

fn colorize_diff_line(line: &str) -> String {
    if line.starts_with("+++") || line.starts_with("---") {
        style(line).bold().to_string()
    } else if line.starts_with('+') {
        style(line).green().to_string()
    } else if line.starts_with('-') {
        style(line).red().to_string()
    } else if line.starts_with("@@") {
        style(line).cyan().to_string()
    } else {
        line.to_string()
    }
}
