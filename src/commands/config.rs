use crate::config::{BackendKind, Config, ConfigInput, Readiness};
use crate::suite::load_suite;
use anyhow::{Result, anyhow};
use itertools::Itertools;
use std::path::Path;

/// Config subcommands
#[derive(Debug, Clone, clap::Subcommand)]
pub enum ConfigCommands {
    /// Get a configuration value
    Get {
        /// Configuration key (e.g., backend.kind, cli.executable)
        key: String,
    },

    /// Print the fully resolved configuration
    List {
        /// Output format
        #[arg(long, value_enum, default_value = "yaml")]
        format: OutputFormat,
    },

    /// Check that suite files parse and their version branches are well-formed
    Validate {
        /// Suite files to check
        #[arg(required = true)]
        suites: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum OutputFormat {
    Json,
    Yaml,
}

/// Execute config command
pub async fn cmd_config(config: &Config, subcommand: Option<ConfigCommands>) -> Result<()> {
    match subcommand {
        Some(ConfigCommands::Get { key }) => {
            println!("{}", get_config_value(config, &key)?);
            Ok(())
        }
        Some(ConfigCommands::List { format }) => {
            print!("{}", render_config(config, format)?);
            Ok(())
        }
        Some(ConfigCommands::Validate { suites }) => {
            for suite in &suites {
                let loaded = load_suite(Path::new(suite))?;
                println!(
                    "✅ {} is valid ({} case(s))",
                    suite,
                    loaded.cases.len()
                );
            }
            Ok(())
        }
        None => {
            print!("{}", render_config(config, OutputFormat::Yaml)?);
            Ok(())
        }
    }
}

fn render_config(config: &Config, format: OutputFormat) -> Result<String> {
    let input = ConfigInput::from(config);
    match format {
        OutputFormat::Yaml => Ok(serde_yaml::to_string(&input)?),
        OutputFormat::Json => Ok(format!("{}\n", serde_json::to_string_pretty(&input)?)),
    }
}

/// Get a configuration value by key
fn get_config_value(config: &Config, key: &str) -> Result<String> {
    let parts: Vec<&str> = key.split('.').collect();

    match parts.as_slice() {
        ["backend", "kind"] => Ok(match &config.backend.kind {
            BackendKind::Local(_) => "local".to_string(),
            BackendKind::Docker(_) => "docker".to_string(),
        }),
        ["backend", "host"] => Ok(config.backend.host.clone()),
        ["backend", "readiness"] => Ok(match &config.backend.readiness {
            Readiness::Http => "http".to_string(),
            Readiness::Tcp => "tcp".to_string(),
            Readiness::LogLine(line) => format!("log_line ({})", line),
        }),
        ["backend", "startup_timeout_secs"] => {
            Ok(config.backend.startup_timeout.as_secs().to_string())
        }
        ["backend", "stop_grace_secs"] => Ok(config.backend.stop_grace.as_secs().to_string()),
        ["backend", "port_retries"] => Ok(config.backend.port_retries.to_string()),
        ["backend", "local", "program"] => match &config.backend.kind {
            BackendKind::Local(local) => Ok(local.program.clone()),
            BackendKind::Docker(_) => Err(anyhow!("backend.kind is 'docker'")),
        },
        ["backend", "local", "args"] => match &config.backend.kind {
            BackendKind::Local(local) => Ok(shell_words::join(&local.args)),
            BackendKind::Docker(_) => Err(anyhow!("backend.kind is 'docker'")),
        },
        ["backend", "docker", "image"] => match &config.backend.kind {
            BackendKind::Docker(docker) => Ok(docker.image.clone()),
            BackendKind::Local(_) => Err(anyhow!("backend.kind is 'local'")),
        },

        ["cli", "executable"] => Ok(config.cli.executable.clone()),
        ["cli", "version_args"] => Ok(shell_words::join(&config.cli.version_args)),
        ["cli", "version_pattern"] => Ok(config.cli.version_pattern.clone()),
        ["cli", "command_timeout_secs"] => Ok(config.cli.command_timeout.as_secs().to_string()),

        ["environment", "project"] => Ok(config.environment.project.clone()),
        ["environment", "variables", name] => config
            .environment
            .variables
            .get(*name)
            .cloned()
            .ok_or_else(|| anyhow!("Environment variable '{}' is not configured", name)),

        ["files", "search_roots"] => Ok(config
            .files
            .search_roots
            .iter()
            .map(|root| root.display())
            .join("\n")),

        _ => Err(anyhow!("Unknown configuration key: {}", key)),
    }
}
