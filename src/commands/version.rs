use crate::config::Config;
use crate::version::VersionGate;
use anyhow::Result;

/// Print the build number the version gate detects for the configured CLI
pub async fn cmd_version(config: &Config) -> Result<()> {
    let gate = VersionGate::new(
        &config.cli.executable,
        config.cli.version_args.clone(),
        &config.cli.version_pattern,
        config.cli.command_timeout,
    )?;

    let version = gate.detect_version().await?;
    println!("{} {}", config.cli.executable, version);
    Ok(())
}
