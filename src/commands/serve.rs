use crate::backend::BackendManager;
use crate::commands::wait_for_shutdown_signal;
use crate::config::Config;
use crate::environment::EnvironmentBinder;
use anyhow::{Context, Result};
use console::style;
use tracing::info;

/// Start one backend for manual use and keep it up until interrupted.
///
/// Prints the overlay as `export` lines so `eval "$(emucheck serve)"` points a
/// shell at the emulator.
pub async fn cmd_serve(config: &Config) -> Result<()> {
    let manager = BackendManager::new(config.backend.clone());
    let mut handle = manager.start().await.context("Failed to start emulator")?;

    let cli_config_dir = tempfile::Builder::new()
        .prefix("emucheck-cli-")
        .tempdir()
        .context("Failed to create CLI config directory")?;

    let overlay = EnvironmentBinder::new(config.environment.project.clone())
        .with_extra(config.environment.variables.clone())
        .bind(handle.endpoint(), cli_config_dir.path());

    println!("{}", overlay.to_shell_exports());
    eprintln!(
        "{} Emulator running at {} (Ctrl-C to stop)",
        style("✓").green(),
        handle.endpoint()
    );

    wait_for_shutdown_signal().await;
    info!("Received shutdown signal, stopping emulator...");

    manager.stop(&mut handle).await;
    Ok(())
}
