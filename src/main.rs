use anyhow::Result;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use emucheck::commands::{self, ConfigCommands, RunOptions};
use emucheck::config::{self, BackendArgs, CliArgs, ConfigInput};
use emucheck::constants::CONFIG_FILENAME;
use emucheck::docker;
use emucheck::suite::ReportFormat;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(long, default_value = CONFIG_FILENAME, global = true)]
    config_file: String,

    /// Enable verbose output (info level)
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Suppress all non-essential output (error level only)
    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    /// Enable debug output (debug level)
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Arguments for emucheck run
#[derive(Parser, Debug)]
struct RunArgs {
    /// Suite files, directories or glob patterns
    #[arg(required = true)]
    suites: Vec<String>,

    /// Output format
    #[arg(long, value_enum, default_value = "human")]
    format: ReportFormat,

    /// Only run cases whose name contains this text (or matches this glob)
    #[arg(long)]
    filter: Option<String>,

    #[command(flatten)]
    backend_args: BackendArgs,

    #[command(flatten)]
    cli_args: CliArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Run conformance suites, each case against a fresh emulator
    Run(RunArgs),

    /// Start an emulator and print the environment that points the CLI at it
    Serve {
        #[command(flatten)]
        backend_args: BackendArgs,

        #[command(flatten)]
        cli_args: CliArgs,
    },

    /// Print the CLI version used to select expected output
    Version {
        #[command(flatten)]
        cli_args: CliArgs,
    },

    /// Show configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();
    initialize_logging(&cli);

    // serve waits for the signal itself so it can stop the emulator gracefully
    let result = if matches!(cli.command, Commands::Serve { .. }) {
        run_main(cli).await
    } else {
        tokio::select! {
            result = run_main(cli) => result,
            _ = commands::wait_for_shutdown_signal() => {
                info!("Received shutdown signal, cleaning up...");
                Ok(true)
            }
        }
    };

    docker::cleanup_all_containers().await;

    match result {
        Ok(true) => Ok(()),
        Ok(false) => std::process::exit(1),
        Err(e) => Err(e),
    }
}

fn initialize_logging(cli: &Cli) {
    let level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else if cli.quiet {
        "error"
    } else {
        "warn" // default level
    };

    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(level)
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Returns false when the command ran but reported failures
async fn run_main(cli: Cli) -> Result<bool> {
    let (file_config, root_dir) = config::load_config(&cli.config_file)?;

    let resolve = |cli_config: Option<ConfigInput>| -> Result<config::Config> {
        let mut builder = config::ConfigBuilder::new().with_file(file_config.clone());
        if let Some(cli_config) = cli_config {
            builder = builder.with_cli_args(cli_config);
        }
        Ok(builder.resolve()?.anchored_at(&root_dir))
    };

    match cli.command {
        Commands::Run(args) => {
            let config = resolve(Some(ConfigInput::from_args(
                &args.backend_args,
                &args.cli_args,
            )?))?;

            let options = RunOptions {
                suites: args.suites,
                format: args.format,
                filter: args.filter,
            };

            info!("Running {} suite pattern(s)", options.suites.len());
            commands::cmd_run(&config, &options).await
        }
        Commands::Serve {
            backend_args,
            cli_args,
        } => {
            let config = resolve(Some(ConfigInput::from_args(&backend_args, &cli_args)?))?;

            info!("Starting emulator");
            commands::cmd_serve(&config).await?;
            Ok(true)
        }
        Commands::Version { cli_args } => {
            let config = resolve(Some(ConfigInput::from_args(
                &BackendArgs::default(),
                &cli_args,
            )?))?;

            commands::cmd_version(&config).await?;
            Ok(true)
        }
        Commands::Config { command } => {
            let config = resolve(None)?;

            commands::cmd_config(&config, command).await?;
            Ok(true)
        }
    }
}
