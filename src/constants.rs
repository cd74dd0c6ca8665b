use std::time::Duration;

// Configuration file name
pub const CONFIG_FILENAME: &str = "emucheck.yaml";

// Backend lifecycle timing
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);
pub const READINESS_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const PROBE_TIMEOUT: Duration = Duration::from_millis(500);
pub const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);
pub const DEFAULT_PORT_RETRIES: u32 = 3;

// Command execution
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

// Emulator defaults
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PROJECT: &str = "test-project";
pub const DEFAULT_EMULATOR_PROGRAM: &str = "gateway_main";
pub const DEFAULT_EMULATOR_IMAGE: &str = "gcr.io/cloud-spanner-emulator/emulator";
pub const EMULATOR_GRPC_PORT: u16 = 9010;
pub const EMULATOR_REST_PORT: u16 = 9020;
pub const CONTAINER_NAME_PREFIX: &str = "emucheck_emulator";

// CLI defaults
pub const DEFAULT_CLI: &str = "gcloud";
pub const DEFAULT_VERSION_PATTERN: &str = r"Google Cloud SDK (\d+)";

/// Lowercased stderr fragments that mean the emulator lost a port race.
pub const BIND_CONFLICT_MARKERS: &[&str] = &[
    "address already in use",
    "failed to bind",
    "could not bind",
];

// Captured emulator output kept for crash reports
pub const MAX_CAPTURED_LINES: usize = 200;
