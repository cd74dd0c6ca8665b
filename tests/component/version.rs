//! Version detection against a fake CLI

use crate::helpers::stubs::StubDir;
use anyhow::Result;
use emucheck::constants::DEFAULT_VERSION_PATTERN;
use emucheck::{HarnessError, VersionGate, VersionThreshold};
use std::time::Duration;

fn gate(executable: &std::path::Path, pattern: &str) -> Result<VersionGate> {
    Ok(VersionGate::new(
        executable,
        vec!["version".to_string()],
        pattern,
        Duration::from_secs(10),
    )?)
}

#[tokio::test]
async fn test_version_is_detected_once_per_process() -> Result<()> {
    let stubs = StubDir::new()?;
    let cli = stubs.fake_cli(328)?;

    let first = gate(&cli, DEFAULT_VERSION_PATTERN)?;
    let second = gate(&cli, DEFAULT_VERSION_PATTERN)?;

    assert_eq!(first.detect_version().await?, VersionThreshold(328));
    assert_eq!(first.detect_version().await?, VersionThreshold(328));
    assert_eq!(second.detect_version().await?, VersionThreshold(328));
    assert_eq!(stubs.version_calls(), 1);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_detection_queries_cli_once() -> Result<()> {
    let stubs = StubDir::new()?;
    let cli = stubs.fake_cli(287)?;
    let gate = gate(&cli, DEFAULT_VERSION_PATTERN)?;

    let (a, b, c) = tokio::join!(
        gate.detect_version(),
        gate.detect_version(),
        gate.detect_version()
    );
    assert_eq!(a?, VersionThreshold(287));
    assert_eq!(b?, VersionThreshold(287));
    assert_eq!(c?, VersionThreshold(287));
    assert_eq!(stubs.version_calls(), 1);
    Ok(())
}

#[tokio::test]
async fn test_unmatched_output_is_undetectable() -> Result<()> {
    let stubs = StubDir::new()?;
    let cli = stubs.fake_cli(425)?;
    let gate = gate(&cli, r"Nonexistent SDK (\d+)")?;

    let error = gate.detect_version().await.unwrap_err();
    assert!(matches!(error, HarnessError::VersionUndetectable { .. }));
    Ok(())
}

#[tokio::test]
async fn test_failures_are_not_cached() -> Result<()> {
    let stubs = StubDir::new()?;
    let cli = stubs.path().join("gcloud");
    let gate = gate(&cli, DEFAULT_VERSION_PATTERN)?;

    // No executable yet
    let error = gate.detect_version().await.unwrap_err();
    assert!(matches!(error, HarnessError::VersionUndetectable { .. }));

    stubs.fake_cli(425)?;
    assert_eq!(gate.detect_version().await?, VersionThreshold(425));
    Ok(())
}

#[tokio::test]
async fn test_failing_version_command_is_undetectable() -> Result<()> {
    let stubs = StubDir::new()?;
    let cli = stubs.write_script("gcloud", "echo 'auth error' >&2\nexit 1\n")?;
    let gate = gate(&cli, DEFAULT_VERSION_PATTERN)?;

    match gate.detect_version().await {
        Err(HarnessError::VersionUndetectable { reason, .. }) => {
            assert!(reason.contains("exit code 1"), "reason: {}", reason);
            assert!(reason.contains("auth error"), "reason: {}", reason);
        }
        other => panic!("expected VersionUndetectable, got {:?}", other),
    }
    Ok(())
}
