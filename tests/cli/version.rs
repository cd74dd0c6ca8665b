use crate::helpers::cli::with_cli_helper;
use anyhow::Result;
use predicates::prelude::*;

#[tokio::test]
async fn test_version_prints_detected_build() -> Result<()> {
    with_cli_helper(async |helper| {
        helper.init_project()?;

        helper
            .command()
            .arg("version")
            .assert()
            .success()
            .stdout(predicate::str::ends_with("gcloud 425\n"));

        Ok(())
    })
    .await
}

#[tokio::test]
async fn test_version_with_cli_override() -> Result<()> {
    with_cli_helper(async |helper| {
        let old_cli = helper.stubs.write_script(
            "old-gcloud",
            "echo 'Google Cloud SDK 287.0.0'\n",
        )?;

        helper
            .command()
            .arg("version")
            .arg("--cli")
            .arg(&old_cli)
            .assert()
            .success()
            .stdout(predicate::str::contains("old-gcloud 287"));

        Ok(())
    })
    .await
}

#[tokio::test]
async fn test_version_fails_when_cli_is_missing() -> Result<()> {
    with_cli_helper(async |helper| {
        helper
            .command()
            .args(["version", "--cli", "/nonexistent/gcloud"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("could not determine CLI version"));

        Ok(())
    })
    .await
}
