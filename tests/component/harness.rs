//! TestCase lifecycle and assertions against stub processes

use crate::helpers::stubs::{CRASHING_EMULATOR, standard_stubs, stateful_stubs, wait_for_exit};
use anyhow::Result;
use emucheck::config::{BackendKind, LocalBackendConfig, VolatileRuleInput};
use emucheck::suite::Step;
use emucheck::suite::execute::run_step;
use emucheck::{
    Boundary, FileResolver, HarnessError, TestCase, TestCaseState, VersionBranches, join_lines,
    with_test_case,
};
use std::path::PathBuf;
use std::time::Duration;

#[tokio::test]
async fn test_overlay_points_cli_at_its_own_backend() -> Result<()> {
    let (_stubs, config) = standard_stubs(425)?;
    let mut case = TestCase::start("overlay", &config).await?;
    assert_eq!(case.state(), TestCaseState::Ready);

    let endpoint = case.endpoint().expect("backend is running").clone();
    assert_eq!(
        case.run(["env", "CLOUDSDK_API_ENDPOINT_OVERRIDES_SPANNER"]).await?,
        endpoint.rest_url()
    );
    assert_eq!(
        case.run(["env", "SPANNER_EMULATOR_HOST"]).await?,
        endpoint.grpc_address()
    );
    assert_eq!(
        case.run(["env", "CLOUDSDK_CORE_PROJECT"]).await?,
        "test-project"
    );

    case.finish().await;
    Ok(())
}

#[tokio::test]
async fn test_each_case_gets_its_own_config_dir_removed_on_teardown() -> Result<()> {
    let (_stubs, config) = standard_stubs(425)?;
    let mut first = TestCase::start("first", &config).await?;
    let mut second = TestCase::start("second", &config).await?;

    let first_dir = PathBuf::from(first.run(["env", "CLOUDSDK_CONFIG"]).await?);
    let second_dir = PathBuf::from(second.run(["env", "CLOUDSDK_CONFIG"]).await?);
    assert_ne!(first_dir, second_dir);
    assert!(first_dir.is_dir());
    assert_ne!(
        first.endpoint().map(|e| e.rest_port()),
        second.endpoint().map(|e| e.rest_port())
    );

    first.finish().await;
    second.finish().await;
    assert!(!first_dir.exists());
    assert!(!second_dir.exists());
    Ok(())
}

#[tokio::test]
async fn test_resources_do_not_leak_between_backends() -> Result<()> {
    let (_stubs, config) = stateful_stubs(425)?;

    with_test_case("creates", &config, async |case| {
        case.run(["create", "test-database"]).await?;
        case.assert_output(["list"], &join_lines(&["test-database"]))
            .await
    })
    .await?;

    with_test_case("lists", &config, async |case| {
        case.assert_output(["list"], &join_lines(&[""])).await
    })
    .await?;
    Ok(())
}

#[tokio::test]
async fn test_concurrent_cases_see_only_their_own_resources() -> Result<()> {
    let (_stubs, config) = stateful_stubs(425)?;
    let mut first = TestCase::start("first", &config).await?;
    let mut second = TestCase::start("second", &config).await?;

    first.run(["create", "test-database"]).await?;
    second
        .assert_output(["list"], &join_lines(&[""]))
        .await?;
    first
        .assert_output(["list"], &join_lines(&["test-database"]))
        .await?;

    first.finish().await;
    second.finish().await;
    Ok(())
}

#[tokio::test]
async fn test_deleting_one_of_two_resources_lists_the_other() -> Result<()> {
    let (_stubs, config) = stateful_stubs(425)?;

    with_test_case("delete_one", &config, async |case| {
        case.run(["create", "test-database2"]).await?;
        case.run(["create", "test-database"]).await?;
        case.run(["delete", "test-database2"]).await?;
        case.assert_output(["list"], &join_lines(&["test-database"]))
            .await
    })
    .await?;
    Ok(())
}

#[tokio::test]
async fn test_assert_output_matches_joined_lines() -> Result<()> {
    let (_stubs, config) = standard_stubs(425)?;

    with_test_case("matching", &config, async |case| {
        case.assert_output(
            ["lines", "NAME  STATE", "db    READY"],
            &join_lines(&["NAME  STATE", "db    READY"]),
        )
        .await?;
        case.assert_output(["echo"], &join_lines(&[""])).await?;
        case.assert_output(["crlf"], &join_lines(&["first", "second"]))
            .await
    })
    .await?;
    Ok(())
}

#[tokio::test]
async fn test_mismatch_carries_diff_and_blocks_later_commands() -> Result<()> {
    let (_stubs, config) = standard_stubs(425)?;
    let mut case = TestCase::start("mismatch", &config).await?;

    let error = case
        .assert_output(["lines", "state: CREATING"], &join_lines(&["state: READY"]))
        .await
        .unwrap_err();
    match &error {
        HarnessError::UnexpectedOutput {
            expected,
            actual,
            diff,
            ..
        } => {
            assert_eq!(expected, "state: READY");
            assert_eq!(actual, "state: CREATING");
            assert!(diff.contains("-state: READY"), "diff: {}", diff);
            assert!(diff.contains("+state: CREATING"), "diff: {}", diff);
        }
        other => panic!("expected UnexpectedOutput, got {:?}", other),
    }

    let blocked = case.run(["echo", "hello"]).await.unwrap_err();
    assert!(matches!(blocked, HarnessError::PriorCommandFailed { .. }));

    case.finish().await;
    Ok(())
}

#[tokio::test]
async fn test_mismatch_report_includes_stderr() -> Result<()> {
    let (_stubs, config) = standard_stubs(425)?;

    let error = with_test_case("mismatch_stderr", &config, async |case| {
        case.assert_output(
            ["warn", "WARNING: Using the emulator endpoint", "db", "CREATING"],
            &join_lines(&["db READY"]),
        )
        .await
    })
    .await
    .unwrap_err();

    match &error {
        HarnessError::UnexpectedOutput { stderr, .. } => {
            assert_eq!(stderr, "WARNING: Using the emulator endpoint\n");
        }
        other => panic!("expected UnexpectedOutput, got {:?}", other),
    }
    let message = error.to_string();
    assert!(message.contains("+db CREATING"), "message: {}", message);
    assert!(
        message.contains("--- stderr ---\nWARNING: Using the emulator endpoint"),
        "message: {}",
        message
    );
    Ok(())
}

#[tokio::test]
async fn test_stderr_check_failure_blocks_later_commands() -> Result<()> {
    let (_stubs, config) = standard_stubs(425)?;
    let mut case = TestCase::start("stderr_check", &config).await?;

    let step = Step {
        args: vec!["fail".into(), "1".into(), "PERMISSION_DENIED".into()],
        expect_exit: Some(1),
        expect_stderr_contains: Some("NOT_FOUND".to_string()),
        ..Default::default()
    };
    let error = run_step(&mut case, &step).await.unwrap_err();
    match &error {
        HarnessError::UnexpectedOutput { stderr, .. } => assert_eq!(stderr, "PERMISSION_DENIED\n"),
        other => panic!("expected UnexpectedOutput, got {:?}", other),
    }

    let blocked = case.run(["echo", "hello"]).await.unwrap_err();
    assert!(matches!(blocked, HarnessError::PriorCommandFailed { .. }));

    case.finish().await;
    Ok(())
}

#[tokio::test]
async fn test_undetectable_version_blocks_later_commands() -> Result<()> {
    let (_stubs, mut config) = standard_stubs(425)?;
    config.cli.version_pattern = r"Nonexistent SDK (\d+)".to_string();
    let mut case = TestCase::start("no_version", &config).await?;

    let columns = VersionBranches::new(vec![(Boundary::Below(328), "old")], "new")?;
    let error = case.select(&columns).await.unwrap_err();
    assert!(matches!(error, HarnessError::VersionUndetectable { .. }));

    let blocked = case.run(["echo", "hello"]).await.unwrap_err();
    assert!(matches!(blocked, HarnessError::PriorCommandFailed { .. }));

    case.finish().await;
    Ok(())
}

#[tokio::test]
async fn test_volatile_rules_apply_to_trimmed_output() -> Result<()> {
    let (_stubs, mut config) = standard_stubs(425)?;
    config.normalize.volatile = vec![VolatileRuleInput {
        pattern: r"\d+$".to_string(),
        replacement: "<N>".to_string(),
    }];

    with_test_case("volatile", &config, async |case| {
        assert_eq!(case.run(["echo", "count:", "5"]).await?, "count: <N>");
        Ok(())
    })
    .await?;

    config.normalize.volatile = vec![
        VolatileRuleInput {
            pattern: "b".to_string(),
            replacement: "c".to_string(),
        },
        VolatileRuleInput {
            pattern: "a".to_string(),
            replacement: "b".to_string(),
        },
    ];
    let error = TestCase::start("chained_rules", &config).await.err();
    assert_eq!(error.map(|e| e.kind()), Some("invalid_config"));
    Ok(())
}

#[tokio::test]
async fn test_exit_code_expectations() -> Result<()> {
    let (_stubs, config) = standard_stubs(425)?;

    with_test_case("exit_codes", &config, async |case| {
        let result = case.run_expecting_exit(["fail", "4", "no such instance"], 4).await?;
        assert_eq!(result.stderr, "no such instance\n");

        let result = case.run_expecting_failure(["fail", "1", "denied"]).await?;
        assert_eq!(result.exit_code, Some(1));
        Ok(())
    })
    .await?;

    let error = with_test_case("unexpected_failure", &config, async |case| {
        case.run(["fail", "2", "bad flag"]).await
    })
    .await
    .unwrap_err();
    match error {
        HarnessError::UnexpectedExitCode {
            expected, actual, stderr, ..
        } => {
            assert_eq!(expected, Some(0));
            assert_eq!(actual, Some(2));
            assert_eq!(stderr, "bad flag\n");
        }
        other => panic!("expected UnexpectedExitCode, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_command_timeout_fails_the_case() -> Result<()> {
    let (_stubs, mut config) = standard_stubs(425)?;
    config.cli.command_timeout = Duration::from_millis(500);

    let error = with_test_case("slow", &config, async |case| {
        case.run(["sleep", "30"]).await
    })
    .await
    .unwrap_err();
    assert!(matches!(error, HarnessError::CommandTimeout { .. }));
    Ok(())
}

#[tokio::test]
async fn test_teardown_runs_when_body_fails() -> Result<()> {
    let (_stubs, config) = standard_stubs(425)?;
    let mut pid = None;

    let result: emucheck::HarnessResult<()> = with_test_case("failing", &config, async |case| {
        pid = case.backend().and_then(|b| b.pid());
        case.run(["fail", "1", "boom"]).await?;
        Ok(())
    })
    .await;

    assert!(result.is_err());
    let pid = pid.expect("backend was started");
    assert!(wait_for_exit(pid).await, "emulator {} outlived its test", pid);
    Ok(())
}

#[tokio::test]
async fn test_select_uses_detected_cli_version() -> Result<()> {
    let (stubs, config) = standard_stubs(327)?;

    let columns = VersionBranches::new(
        vec![
            (Boundary::Below(328), "NAME STATE"),
            (Boundary::Below(425), "NAME STATE VERSION_RETENTION_PERIOD"),
        ],
        "NAME STATE VERSION_RETENTION_PERIOD ENABLE_DROP_PROTECTION",
    )?;

    with_test_case("select", &config, async |case| {
        assert_eq!(*case.select(&columns).await?, "NAME STATE");
        assert_eq!(case.cli_version().await?.0, 327);
        Ok(())
    })
    .await?;
    assert_eq!(stubs.version_calls(), 1);
    Ok(())
}

#[tokio::test]
async fn test_resolve_data_files_from_search_roots() -> Result<()> {
    let (stubs, config) = standard_stubs(425)?;
    let descriptor = stubs.write_file("data/descriptors.pb", "proto bytes")?;
    let resolver = FileResolver::new(vec![stubs.path().to_path_buf()]);

    let mut case = TestCase::start_with_resolver("resolve", &config, resolver).await?;
    assert_eq!(case.resolve("data/descriptors.pb")?, descriptor);
    assert!(matches!(
        case.resolve("data/missing.pb"),
        Err(HarnessError::UnresolvedFile { .. })
    ));

    let path = case.resolve("data/descriptors.pb")?;
    let contents = case.run(["cat".to_string(), path.display().to_string()]).await?;
    assert_eq!(contents, "proto bytes");

    case.finish().await;
    Ok(())
}

#[tokio::test]
async fn test_backend_startup_failure_fails_the_case() -> Result<()> {
    let (stubs, mut config) = standard_stubs(425)?;
    let crashing = stubs.write_script("crashing", CRASHING_EMULATOR)?;
    config.backend.kind = BackendKind::Local(LocalBackendConfig {
        program: crashing.display().to_string(),
        args: Vec::new(),
    });

    let error = with_test_case("never_ready", &config, async |_case| Ok(()))
        .await
        .unwrap_err();
    assert_eq!(error.kind(), "backend_crashed");
    Ok(())
}
