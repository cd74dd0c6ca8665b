//! Docker-backed emulator lifecycle

use crate::helpers::docker::with_docker_cleanup;
use anyhow::Result;
use emucheck::config::{BackendInput, BackendKind, ConfigInput, DockerBackendInput};
use emucheck::docker::DockerManager;
use emucheck::{BackendManager, BackendState, ConfigBuilder};
use std::time::Duration;
use uuid::Uuid;

#[tokio::test]
#[ignore = "pulls the emulator image"]
async fn test_docker_emulator_lifecycle() -> Result<()> {
    with_docker_cleanup(async {
        if let Err(e) = DockerManager::new().await {
            println!("Skipping Docker test - Docker daemon not available: {}", e);
            return;
        }

        let container_name = format!("emucheck_test_{}", Uuid::new_v4().simple());
        let input = ConfigInput {
            backend: Some(BackendInput {
                kind: Some("docker".to_string()),
                startup_timeout_secs: Some(120),
                docker: Some(DockerBackendInput {
                    container_name: Some(container_name),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        let config = ConfigBuilder::new().with_file(input).resolve().unwrap();
        let manager = BackendManager::new(config.backend);

        let mut handle = manager.start().await.unwrap();
        assert_eq!(handle.state(), BackendState::Ready);
        assert!(handle.container_id().is_some());
        assert!(handle.pid().is_none());

        let endpoint = handle.endpoint().clone();
        assert!(emucheck::backend::probe_tcp(endpoint.host(), endpoint.grpc_port()).await);

        manager.stop(&mut handle).await;
        assert_eq!(handle.state(), BackendState::Stopped);
    })
    .await;

    Ok(())
}

#[tokio::test]
async fn test_docker_backend_config() -> Result<()> {
    let input = ConfigInput {
        backend: Some(BackendInput {
            kind: Some("docker".to_string()),
            readiness: Some("tcp".to_string()),
            stop_grace_secs: Some(1),
            docker: Some(DockerBackendInput {
                image: Some("gcr.io/cloud-spanner-emulator/emulator:1.5.0".to_string()),
                container_name: Some("emucheck_fixed".to_string()),
                auto_cleanup: Some(false),
                environment: None,
            }),
            ..Default::default()
        }),
        ..Default::default()
    };

    let config = ConfigBuilder::new().with_file(input).resolve()?;

    match &config.backend.kind {
        BackendKind::Docker(docker) => {
            assert_eq!(docker.image, "gcr.io/cloud-spanner-emulator/emulator:1.5.0");
            assert_eq!(docker.container_name.as_deref(), Some("emucheck_fixed"));
            assert!(!docker.auto_cleanup);
        }
        _ => panic!("Expected Docker backend configuration"),
    }
    assert_eq!(config.backend.stop_grace, Duration::from_secs(1));

    Ok(())
}
