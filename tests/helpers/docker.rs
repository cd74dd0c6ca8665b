//! Docker test helpers for ensuring proper cleanup

use std::future::Future;

/// Run a test and then remove every container it registered, even the ones it leaked
pub async fn with_docker_cleanup<F>(test: F)
where
    F: Future<Output = ()>,
{
    test.await;
    emucheck::docker::cleanup_all_containers().await;
}
