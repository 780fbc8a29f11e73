use std::future::Future;

use tracing::Instrument;

use campus_infra::external::{CancellationHandle, CancellationSignal, cancellation_pair};
use campus_infra::orchestrator::OrchestratorError;

/// Run an orchestrator operation on its own task, cancelling it if the client leaves.
///
/// Axum drops the handler future when the connection goes away. The operation keeps
/// running on the spawned task and sees the cancellation through its signal, so a
/// matriculation interrupted mid-LMS-call still goes through its revert.
pub async fn run_cancellable<F, Fut, T>(op: F) -> Result<T, OrchestratorError>
where
    F: FnOnce(CancellationSignal) -> Fut,
    Fut: Future<Output = Result<T, OrchestratorError>> + Send + 'static,
    T: Send + 'static,
{
    let (handle, signal) = cancellation_pair();
    let _guard = CancelOnDrop(handle);

    match tokio::spawn(op(signal).in_current_span()).await {
        Ok(result) => result,
        Err(err) => Err(OrchestratorError::unknown("request", None, err.to_string())),
    }
}

struct CancelOnDrop(CancellationHandle);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}
