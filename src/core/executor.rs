//! Execution traits: the compute call being protected and the runtime it is
//! spawned on.

use std::future::Future;

use async_trait::async_trait;

use crate::core::classifier::RawFailure;
use crate::core::job::JobMetadata;

/// Performs the compute-bound operation for a job.
///
/// Implementations adapt their native error type into [`RawFailure`] so the
/// classifier can decide whether to retry. The executor may be invoked
/// several times for one job, once per attempt.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use prometheus_admission::core::{JobExecutor, JobMetadata, RawFailure};
///
/// struct CompletionExecutor { client: ModelClient }
///
/// #[async_trait]
/// impl JobExecutor<Prompt, String> for CompletionExecutor {
///     async fn execute(&self, prompt: Prompt, _meta: JobMetadata) -> Result<String, RawFailure> {
///         self.client
///             .complete(&prompt)
///             .await
///             .map_err(|e| RawFailure::with_status(e.status(), e.to_string()))
///     }
/// }
/// ```
#[async_trait]
pub trait JobExecutor<P, T>: Send + Sync + 'static
where
    P: Send + 'static,
    T: Send + 'static,
{
    /// Run one attempt.
    async fn execute(&self, payload: P, meta: JobMetadata) -> Result<T, RawFailure>;
}

/// Abstraction for spawning job execution on a runtime.
pub trait Spawn: Send + Sync + 'static {
    /// Spawn a detached future.
    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static;
}
