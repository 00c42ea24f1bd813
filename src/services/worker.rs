//! Embedded worker pool used when no Redis queue is configured.

use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

use crate::models::job::DiagnosisJob;
use crate::services::diagnosis::{self, DiagnosisContext};
use crate::services::queue::LocalQueue;

/// Pending jobs buffered per worker slot before uploads wait on the channel.
const BACKLOG_PER_WORKER: usize = 32;

/// Start a pool running at most `concurrency` diagnosis jobs at once.
///
/// The pool stops once every [`LocalQueue`] handle is dropped and the
/// in-flight jobs have finished.
pub fn spawn_pool(ctx: DiagnosisContext, concurrency: usize) -> (LocalQueue, JoinHandle<()>) {
    let concurrency = concurrency.max(1);
    let (tx, rx) = mpsc::channel(concurrency * BACKLOG_PER_WORKER);
    let handle = tokio::spawn(run_pool(ctx, rx, concurrency));
    (LocalQueue::new(tx), handle)
}

async fn run_pool(ctx: DiagnosisContext, mut rx: mpsc::Receiver<DiagnosisJob>, concurrency: usize) {
    tracing::info!(max_concurrent = concurrency, "Diagnosis worker pool started");

    let permits = Arc::new(Semaphore::new(concurrency));
    let mut tasks = JoinSet::new();

    while let Some(job) = rx.recv().await {
        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };
        let ctx = ctx.clone();
        tasks.spawn(async move {
            let status = diagnosis::run(&ctx, &job).await;
            tracing::debug!(job_id = %job.job_id, %status, "Diagnosis job finished");
            drop(permit);
        });

        while let Some(result) = tasks.try_join_next() {
            if let Err(e) = result {
                tracing::error!(error = %e, "Diagnosis worker task failed");
            }
        }
    }

    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            tracing::error!(error = %e, "Diagnosis worker task failed");
        }
    }
    tracing::info!("Diagnosis worker pool stopped");
}
