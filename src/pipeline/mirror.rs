use super::{MirrorContext, PipelineCoordinator};
use crate::error::Error;
use crate::ingest::{IngestQueue, LiveUpdateTracker, ReconciliationScanner};
use crate::Result;
use std::future::Future;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// The whole mirroring service
///
/// Runs the scanner, the tracker and the build/delivery pipeline together. The
/// first task to fail stops the others; the error is reported to the admin and
/// returned so that a supervisor can restart the process.
pub struct Mirror {
    ctx: MirrorContext,
    cancel: CancellationToken,
}

impl Mirror {
    /// Create the service around a prepared context
    pub fn new(ctx: MirrorContext) -> Self {
        Self {
            ctx,
            cancel: CancellationToken::new(),
        }
    }

    /// The shared context
    pub fn context(&self) -> &MirrorContext {
        &self.ctx
    }

    /// Token that stops [`Mirror::run`] when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Ask a running [`Mirror::run`] to stop
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Run until stopped or until a task fails
    pub async fn run(&self) -> Result<()> {
        let swept = self.ctx.arena.sweep_root().await?;
        if swept > 0 {
            info!(swept, "Removed leftovers of a previous run");
        }

        let (queue, posts) = IngestQueue::new();
        let scanner = ReconciliationScanner::new(&self.ctx, queue.clone())?;
        let tracker = LiveUpdateTracker::new(&self.ctx, queue.clone())?;
        let pipeline = PipelineCoordinator::new(&self.ctx, queue.clone());

        let cancel = self.cancel.child_token();
        let failure: Mutex<Option<Error>> = Mutex::new(None);
        info!("Mirror started");

        tokio::join!(
            supervise("scanner", scanner.run(cancel.clone()), &cancel, &failure),
            supervise("tracker", tracker.run(cancel.clone()), &cancel, &failure),
            supervise(
                "pipeline",
                pipeline.run(posts, cancel.clone()),
                &cancel,
                &failure
            ),
        );
        queue.permit().close();

        let failure = failure.into_inner().unwrap_or_else(|e| e.into_inner());
        match failure {
            Some(e) => {
                error!(error = %e, code = e.error_code(), "Mirror stopped on error");
                if let Err(notify_err) = self
                    .ctx
                    .messaging
                    .notify_admin(&format!("Mirror stopped: {e}"))
                    .await
                {
                    warn!(error = %notify_err, "Failed to notify admin");
                }
                Err(e)
            }
            None => {
                info!("Mirror stopped");
                Ok(())
            }
        }
    }

    /// Stop, then flush and close the state store
    pub async fn shutdown(&self) -> Result<()> {
        self.stop();
        self.ctx.store.force_flush().await?;
        self.ctx.store.close().await;
        Ok(())
    }
}

/// Await `task`; the first failure is kept and cancels everything else
async fn supervise(
    name: &'static str,
    task: impl Future<Output = Result<()>>,
    cancel: &CancellationToken,
    failure: &Mutex<Option<Error>>,
) {
    let Err(e) = task.await else {
        debug!(task = name, "Task finished");
        return;
    };

    {
        let mut slot = failure.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() && !cancel.is_cancelled() {
            error!(task = name, error = %e, "Task failed");
            *slot = Some(e);
        } else {
            debug!(task = name, error = %e, "Task failed after shutdown began");
        }
    }
    cancel.cancel();
}
