use super::{MirrorContext, PackageBuilder};
use crate::artifact::TempArena;
use crate::builder::{BuildWorker, PostPackage};
use crate::db::StateStore;
use crate::delivery::DeliveryWorker;
use crate::ingest::IngestQueue;
use crate::types::SourcePost;
use crate::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The build and delivery stages joined by a bounded channel
pub struct PipelineCoordinator {
    store: StateStore,
    arena: TempArena,
    queue: IngestQueue,
    builder: Arc<dyn PackageBuilder>,
    delivery: DeliveryWorker,
    prebuild_limit: usize,
}

impl PipelineCoordinator {
    /// Create the stages for posts arriving through `queue`
    pub fn new(ctx: &MirrorContext, queue: IngestQueue) -> Self {
        Self::with_builder(ctx, queue, Arc::new(BuildWorker::new(ctx)))
    }

    /// Like [`PipelineCoordinator::new`], with a custom build step
    pub fn with_builder(
        ctx: &MirrorContext,
        queue: IngestQueue,
        builder: Arc<dyn PackageBuilder>,
    ) -> Self {
        Self {
            store: ctx.store.clone(),
            arena: ctx.arena.clone(),
            queue,
            builder,
            delivery: DeliveryWorker::new(ctx),
            prebuild_limit: ctx.config.pipeline.prebuild_limit.max(1),
        }
    }

    /// Run both stages until `posts` is exhausted, a stage fails or `cancel` fires
    ///
    /// The store is flushed on the way out, whatever the outcome.
    pub async fn run(
        self,
        posts: mpsc::UnboundedReceiver<SourcePost>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let (tx, rx) = mpsc::channel(self.prebuild_limit);
        info!(prebuild_limit = self.prebuild_limit, "Pipeline started");

        let result = tokio::try_join!(
            self.build_stage(posts, tx, &cancel),
            self.deliver_stage(rx, &cancel)
        );

        if let Err(e) = self.store.force_flush().await {
            warn!(error = %e, "Failed to flush state store");
        }
        info!("Pipeline stopped");
        result.map(|_| ())
    }

    async fn build_stage(
        &self,
        mut posts: mpsc::UnboundedReceiver<SourcePost>,
        tx: mpsc::Sender<PostPackage>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        loop {
            let post = tokio::select! {
                _ = cancel.cancelled() => break,
                post = posts.recv() => match post {
                    Some(post) => post,
                    None => break,
                },
            };

            if self.store.contains(post.id).await? {
                info!(post_id = post.id.0, "Post already mirrored, not building");
                self.queue.finish(post.id);
                continue;
            }

            let package = tokio::select! {
                _ = cancel.cancelled() => break,
                built = self.builder.build(&post) => built?,
            };

            // reserve first so a cancelled wait still owns the package
            let slot = tokio::select! {
                _ = cancel.cancelled() => None,
                slot = tx.reserve() => slot.ok(),
            };
            match slot {
                Some(slot) => slot.send(package),
                None => {
                    release(package).await;
                    break;
                }
            }
        }

        debug!("Build stage stopped");
        Ok(())
    }

    async fn deliver_stage(
        &self,
        mut packages: mpsc::Receiver<PostPackage>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        loop {
            let package = tokio::select! {
                _ = cancel.cancelled() => break,
                package = packages.recv() => match package {
                    Some(package) => package,
                    None => break,
                },
            };

            let post_id = package.post_id;
            let result = self.deliver_once(&package).await;
            release(package).await;
            self.queue.finish(post_id);

            match self.arena.sweep().await {
                Ok(0) => {}
                Ok(swept) => debug!(swept, "Removed orphaned post directories"),
                Err(e) => warn!(error = %e, "Failed to sweep orphaned post directories"),
            }

            result?;
        }

        debug!("Delivery stage stopped");
        Ok(())
    }

    async fn deliver_once(&self, package: &PostPackage) -> Result<()> {
        if self.store.contains(package.post_id).await? {
            info!(post_id = package.post_id.0, "Post already mirrored, not posting");
            return Ok(());
        }
        self.delivery.deliver(package).await.map(|_| ())
    }
}

async fn release(package: PostPackage) {
    let post_id = package.post_id;
    if let Err(e) = package.release().await {
        warn!(post_id = post_id.0, error = %e, "Failed to release post package");
    }
}
