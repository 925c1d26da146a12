//! # feed-mirror
//!
//! Library for mirroring a remote content feed onto a messaging destination.
//!
//! ## Design Philosophy
//!
//! feed-mirror is designed to be:
//! - **Eventually consistent** - Periodic reconciliation delivers missed posts and retracts removed ones
//! - **Resilient** - Truncated downloads resume, oversized files are split, failed deliveries roll back
//! - **Library-first** - No CLI; the embedding application provides the feed and messaging clients
//! - **Bounded** - Built packages wait in a bounded channel, so slow delivery throttles building
//!
//! ## Quick Start
//!
//! ```no_run
//! use feed_mirror::{Collaborators, Config, Mirror, MirrorContext, run_with_shutdown};
//! # use feed_mirror::{IdentityNormalizer, NoOpMetadataReader, MessagingClient, SourceClient};
//! # use std::sync::Arc;
//! # async fn clients() -> (Arc<dyn SourceClient>, Arc<dyn MessagingClient>) { unimplemented!() }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_json_file(std::path::Path::new("mirror.json"))?;
//!     let (source, messaging) = clients().await;
//!
//!     let ctx = MirrorContext::open(
//!         config,
//!         Collaborators {
//!             source,
//!             messaging,
//!             normalizer: Arc::new(IdentityNormalizer),
//!             metadata: Arc::new(NoOpMetadataReader),
//!         },
//!     )
//!     .await?;
//!
//!     run_with_shutdown(Mirror::new(ctx)).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Artifact download, chunking and temporary storage
pub mod artifact;
/// Post package assembly
pub mod builder;
/// Interfaces to the feed, the messaging destination and helpers
pub mod clients;
/// Configuration types
pub mod config;
/// Delivery record persistence
pub mod db;
/// Package delivery and retraction
pub mod delivery;
/// Error types
pub mod error;
/// Archive expansion into audio tracks
pub mod extraction;
/// Feed scanning, live updates and the ingestion queue
pub mod ingest;
/// Build/delivery pipeline and the top-level runner
pub mod pipeline;
/// Retry logic with exponential backoff
pub mod retry;
/// Text splitting and file naming helpers
pub mod text;
/// Core value types
pub mod types;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use builder::{BuildWorker, PostPackage};
pub use clients::{
    IdentityNormalizer, MessagingClient, MetadataReader, NoOpMetadataReader, SourceClient,
    TextNormalizer,
};
pub use config::Config;
pub use db::StateStore;
pub use delivery::DeliveryWorker;
pub use error::{ArchiveError, DatabaseError, DeliveryError, Error, Result};
pub use ingest::{IngestQueue, LiveUpdateTracker, ReconciliationScanner};
pub use pipeline::{Collaborators, Mirror, MirrorContext, PackageBuilder, PipelineCoordinator};
pub use retry::{IsRetryable, RetryPolicy};
pub use types::{
    ArchiveRef, AudioRef, AudioTags, Comment, Cursor, FeedPage, MediaItem, MediaKind, MessageId,
    PollOutcome, PostId, SourcePost,
};

/// Run the mirror until a termination signal arrives or it fails.
///
/// On a signal the mirror is stopped, allowed to finish its current delivery,
/// and the state store is flushed and closed.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
pub async fn run_with_shutdown(mirror: Mirror) -> Result<()> {
    let run = mirror.run();
    tokio::pin!(run);

    let finished = tokio::select! {
        result = &mut run => Some(result),
        _ = wait_for_signal() => None,
    };
    let result = match finished {
        Some(result) => result,
        None => {
            mirror.stop();
            run.await
        }
    };

    mirror.shutdown().await?;
    result
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
