//! Build and delivery stages plus the top-level runner
//!
//! Posts leave the ingestion queue for the build stage, which turns them into
//! [`PostPackage`]s and hands them to the delivery stage over a bounded channel.
//! The channel capacity caps how many built packages (and their files) wait on
//! disk at once; when delivery falls behind the build stage blocks.
//!
//! [`Mirror`] wires the stages to the scanner and the tracker and runs all of
//! them until cancelled or until one fails.

pub mod context;
mod coordinator;
mod mirror;

pub use context::{Collaborators, MirrorContext};
pub use coordinator::PipelineCoordinator;
pub use mirror::Mirror;

use crate::builder::{BuildWorker, PostPackage};
use crate::types::SourcePost;
use crate::Result;
use async_trait::async_trait;

/// Turns a post into a deliverable package
#[async_trait]
pub trait PackageBuilder: Send + Sync {
    /// Build the package for `post`
    async fn build(&self, post: &SourcePost) -> Result<PostPackage>;
}

#[async_trait]
impl PackageBuilder for BuildWorker {
    async fn build(&self, post: &SourcePost) -> Result<PostPackage> {
        BuildWorker::build(self, post).await
    }
}
