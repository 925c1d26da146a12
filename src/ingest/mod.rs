//! Ingestion of posts into the build queue
//!
//! Two sources feed the pipeline: the periodic [`scanner::ReconciliationScanner`]
//! and the long-polling [`tracker::LiveUpdateTracker`]. They take turns through a
//! single [`IngestPermit`]; whoever holds it may inspect the pending set and
//! enqueue. A post stays pending from the moment it is enqueued until the
//! delivery stage is done with it, so the same post is never queued twice.

pub mod scanner;
pub mod tracker;

use crate::clients::SourceClient;
use crate::error::Error;
use crate::types::{ArchiveRef, PostId, SourcePost};
use crate::Result;
use regex::Regex;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tracing::{debug, info};
use url::Url;

pub use scanner::{Diff, ReconciliationScanner, diff};
pub use tracker::LiveUpdateTracker;

/// Proof of holding the ingestion permit
///
/// Released on drop.
#[derive(Debug)]
pub struct IngestGuard {
    _permit: OwnedSemaphorePermit,
}

/// The one-slot gate serializing the ingestion sources
#[derive(Clone, Debug)]
pub struct IngestPermit {
    semaphore: Arc<Semaphore>,
}

impl Default for IngestPermit {
    fn default() -> Self {
        Self::new()
    }
}

impl IngestPermit {
    /// Create an open gate
    pub fn new() -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(1)),
        }
    }

    /// Wait for the permit
    pub async fn acquire(&self) -> Result<IngestGuard> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::ShuttingDown)?;
        Ok(IngestGuard { _permit: permit })
    }

    /// Refuse all future acquisitions
    pub fn close(&self) {
        self.semaphore.close();
    }
}

/// Unbounded queue of posts waiting to be built, plus the set of pending ids
#[derive(Clone, Debug)]
pub struct IngestQueue {
    tx: mpsc::UnboundedSender<SourcePost>,
    pending: Arc<Mutex<HashSet<PostId>>>,
    permit: IngestPermit,
}

impl IngestQueue {
    /// Create a queue and the receiving end for the build stage
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SourcePost>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = Self {
            tx,
            pending: Arc::new(Mutex::new(HashSet::new())),
            permit: IngestPermit::new(),
        };
        (queue, rx)
    }

    /// The permit guarding this queue
    pub fn permit(&self) -> &IngestPermit {
        &self.permit
    }

    /// Wait for the ingestion permit
    pub async fn lock(&self) -> Result<IngestGuard> {
        self.permit.acquire().await
    }

    fn pending(&self) -> MutexGuard<'_, HashSet<PostId>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether `id` is queued, being built or being delivered
    pub fn is_pending(&self, _guard: &IngestGuard, id: PostId) -> bool {
        self.pending().contains(&id)
    }

    /// Queue `post` for building
    ///
    /// Returns `false` without queueing when the post is already pending.
    pub fn enqueue(&self, _guard: &IngestGuard, post: SourcePost) -> Result<bool> {
        let id = post.id;
        if !self.pending().insert(id) {
            debug!(post_id = id.0, "Post already pending, not queueing again");
            return Ok(false);
        }
        if self.tx.send(post).is_err() {
            self.pending().remove(&id);
            return Err(Error::ShuttingDown);
        }
        info!(post_id = id.0, "Sent post to build queue");
        Ok(true)
    }

    /// Mark a post as no longer pending
    pub fn finish(&self, id: PostId) {
        self.pending().remove(&id);
    }

    /// Number of pending posts
    pub fn pending_count(&self) -> usize {
        self.pending().len()
    }
}

/// Compile the configured archive link patterns
pub fn compile_link_patterns(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|e| {
                Error::config(
                    "feed.archive_link_patterns",
                    format!("invalid pattern {p:?}: {e}"),
                )
            })
        })
        .collect()
}

/// Archive links found in `text`
pub fn extract_archive_links(text: &str, patterns: &[Regex]) -> Vec<ArchiveRef> {
    patterns
        .iter()
        .flat_map(|re| re.find_iter(text))
        .filter_map(|m| {
            let uri = Url::parse(m.as_str()).ok()?;
            let display_name = uri
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .filter(|s| !s.is_empty())
                .unwrap_or("archive")
                .to_string();
            Some(ArchiveRef {
                uri,
                declared_size: 0,
                display_name,
            })
        })
        .collect()
}

/// Add archives from the author's comments and from links in the texts
///
/// Archives already on the post (same URI) are not added again. Returns how
/// many archives came from comment attachments.
pub async fn enrich_post(
    source: &dyn SourceClient,
    post: &mut SourcePost,
    comment_count: u32,
    link_patterns: &[Regex],
) -> Result<usize> {
    let comments = source.comments(post.id, u64::from(comment_count)).await?;
    let author_comments: Vec<_> = comments.into_iter().filter(|c| c.from_author).collect();

    let mut known: HashSet<Url> = post.archives.iter().map(|a| a.uri.clone()).collect();
    let mut from_comments = 0;

    for archive in author_comments.iter().flat_map(|c| c.archives.iter()) {
        if known.insert(archive.uri.clone()) {
            post.archives.push(archive.clone());
            from_comments += 1;
        }
    }

    let linked = std::iter::once(post.text.as_str())
        .chain(author_comments.iter().map(|c| c.text.as_str()))
        .flat_map(|text| extract_archive_links(text, link_patterns))
        .collect::<Vec<_>>();
    for archive in linked {
        if known.insert(archive.uri.clone()) {
            post.archives.push(archive);
        }
    }

    debug!(
        post_id = post.id.0,
        from_comments,
        archives = post.archives.len(),
        "Enriched post"
    );
    Ok(from_comments)
}
