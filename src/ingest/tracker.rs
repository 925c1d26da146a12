//! Long-poll subscription to newly published posts
//!
//! Authors often attach the archive in a comment a little after publishing, so
//! a post that arrives with fewer than two archives gets its comments re-read a
//! few times before it is queued.

use super::{IngestQueue, compile_link_patterns, enrich_post};
use crate::clients::SourceClient;
use crate::db::StateStore;
use crate::pipeline::MirrorContext;
use crate::retry::{RetryPolicy, poll_until, with_retry};
use crate::types::{Cursor, PollOutcome, PostId, SourcePost};
use crate::Result;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Posts with at least this many archives are queued without reading comments
const ENRICHED_ARCHIVE_COUNT: usize = 2;

/// Follows the live event stream and queues new posts
pub struct LiveUpdateTracker {
    source: Arc<dyn SourceClient>,
    store: StateStore,
    queue: IngestQueue,
    comment_count: u32,
    retry: RetryPolicy,
    repoll: RetryPolicy,
    link_patterns: Vec<Regex>,
    skip: HashSet<PostId>,
}

impl LiveUpdateTracker {
    /// Create a tracker feeding `queue`
    pub fn new(ctx: &MirrorContext, queue: IngestQueue) -> Result<Self> {
        let pipeline = &ctx.config.pipeline;
        Ok(Self {
            source: ctx.source.clone(),
            store: ctx.store.clone(),
            queue,
            comment_count: ctx.config.feed.comment_fetch_count,
            retry: RetryPolicy::from(&ctx.config.source.retry),
            repoll: RetryPolicy::constant(
                Some(pipeline.comment_repoll_attempts),
                pipeline.comment_repoll_delay,
            ),
            link_patterns: compile_link_patterns(&ctx.config.feed.archive_link_patterns)?,
            skip: ctx.config.feed.skip_post_ids.iter().copied().collect(),
        })
    }

    async fn handshake(&self) -> Result<Cursor> {
        let cursor = with_retry(&self.retry, || self.source.handshake()).await?;
        info!(server = %cursor.server, "Subscribed to live updates");
        Ok(cursor)
    }

    /// Poll for events until cancelled
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let mut cursor = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            cursor = self.handshake() => cursor?,
        };

        loop {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                outcome = with_retry(&self.retry, || self.source.poll_events(&cursor)) => outcome?,
            };

            match outcome {
                PollOutcome::Events { token, posts } => {
                    cursor.token = token;
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(()),
                        handled = self.handle_posts(posts) => { handled?; }
                    }
                }
                PollOutcome::Idle { token } => {
                    if let Some(token) = token {
                        cursor.token = token;
                    }
                }
                PollOutcome::CursorExpired => {
                    info!("Live update cursor expired, subscribing again");
                    cursor = self.handshake().await?;
                }
            }
        }
    }

    /// Queue the posts of one event batch; returns how many were queued
    pub async fn handle_posts(&self, posts: Vec<SourcePost>) -> Result<usize> {
        let mut fresh = Vec::new();
        for post in posts {
            if post.is_private_tier || self.skip.contains(&post.id) {
                debug!(post_id = post.id.0, "Ignoring post");
                continue;
            }
            if self.store.contains(post.id).await? {
                debug!(post_id = post.id.0, "Post already mirrored");
                continue;
            }
            fresh.push(post);
        }
        if fresh.is_empty() {
            return Ok(0);
        }
        info!(count = fresh.len(), "Got new posts");

        let guard = self.queue.lock().await?;
        let mut queued = 0;
        for post in fresh {
            if self.queue.is_pending(&guard, post.id) {
                continue;
            }
            let post = if post.archives.len() < ENRICHED_ARCHIVE_COUNT {
                let has_comment_archives = |(_, added): &(SourcePost, usize)| *added > 0;
                let (post, _) =
                    poll_until(&self.repoll, has_comment_archives, || self.enrich(&post)).await?;
                post
            } else {
                post
            };
            if self.queue.enqueue(&guard, post)? {
                queued += 1;
            }
        }
        Ok(queued)
    }

    async fn enrich(&self, post: &SourcePost) -> Result<(SourcePost, usize)> {
        with_retry(&self.retry, || {
            let mut candidate = post.clone();
            let source = self.source.as_ref();
            let patterns = self.link_patterns.as_slice();
            let comment_count = self.comment_count;
            async move {
                let added = enrich_post(source, &mut candidate, comment_count, patterns).await?;
                Ok::<_, crate::Error>((candidate, added))
            }
        })
        .await
    }
}
