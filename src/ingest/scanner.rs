//! Periodic reconciliation of the whole feed against the state store
//!
//! Push events get lost and posts get deleted upstream, so every few days the
//! scanner reads the complete feed, queues every post that was never mirrored
//! and retracts every mirrored post that no longer exists. The first scan after
//! start only looks at the most recent posts and never retracts: a partial view
//! of the feed must not be mistaken for mass deletion.

use super::{IngestQueue, compile_link_patterns, enrich_post};
use crate::clients::SourceClient;
use crate::config::FeedConfig;
use crate::db::StateStore;
use crate::delivery::DeliveryWorker;
use crate::pipeline::MirrorContext;
use crate::retry::{RetryPolicy, with_retry};
use crate::types::{PostId, SourcePost};
use crate::Result;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Outcome of comparing the feed with the store
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Diff {
    /// Posts to mirror, oldest first
    pub additions: Vec<SourcePost>,
    /// Mirrored posts that disappeared upstream
    pub retractions: Vec<PostId>,
}

/// Compare upstream posts (oldest first) with the stored ids
///
/// Private-tier posts are never additions. On the first run nothing is
/// retracted.
pub fn diff(upstream: Vec<SourcePost>, stored: &[PostId], first_run: bool) -> Diff {
    let stored_set: HashSet<PostId> = stored.iter().copied().collect();
    let upstream_ids: HashSet<PostId> = upstream.iter().map(|p| p.id).collect();

    let retractions = if first_run {
        Vec::new()
    } else {
        stored
            .iter()
            .filter(|id| !upstream_ids.contains(id))
            .copied()
            .collect()
    };

    let additions = upstream
        .into_iter()
        .filter(|p| !p.is_private_tier && !stored_set.contains(&p.id))
        .collect();

    Diff {
        additions,
        retractions,
    }
}

/// Summary of one scan
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Distinct posts read from the feed
    pub fetched: usize,
    /// Posts sent to the build queue
    pub enqueued: usize,
    /// Posts removed from the destination
    pub retracted: usize,
}

/// Full-feed reconciliation loop
pub struct ReconciliationScanner {
    source: Arc<dyn SourceClient>,
    store: StateStore,
    delivery: DeliveryWorker,
    queue: IngestQueue,
    feed: FeedConfig,
    scan_interval: Duration,
    publish_pacing: Duration,
    retry: RetryPolicy,
    link_patterns: Vec<Regex>,
    skip: HashSet<PostId>,
    first_run: bool,
}

impl ReconciliationScanner {
    /// Create a scanner feeding `queue`
    pub fn new(ctx: &MirrorContext, queue: IngestQueue) -> Result<Self> {
        Ok(Self {
            source: ctx.source.clone(),
            store: ctx.store.clone(),
            delivery: DeliveryWorker::new(ctx),
            queue,
            feed: ctx.config.feed.clone(),
            scan_interval: ctx.config.pipeline.scan_interval,
            publish_pacing: ctx.config.pipeline.publish_pacing,
            retry: RetryPolicy::from(&ctx.config.source.retry),
            link_patterns: compile_link_patterns(&ctx.config.feed.archive_link_patterns)?,
            skip: ctx.config.feed.skip_post_ids.iter().copied().collect(),
            first_run: true,
        })
    }

    /// Whether the next scan is the first since start
    pub fn is_first_run(&self) -> bool {
        self.first_run
    }

    /// Read the feed, oldest first and without duplicates
    ///
    /// With a `limit` only that many of the most recent posts are read.
    pub async fn fetch_posts(&self, limit: Option<u64>) -> Result<Vec<SourcePost>> {
        let page_size = u64::from(self.feed.page_size.max(1));
        let mut posts: Vec<SourcePost> = Vec::new();
        let mut offset: u64 = 0;

        loop {
            let page = with_retry(&self.retry, || self.source.feed_page(offset, page_size)).await?;
            let target = limit.map_or(page.total, |l| l.min(page.total));
            if page.posts.is_empty() {
                break;
            }

            offset += page.posts.len() as u64;
            posts.extend(page.posts);
            debug!(read = offset, total = target, "Read feed page");
            if offset >= target {
                break;
            }
        }

        if let Some(limit) = limit {
            posts.truncate(limit as usize);
        }
        posts.reverse();

        let mut seen = HashSet::new();
        posts.retain(|p| seen.insert(p.id));
        info!(count = posts.len(), "Read feed");
        Ok(posts)
    }

    /// Run one reconciliation pass under the ingestion permit
    pub async fn scan_once(&mut self, cancel: &CancellationToken) -> Result<ScanSummary> {
        let guard = self.queue.lock().await?;
        let started = Instant::now();
        info!(first_run = self.first_run, "Started feed reconciliation");

        let limit = if self.first_run {
            self.feed.initial_scan_limit
        } else {
            None
        };
        let upstream = self.fetch_posts(limit).await?;
        let fetched = upstream.len();
        let stored = self.store.list_all_source_ids().await?;

        let Diff {
            additions,
            retractions,
        } = diff(upstream, &stored, self.first_run);
        let additions: Vec<SourcePost> = additions
            .into_iter()
            .filter(|p| !self.skip.contains(&p.id) && !self.queue.is_pending(&guard, p.id))
            .collect();
        info!(
            additions = additions.len(),
            retractions = retractions.len(),
            "Found unposted and removed posts"
        );

        let mut enqueued = 0;
        for post in additions {
            let (post, _) = with_retry(&self.retry, || {
                let mut candidate = post.clone();
                let source = self.source.as_ref();
                let comment_count = self.feed.comment_fetch_count;
                let patterns = self.link_patterns.as_slice();
                async move {
                    let added = enrich_post(source, &mut candidate, comment_count, patterns).await?;
                    Ok::<_, crate::Error>((candidate, added))
                }
            })
            .await?;

            if self.queue.enqueue(&guard, post)? {
                enqueued += 1;
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(ScanSummary { fetched, enqueued, retracted: 0 }),
                    _ = tokio::time::sleep(self.publish_pacing) => {}
                }
            }
        }

        let mut retracted = 0;
        for id in retractions {
            self.delivery.retract(id).await?;
            retracted += 1;
        }

        self.first_run = false;
        let summary = ScanSummary {
            fetched,
            enqueued,
            retracted,
        };
        info!(
            fetched,
            enqueued,
            retracted,
            elapsed_ms = started.elapsed().as_millis(),
            "Finished feed reconciliation"
        );
        Ok(summary)
    }

    /// Scan now and then every `scan_interval` until cancelled
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                result = self.scan_once(&cancel) => { result?; }
            }

            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.scan_interval) => {}
            }
        }
    }
}
