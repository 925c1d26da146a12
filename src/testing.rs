//! In-process fakes shared by unit tests

use crate::clients::{
    IdentityNormalizer, MessagingClient, NoOpMetadataReader, SourceClient,
};
use crate::config::{Config, RetryConfig};
use crate::db::StateStore;
use crate::pipeline::{Collaborators, MirrorContext};
use crate::types::{
    Comment, Cursor, FeedPage, MediaItem, MessageId, PollOutcome, PostId, SourcePost,
};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

/// A post with text only
pub(crate) fn text_post(id: i64, text: &str) -> SourcePost {
    SourcePost {
        id: PostId(id),
        text: text.to_string(),
        photo: None,
        archives: Vec::new(),
        audios: Vec::new(),
        is_private_tier: false,
    }
}

/// Configuration rooted in `root` with fast retries and no size floor
pub(crate) fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.storage.database_path = root.join("state.db");
    config.storage.local_files_dir = root.join("files");
    config.storage.server_files_dir = "/srv/files".into();
    config.feed.permalink_template = "https://feed.example/post/{id}".to_string();
    config.download.min_plausible_size = 0;
    config.download.transfer_buffer_size = 64 * 1024;
    config.download.reconnect = RetryConfig {
        max_attempts: Some(2),
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(10),
        backoff_multiplier: 1.0,
        jitter: false,
    };
    config.source.retry = RetryConfig {
        max_attempts: Some(2),
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(1),
        backoff_multiplier: 1.0,
        jitter: false,
    };
    config.pipeline.publish_pacing = Duration::ZERO;
    config.pipeline.comment_repoll_delay = Duration::from_millis(1);
    config
}

/// Context over fakes, with the store opened inside `root`
pub(crate) async fn test_context(
    config: Config,
    source: Arc<FakeSource>,
    messaging: Arc<FakeMessenger>,
) -> MirrorContext {
    let store = StateStore::open(&config.storage.database_path).await.unwrap();
    MirrorContext::with_store(
        config,
        store,
        Collaborators {
            source,
            messaging,
            normalizer: Arc::new(IdentityNormalizer),
            metadata: Arc::new(NoOpMetadataReader),
        },
    )
    .unwrap()
}

/// Scripted content source
#[derive(Default)]
pub(crate) struct FakeSource {
    /// Feed, newest first
    pub feed: Mutex<Vec<SourcePost>>,
    /// Comments by post; each call pops the front entry when more than one is queued
    pub comments: Mutex<HashMap<PostId, VecDeque<Vec<Comment>>>>,
    /// Long-poll answers, in order; an empty script parks the caller
    pub polls: Mutex<VecDeque<Result<PollOutcome>>>,
    pub handshakes: AtomicUsize,
    pub comment_calls: AtomicUsize,
    pub page_calls: AtomicUsize,
}

impl FakeSource {
    pub(crate) fn with_feed(feed: Vec<SourcePost>) -> Self {
        Self {
            feed: Mutex::new(feed),
            ..Default::default()
        }
    }

    pub(crate) fn push_comments(&self, post_id: PostId, comments: Vec<Comment>) {
        self.comments
            .lock()
            .unwrap()
            .entry(post_id)
            .or_default()
            .push_back(comments);
    }

    pub(crate) fn push_poll(&self, outcome: Result<PollOutcome>) {
        self.polls.lock().unwrap().push_back(outcome);
    }
}

#[async_trait]
impl SourceClient for FakeSource {
    async fn feed_page(&self, offset: u64, count: u64) -> Result<FeedPage> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        let feed = self.feed.lock().unwrap();
        let posts = feed
            .iter()
            .skip(offset as usize)
            .take(count as usize)
            .cloned()
            .collect();
        Ok(FeedPage {
            total: feed.len() as u64,
            posts,
        })
    }

    async fn comments(&self, post_id: PostId, _count: u64) -> Result<Vec<Comment>> {
        self.comment_calls.fetch_add(1, Ordering::SeqCst);
        let mut comments = self.comments.lock().unwrap();
        let Some(queue) = comments.get_mut(&post_id) else {
            return Ok(Vec::new());
        };
        if queue.len() > 1 {
            Ok(queue.pop_front().unwrap_or_default())
        } else {
            Ok(queue.front().cloned().unwrap_or_default())
        }
    }

    async fn handshake(&self) -> Result<Cursor> {
        let n = self.handshakes.fetch_add(1, Ordering::SeqCst);
        Ok(Cursor {
            key: format!("key-{n}"),
            server: "https://poll.example".to_string(),
            token: "0".to_string(),
        })
    }

    async fn poll_events(&self, _cursor: &Cursor) -> Result<PollOutcome> {
        let next = self.polls.lock().unwrap().pop_front();
        match next {
            Some(outcome) => outcome,
            None => std::future::pending().await,
        }
    }
}

/// One call made to the fake messenger
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum SentUnit {
    Text { text: String, photo: Option<String> },
    MediaGroup(Vec<MediaItem>),
    Document(MediaItem),
}

/// Recording messaging destination
#[derive(Default)]
pub(crate) struct FakeMessenger {
    next_id: AtomicI64,
    pub sent: Mutex<Vec<(SentUnit, Vec<MessageId>)>>,
    pub deleted: Mutex<Vec<Vec<MessageId>>>,
    pub admin: Mutex<Vec<String>>,
    /// Fail the n-th send call (1-based)
    pub fail_on_send: Option<usize>,
    pub fail_deletes: bool,
    /// When set, every send waits for a permit first
    pub gate: Option<Arc<Semaphore>>,
    send_calls: AtomicUsize,
}

impl FakeMessenger {
    pub(crate) fn failing_on(send: usize) -> Self {
        Self {
            fail_on_send: Some(send),
            ..Default::default()
        }
    }

    pub(crate) fn failing_deletes() -> Self {
        Self {
            fail_deletes: true,
            ..Default::default()
        }
    }

    pub(crate) fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Default::default()
        }
    }

    pub(crate) fn units(&self) -> Vec<SentUnit> {
        self.sent.lock().unwrap().iter().map(|(u, _)| u.clone()).collect()
    }

    pub(crate) fn sent_ids(&self) -> Vec<MessageId> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .flat_map(|(_, ids)| ids.clone())
            .collect()
    }

    pub(crate) fn deleted_ids(&self) -> Vec<MessageId> {
        self.deleted.lock().unwrap().concat()
    }

    async fn record(&self, unit: SentUnit, count: usize) -> Result<Vec<MessageId>> {
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        let call = self.send_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on_send == Some(call) {
            return Err(Error::Other(format!("send {call} rejected")));
        }
        let ids: Vec<MessageId> = (0..count)
            .map(|_| MessageId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1))
            .collect();
        self.sent.lock().unwrap().push((unit, ids.clone()));
        Ok(ids)
    }
}

#[async_trait]
impl MessagingClient for FakeMessenger {
    async fn send_text_or_photo(&self, text: &str, photo: Option<&str>) -> Result<MessageId> {
        let unit = SentUnit::Text {
            text: text.to_string(),
            photo: photo.map(str::to_string),
        };
        Ok(self.record(unit, 1).await?[0])
    }

    async fn send_media_group(&self, items: &[MediaItem]) -> Result<Vec<MessageId>> {
        self.record(SentUnit::MediaGroup(items.to_vec()), items.len())
            .await
    }

    async fn send_document(&self, item: &MediaItem) -> Result<MessageId> {
        Ok(self.record(SentUnit::Document(item.clone()), 1).await?[0])
    }

    async fn delete_messages(&self, ids: &[MessageId]) -> Result<()> {
        if self.fail_deletes {
            return Err(Error::Other("message can't be deleted".to_string()));
        }
        self.deleted.lock().unwrap().push(ids.to_vec());
        Ok(())
    }

    async fn notify_admin(&self, text: &str) -> Result<()> {
        self.admin.lock().unwrap().push(text.to_string());
        Ok(())
    }

    fn message_link(&self, id: MessageId) -> String {
        format!("https://chat.example/mirror/{id}")
    }
}
