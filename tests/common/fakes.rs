//! In-memory feed and messaging destination

use async_trait::async_trait;
use feed_mirror::{
    Comment, Cursor, FeedPage, MediaItem, MessageId, MessagingClient, PollOutcome, PostId,
    Result, SourceClient, SourcePost,
};
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};

/// Feed whose content the test edits between scans
#[derive(Default)]
pub struct MemoryFeed {
    /// Posts, newest first
    pub posts: Mutex<Vec<SourcePost>>,
}

impl MemoryFeed {
    pub fn new(posts: Vec<SourcePost>) -> Self {
        Self {
            posts: Mutex::new(posts),
        }
    }

    /// Publish a post on top of the feed
    pub fn publish(&self, post: SourcePost) {
        self.posts.lock().unwrap().insert(0, post);
    }

    /// Delete a post from the feed
    pub fn delete(&self, id: PostId) {
        self.posts.lock().unwrap().retain(|p| p.id != id);
    }
}

#[async_trait]
impl SourceClient for MemoryFeed {
    async fn feed_page(&self, offset: u64, count: u64) -> Result<FeedPage> {
        let posts = self.posts.lock().unwrap();
        Ok(FeedPage {
            total: posts.len() as u64,
            posts: posts
                .iter()
                .skip(offset as usize)
                .take(count as usize)
                .cloned()
                .collect(),
        })
    }

    async fn comments(&self, _post_id: PostId, _count: u64) -> Result<Vec<Comment>> {
        Ok(Vec::new())
    }

    async fn handshake(&self) -> Result<Cursor> {
        Ok(Cursor {
            key: "key".to_string(),
            server: "https://poll.example".to_string(),
            token: "0".to_string(),
        })
    }

    async fn poll_events(&self, _cursor: &Cursor) -> Result<PollOutcome> {
        std::future::pending().await
    }
}

/// One message visible in the destination chat
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    Text {
        text: String,
        photo: Option<String>,
    },
    Media(MediaItem),
}

/// Destination chat that keeps only messages not yet deleted
#[derive(Default)]
pub struct MemoryChat {
    next_id: AtomicI64,
    pub messages: Mutex<Vec<(MessageId, Message)>>,
    pub admin: Mutex<Vec<String>>,
}

impl MemoryChat {
    fn push(&self, message: Message) -> MessageId {
        let id = MessageId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.messages.lock().unwrap().push((id, message));
        id
    }

    pub fn texts(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(_, m)| match m {
                Message::Text { text, .. } => Some(text.clone()),
                Message::Media(_) => None,
            })
            .collect()
    }

    pub fn media(&self) -> Vec<MediaItem> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(_, m)| match m {
                Message::Media(item) => Some(item.clone()),
                Message::Text { .. } => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().unwrap().len()
    }
}

#[async_trait]
impl MessagingClient for MemoryChat {
    async fn send_text_or_photo(&self, text: &str, photo: Option<&str>) -> Result<MessageId> {
        Ok(self.push(Message::Text {
            text: text.to_string(),
            photo: photo.map(str::to_string),
        }))
    }

    async fn send_media_group(&self, items: &[MediaItem]) -> Result<Vec<MessageId>> {
        Ok(items
            .iter()
            .map(|item| self.push(Message::Media(item.clone())))
            .collect())
    }

    async fn send_document(&self, item: &MediaItem) -> Result<MessageId> {
        Ok(self.push(Message::Media(item.clone())))
    }

    async fn delete_messages(&self, ids: &[MessageId]) -> Result<()> {
        self.messages
            .lock()
            .unwrap()
            .retain(|(id, _)| !ids.contains(id));
        Ok(())
    }

    async fn notify_admin(&self, text: &str) -> Result<()> {
        self.admin.lock().unwrap().push(text.to_string());
        Ok(())
    }
}
