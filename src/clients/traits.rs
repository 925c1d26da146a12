//! Traits for the external collaborators

use crate::types::{AudioTags, Comment, Cursor, FeedPage, MediaItem, MessageId, PollOutcome, PostId};
use async_trait::async_trait;

/// Read access to the content feed
///
/// Implementations report upstream failures as [`crate::Error::SourceApi`] carrying
/// the upstream error code, or as [`crate::Error::Network`]. Benign long-poll
/// conditions are not errors: they come back as [`PollOutcome::Idle`] or
/// [`PollOutcome::CursorExpired`].
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// One page of posts, newest first, plus the feed's total post count
    async fn feed_page(&self, offset: u64, count: u64) -> crate::Result<FeedPage>;

    /// The first `count` comments under a post
    async fn comments(&self, post_id: PostId, count: u64) -> crate::Result<Vec<Comment>>;

    /// Open a long-poll session
    async fn handshake(&self) -> crate::Result<Cursor>;

    /// Wait for the next batch of events after `cursor`
    async fn poll_events(&self, cursor: &Cursor) -> crate::Result<PollOutcome>;
}

/// Write access to the messaging destination
///
/// Every send returns the id(s) of the message(s) it created, in order.
#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// Send a plain text message, or a photo captioned with `text` when `photo` is set
    async fn send_text_or_photo(&self, text: &str, photo: Option<&str>)
    -> crate::Result<MessageId>;

    /// Send up to one group's worth of media as a single album
    async fn send_media_group(&self, items: &[MediaItem]) -> crate::Result<Vec<MessageId>>;

    /// Send a single file as a document
    async fn send_document(&self, item: &MediaItem) -> crate::Result<MessageId>;

    /// Delete messages by id
    async fn delete_messages(&self, ids: &[MessageId]) -> crate::Result<()>;

    /// Send a notice to the operator
    async fn notify_admin(&self, text: &str) -> crate::Result<()>;

    /// Human-followable link to a message, used in admin notices
    fn message_link(&self, id: MessageId) -> String {
        id.to_string()
    }
}

/// Repairs text that was decoded with the wrong character set
pub trait TextNormalizer: Send + Sync {
    /// Return the repaired text (or the input unchanged)
    fn fix(&self, text: &str) -> String;
}

/// Reads tags from an in-memory audio file
pub trait MetadataReader: Send + Sync {
    /// Extract title, artist and duration
    ///
    /// `name` is the entry's file name and may be used to pick a container format.
    ///
    /// # Errors
    ///
    /// Returns an error when the bytes cannot be parsed; callers fall back to
    /// blank tags.
    fn read_tags(&self, bytes: &[u8], name: &str) -> crate::Result<AudioTags>;
}
