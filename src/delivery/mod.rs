//! Delivery of built packages to the messaging destination
//!
//! A package goes out as a fixed sequence of send units:
//!
//! 1. the title unit: photo with the first text part as caption, or the first
//!    text part alone
//! 2. every remaining text part
//! 3. audio tracks in media groups
//! 4. archives, as a single document or as document groups
//!
//! Any failure along the way deletes everything already sent for the post and
//! reports [`DeliveryError::Failed`]. Only a fully delivered post gets a
//! delivery record.

use crate::builder::PostPackage;
use crate::clients::MessagingClient;
use crate::config::DeliveryConfig;
use crate::db::StateStore;
use crate::error::{DeliveryError, Error, Result};
use crate::pipeline::MirrorContext;
use crate::text::split_text_parts;
use crate::types::{MediaItem, MessageId, PostId};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};


/// Sends packages and retracts delivered posts
#[derive(Clone)]
pub struct DeliveryWorker {
    messaging: Arc<dyn MessagingClient>,
    store: StateStore,
    config: DeliveryConfig,
}

impl DeliveryWorker {
    /// Create a worker from the shared context
    pub fn new(ctx: &MirrorContext) -> Self {
        Self {
            messaging: ctx.messaging.clone(),
            store: ctx.store.clone(),
            config: ctx.config.delivery.clone(),
        }
    }

    /// Send `package` and record the delivery
    ///
    /// Returns the destination message ids in send order. The package is not
    /// released here; its files stay until the caller releases it.
    pub async fn deliver(&self, package: &PostPackage) -> Result<Vec<MessageId>> {
        let post_id = package.post_id;
        info!(post_id = post_id.0, "Posting post");
        let started = Instant::now();

        let mut sent: Vec<MessageId> = Vec::new();
        if let Err(e) = self.send_units(package, &mut sent).await {
            error!(
                post_id = post_id.0,
                sent = sent.len(),
                error = %e,
                "Delivery failed, rolling back"
            );
            if !sent.is_empty() {
                self.delete_or_escalate(&sent).await;
            }
            return Err(Error::Delivery(DeliveryError::Failed {
                post_id,
                sent,
                source: Box::new(e),
            }));
        }

        self.store.put(post_id, &sent).await?;
        info!(
            post_id = post_id.0,
            messages = sent.len(),
            elapsed_ms = started.elapsed().as_millis(),
            "Posted post"
        );
        Ok(sent)
    }

    async fn send_units(&self, package: &PostPackage, sent: &mut Vec<MessageId>) -> Result<()> {
        let mut text_parts = package.text_parts.iter();
        let title = text_parts.next().map(String::as_str).unwrap_or_default();
        if !title.is_empty() || package.photo.is_some() {
            let id = self
                .messaging
                .send_text_or_photo(title, package.photo.as_deref())
                .await?;
            sent.push(id);
        }

        for part in text_parts {
            let id = self.messaging.send_text_or_photo(part, None).await?;
            sent.push(id);
        }

        let audio: Vec<MediaItem> = package.audio_files.iter().map(|f| f.media_item()).collect();
        for group in audio.chunks(self.config.media_group_size.max(1)) {
            let ids = self.messaging.send_media_group(group).await?;
            let checked = check_group_response(group, &ids);
            sent.extend(ids);
            checked?;
        }

        let archives: Vec<MediaItem> = package
            .archive_files
            .iter()
            .map(|f| f.media_item())
            .collect();
        match archives.as_slice() {
            [] => {}
            [single] => sent.push(self.messaging.send_document(single).await?),
            many => {
                for group in many.chunks(self.config.media_group_size.max(1)) {
                    let ids = self.messaging.send_media_group(group).await?;
                    let checked = check_group_response(group, &ids);
                    sent.extend(ids);
                    checked?;
                }
            }
        }

        Ok(())
    }

    /// Delete messages in batches, asking the admin to remove them by hand if that fails
    ///
    /// Never fails: a deletion error is logged and escalated instead.
    pub async fn delete_or_escalate(&self, ids: &[MessageId]) {
        for batch in ids.chunks(self.config.delete_batch_size.max(1)) {
            if let Err(e) = self.messaging.delete_messages(batch).await {
                warn!(count = ids.len(), error = %e, "Failed to delete messages, asking admin");
                self.escalate(ids).await;
                return;
            }
        }
    }

    async fn escalate(&self, ids: &[MessageId]) {
        let mut text = String::from("Delete these:\n");
        for id in ids {
            text.push_str(&self.messaging.message_link(*id));
            text.push('\n');
        }

        for part in split_text_parts(&text, self.config.message_limit, self.config.message_limit) {
            if let Err(e) = self.messaging.notify_admin(&part).await {
                error!(error = %e, "Failed to send deletion request to admin");
                return;
            }
        }
    }

    /// Remove a delivered post from the destination and forget it
    pub async fn retract(&self, post_id: PostId) -> Result<()> {
        let Some(ids) = self.store.get_destination_ids(post_id).await? else {
            warn!(post_id = post_id.0, "Unable to retract post: it was never posted");
            return Ok(());
        };

        self.delete_or_escalate(&ids).await;
        self.store.remove_by_source_id(post_id).await?;
        info!(post_id = post_id.0, messages = ids.len(), "Retracted post");
        Ok(())
    }
}

fn check_group_response(group: &[MediaItem], ids: &[MessageId]) -> Result<()> {
    if ids.len() == group.len() {
        return Ok(());
    }
    Err(Error::Delivery(DeliveryError::UnexpectedResponse(format!(
        "media group of {} item(s) produced {} message id(s)",
        group.len(),
        ids.len()
    ))))
}
