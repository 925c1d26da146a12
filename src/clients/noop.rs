//! Fallback collaborators for graceful degradation

use super::traits::{MetadataReader, TextNormalizer};
use crate::types::AudioTags;

/// Normalizer that returns its input unchanged
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityNormalizer;

impl TextNormalizer for IdentityNormalizer {
    fn fix(&self, text: &str) -> String {
        text.to_string()
    }
}

/// Metadata reader used when no tag parser is available
///
/// Always returns `Error::NotSupported`, so every track is named after its
/// archive entry and sent without title, performer or duration.
///
/// # Examples
///
/// ```
/// use feed_mirror::clients::{MetadataReader, NoOpMetadataReader};
///
/// let reader = NoOpMetadataReader;
/// assert!(reader.read_tags(b"ID3", "track.mp3").is_err());
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpMetadataReader;

impl MetadataReader for NoOpMetadataReader {
    fn read_tags(&self, _bytes: &[u8], name: &str) -> crate::Result<AudioTags> {
        Err(crate::Error::NotSupported(format!(
            "audio tag reading is not configured (entry {name})"
        )))
    }
}
