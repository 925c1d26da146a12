//! Artifact acquisition, chunking and temporary file ownership
//!
//! - [`acquirer`]: reconnecting HTTP download of a single artifact
//! - [`chunker`]: writes a download to one file, or to numbered parts when it
//!   exceeds the destination's size limit
//! - [`arena`]: per-post temporary directories with generation-checked release
//! - [`pool`]: reusable transfer buffers

pub mod acquirer;
pub mod arena;
pub mod chunker;
pub mod pool;

pub use acquirer::{Acquisition, ArtifactAcquirer, ReadOutcome, ResilientStream};
pub use arena::{PostDir, TempArena};
pub use chunker::{ArtifactChunker, ChunkSource, Reassembled};
pub use pool::{BufferPool, PooledBuffer};

use crate::types::{ArchiveRef, MediaItem, MediaKind};
use std::path::PathBuf;

/// One file on local disk that will be uploaded to the destination
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Artifact {
    /// Path as seen by the destination's upload server
    pub server_path: PathBuf,
    /// Path on local disk
    pub local_path: PathBuf,
}

/// An audio track ready for upload
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioFile {
    /// The file on disk
    pub artifact: Artifact,
    /// Track title, when known
    pub title: Option<String>,
    /// Track artist; only set together with a title
    pub artist: Option<String>,
    /// Track length
    pub duration_seconds: u32,
    /// Name of the entry or reference the track came from
    pub source_name: String,
}

impl AudioFile {
    /// Upload description for the messaging client
    pub fn media_item(&self) -> MediaItem {
        MediaItem {
            server_path: self.artifact.server_path.clone(),
            kind: MediaKind::Audio {
                title: self.title.clone(),
                performer: self.artist.clone(),
                duration_seconds: self.duration_seconds,
            },
        }
    }
}

/// A downloaded archive (or one part of it) kept as an attachment
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveFile {
    /// The file on disk
    pub artifact: Artifact,
    /// The reference it was downloaded from
    pub origin: ArchiveRef,
}

impl ArchiveFile {
    /// Upload description for the messaging client
    pub fn media_item(&self) -> MediaItem {
        MediaItem {
            server_path: self.artifact.server_path.clone(),
            kind: MediaKind::Document,
        }
    }
}
