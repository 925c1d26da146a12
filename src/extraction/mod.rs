//! Archive expansion into audio tracks
//!
//! Recognises ZIP, 7z and RAR archives by their magic bytes, streams every entry
//! with an audio extension out of the archive and writes it into the post
//! directory as a named track. Decoding runs on the blocking pool; entries cross
//! to the async side through a channel of capacity one, so at most one decoded
//! entry waits in memory at a time.
//!
//! A broken or unrecognised archive yields no tracks and a warning, never an
//! error: one bad archive must not sink the whole post. [`Expansion::unreadable`]
//! tells such an archive apart from a readable one without audio.

mod rar;
mod sevenz;
mod shared;
mod zip;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use crate::artifact::{ArtifactChunker, AudioFile, PostDir};
use crate::clients::{MetadataReader, TextNormalizer};
use crate::error::{ArchiveError, Error, Result};
use crate::text::{file_name_of, track_file_name};
use crate::types::AudioTags;
use shared::{ArchiveEntry, EntrySink};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const ZIP_EMPTY_MAGIC: &[u8] = b"PK\x05\x06";
const SEVENZ_MAGIC: &[u8] = &[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C];
const RAR_MAGIC: &[u8] = b"Rar!\x1A\x07";

/// Archive container format
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArchiveKind {
    /// ZIP
    Zip,
    /// 7-Zip
    SevenZip,
    /// RAR (v4 or v5)
    Rar,
}

/// Identify an archive by its leading bytes
pub fn detect_archive_kind(head: &[u8]) -> Option<ArchiveKind> {
    if head.starts_with(ZIP_MAGIC) || head.starts_with(ZIP_EMPTY_MAGIC) {
        Some(ArchiveKind::Zip)
    } else if head.starts_with(SEVENZ_MAGIC) {
        Some(ArchiveKind::SevenZip)
    } else if head.starts_with(RAR_MAGIC) {
        Some(ArchiveKind::Rar)
    } else {
        None
    }
}

/// Identify the archive stored at `path`
pub async fn sniff_archive_kind(path: &Path) -> Result<Option<ArchiveKind>> {
    let file = tokio::fs::File::open(path).await?;
    let mut head = Vec::with_capacity(8);
    file.take(8).read_to_end(&mut head).await?;
    Ok(detect_archive_kind(&head))
}

/// Tracks extracted from one archive
#[derive(Debug, Default)]
pub struct Expansion {
    /// Audio tracks in archive order (one entry per written file or part)
    pub tracks: Vec<AudioFile>,
    /// Number of audio entries extracted; differs from `tracks.len()` when a
    /// track was split into parts
    pub track_count: usize,
    /// The archive could not be opened or decoded
    pub unreadable: bool,
}

impl Expansion {
    fn unreadable() -> Self {
        Self {
            tracks: Vec::new(),
            track_count: 0,
            unreadable: true,
        }
    }
}

/// Turns archives into named, tagged audio files
#[derive(Clone)]
pub struct ArchiveExpander {
    chunker: ArtifactChunker,
    normalizer: Arc<dyn TextNormalizer>,
    metadata: Arc<dyn MetadataReader>,
}

impl ArchiveExpander {
    /// Create an expander writing tracks through `chunker`
    pub fn new(
        chunker: ArtifactChunker,
        normalizer: Arc<dyn TextNormalizer>,
        metadata: Arc<dyn MetadataReader>,
    ) -> Self {
        Self {
            chunker,
            normalizer,
            metadata,
        }
    }

    /// Extract the audio tracks of the archive at `archive_path` into `post_dir`
    ///
    /// Tracks are numbered from `tracks_before + 1`. An archive that cannot be
    /// read gives an unreadable, empty [`Expansion`] and a warning. Errors are
    /// reserved for failures writing the tracks themselves.
    pub async fn expand(
        &self,
        archive_path: &Path,
        post_dir: &PostDir,
        tracks_before: usize,
    ) -> Result<Expansion> {
        let kind = match sniff_archive_kind(archive_path).await {
            Ok(Some(kind)) => kind,
            Ok(None) => {
                warn!(
                    error = %ArchiveError::UnknownFormat { path: archive_path.to_path_buf() },
                    "skipping archive"
                );
                return Ok(Expansion::unreadable());
            }
            Err(e) => {
                warn!(archive = %archive_path.display(), error = %e, "failed to open archive");
                return Ok(Expansion::unreadable());
            }
        };

        debug!(archive = %archive_path.display(), ?kind, "expanding archive");

        let (tx, mut rx) = mpsc::channel::<ArchiveEntry>(1);
        let path_owned = archive_path.to_path_buf();
        let reader = tokio::task::spawn_blocking(move || {
            let sink = EntrySink::new(tx);
            match kind {
                ArchiveKind::Zip => zip::read_audio_entries(&path_owned, &sink),
                ArchiveKind::SevenZip => sevenz::read_audio_entries(&path_owned, &sink),
                ArchiveKind::Rar => rar::read_audio_entries(&path_owned, &sink),
            }
        });

        let mut tracks: Vec<AudioFile> = Vec::new();
        let mut track_number = tracks_before;
        while let Some(entry) = rx.recv().await {
            track_number += 1;
            let entry_name = self.normalizer.fix(file_name_of(&entry.name));
            let tags = self.read_tags(&entry.data, &entry_name);
            let saved = self
                .save_track(entry.data, tags, track_number, &entry_name, post_dir)
                .await;
            match saved {
                Ok(files) => tracks.extend(files),
                Err(e) => {
                    remove_files(tracks.iter().map(|t| &t.artifact.local_path)).await;
                    return Err(e);
                }
            }
        }

        let outcome = reader.await.map_err(|e| {
            Error::Archive(ArchiveError::Corrupt {
                path: archive_path.to_path_buf(),
                reason: format!("extraction task panicked: {}", e),
            })
        });

        match outcome {
            Ok(Ok(())) => {
                info!(
                    archive = %archive_path.display(),
                    tracks = tracks.len(),
                    "archive expanded"
                );
                Ok(Expansion {
                    tracks,
                    track_count: track_number - tracks_before,
                    unreadable: false,
                })
            }
            Ok(Err(e)) => {
                warn!(error = %e, "archive is corrupt, discarding its tracks");
                remove_files(tracks.iter().map(|t| &t.artifact.local_path)).await;
                Ok(Expansion::unreadable())
            }
            Err(e) => {
                warn!(error = %e, "archive expansion failed, discarding its tracks");
                remove_files(tracks.iter().map(|t| &t.artifact.local_path)).await;
                Ok(Expansion::unreadable())
            }
        }
    }

    /// Write one track into `post_dir`, splitting it when it exceeds the transport limit
    ///
    /// The artist is kept only alongside a non-blank title.
    pub async fn save_track(
        &self,
        data: Vec<u8>,
        tags: AudioTags,
        track_number: usize,
        source_name: &str,
        post_dir: &PostDir,
    ) -> Result<Vec<AudioFile>> {
        let title = tags.title.filter(|t| !t.trim().is_empty());
        let artist = match &title {
            Some(_) => tags.artist.filter(|a| !a.trim().is_empty()),
            None => None,
        };

        let file_name = track_file_name(
            track_number,
            title.as_deref(),
            artist.as_deref(),
            source_name,
        );
        let size = data.len() as u64;
        let paths = self
            .chunker
            .write(&mut Cursor::new(data), size, post_dir.local(), &file_name)
            .await?;

        debug!(file = %file_name, parts = paths.len(), "track saved");
        Ok(paths
            .into_iter()
            .map(|path| AudioFile {
                artifact: post_dir.artifact(path),
                title: title.clone(),
                artist: artist.clone(),
                duration_seconds: tags.duration_seconds,
                source_name: source_name.to_string(),
            })
            .collect())
    }

    /// Normalizer used for entry and reference names
    pub fn normalizer(&self) -> &dyn TextNormalizer {
        self.normalizer.as_ref()
    }

    /// Tags for an entry, blank when the reader fails
    pub fn read_tags(&self, data: &[u8], name: &str) -> AudioTags {
        match self.metadata.read_tags(data, name) {
            Ok(tags) => AudioTags {
                title: tags.title.map(|t| self.normalizer.fix(&t)),
                artist: tags.artist.map(|a| self.normalizer.fix(&a)),
                duration_seconds: tags.duration_seconds,
            },
            Err(e) => {
                warn!(entry = name, error = %e, "failed to read audio tags");
                AudioTags::default()
            }
        }
    }
}

async fn remove_files<'a>(paths: impl Iterator<Item = &'a PathBuf>) {
    for path in paths {
        if let Err(e) = tokio::fs::remove_file(path).await {
            warn!(path = %path.display(), error = %e, "failed to remove track");
        }
    }
}
