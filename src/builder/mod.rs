//! Post package assembly
//!
//! Turns one [`SourcePost`] into a [`PostPackage`]: message-sized text parts,
//! audio tracks extracted from the post's archives (or its directly attached
//! tracks), and the archives themselves as attachments. Everything lands in a
//! fresh per-post directory that the package owns until delivery releases it.
//!
//! ## Archive selection
//!
//! Archives are downloaded concurrently and then considered smallest first.
//! The first archive that yields audio supplies the track list. A readable
//! archive without audio seen before that point is deleted. Later archives are
//! only attached, except when their name marks them as another disc of the same
//! release, in which case their tracks are appended.

use crate::artifact::{
    Acquisition, ArchiveFile, ArtifactAcquirer, ArtifactChunker, AudioFile, PostDir, ReadOutcome,
    ResilientStream, TempArena,
};
use crate::config::{DeliveryConfig, FeedConfig};
use crate::error::Result;
use crate::extraction::ArchiveExpander;
use crate::pipeline::MirrorContext;
use crate::text::{sanitize_filename, split_text_parts, track_order};
use crate::types::{ArchiveRef, AudioRef, AudioTags, PostId, SourcePost};
use futures::future::try_join_all;
use regex::Regex;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Instant;
use tracing::{debug, info, warn};

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

#[allow(clippy::expect_used)]
static MULTI_DISC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:^|[^a-z])(disc|disk|cd)[\s_-]*\d+").expect("valid multi-disc regex"));

/// More attached archives than this are logged as suspicious
const EXPECTED_MAX_ARCHIVES: usize = 2;

/// Size of the read buffer for directly attached tracks
const AUDIO_READ_BUFFER: usize = 64 * 1024;

/// Whether an archive name marks it as one disc of a multi-disc release
pub fn is_multi_disc(name: &str) -> bool {
    MULTI_DISC_RE.is_match(name)
}

/// Everything needed to deliver one post
///
/// Owns the post directory; [`PostPackage::release`] deletes it together with
/// every artifact inside.
#[derive(Debug)]
pub struct PostPackage {
    /// The post this package mirrors
    pub post_id: PostId,
    /// Text split into message-sized parts, in send order
    pub text_parts: Vec<String>,
    /// Photo reference sent with the first text part
    pub photo: Option<String>,
    /// Tracks, in send order
    pub audio_files: Vec<AudioFile>,
    /// Archive files (or parts), in send order
    pub archive_files: Vec<ArchiveFile>,
    dir: PostDir,
}

impl PostPackage {
    /// Assemble a package around an already allocated directory
    pub fn new(
        post_id: PostId,
        text_parts: Vec<String>,
        photo: Option<String>,
        audio_files: Vec<AudioFile>,
        archive_files: Vec<ArchiveFile>,
        dir: PostDir,
    ) -> Self {
        Self {
            post_id,
            text_parts,
            photo,
            audio_files,
            archive_files,
            dir,
        }
    }

    /// The directory holding this package's files
    pub fn dir(&self) -> &PostDir {
        &self.dir
    }

    /// Delete the package's files
    pub async fn release(self) -> Result<()> {
        self.dir.release().await
    }
}

/// A downloaded archive, possibly split into parts
struct DownloadedArchive {
    origin: ArchiveRef,
    parts: Vec<PathBuf>,
}

/// Builds [`PostPackage`]s
#[derive(Clone)]
pub struct BuildWorker {
    feed: FeedConfig,
    delivery: DeliveryConfig,
    arena: TempArena,
    acquirer: ArtifactAcquirer,
    chunker: ArtifactChunker,
    expander: ArchiveExpander,
}

impl BuildWorker {
    /// Create a worker sharing the context's arena, acquirer and expander
    pub fn new(ctx: &MirrorContext) -> Self {
        Self {
            feed: ctx.config.feed.clone(),
            delivery: ctx.config.delivery.clone(),
            arena: ctx.arena.clone(),
            acquirer: ctx.acquirer.clone(),
            chunker: ctx.chunker.clone(),
            expander: ctx.expander.clone(),
        }
    }

    /// Text parts for a post: body, blank line, permalink
    pub fn prepare_text(&self, post: &SourcePost) -> Vec<String> {
        let text = format!("{}\n\n{}", post.text, self.feed.permalink(post.id));
        let first_limit = if post.photo.is_some() {
            self.delivery.caption_limit
        } else {
            self.delivery.message_limit
        };
        split_text_parts(&text, first_limit, self.delivery.message_limit)
    }

    /// Build the package for `post`
    ///
    /// On error the post directory is removed before the error is returned.
    pub async fn build(&self, post: &SourcePost) -> Result<PostPackage> {
        info!(post_id = post.id.0, archives = post.archives.len(), "Building post");
        let started = Instant::now();

        let text_parts = self.prepare_text(post);
        let dir = self.arena.allocate().await?;

        match self.collect_files(post, &dir).await {
            Ok((audio_files, archive_files)) => {
                info!(
                    post_id = post.id.0,
                    tracks = audio_files.len(),
                    archives = archive_files.len(),
                    elapsed_ms = started.elapsed().as_millis(),
                    "Built post"
                );
                Ok(PostPackage::new(
                    post.id,
                    text_parts,
                    post.photo.clone(),
                    audio_files,
                    archive_files,
                    dir,
                ))
            }
            Err(e) => {
                if let Err(release_err) = dir.release().await {
                    warn!(post_id = post.id.0, error = %release_err, "Failed to release post directory");
                }
                Err(e)
            }
        }
    }

    async fn collect_files(
        &self,
        post: &SourcePost,
        dir: &PostDir,
    ) -> Result<(Vec<AudioFile>, Vec<ArchiveFile>)> {
        let downloaded = self.download_archives(&post.archives, dir).await?;

        let mut audio_files: Vec<AudioFile> = Vec::new();
        let mut archive_files: Vec<ArchiveFile> = Vec::new();
        let mut track_count = 0;

        for archive in downloaded {
            let found_audio = !audio_files.is_empty();
            if !found_audio || is_multi_disc(&archive.origin.display_name) {
                let reassembled = self.chunker.reassemble(&archive.parts, dir.local()).await?;
                let expansion = self
                    .expander
                    .expand(reassembled.path(), dir, track_count)
                    .await?;
                drop(reassembled);

                if expansion.tracks.is_empty() && !found_audio && !expansion.unreadable {
                    debug!(
                        post_id = post.id.0,
                        archive = %archive.origin.display_name,
                        "Archive has no audio, discarding it"
                    );
                    remove_parts(&archive.parts).await;
                    continue;
                }
                track_count += expansion.track_count;
                audio_files.extend(expansion.tracks);
            }

            archive_files.extend(archive.parts.into_iter().map(|path| ArchiveFile {
                artifact: dir.artifact(path),
                origin: archive.origin.clone(),
            }));
        }

        if audio_files.is_empty() && !post.audios.is_empty() {
            audio_files = self.save_direct_audios(&post.audios, dir).await?;
        }

        if !audio_files.is_empty()
            && audio_files
                .iter()
                .all(|f| track_order(&f.source_name).is_some())
        {
            audio_files.sort_by_key(|f| track_order(&f.source_name));
        }

        if archive_files.len() > EXPECTED_MAX_ARCHIVES {
            warn!(
                post_id = post.id.0,
                archives = archive_files.len(),
                "Too many archive files attached to post"
            );
        }

        Ok((audio_files, archive_files))
    }

    /// Download every archive concurrently; the result is ordered smallest first
    async fn download_archives(
        &self,
        archives: &[ArchiveRef],
        dir: &PostDir,
    ) -> Result<Vec<DownloadedArchive>> {
        let mut ordered: Vec<&ArchiveRef> = archives.iter().collect();
        ordered.sort_by_key(|a| a.declared_size);

        let names = unique_names(
            ordered
                .iter()
                .map(|a| sanitize_filename(&self.expander.normalizer().fix(&a.display_name))),
        );

        let downloaded = try_join_all(
            ordered
                .into_iter()
                .zip(names)
                .map(|(archive, name)| self.download_archive(archive, name, dir)),
        )
        .await?;

        Ok(downloaded.into_iter().flatten().collect())
    }

    async fn download_archive(
        &self,
        archive: &ArchiveRef,
        name: String,
        dir: &PostDir,
    ) -> Result<Option<DownloadedArchive>> {
        let mut stream = match self.acquirer.acquire(&archive.uri).await? {
            Acquisition::Found(stream) => stream,
            Acquisition::SoftUnavailable => {
                warn!(
                    uri = %archive.uri,
                    archive = %archive.display_name,
                    "Archive unavailable, skipping"
                );
                return Ok(None);
            }
        };

        let declared_size = stream.content_length().unwrap_or(archive.declared_size);
        let started = Instant::now();
        let parts = self
            .chunker
            .write(&mut stream, declared_size, dir.local(), &name)
            .await?;
        debug!(
            archive = %name,
            parts = parts.len(),
            elapsed_ms = started.elapsed().as_millis(),
            "Archive downloaded"
        );

        Ok(Some(DownloadedArchive {
            origin: archive.clone(),
            parts,
        }))
    }

    /// Download and save the post's own tracks, numbered in post order
    async fn save_direct_audios(&self, audios: &[AudioRef], dir: &PostDir) -> Result<Vec<AudioFile>> {
        let downloaded = try_join_all(audios.iter().map(|audio| self.download_audio(audio))).await?;

        let mut files = Vec::new();
        let mut track_number = 0;
        for (audio, data) in audios.iter().zip(downloaded) {
            let Some(data) = data else { continue };
            track_number += 1;
            let tags = AudioTags {
                title: Some(self.expander.normalizer().fix(&audio.title)),
                artist: Some(self.expander.normalizer().fix(&audio.artist)),
                duration_seconds: audio.duration_seconds,
            };
            let source_name = format!("{}.mp3", audio.title);
            files.extend(
                self.expander
                    .save_track(data, tags, track_number, &source_name, dir)
                    .await?,
            );
        }

        debug!(tracks = files.len(), "Saved directly attached tracks");
        Ok(files)
    }

    async fn download_audio(&self, audio: &AudioRef) -> Result<Option<Vec<u8>>> {
        match self.acquirer.acquire(&audio.uri).await? {
            Acquisition::Found(mut stream) => Ok(Some(read_all(&mut stream).await?)),
            Acquisition::SoftUnavailable => {
                warn!(uri = %audio.uri, title = %audio.title, "Track unavailable, skipping");
                Ok(None)
            }
        }
    }
}

/// Read a whole stream into memory, starting over when the host rewinds
async fn read_all(stream: &mut ResilientStream) -> Result<Vec<u8>> {
    let capacity = stream.content_length().unwrap_or(0).min(64 * 1024 * 1024) as usize;
    let mut data = Vec::with_capacity(capacity);
    let mut buf = vec![0u8; AUDIO_READ_BUFFER];
    loop {
        match stream.read(&mut buf).await? {
            ReadOutcome::Read(0) => return Ok(data),
            ReadOutcome::Read(n) => data.extend_from_slice(&buf[..n]),
            ReadOutcome::Rewound => data.clear(),
        }
    }
}

/// Make names unique within one post directory by prefixing duplicates
fn unique_names(names: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .enumerate()
        .map(|(i, name)| {
            let name = if name.is_empty() {
                format!("archive_{i}")
            } else {
                name
            };
            if seen.insert(name.clone()) {
                name
            } else {
                let renamed = format!("{i}_{name}");
                seen.insert(renamed.clone());
                renamed
            }
        })
        .collect()
}

async fn remove_parts(parts: &[PathBuf]) {
    for part in parts {
        if let Err(e) = tokio::fs::remove_file(part).await {
            warn!(path = %part.display(), error = %e, "Failed to remove archive file");
        }
    }
}
