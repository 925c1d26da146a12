use crate::artifact::{ArtifactChunker, BufferPool, TempArena};
use crate::clients::{IdentityNormalizer, MetadataReader, NoOpMetadataReader, TextNormalizer};
use crate::extraction::*;
use crate::types::AudioTags;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Create a valid ZIP archive containing the given files, uncompressed
fn create_zip_archive(archive_path: &Path, files: &[(&str, &str)]) {
    let file = std::fs::File::create(archive_path).unwrap();
    let mut writer = ::zip::ZipWriter::new(file);
    let options =
        ::zip::write::FileOptions::default().compression_method(::zip::CompressionMethod::Stored);
    for (name, content) in files {
        writer.start_file(*name, options).unwrap();
        std::io::Write::write_all(&mut writer, content.as_bytes()).unwrap();
    }
    writer.finish().unwrap();
}

/// Create a valid 7z archive from a source directory using sevenz_rust
fn create_7z_archive(archive_path: &Path, source_dir: &Path) {
    sevenz_rust::compress_to_path(source_dir, archive_path).unwrap();
}

/// Tags looked up by entry name
struct FixedTags(HashMap<String, AudioTags>);

impl MetadataReader for FixedTags {
    fn read_tags(&self, _bytes: &[u8], name: &str) -> crate::Result<AudioTags> {
        self.0
            .get(name)
            .cloned()
            .ok_or_else(|| crate::Error::Metadata(format!("no tags for {name}")))
    }
}

/// Replaces `?` with `é`, standing in for a charset repair
struct QuestionMarkFixer;

impl TextNormalizer for QuestionMarkFixer {
    fn fix(&self, text: &str) -> String {
        text.replace('?', "é")
    }
}

fn tags(title: &str, artist: &str, duration_seconds: u32) -> AudioTags {
    AudioTags {
        title: Some(title.to_string()),
        artist: Some(artist.to_string()),
        duration_seconds,
    }
}

fn expander_with(
    transport_limit: u64,
    normalizer: Arc<dyn TextNormalizer>,
    metadata: Arc<dyn MetadataReader>,
) -> ArchiveExpander {
    let chunker = ArtifactChunker::new(transport_limit, BufferPool::new(4096, 2));
    ArchiveExpander::new(chunker, normalizer, metadata)
}

fn plain_expander() -> ArchiveExpander {
    expander_with(
        u64::MAX,
        Arc::new(IdentityNormalizer),
        Arc::new(NoOpMetadataReader),
    )
}

fn file_names(tracks: &[crate::artifact::AudioFile]) -> Vec<String> {
    tracks
        .iter()
        .map(|t| {
            t.artifact
                .local_path
                .file_name()
                .unwrap()
                .to_string_lossy()
                .into_owned()
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Format detection
// ---------------------------------------------------------------------------

#[test]
fn test_detect_recognises_magic_bytes() {
    assert_eq!(detect_archive_kind(b"PK\x03\x04rest"), Some(ArchiveKind::Zip));
    assert_eq!(detect_archive_kind(b"PK\x05\x06"), Some(ArchiveKind::Zip));
    assert_eq!(
        detect_archive_kind(&[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C, 0x00, 0x04]),
        Some(ArchiveKind::SevenZip)
    );
    assert_eq!(detect_archive_kind(b"Rar!\x1A\x07\x00"), Some(ArchiveKind::Rar));
    assert_eq!(detect_archive_kind(b"Rar!\x1A\x07\x01\x00"), Some(ArchiveKind::Rar));
    assert_eq!(detect_archive_kind(b"ID3\x04"), None);
    assert_eq!(detect_archive_kind(b""), None);
}

#[tokio::test]
async fn test_sniff_reads_file_header() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("album.bin");
    create_zip_archive(&path, &[("a.mp3", "audio")]);

    assert_eq!(sniff_archive_kind(&path).await.unwrap(), Some(ArchiveKind::Zip));

    let short = temp_dir.path().join("short.bin");
    std::fs::write(&short, b"PK").unwrap();
    assert_eq!(sniff_archive_kind(&short).await.unwrap(), None);
}

// ---------------------------------------------------------------------------
// Expansion
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_zip_keeps_only_audio_entries_in_archive_order() {
    let temp_dir = TempDir::new().unwrap();
    let arena = TempArena::new(temp_dir.path().join("files"), "/srv/files");
    let post_dir = arena.allocate().await.unwrap();

    let archive = temp_dir.path().join("album.zip");
    create_zip_archive(
        &archive,
        &[
            ("Album/01 intro.mp3", "first track"),
            ("Album/cover.jpg", "jpeg"),
            ("Album/notes.txt", "liner notes"),
            ("Album/02 song.FLAC", "second track"),
        ],
    );

    let tracks = plain_expander().expand(&archive, &post_dir, 0).await.unwrap().tracks;

    assert_eq!(file_names(&tracks), vec!["01 intro.mp3", "02 song.mp3"]);
    assert_eq!(
        std::fs::read(&tracks[0].artifact.local_path).unwrap(),
        b"first track"
    );
    assert_eq!(tracks[1].source_name, "02 song.FLAC");
    assert!(tracks[0].title.is_none());
    assert!(
        tracks[0]
            .artifact
            .server_path
            .starts_with(post_dir.server())
    );

    post_dir.release().await.unwrap();
}

#[tokio::test]
async fn test_tagged_tracks_are_numbered_after_previous_tracks() {
    let temp_dir = TempDir::new().unwrap();
    let arena = TempArena::new(temp_dir.path().join("files"), "/srv/files");
    let post_dir = arena.allocate().await.unwrap();

    let archive = temp_dir.path().join("disc2.zip");
    create_zip_archive(
        &archive,
        &[("a.mp3", "one"), ("b.mp3", "two"), ("c.mp3", "three")],
    );

    let mut by_name = HashMap::new();
    by_name.insert("a.mp3".to_string(), tags("Opening", "The Band", 61));
    by_name.insert("b.mp3".to_string(), tags("Interlude", "", 30));
    by_name.insert("c.mp3".to_string(), tags("  ", "The Band", 90));
    let expander = expander_with(
        u64::MAX,
        Arc::new(IdentityNormalizer),
        Arc::new(FixedTags(by_name)),
    );

    let tracks = expander.expand(&archive, &post_dir, 4).await.unwrap().tracks;

    assert_eq!(
        file_names(&tracks),
        vec!["05. The Band - Opening.mp3", "06. Interlude.mp3", "c.mp3"]
    );
    assert_eq!(tracks[0].artist.as_deref(), Some("The Band"));
    assert_eq!(tracks[0].duration_seconds, 61);
    assert_eq!(tracks[1].artist, None);
    assert_eq!(tracks[2].title, None);
    assert_eq!(tracks[2].artist, None, "artist is dropped without a title");
    assert_eq!(tracks[2].duration_seconds, 90);

    post_dir.release().await.unwrap();
}

#[tokio::test]
async fn test_failing_metadata_reader_falls_back_to_entry_name() {
    let temp_dir = TempDir::new().unwrap();
    let arena = TempArena::new(temp_dir.path().join("files"), "/srv/files");
    let post_dir = arena.allocate().await.unwrap();

    let archive = temp_dir.path().join("album.zip");
    create_zip_archive(&archive, &[("untagged track.wav", "pcm")]);

    let expander = expander_with(
        u64::MAX,
        Arc::new(IdentityNormalizer),
        Arc::new(FixedTags(HashMap::new())),
    );
    let tracks = expander.expand(&archive, &post_dir, 0).await.unwrap().tracks;

    assert_eq!(file_names(&tracks), vec!["untagged track.mp3"]);
    assert_eq!(tracks[0].duration_seconds, 0);

    post_dir.release().await.unwrap();
}

#[tokio::test]
async fn test_entry_names_pass_through_normalizer() {
    let temp_dir = TempDir::new().unwrap();
    let arena = TempArena::new(temp_dir.path().join("files"), "/srv/files");
    let post_dir = arena.allocate().await.unwrap();

    let archive = temp_dir.path().join("album.zip");
    create_zip_archive(&archive, &[("caf?.mp3", "data")]);

    let expander = expander_with(
        u64::MAX,
        Arc::new(QuestionMarkFixer),
        Arc::new(NoOpMetadataReader),
    );
    let tracks = expander.expand(&archive, &post_dir, 0).await.unwrap().tracks;

    assert_eq!(tracks[0].source_name, "café.mp3");
    assert_eq!(file_names(&tracks), vec!["café.mp3"]);

    post_dir.release().await.unwrap();
}

#[tokio::test]
async fn test_oversized_track_is_split_into_parts() {
    let temp_dir = TempDir::new().unwrap();
    let arena = TempArena::new(temp_dir.path().join("files"), "/srv/files");
    let post_dir = arena.allocate().await.unwrap();

    let content = "7".repeat(25);
    let archive = temp_dir.path().join("album.zip");
    create_zip_archive(&archive, &[("long.mp3", content.as_str())]);

    let expander = expander_with(
        10,
        Arc::new(IdentityNormalizer),
        Arc::new(NoOpMetadataReader),
    );
    let tracks = expander.expand(&archive, &post_dir, 0).await.unwrap().tracks;

    assert_eq!(
        file_names(&tracks),
        vec!["long.mp3.000", "long.mp3.001", "long.mp3.002"]
    );
    let sizes: Vec<u64> = tracks
        .iter()
        .map(|t| std::fs::metadata(&t.artifact.local_path).unwrap().len())
        .collect();
    assert_eq!(sizes, vec![10, 10, 5]);

    post_dir.release().await.unwrap();
}

#[tokio::test]
async fn test_sevenz_archive_is_expanded() {
    let temp_dir = TempDir::new().unwrap();
    let arena = TempArena::new(temp_dir.path().join("files"), "/srv/files");
    let post_dir = arena.allocate().await.unwrap();

    let src_dir = temp_dir.path().join("source");
    std::fs::create_dir_all(&src_dir).unwrap();
    std::fs::write(src_dir.join("track.ogg"), b"vorbis data").unwrap();
    std::fs::write(src_dir.join("readme.txt"), b"not audio").unwrap();

    let archive = temp_dir.path().join("album.7z");
    create_7z_archive(&archive, &src_dir);

    let tracks = plain_expander().expand(&archive, &post_dir, 0).await.unwrap().tracks;

    assert_eq!(file_names(&tracks), vec!["track.mp3"]);
    assert_eq!(
        std::fs::read(&tracks[0].artifact.local_path).unwrap(),
        b"vorbis data"
    );

    post_dir.release().await.unwrap();
}

#[tokio::test]
async fn test_unknown_format_yields_no_tracks() {
    let temp_dir = TempDir::new().unwrap();
    let arena = TempArena::new(temp_dir.path().join("files"), "/srv/files");
    let post_dir = arena.allocate().await.unwrap();

    let archive = temp_dir.path().join("album.zip");
    std::fs::write(&archive, b"<html>file removed</html>").unwrap();

    let expansion = plain_expander().expand(&archive, &post_dir, 0).await.unwrap();
    assert!(expansion.tracks.is_empty());
    assert!(expansion.unreadable);

    post_dir.release().await.unwrap();
}

#[tokio::test]
async fn test_corrupt_archive_yields_no_tracks() {
    let temp_dir = TempDir::new().unwrap();
    let arena = TempArena::new(temp_dir.path().join("files"), "/srv/files");
    let post_dir = arena.allocate().await.unwrap();

    let archive = temp_dir.path().join("broken.zip");
    let mut bytes = b"PK\x03\x04".to_vec();
    bytes.extend_from_slice(&[0xFF; 64]);
    std::fs::write(&archive, bytes).unwrap();

    let expansion = plain_expander().expand(&archive, &post_dir, 0).await.unwrap();
    assert!(expansion.tracks.is_empty());
    assert!(expansion.unreadable);
    assert_eq!(
        std::fs::read_dir(post_dir.local()).unwrap().count(),
        0,
        "no partial tracks are left behind"
    );

    post_dir.release().await.unwrap();
}

#[tokio::test]
async fn test_missing_archive_yields_no_tracks() {
    let temp_dir = TempDir::new().unwrap();
    let arena = TempArena::new(temp_dir.path().join("files"), "/srv/files");
    let post_dir = arena.allocate().await.unwrap();

    let expansion = plain_expander()
        .expand(&temp_dir.path().join("nope.zip"), &post_dir, 0)
        .await
        .unwrap();
    assert!(expansion.tracks.is_empty());
    assert!(expansion.unreadable);

    post_dir.release().await.unwrap();
}

#[tokio::test]
async fn test_readable_archive_without_audio_is_not_unreadable() {
    let temp_dir = TempDir::new().unwrap();
    let arena = TempArena::new(temp_dir.path().join("files"), "/srv/files");
    let post_dir = arena.allocate().await.unwrap();

    let archive = temp_dir.path().join("scans.zip");
    create_zip_archive(&archive, &[("booklet.pdf", "pdf"), ("cover.png", "png")]);

    let expansion = plain_expander().expand(&archive, &post_dir, 0).await.unwrap();
    assert!(expansion.tracks.is_empty());
    assert!(!expansion.unreadable);

    post_dir.release().await.unwrap();
}
