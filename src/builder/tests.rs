use super::*;
use crate::error::Error;
use crate::testing::{FakeMessenger, FakeSource, test_config, test_context, text_post};
use std::io::Write;
use std::sync::Arc;
use tempfile::TempDir;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Zip archive bytes with the given entries, uncompressed
fn zip_bytes(files: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = ::zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options =
        ::zip::write::FileOptions::default().compression_method(::zip::CompressionMethod::Stored);
    for (name, content) in files {
        writer.start_file(*name, options).unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

async fn serve(server: &MockServer, route: &str, status: u16, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(status).set_body_bytes(body))
        .mount(server)
        .await;
}

fn url(server: &MockServer, route: &str) -> Url {
    format!("{}{}", server.uri(), route).parse().unwrap()
}

fn archive_ref(server: &MockServer, route: &str, declared_size: u64, name: &str) -> ArchiveRef {
    ArchiveRef {
        uri: url(server, route),
        declared_size,
        display_name: name.to_string(),
    }
}

struct Harness {
    _root: TempDir,
    ctx: MirrorContext,
    worker: BuildWorker,
}

async fn harness() -> Harness {
    let root = TempDir::new().unwrap();
    let ctx = test_context(
        test_config(root.path()),
        Arc::new(FakeSource::default()),
        Arc::new(FakeMessenger::default()),
    )
    .await;
    let worker = BuildWorker::new(&ctx);
    Harness {
        _root: root,
        ctx,
        worker,
    }
}

fn local_names(package: &PostPackage) -> Vec<String> {
    package
        .audio_files
        .iter()
        .map(|f| {
            f.artifact
                .local_path
                .file_name()
                .unwrap()
                .to_string_lossy()
                .into_owned()
        })
        .collect()
}

fn archive_names(package: &PostPackage) -> Vec<String> {
    package
        .archive_files
        .iter()
        .map(|f| f.origin.display_name.clone())
        .collect()
}

#[test]
fn test_multi_disc_names() {
    assert!(is_multi_disc("Album (Disc 2).zip"));
    assert!(is_multi_disc("album_cd1.rar"));
    assert!(is_multi_disc("DISK3.7z"));
    assert!(!is_multi_disc("discography.zip"));
    assert!(!is_multi_disc("album.zip"));
    assert!(!is_multi_disc("abcd 2019.zip"));
    assert!(is_multi_disc("Album - CD-2.zip"));
}

#[test]
fn test_unique_names_prefix_duplicates() {
    let names = unique_names(
        ["a.zip", "a.zip", "", "b.zip"]
            .into_iter()
            .map(str::to_string),
    );
    assert_eq!(names, vec!["a.zip", "1_a.zip", "archive_2", "b.zip"]);
}

#[tokio::test]
async fn test_prepare_text_uses_caption_limit_with_photo() {
    let h = harness().await;
    let body = "a line of text\n".repeat(100);
    let mut post = text_post(12, &body);

    let plain = h.worker.prepare_text(&post);
    assert_eq!(plain.len(), 1);
    assert!(plain[0].ends_with("\n\nhttps://feed.example/post/12"));

    post.photo = Some("photo".to_string());
    let captioned = h.worker.prepare_text(&post);
    assert_eq!(captioned.len(), 2);
    assert!(captioned[0].chars().count() <= 1024);
    assert!(captioned[0].ends_with('\n'));
    assert_eq!(captioned.concat(), plain[0]);
}

#[tokio::test]
async fn test_text_only_post_has_no_files() {
    let h = harness().await;

    let package = h.worker.build(&text_post(1, "hello")).await.unwrap();

    assert_eq!(package.post_id, PostId(1));
    assert_eq!(package.text_parts, vec!["hello\n\nhttps://feed.example/post/1"]);
    assert!(package.audio_files.is_empty());
    assert!(package.archive_files.is_empty());
    assert_eq!(h.ctx.arena.live_count(), 1);
    package.release().await.unwrap();
    assert_eq!(h.ctx.arena.live_count(), 0);
}

#[tokio::test]
async fn test_first_archive_with_audio_supplies_tracks() {
    let h = harness().await;
    let server = MockServer::start().await;
    serve(&server, "/notes", 200, zip_bytes(&[("readme.txt", "hi")])).await;
    serve(
        &server,
        "/album",
        200,
        zip_bytes(&[("02_second.mp3", "bb"), ("01_first.flac", "aa")]),
    )
    .await;
    serve(&server, "/extras", 200, zip_bytes(&[("bonus.mp3", "cc")])).await;

    let mut post = text_post(2, "album");
    // listed out of size order on purpose
    post.archives = vec![
        archive_ref(&server, "/extras", 300, "extras.zip"),
        archive_ref(&server, "/notes", 100, "notes.zip"),
        archive_ref(&server, "/album", 200, "album.zip"),
    ];

    let package = h.worker.build(&post).await.unwrap();

    assert_eq!(local_names(&package), vec!["01_first.mp3", "02_second.mp3"]);
    assert_eq!(archive_names(&package), vec!["album.zip", "extras.zip"]);
    assert!(!package.dir().local().join("notes.zip").exists());
    assert!(package.dir().local().join("extras.zip").exists());
    for file in &package.audio_files {
        assert!(file.artifact.local_path.exists());
        assert!(file.artifact.server_path.starts_with("/srv/files"));
    }
    package.release().await.unwrap();
}

#[tokio::test]
async fn test_multi_disc_archives_append_tracks() {
    let h = harness().await;
    let server = MockServer::start().await;
    serve(
        &server,
        "/cd1",
        200,
        zip_bytes(&[("a.mp3", "1"), ("b.mp3", "2")]),
    )
    .await;
    serve(&server, "/cd2", 200, zip_bytes(&[("c.mp3", "3")])).await;

    let mut post = text_post(3, "double album");
    post.archives = vec![
        archive_ref(&server, "/cd1", 10, "Album CD1.zip"),
        archive_ref(&server, "/cd2", 20, "Album CD2.zip"),
    ];

    let package = h.worker.build(&post).await.unwrap();

    assert_eq!(local_names(&package), vec!["a.mp3", "b.mp3", "c.mp3"]);
    assert_eq!(
        archive_names(&package),
        vec!["Album CD1.zip", "Album CD2.zip"]
    );
    package.release().await.unwrap();
}

#[tokio::test]
async fn test_corrupt_archive_stays_attached() {
    let h = harness().await;
    let server = MockServer::start().await;
    serve(&server, "/broken", 200, b"PK\x03\x04 not really a zip".to_vec()).await;

    let mut post = text_post(4, "broken");
    post.archives = vec![archive_ref(&server, "/broken", 0, "broken.zip")];

    let package = h.worker.build(&post).await.unwrap();

    assert!(package.audio_files.is_empty());
    assert_eq!(archive_names(&package), vec!["broken.zip"]);
    package.release().await.unwrap();
}

#[tokio::test]
async fn test_missing_archive_is_skipped() {
    let h = harness().await;
    let server = MockServer::start().await;
    serve(&server, "/gone", 404, Vec::new()).await;
    serve(&server, "/here", 200, zip_bytes(&[("song.mp3", "x")])).await;

    let mut post = text_post(5, "one gone");
    post.archives = vec![
        archive_ref(&server, "/gone", 1, "gone.zip"),
        archive_ref(&server, "/here", 2, "here.zip"),
    ];

    let package = h.worker.build(&post).await.unwrap();

    assert_eq!(local_names(&package), vec!["song.mp3"]);
    assert_eq!(archive_names(&package), vec!["here.zip"]);
    package.release().await.unwrap();
}

#[tokio::test]
async fn test_direct_audio_fallback_uses_reference_tags() {
    let h = harness().await;
    let server = MockServer::start().await;
    serve(&server, "/t1", 200, b"track one".to_vec()).await;
    serve(&server, "/t2", 404, Vec::new()).await;
    serve(&server, "/t3", 200, b"track three".to_vec()).await;

    let audio = |route: &str, title: &str| AudioRef {
        uri: url(&server, route),
        title: title.to_string(),
        artist: "The Band".to_string(),
        duration_seconds: 180,
    };
    let mut post = text_post(6, "singles");
    post.audios = vec![audio("/t1", "Opening"), audio("/t2", "Lost"), audio("/t3", "Closing")];

    let package = h.worker.build(&post).await.unwrap();

    assert_eq!(
        local_names(&package),
        vec!["01. The Band - Opening.mp3", "02. The Band - Closing.mp3"]
    );
    let first = &package.audio_files[0];
    assert_eq!(first.title.as_deref(), Some("Opening"));
    assert_eq!(first.artist.as_deref(), Some("The Band"));
    assert_eq!(first.duration_seconds, 180);
    assert_eq!(
        std::fs::read(&first.artifact.local_path).unwrap(),
        b"track one"
    );
    package.release().await.unwrap();
}

#[tokio::test]
async fn test_numbered_source_names_are_sorted() {
    let h = harness().await;
    let server = MockServer::start().await;
    serve(
        &server,
        "/album",
        200,
        zip_bytes(&[("2_b.mp3", "b"), ("10_a.mp3", "a"), ("1_c.mp3", "c")]),
    )
    .await;

    let mut post = text_post(7, "unordered");
    post.archives = vec![archive_ref(&server, "/album", 0, "album.zip")];

    let package = h.worker.build(&post).await.unwrap();

    assert_eq!(
        local_names(&package),
        vec!["1_c.mp3", "2_b.mp3", "10_a.mp3"]
    );
    package.release().await.unwrap();
}

#[tokio::test]
async fn test_failed_build_releases_directory() {
    let h = harness().await;
    let server = MockServer::start().await;
    serve(&server, "/forbidden", 403, b"no".to_vec()).await;

    let mut post = text_post(8, "forbidden");
    post.archives = vec![archive_ref(&server, "/forbidden", 0, "album.zip")];

    let err = h.worker.build(&post).await.unwrap_err();

    assert!(matches!(err, Error::HttpStatus { status: 403, .. }));
    assert_eq!(h.ctx.arena.live_count(), 0);
    assert_eq!(
        std::fs::read_dir(h.ctx.arena.local_root()).unwrap().count(),
        0
    );
}
