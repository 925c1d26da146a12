//! Posts, archives and configuration for integration tests

use feed_mirror::config::RetryConfig;
use feed_mirror::{ArchiveRef, Config, PostId, SourcePost};
use std::io::Write;
use std::path::Path;
use std::time::Duration;

/// Post with text only
pub fn text_post(id: i64, text: &str) -> SourcePost {
    SourcePost {
        id: PostId(id),
        text: text.to_string(),
        photo: None,
        archives: Vec::new(),
        audios: Vec::new(),
        is_private_tier: false,
    }
}

/// Post carrying one archive
pub fn album_post(id: i64, text: &str, archive: ArchiveRef) -> SourcePost {
    SourcePost {
        archives: vec![archive],
        ..text_post(id, text)
    }
}

/// Uncompressed zip archive with the given entries
pub fn zip_bytes(files: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options =
        zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for (name, content) in files {
        writer.start_file(*name, options).unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Configuration rooted in `root` with no waiting between posts
pub fn config_in(root: &Path) -> Config {
    let mut config = Config::default();
    config.storage.database_path = root.join("state.db");
    config.storage.local_files_dir = root.join("files");
    config.storage.server_files_dir = "/srv/files".into();
    config.feed.permalink_template = "https://feed.example/post/{id}".to_string();
    config.download.min_plausible_size = 0;
    config.download.transfer_buffer_size = 64 * 1024;
    config.source.retry = RetryConfig {
        max_attempts: Some(1),
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(1),
        backoff_multiplier: 1.0,
        jitter: false,
    };
    config.pipeline.publish_pacing = Duration::ZERO;
    config.pipeline.comment_repoll_attempts = 0;
    config
}
